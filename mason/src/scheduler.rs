//! The evaluator: drives a set of demanded keys to completion on a bounded
//! worker pool.
//!
//! Scheduling is cooperative: a computation that cannot make progress returns
//! the incomplete outcome instead of blocking its worker, its node stays
//! registered as a dependent of the missing keys, and completion of any of
//! those keys re-enqueues it. The requeue-on-completion loop below is the
//! entire scheduling mechanism; there are no blocked threads and no
//! coroutines.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{Computation, EvalError, InvariantViolation, Key, Outcome, Registry, Value};
use crate::env::{Attempt, Env};
use crate::error::Failure;
use crate::mason::{CancelToken, EvalParams, EvalResult};
use crate::store::{DepMode, Dirtiness, NodeId, NodeState, Store};
use crate::tracker::Tracker;

/// State shared between the workers of one evaluation. The store is the
/// single shared mutable resource; every structural mutation happens while
/// holding the state lock, so no worker can observe a dependency edge without
/// its reverse edge.
pub(crate) struct EvalShared<'e, K: Key> {
  pub(crate) state: Mutex<EvalState<'e, K>>,
  pub(crate) work_ready: Condvar,
  pub(crate) cancel: CancelToken,
  registry: &'e Registry<K>,
}

pub(crate) struct EvalState<'e, K: Key> {
  pub(crate) store: &'e mut Store<K>,
  tracker: &'e mut (dyn Tracker<K> + Send),
  queue: VecDeque<NodeId>,
  queued: HashSet<NodeId>,
  /// Nodes demanded this evaluation: roots plus everything enqueued for them.
  /// Only demanded nodes are re-enqueued when a dependency resolves, keeping
  /// evaluation lazy with respect to unrelated parts of the graph.
  demanded: HashSet<NodeId>,
  /// Nodes resolved this evaluation: completed, failed, or verified clean.
  consistent: HashSet<NodeId>,
  /// Values displaced by re-runs, kept for change comparison on completion.
  prior_values: HashMap<NodeId, Arc<dyn Value>>,
  /// Nodes with an attempt in flight; at most one attempt per node.
  invoking: HashSet<NodeId>,
  in_flight: usize,
  finished: bool,
}

/// Availability of a node's result as observed by a dependency request.
pub(crate) enum Resolution<K: Key> {
  /// The node is done and its value can be trusted.
  Value(Arc<dyn Value>),
  /// The node settled on an error this evaluation, or caches a
  /// non-retryable error from an earlier one.
  Error(Arc<EvalError<K>>),
  /// The node has no trusted result yet.
  Unresolved,
}

/// What a worker should do with a popped node.
enum Dispatch<K: Key> {
  /// Invoke the key's computation outside the lock.
  Invoke(Arc<dyn Computation<K>>, K),
  /// Nothing to do right now: the node is already resolved, or waits for
  /// dependencies that have been scheduled.
  Nothing,
}

/// Evaluates `roots` to completion, returning a value or error per root.
pub(crate) fn evaluate<K: Key>(
  store: &mut Store<K>,
  registry: &Registry<K>,
  tracker: &mut (dyn Tracker<K> + Send),
  roots: &[K],
  params: &EvalParams,
) -> EvalResult<K> {
  let cancel = params.cancel_token().cloned().unwrap_or_default();
  let shared = EvalShared {
    state: Mutex::new(EvalState {
      store,
      tracker,
      queue: VecDeque::new(),
      queued: HashSet::default(),
      demanded: HashSet::default(),
      consistent: HashSet::default(),
      prior_values: HashMap::default(),
      invoking: HashSet::default(),
      in_flight: 0,
      finished: false,
    }),
    work_ready: Condvar::new(),
    cancel,
    registry,
  };

  {
    let mut state = shared.state.lock();
    state.tracker.evaluate_start(roots);
    for root in roots {
      let node = state.store.get_or_create_node(root);
      match state.resolution(node) {
        Resolution::Unresolved => state.enqueue(node),
        _ => state.tracker.reused(root),
      }
    }
  }

  let workers = params.worker_count();
  std::thread::scope(|scope| {
    for _ in 0..workers {
      scope.spawn(|| worker_loop(&shared));
    }
  });

  let cancelled = shared.cancel.is_cancelled();
  let state = shared.state.into_inner();
  let mut results = HashMap::with_capacity(roots.len());
  for root in roots {
    // Unwrap OK: every root was interned while seeding the queue.
    let node = state.store.node_by_key(root).unwrap();
    let result = match state.store.state(node) {
      NodeState::Done => {
        // Unwrap OK: done nodes always hold a value.
        Ok(state.store.value(node).unwrap().clone())
      }
      NodeState::Error => {
        // Unwrap OK: error nodes always hold an error.
        Err(state.store.error(node).unwrap().clone())
      }
      _ if cancelled => Err(Arc::new(EvalError::Cancelled)),
      _ => Err(Arc::new(EvalError::Stalled { key: root.clone() })),
    };
    results.insert(root.clone(), result);
  }
  state.tracker.evaluate_end(cancelled);
  EvalResult::new(results, cancelled)
}

fn worker_loop<K: Key>(shared: &EvalShared<'_, K>) {
  let mut state = shared.state.lock();
  loop {
    if shared.cancel.is_cancelled() || state.finished {
      state.finished = true;
      shared.work_ready.notify_all();
      return;
    }
    let Some(node) = state.pop() else {
      if state.in_flight == 0 {
        state.finished = true;
        shared.work_ready.notify_all();
        return;
      }
      shared.work_ready.wait(&mut state);
      continue;
    };
    match state.dispatch(node, shared.registry) {
      Dispatch::Invoke(computation, key) => {
        state.invoking.insert(node);
        state.in_flight += 1;
        state.tracker.invoke_start(&key);
        drop(state);

        let mut env = Env::new(shared);
        let result = computation.compute(&key, &mut env);
        let attempt = env.into_attempt();

        state = shared.state.lock();
        state.invoking.remove(&node);
        state.in_flight -= 1;
        state.finish_attempt(node, key, result, attempt, &shared.cancel);
        shared.work_ready.notify_all();
      }
      Dispatch::Nothing => {
        shared.work_ready.notify_all();
      }
    }
  }
}

impl<'e, K: Key> EvalState<'e, K> {
  /// How a dependency request observes `node` right now.
  pub(crate) fn resolution(&self, node: NodeId) -> Resolution<K> {
    match self.store.state(node) {
      NodeState::Done => {
        if self.store.dirtiness(node) == Dirtiness::Clean || self.consistent.contains(&node) {
          // Unwrap OK: done nodes always hold a value.
          Resolution::Value(self.store.value(node).unwrap().clone())
        } else {
          Resolution::Unresolved
        }
      }
      NodeState::Error => {
        // Unwrap OK: error nodes always hold an error.
        let error = self.store.error(node).unwrap();
        let settled = self.consistent.contains(&node)
          || (self.store.dirtiness(node) == Dirtiness::Clean && !error.is_transient());
        if settled {
          Resolution::Error(error.clone())
        } else {
          // A transient or invalidated error is re-attempted before dependents
          // may observe it.
          Resolution::Unresolved
        }
      }
      NodeState::NotStarted | NodeState::WaitingOnDeps => Resolution::Unresolved,
    }
  }

  fn pop(&mut self) -> Option<NodeId> {
    let node = self.queue.pop_front()?;
    self.queued.remove(&node);
    Some(node)
  }

  /// Enqueues `node` for (re-)checking, unless it is already queued, already
  /// resolved, or has an attempt in flight (its own outcome handling decides
  /// what happens next).
  fn enqueue(&mut self, node: NodeId) {
    if self.consistent.contains(&node) || self.invoking.contains(&node) {
      return;
    }
    if !self.queued.insert(node) {
      return;
    }
    self.demanded.insert(node);
    self.queue.push_back(node);
    self.tracker.scheduled(self.store.key(node));
  }

  /// Decides what to do with popped `node`.
  fn dispatch(&mut self, node: NodeId, registry: &Registry<K>) -> Dispatch<K> {
    if self.consistent.contains(&node) {
      return Dispatch::Nothing;
    }
    match self.store.state(node) {
      NodeState::NotStarted => self.prepare_invoke(node, registry),
      NodeState::WaitingOnDeps => self.check_waiting(node, registry),
      NodeState::Done | NodeState::Error => self.check_cached(node, registry),
    }
  }

  /// Re-checks a node that is waiting on dependencies: propagates a failed
  /// strict dependency, re-invokes when all dependencies resolved, or leaves
  /// it waiting for the completions that will re-enqueue it.
  fn check_waiting(&mut self, node: NodeId, registry: &Registry<K>) -> Dispatch<K> {
    let deps: Vec<_> = self.store.dependencies(node).collect();
    if deps.is_empty() {
      // No recorded dependencies, e.g. after a cancelled attempt: run it.
      return self.prepare_invoke(node, registry);
    }
    let mut all_resolved = true;
    for (dependency, edge) in deps {
      match self.resolution(dependency) {
        Resolution::Value(_) => {}
        Resolution::Error(error) => {
          if edge.mode == DepMode::Strict {
            self.fail_node(node, error);
            return Dispatch::Nothing;
          }
        }
        Resolution::Unresolved => {
          all_resolved = false;
          self.enqueue(dependency);
        }
      }
    }
    if all_resolved {
      self.prepare_invoke(node, registry)
    } else {
      Dispatch::Nothing
    }
  }

  /// Checks a node with a cached result: reuses it when clean, retries
  /// transient errors, re-runs changed nodes, and verifies dirty nodes
  /// against their dependencies with change pruning.
  fn check_cached(&mut self, node: NodeId, registry: &Registry<K>) -> Dispatch<K> {
    match self.store.dirtiness(node) {
      Dirtiness::Clean => {
        let retry = self.store.state(node) == NodeState::Error
          // Unwrap OK: error nodes always hold an error.
          && self.store.error(node).unwrap().is_transient();
        if retry {
          self.prepare_invoke(node, registry)
        } else {
          // Clean cached results are observed by resolution() directly;
          // nothing ever waits on this node.
          self.consistent.insert(node);
          Dispatch::Nothing
        }
      }
      Dirtiness::Changed => self.prepare_invoke(node, registry),
      Dirtiness::Dirty => {
        let deps: Vec<_> = self.store.dependencies(node).collect();
        let mut all_resolved = true;
        let mut needs_rerun = false;
        for (dependency, edge) in deps {
          match self.resolution(dependency) {
            Resolution::Value(value) => {
              if !edge.is_consistent_with(&value) {
                needs_rerun = true;
              }
            }
            // A dependency that is now an error always forces recomputation,
            // through which the failure propagates or is tolerated.
            Resolution::Error(_) => needs_rerun = true,
            Resolution::Unresolved => {
              all_resolved = false;
              self.enqueue(dependency);
            }
          }
        }
        if !all_resolved {
          Dispatch::Nothing
        } else if needs_rerun {
          self.prepare_invoke(node, registry)
        } else {
          // Change pruning: no dependency value changed, so the cached result
          // stands without re-running, and dependents are not re-enqueued as
          // changed.
          self.store.mark_dirtiness(node, Dirtiness::Clean);
          self.consistent.insert(node);
          self.tracker.pruned(self.store.key(node));
          self.notify_dependents(node);
          Dispatch::Nothing
        }
      }
    }
  }

  /// Starts an attempt for `node`: looks up its computation and transitions
  /// the node into the waiting state, keeping any displaced value for change
  /// comparison.
  fn prepare_invoke(&mut self, node: NodeId, registry: &Registry<K>) -> Dispatch<K> {
    let key = self.store.key(node).clone();
    let Some(computation) = registry.get(key.kind()) else {
      let error = Arc::new(EvalError::NoComputation { kind: key.kind() });
      self.fail_node(node, error);
      return Dispatch::Nothing;
    };
    if let Some(displaced) = self.store.begin_attempt(node) {
      self.prior_values.entry(node).or_insert(displaced);
    }
    Dispatch::Invoke(computation, key)
  }

  /// Applies the outcome of a finished attempt of `node`.
  fn finish_attempt(
    &mut self,
    node: NodeId,
    key: K,
    result: Result<Outcome, Failure>,
    attempt: Attempt<K>,
    cancel: &CancelToken,
  ) {
    if self.consistent.contains(&node) {
      // The node was settled while this attempt was in flight; that only
      // happens when another node's records closed a cycle through it. The
      // cycle error stands and this attempt's outcome is discarded.
      return;
    }
    let Attempt { records, missing, failed } = attempt;
    match result {
      Ok(Outcome::Complete(value)) => {
        if missing {
          let error = Arc::new(EvalError::Invariant {
            key,
            violation: InvariantViolation::CompleteWithMissing,
          });
          self.fail_node(node, error);
          return;
        }
        if let Err(cycle) = self.store.replace_dependencies(node, &records) {
          self.fail_cycle(cycle);
          return;
        }
        let value: Arc<dyn Value> = Arc::from(value);
        // Change pruning hinges on this comparison: an unchanged value keeps
        // the previous allocation and does not mark the node changed.
        let (value, changed) = match self.prior_values.get(&node) {
          Some(prior) if prior.as_ref() == value.as_ref() => (prior.clone(), false),
          _ => (value, true),
        };
        self.store.set_done(node, value.clone());
        self.consistent.insert(node);
        self.tracker.completed(&key, &value, changed);
        self.notify_dependents(node);
      }
      Ok(Outcome::Incomplete) => {
        if let Err(cycle) = self.store.replace_dependencies(node, &records) {
          self.fail_cycle(cycle);
          return;
        }
        if let Some(error) = failed {
          // A strict dependency failed: short-circuit with the same error.
          self.fail_node(node, error);
          return;
        }
        if cancel.is_cancelled() {
          // Leave the node waiting; the next evaluation resumes it.
          return;
        }
        if !missing {
          let error = Arc::new(EvalError::Invariant {
            key,
            violation: InvariantViolation::IncompleteWithoutMissing,
          });
          self.fail_node(node, error);
          return;
        }
        let mut unresolved = Vec::new();
        for (dependency, _) in &records {
          if matches!(self.resolution(*dependency), Resolution::Unresolved) {
            unresolved.push(*dependency);
          }
        }
        if unresolved.is_empty() {
          // Every missing dependency resolved while the attempt was still
          // running: retry immediately.
          self.enqueue(node);
          return;
        }
        let missing_keys: Vec<K> = unresolved.iter().map(|n| self.store.key(*n).clone()).collect();
        self.tracker.suspended(&key, &missing_keys);
        for dependency in unresolved {
          self.enqueue(dependency);
        }
      }
      Err(failure) => {
        // Record the attempt's dependencies even on failure: they are the
        // declared dependencies whose changes re-enable this node. A cycle
        // here is subsumed by the failure itself.
        let _ = self.store.replace_dependencies(node, &records);
        let error = Arc::new(EvalError::Failed { key, failure });
        self.fail_node(node, error);
      }
    }
  }

  /// Settles `node` on `error` and re-checks its waiting dependents, which
  /// propagate or tolerate the failure.
  fn fail_node(&mut self, node: NodeId, error: Arc<EvalError<K>>) {
    self.store.set_error(node, error.clone());
    self.consistent.insert(node);
    self.tracker.failed(self.store.key(node), &error);
    self.notify_dependents(node);
  }

  /// Settles every node on `cycle` on the same cycle error naming the full
  /// ordered key cycle.
  fn fail_cycle(&mut self, cycle: Vec<NodeId>) {
    let keys: Vec<K> = cycle.iter().map(|n| self.store.key(*n).clone()).collect();
    let error = Arc::new(EvalError::Cycle(keys));
    for node in cycle {
      self.fail_node(node, error.clone());
    }
  }

  /// Re-enqueues every demanded, unresolved dependent of `node` for
  /// re-checking after `node` resolved.
  fn notify_dependents(&mut self, node: NodeId) {
    let dependents: Vec<NodeId> = self.store.dependents(node).map(|(n, _)| n).collect();
    for dependent in dependents {
      if self.demanded.contains(&dependent) {
        self.enqueue(dependent);
      }
    }
  }
}
