use std::collections::HashMap;
use std::sync::Arc;

use mason_graph::Dag;

use crate::{EvalError, Key, Value};

/// Identifier of a node in the store's dependency graph.
pub(crate) type NodeId = mason_graph::Node;

/// Evaluation state of a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeState {
  /// The key was interned but its computation was never invoked.
  NotStarted,
  /// An evaluation attempt was started; the node has no trusted result yet.
  WaitingOnDeps,
  /// The computation completed; a cached value is present.
  Done,
  /// The computation failed; a classified error is present.
  Error,
}

/// Invalidation state of a node with a cached result.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dirtiness {
  /// The cached result can be trusted as-is.
  Clean,
  /// A transitive dependency was invalidated: the cached result must be
  /// re-verified against the node's direct dependencies before reuse, and
  /// recomputed only if one of them actually changed.
  Dirty,
  /// The node's own external input changed: the node must be recomputed when
  /// demanded.
  Changed,
}

/// How a dependency was requested.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum DepMode {
  /// A failed dependency fails the depender with the same error.
  Strict,
  /// A failed dependency is reported to the depender as data.
  Tolerant,
}

/// Dependency edge data: how the dependency was requested, stamped with the
/// value the depender observed.
#[derive(Clone, Debug)]
pub(crate) struct DepEdge {
  pub mode: DepMode,
  /// The dependency value observed when it was requested; `None` when the
  /// dependency was missing or observed as an error. Re-verification of a
  /// dirty depender compares this stamp against the dependency's current
  /// value to decide whether the depender must be recomputed.
  pub stamp: Option<Arc<dyn Value>>,
}

impl DepEdge {
  /// Returns true if `value` is the same value this edge was stamped with.
  pub fn is_consistent_with(&self, value: &Arc<dyn Value>) -> bool {
    match &self.stamp {
      Some(stamp) => Arc::ptr_eq(stamp, value) || stamp.as_ref() == value.as_ref(),
      None => false,
    }
  }
}

/// Evaluation record for one key.
#[derive(Debug)]
pub(crate) struct NodeData<K: Key> {
  key: K,
  state: NodeState,
  value: Option<Arc<dyn Value>>,
  error: Option<Arc<EvalError<K>>>,
  dirtiness: Dirtiness,
}

/// The node store: one node per interned key, holding its evaluation state,
/// cached result, dirtiness, and dependency edges in both directions.
///
/// The store owns all mutation of evaluation state. Edge updates go through
/// [`replace_dependencies`](Store::replace_dependencies), which keeps the
/// reverse edges the exact transpose of the forward edges; intermediate states
/// are never observable because the scheduler mutates the store under a single
/// lock.
pub(crate) struct Store<K: Key> {
  graph: Dag<NodeData<K>, DepEdge>,
  key_to_node: HashMap<K, NodeId>,
}

impl<K: Key> Default for Store<K> {
  #[inline]
  fn default() -> Self {
    Self { graph: Dag::default(), key_to_node: HashMap::default() }
  }
}

impl<K: Key> Store<K> {
  /// Gets the node for `key`, creating it in state
  /// [`NotStarted`](NodeState::NotStarted) if the key was never requested
  /// before.
  pub fn get_or_create_node(&mut self, key: &K) -> NodeId {
    if let Some(node) = self.key_to_node.get(key) {
      *node
    } else {
      let node = self.graph.add_node(NodeData {
        key: key.clone(),
        state: NodeState::NotStarted,
        value: None,
        error: None,
        dirtiness: Dirtiness::Clean,
      });
      self.key_to_node.insert(key.clone(), node);
      node
    }
  }

  /// Gets the node for `key` if it was requested before.
  #[inline]
  pub fn node_by_key(&self, key: &K) -> Option<NodeId> {
    self.key_to_node.get(key).copied()
  }

  #[inline]
  fn data(&self, node: NodeId) -> &NodeData<K> {
    self.graph.get_node_data(node).expect("BUG: node is not in the dependency graph")
  }
  #[inline]
  fn data_mut(&mut self, node: NodeId) -> &mut NodeData<K> {
    self.graph.get_node_data_mut(node).expect("BUG: node is not in the dependency graph")
  }

  /// Gets the key of `node`.
  #[inline]
  pub fn key(&self, node: NodeId) -> &K { &self.data(node).key }

  /// Gets the evaluation state of `node`.
  #[inline]
  pub fn state(&self, node: NodeId) -> NodeState { self.data(node).state }

  /// Gets the cached value of `node`; present iff its state is
  /// [`Done`](NodeState::Done).
  #[inline]
  pub fn value(&self, node: NodeId) -> Option<&Arc<dyn Value>> {
    self.data(node).value.as_ref()
  }

  /// Gets the cached error of `node`; present iff its state is
  /// [`Error`](NodeState::Error).
  #[inline]
  pub fn error(&self, node: NodeId) -> Option<&Arc<EvalError<K>>> {
    self.data(node).error.as_ref()
  }

  /// Gets the dirtiness of `node`.
  #[inline]
  pub fn dirtiness(&self, node: NodeId) -> Dirtiness { self.data(node).dirtiness }

  /// Sets the dirtiness of `node`.
  #[inline]
  pub fn mark_dirtiness(&mut self, node: NodeId, dirtiness: Dirtiness) {
    self.data_mut(node).dirtiness = dirtiness;
  }

  /// Starts an evaluation attempt of `node`: transitions it to
  /// [`WaitingOnDeps`](NodeState::WaitingOnDeps) and clears its cached
  /// result, returning the displaced value (if any) so the caller can compare
  /// it against the recomputed one.
  pub fn begin_attempt(&mut self, node: NodeId) -> Option<Arc<dyn Value>> {
    let data = self.data_mut(node);
    data.state = NodeState::WaitingOnDeps;
    data.error = None;
    data.dirtiness = Dirtiness::Clean;
    data.value.take()
  }

  /// Transitions `node` to [`Done`](NodeState::Done) holding `value`.
  pub fn set_done(&mut self, node: NodeId, value: Arc<dyn Value>) {
    let data = self.data_mut(node);
    debug_assert!(data.error.is_none(), "BUG: completing a node that holds an error");
    data.state = NodeState::Done;
    data.value = Some(value);
    data.dirtiness = Dirtiness::Clean;
  }

  /// Transitions `node` to [`Error`](NodeState::Error) holding `error`.
  pub fn set_error(&mut self, node: NodeId, error: Arc<EvalError<K>>) {
    let data = self.data_mut(node);
    data.state = NodeState::Error;
    data.value = None;
    data.error = Some(error);
    data.dirtiness = Dirtiness::Clean;
  }

  /// Replaces the direct dependencies of `node` with `deps`, in order. Stale
  /// edges from a previous attempt are removed, and reverse edges are kept in
  /// exact correspondence.
  ///
  /// # Errors
  ///
  /// Returns the ordered node cycle if one of the new edges would make the
  /// graph cyclic. Edges added before the offending one remain recorded; the
  /// caller is expected to fail every node on the cycle.
  pub fn replace_dependencies(&mut self, node: NodeId, deps: &[(NodeId, DepEdge)]) -> Result<(), Vec<NodeId>> {
    self.graph.remove_dependencies_of(node);
    for (dependency, edge) in deps {
      match self.graph.add_edge(node, dependency, edge.clone()) {
        Ok(_) => {}
        Err(mason_graph::Error::WouldCycle(cycle)) => return Err(cycle),
        Err(mason_graph::Error::NodeMissing) => {
          unreachable!("BUG: dependency edge references a node that is not in the graph")
        }
      }
    }
    Ok(())
  }

  /// Gets the direct dependencies of `node` with their edges, in the order
  /// they were requested.
  #[inline]
  pub fn dependencies(&self, node: NodeId) -> impl Iterator<Item=(NodeId, DepEdge)> + '_ {
    self.graph.dependencies_of(node).map(|(n, e)| (*n, e.clone()))
  }

  /// Gets the nodes that directly depend on `node`, with the modes of their
  /// edges.
  #[inline]
  pub fn dependents(&self, node: NodeId) -> impl Iterator<Item=(NodeId, DepMode)> + '_ {
    self.graph.dependents_of(node).map(|(n, e)| (*n, e.mode))
  }

  /// Returns the number of nodes in the store.
  #[cfg(test)]
  #[inline]
  pub fn node_count(&self) -> usize { self.graph.len() }
}


#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use crate::{Key, Kind, Value};

  use super::*;

  #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
  enum TestKey { A, B, C }

  impl Key for TestKey {
    fn kind(&self) -> Kind { Kind::new("test") }
  }

  fn value(s: &str) -> Arc<dyn Value> { Arc::new(s.to_string()) }

  #[test]
  fn interning_is_stable() {
    let mut store = Store::default();
    let a1 = store.get_or_create_node(&TestKey::A);
    let b = store.get_or_create_node(&TestKey::B);
    let a2 = store.get_or_create_node(&TestKey::A);
    assert_eq!(a1, a2);
    assert_ne!(a1, b);
    assert_eq!(store.node_by_key(&TestKey::A), Some(a1));
    assert_eq!(store.node_by_key(&TestKey::C), None);
    assert_eq!(store.key(a1), &TestKey::A);
    assert_eq!(store.node_count(), 2);
  }

  #[test]
  fn attempt_lifecycle() {
    let mut store = Store::default();
    let a = store.get_or_create_node(&TestKey::A);
    assert_eq!(store.state(a), NodeState::NotStarted);
    assert_eq!(store.value(a), None);

    assert_eq!(store.begin_attempt(a), None);
    assert_eq!(store.state(a), NodeState::WaitingOnDeps);

    store.set_done(a, value("one"));
    assert_eq!(store.state(a), NodeState::Done);
    assert_eq!(store.value(a).map(|v| v.as_ref()), Some(value("one").as_ref()));
    assert!(store.error(a).is_none());

    // A new attempt displaces the cached value for later comparison.
    let displaced = store.begin_attempt(a);
    assert_eq!(displaced.as_deref(), Some(value("one").as_ref()));
    assert_eq!(store.state(a), NodeState::WaitingOnDeps);
    assert_eq!(store.value(a), None);
  }

  #[test]
  fn error_state_displaces_value() {
    let mut store = Store::default();
    let a = store.get_or_create_node(&TestKey::A);
    store.begin_attempt(a);
    store.set_done(a, value("one"));
    store.begin_attempt(a);
    let error = Arc::new(EvalError::Failed {
      key: TestKey::A,
      failure: crate::Failure::persistent("broken"),
    });
    store.set_error(a, error.clone());
    assert_eq!(store.state(a), NodeState::Error);
    assert_eq!(store.value(a), None);
    assert!(Arc::ptr_eq(store.error(a).unwrap(), &error));
  }

  fn strict(stamp: Option<Arc<dyn Value>>) -> DepEdge {
    DepEdge { mode: DepMode::Strict, stamp }
  }

  #[test]
  fn replace_dependencies_keeps_transpose_exact() {
    let mut store = Store::default();
    let a = store.get_or_create_node(&TestKey::A);
    let b = store.get_or_create_node(&TestKey::B);
    let c = store.get_or_create_node(&TestKey::C);

    let tolerant = DepEdge { mode: DepMode::Tolerant, stamp: None };
    store.replace_dependencies(a, &[(b, strict(None)), (c, tolerant)]).unwrap();
    let deps: Vec<_> = store.dependencies(a).map(|(n, e)| (n, e.mode)).collect();
    assert_eq!(deps, vec![(b, DepMode::Strict), (c, DepMode::Tolerant)]);
    assert_eq!(store.dependents(b).collect::<Vec<_>>(), vec![(a, DepMode::Strict)]);
    assert_eq!(store.dependents(c).collect::<Vec<_>>(), vec![(a, DepMode::Tolerant)]);

    // Replacing drops the stale edge to c and leaves no duplicates for b.
    store.replace_dependencies(a, &[(b, strict(None))]).unwrap();
    let deps: Vec<_> = store.dependencies(a).map(|(n, _)| n).collect();
    assert_eq!(deps, vec![b]);
    assert_eq!(store.dependents(c).count(), 0);
    assert_eq!(store.dependents(b).count(), 1);
  }

  #[test]
  fn replace_dependencies_reports_cycle() {
    let mut store = Store::default();
    let a = store.get_or_create_node(&TestKey::A);
    let b = store.get_or_create_node(&TestKey::B);
    store.replace_dependencies(a, &[(b, strict(None))]).unwrap();
    let cycle = store.replace_dependencies(b, &[(a, strict(None))]).unwrap_err();
    assert_eq!(cycle, vec![b, a]);
    let keys: Vec<_> = cycle.into_iter().map(|n| *store.key(n)).collect();
    assert_eq!(keys, vec![TestKey::B, TestKey::A]);
  }

  #[test]
  fn edge_stamp_consistency() {
    let one = value("one");
    let edge = strict(Some(one.clone()));
    assert!(edge.is_consistent_with(&one));
    // An equal value behind a different allocation is still consistent.
    assert!(edge.is_consistent_with(&value("one")));
    assert!(!edge.is_consistent_with(&value("two")));
    assert!(!strict(None).is_consistent_with(&one));
  }

  #[test]
  fn dirtiness_marks() {
    let mut store = Store::default();
    let a = store.get_or_create_node(&TestKey::A);
    assert_eq!(store.dirtiness(a), Dirtiness::Clean);
    store.mark_dirtiness(a, Dirtiness::Dirty);
    assert_eq!(store.dirtiness(a), Dirtiness::Dirty);
    store.mark_dirtiness(a, Dirtiness::Changed);
    assert_eq!(store.dirtiness(a), Dirtiness::Changed);
    // Starting an attempt consumes the mark.
    store.begin_attempt(a);
    assert_eq!(store.dirtiness(a), Dirtiness::Clean);
  }
}
