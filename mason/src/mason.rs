use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{EvalError, Key, Registry, Value};
use crate::invalidate;
use crate::scheduler;
use crate::store::Store;
use crate::tracker::Tracker;

/// One engine instance: the dependency graph with cached results, the
/// computation registry, and a [`Tracker`] receiving engine events.
///
/// State is scoped to the instance: independent engines (for example in
/// tests) cannot contaminate each other. Evaluation requires `&mut self`, so
/// invalidation always happens between evaluations, never during one.
pub struct Mason<K: Key, A = ()> {
  store: Store<K>,
  registry: Registry<K>,
  tracker: A,
}

impl<K: Key> Mason<K> {
  /// Creates an engine with given `registry` and no tracker.
  #[inline]
  pub fn new(registry: Registry<K>) -> Self { Self::with_tracker(registry, ()) }
}

impl<K: Key, A: Tracker<K> + Send> Mason<K, A> {
  /// Creates an engine with given `registry` and `tracker`.
  #[inline]
  pub fn with_tracker(registry: Registry<K>, tracker: A) -> Self {
    Self { store: Store::default(), registry, tracker }
  }

  /// Gets the registry of this engine.
  #[inline]
  pub fn registry(&self) -> &Registry<K> { &self.registry }
  /// Gets the mutable registry of this engine.
  #[inline]
  pub fn registry_mut(&mut self) -> &mut Registry<K> { &mut self.registry }

  /// Gets the tracker of this engine.
  #[inline]
  pub fn tracker(&self) -> &A { &self.tracker }
  /// Gets the mutable tracker of this engine.
  #[inline]
  pub fn tracker_mut(&mut self) -> &mut A { &mut self.tracker }

  /// Evaluates `roots` with default [`EvalParams`], returning an up-to-date
  /// value or an error per root key.
  #[inline]
  pub fn evaluate(&mut self, roots: &[K]) -> EvalResult<K> {
    self.evaluate_with(roots, EvalParams::default())
  }

  /// Evaluates `roots` with given `params`.
  ///
  /// Nodes that are already done and unaffected by invalidations are reused
  /// without invoking their computation. Independent computations run in
  /// parallel on a bounded worker pool.
  pub fn evaluate_with(&mut self, roots: &[K], params: EvalParams) -> EvalResult<K> {
    scheduler::evaluate(&mut self.store, &self.registry, &mut self.tracker, roots, &params)
  }

  /// Notifies the engine that the external inputs identified by `changed`
  /// keys have changed, dirtying everything that transitively depends on
  /// them. The next evaluation re-verifies only the affected subgraph.
  pub fn invalidate(&mut self, changed: impl IntoIterator<Item=K>) {
    invalidate::invalidate(&mut self.store, &mut self.tracker, changed);
  }
}


/// Cooperative cancellation signal for an evaluation.
///
/// Cancelling takes effect at dependency-request boundaries: in-flight
/// computations observe missing values and suspend, workers wind down, and
/// [`evaluate`](Mason::evaluate) returns partial results with cancellation
/// noted. Results that were already cached are preserved.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  /// Creates a token in the not-cancelled state.
  #[inline]
  pub fn new() -> Self { Self::default() }
  /// Signals cancellation.
  #[inline]
  pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed) }
  /// Returns true if cancellation was signalled.
  #[inline]
  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }
}

/// Parameters of one evaluation.
#[derive(Clone, Debug, Default)]
pub struct EvalParams {
  workers: Option<NonZeroUsize>,
  cancel: Option<CancelToken>,
}

impl EvalParams {
  /// Creates parameters with default values: one worker per available core,
  /// no cancellation token.
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Sets the number of worker threads. Zero is treated as unset, falling
  /// back to the available parallelism.
  #[inline]
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = NonZeroUsize::new(workers);
    self
  }

  /// Sets the cancellation token observed by this evaluation.
  #[inline]
  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = Some(cancel);
    self
  }

  #[inline]
  pub(crate) fn worker_count(&self) -> usize {
    self.workers
      .or_else(|| std::thread::available_parallelism().ok())
      .map_or(1, NonZeroUsize::get)
  }

  #[inline]
  pub(crate) fn cancel_token(&self) -> Option<&CancelToken> { self.cancel.as_ref() }
}

/// The result of one [`evaluate`](Mason::evaluate) call: a value or an error
/// per demanded root key.
#[derive(Debug)]
pub struct EvalResult<K: Key> {
  results: HashMap<K, Result<Arc<dyn Value>, Arc<EvalError<K>>>>,
  cancelled: bool,
}

impl<K: Key> EvalResult<K> {
  #[inline]
  pub(crate) fn new(
    results: HashMap<K, Result<Arc<dyn Value>, Arc<EvalError<K>>>>,
    cancelled: bool,
  ) -> Self {
    Self { results, cancelled }
  }

  /// Gets the result for root `key`, or `None` if it was not a root of this
  /// evaluation.
  #[inline]
  pub fn get(&self, key: &K) -> Option<&Result<Arc<dyn Value>, Arc<EvalError<K>>>> {
    self.results.get(key)
  }

  /// Gets the value for root `key`, if it evaluated successfully.
  #[inline]
  pub fn value(&self, key: &K) -> Option<&Arc<dyn Value>> {
    self.results.get(key).and_then(|r| r.as_ref().ok())
  }

  /// Gets the error for root `key`, if it failed.
  #[inline]
  pub fn error(&self, key: &K) -> Option<&Arc<EvalError<K>>> {
    self.results.get(key).and_then(|r| r.as_ref().err())
  }

  /// Returns true if the evaluation was cancelled; roots that were not
  /// resolved by then report [`EvalError::Cancelled`].
  #[inline]
  pub fn is_cancelled(&self) -> bool { self.cancelled }

  /// Returns an iterator over all root keys with their results.
  #[inline]
  pub fn iter(&self) -> impl Iterator<Item=(&K, &Result<Arc<dyn Value>, Arc<EvalError<K>>>)> {
    self.results.iter()
  }

  /// Returns the number of root keys.
  #[inline]
  pub fn len(&self) -> usize { self.results.len() }

  /// Returns true if no roots were demanded.
  #[inline]
  pub fn is_empty(&self) -> bool { self.results.is_empty() }
}
