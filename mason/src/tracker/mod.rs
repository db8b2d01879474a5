//! Engine event tracking. Can be used to implement logging, event tracing,
//! progress reporting, metrics, etc.

use std::sync::Arc;

use crate::{EvalError, Key, Value};
use crate::store::Dirtiness;

pub mod writing;
pub mod event;
pub mod metrics;

/// Engine event tracker, with no-op defaults for every event.
#[allow(unused_variables)]
pub trait Tracker<K: Key> {
  /// Start: evaluation of `roots`.
  #[inline]
  fn evaluate_start(&mut self, roots: &[K]) {}
  /// End: evaluation finished, possibly `cancelled`.
  #[inline]
  fn evaluate_end(&mut self, cancelled: bool) {}

  /// `key` was enqueued for checking or computing.
  #[inline]
  fn scheduled(&mut self, key: &K) {}
  /// A demanded `key` was served from cache without any checking.
  #[inline]
  fn reused(&mut self, key: &K) {}

  /// Start: invoke the computation of `key`.
  #[inline]
  fn invoke_start(&mut self, key: &K) {}
  /// The computation of `key` completed with `value`; `changed` is false when
  /// the value equals the one cached by a previous evaluation.
  #[inline]
  fn completed(&mut self, key: &K, value: &Arc<dyn Value>, changed: bool) {}
  /// The computation of `key` suspended awaiting the `missing` keys.
  #[inline]
  fn suspended(&mut self, key: &K, missing: &[K]) {}
  /// `key` settled on `error` (its own failure or a propagated one).
  #[inline]
  fn failed(&mut self, key: &K, error: &Arc<EvalError<K>>) {}
  /// Dirty `key` was verified without re-running: no dependency changed.
  #[inline]
  fn pruned(&mut self, key: &K) {}

  /// Start: invalidation of `changed` input keys.
  #[inline]
  fn invalidate_start(&mut self, changed: &[K]) {}
  /// `key` was marked with `dirtiness` during invalidation.
  #[inline]
  fn dirtied(&mut self, key: &K, dirtiness: Dirtiness) {}
  /// End: invalidation finished.
  #[inline]
  fn invalidate_end(&mut self) {}
}

/// Implement [`Tracker`] for `()` that does nothing.
impl<K: Key> Tracker<K> for () {}

/// A [`Tracker`] that forwards events to two [`Tracker`]s.
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct CompositeTracker<A1, A2>(pub A1, pub A2);

impl<A1, A2> CompositeTracker<A1, A2> {
  /// Creates a composite tracker from `tracker_1` and `tracker_2`.
  pub fn new(tracker_1: A1, tracker_2: A2) -> Self { Self(tracker_1, tracker_2) }
}

impl<K: Key, A1: Tracker<K>, A2: Tracker<K>> Tracker<K> for CompositeTracker<A1, A2> {
  #[inline]
  fn evaluate_start(&mut self, roots: &[K]) {
    self.0.evaluate_start(roots);
    self.1.evaluate_start(roots);
  }
  #[inline]
  fn evaluate_end(&mut self, cancelled: bool) {
    self.0.evaluate_end(cancelled);
    self.1.evaluate_end(cancelled);
  }

  #[inline]
  fn scheduled(&mut self, key: &K) {
    self.0.scheduled(key);
    self.1.scheduled(key);
  }
  #[inline]
  fn reused(&mut self, key: &K) {
    self.0.reused(key);
    self.1.reused(key);
  }

  #[inline]
  fn invoke_start(&mut self, key: &K) {
    self.0.invoke_start(key);
    self.1.invoke_start(key);
  }
  #[inline]
  fn completed(&mut self, key: &K, value: &Arc<dyn Value>, changed: bool) {
    self.0.completed(key, value, changed);
    self.1.completed(key, value, changed);
  }
  #[inline]
  fn suspended(&mut self, key: &K, missing: &[K]) {
    self.0.suspended(key, missing);
    self.1.suspended(key, missing);
  }
  #[inline]
  fn failed(&mut self, key: &K, error: &Arc<EvalError<K>>) {
    self.0.failed(key, error);
    self.1.failed(key, error);
  }
  #[inline]
  fn pruned(&mut self, key: &K) {
    self.0.pruned(key);
    self.1.pruned(key);
  }

  #[inline]
  fn invalidate_start(&mut self, changed: &[K]) {
    self.0.invalidate_start(changed);
    self.1.invalidate_start(changed);
  }
  #[inline]
  fn dirtied(&mut self, key: &K, dirtiness: Dirtiness) {
    self.0.dirtied(key, dirtiness);
    self.1.dirtied(key, dirtiness);
  }
  #[inline]
  fn invalidate_end(&mut self) {
    self.0.invalidate_end();
    self.1.invalidate_end();
  }
}
