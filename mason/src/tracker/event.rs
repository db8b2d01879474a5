use std::sync::Arc;

use crate::{EvalError, Key, Value};
use crate::store::Dirtiness;
use crate::tracker::Tracker;

/// A [`Tracker`] that stores [`Event`]s in a [`Vec`], useful in testing to
/// assert that the engine is incremental and correct.
#[derive(Clone, Debug)]
pub struct EventTracker<K: Key> {
  events: Vec<Event<K>>,
  clear_on_evaluate_start: bool,
}

impl<K: Key> Default for EventTracker<K> {
  fn default() -> Self {
    Self { events: Vec::new(), clear_on_evaluate_start: true }
  }
}

/// Enumeration of engine events.
#[derive(Clone, Debug)]
pub enum Event<K: Key> {
  /// Start: evaluation of `roots`.
  EvaluateStart {
    /// Demanded root keys.
    roots: Vec<K>,
  },
  /// End: evaluation finished.
  EvaluateEnd {
    /// Whether the evaluation was cancelled.
    cancelled: bool,
  },
  /// `key` was enqueued.
  Scheduled {
    /// Enqueued key.
    key: K,
  },
  /// A demanded `key` was served from cache.
  Reused {
    /// Reused key.
    key: K,
  },
  /// Start: invoke the computation of `key`.
  InvokeStart {
    /// Invoked key.
    key: K,
  },
  /// The computation of `key` completed with `value`.
  Completed {
    /// Completed key.
    key: K,
    /// Produced value.
    value: Arc<dyn Value>,
    /// Whether the value differs from the previously cached one.
    changed: bool,
  },
  /// The computation of `key` suspended awaiting `missing` keys.
  Suspended {
    /// Suspended key.
    key: K,
    /// Keys whose values were missing.
    missing: Vec<K>,
  },
  /// `key` settled on `error`.
  Failed {
    /// Failed key.
    key: K,
    /// The error it settled on.
    error: Arc<EvalError<K>>,
  },
  /// Dirty `key` was verified without re-running.
  Pruned {
    /// Verified key.
    key: K,
  },
  /// Start: invalidation of `changed` input keys.
  InvalidateStart {
    /// Changed input keys.
    changed: Vec<K>,
  },
  /// `key` was marked with `dirtiness`.
  Dirtied {
    /// Marked key.
    key: K,
    /// Assigned dirtiness level.
    dirtiness: Dirtiness,
  },
  /// End: invalidation finished.
  InvalidateEnd,
}

impl<K: Key> EventTracker<K> {
  /// Gets a slice over all stored events.
  #[inline]
  pub fn slice(&self) -> &[Event<K>] { &self.events }
  /// Returns an iterator over all stored events.
  #[inline]
  pub fn iter(&self) -> impl Iterator<Item=&Event<K>> { self.events.iter() }
  /// Clears all stored events.
  #[inline]
  pub fn clear(&mut self) { self.events.clear() }

  /// Returns the number of times the computation of `key` was invoked.
  pub fn invocations_of(&self, key: &K) -> usize {
    self.events.iter().filter(|e| matches!(e, Event::InvokeStart { key: k } if k == key)).count()
  }

  /// Gets the index of the first invocation of `key`'s computation.
  pub fn index_invoke_start(&self, key: &K) -> Option<usize> {
    self.events.iter().position(|e| matches!(e, Event::InvokeStart { key: k } if k == key))
  }

  /// Gets the index of the completion of `key`'s computation.
  pub fn index_completed(&self, key: &K) -> Option<usize> {
    self.events.iter().position(|e| matches!(e, Event::Completed { key: k, .. } if k == key))
  }

  /// Gets the completed value of `key`, if its computation completed.
  pub fn completed_value_of(&self, key: &K) -> Option<&Arc<dyn Value>> {
    self.events.iter().find_map(|e| match e {
      Event::Completed { key: k, value, .. } if k == key => Some(value),
      _ => None,
    })
  }

  /// Gets the error that `key` settled on, if it failed.
  pub fn error_of(&self, key: &K) -> Option<&Arc<EvalError<K>>> {
    self.events.iter().find_map(|e| match e {
      Event::Failed { key: k, error } if k == key => Some(error),
      _ => None,
    })
  }

  /// Returns the number of times the computation of `key` suspended.
  pub fn suspensions_of(&self, key: &K) -> usize {
    self.events.iter().filter(|e| matches!(e, Event::Suspended { key: k, .. } if k == key)).count()
  }

  /// Returns true if `key` was served from cache without any checking.
  pub fn was_reused(&self, key: &K) -> bool {
    self.events.iter().any(|e| matches!(e, Event::Reused { key: k } if k == key))
  }

  /// Returns true if dirty `key` was verified without re-running.
  pub fn was_pruned(&self, key: &K) -> bool {
    self.events.iter().any(|e| matches!(e, Event::Pruned { key: k } if k == key))
  }

  /// Returns true if any computation was invoked.
  pub fn any_invocation(&self) -> bool {
    self.events.iter().any(|e| matches!(e, Event::InvokeStart { .. }))
  }
}

impl<K: Key> Tracker<K> for EventTracker<K> {
  #[inline]
  fn evaluate_start(&mut self, roots: &[K]) {
    if self.clear_on_evaluate_start {
      self.events.clear();
    }
    self.events.push(Event::EvaluateStart { roots: roots.to_vec() });
  }
  #[inline]
  fn evaluate_end(&mut self, cancelled: bool) {
    self.events.push(Event::EvaluateEnd { cancelled });
  }

  #[inline]
  fn scheduled(&mut self, key: &K) {
    self.events.push(Event::Scheduled { key: key.clone() });
  }
  #[inline]
  fn reused(&mut self, key: &K) {
    self.events.push(Event::Reused { key: key.clone() });
  }

  #[inline]
  fn invoke_start(&mut self, key: &K) {
    self.events.push(Event::InvokeStart { key: key.clone() });
  }
  #[inline]
  fn completed(&mut self, key: &K, value: &Arc<dyn Value>, changed: bool) {
    self.events.push(Event::Completed { key: key.clone(), value: value.clone(), changed });
  }
  #[inline]
  fn suspended(&mut self, key: &K, missing: &[K]) {
    self.events.push(Event::Suspended { key: key.clone(), missing: missing.to_vec() });
  }
  #[inline]
  fn failed(&mut self, key: &K, error: &Arc<EvalError<K>>) {
    self.events.push(Event::Failed { key: key.clone(), error: error.clone() });
  }
  #[inline]
  fn pruned(&mut self, key: &K) {
    self.events.push(Event::Pruned { key: key.clone() });
  }

  #[inline]
  fn invalidate_start(&mut self, changed: &[K]) {
    self.events.push(Event::InvalidateStart { changed: changed.to_vec() });
  }
  #[inline]
  fn dirtied(&mut self, key: &K, dirtiness: Dirtiness) {
    self.events.push(Event::Dirtied { key: key.clone(), dirtiness });
  }
  #[inline]
  fn invalidate_end(&mut self) {
    self.events.push(Event::InvalidateEnd);
  }
}
