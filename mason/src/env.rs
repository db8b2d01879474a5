use std::collections::HashSet;
use std::sync::Arc;

use crate::{EvalError, Key, Value};
use crate::scheduler::{EvalShared, Resolution};
use crate::store::{DepEdge, DepMode, NodeId};

/// The environment of one evaluation attempt of one computation: the handle
/// through which the computation requests dependency values.
///
/// Every request is recorded; the records of the final successful attempt
/// become the node's direct dependencies. A request for a key whose value is
/// not yet available returns `None` and marks the attempt as
/// [missing values](Env::values_missing) — that is the signal to return
/// [`Outcome::Incomplete`](crate::Outcome::Incomplete), *not* an error.
pub struct Env<'s, 'e, K: Key> {
  shared: &'s EvalShared<'e, K>,
  records: Vec<(NodeId, DepEdge)>,
  recorded: HashSet<NodeId>,
  missing: bool,
  failed: Option<Arc<EvalError<K>>>,
}

/// Dependency records of a finished attempt.
pub(crate) struct Attempt<K: Key> {
  /// Requested dependencies in request order, de-duplicated, stamped with the
  /// observed values.
  pub records: Vec<(NodeId, DepEdge)>,
  /// Whether any requested value was unavailable.
  pub missing: bool,
  /// The first failed strict dependency observed, if any.
  pub failed: Option<Arc<EvalError<K>>>,
}

impl<'s, 'e, K: Key> Env<'s, 'e, K> {
  pub(crate) fn new(shared: &'s EvalShared<'e, K>) -> Self {
    Self {
      shared,
      records: Vec::new(),
      recorded: HashSet::default(),
      missing: false,
      failed: None,
    }
  }

  pub(crate) fn into_attempt(self) -> Attempt<K> {
    Attempt { records: self.records, missing: self.missing, failed: self.failed }
  }

  /// Requests the value of the computation identified by `key`, recording a
  /// dependency on it.
  ///
  /// Returns `None` when the value is not yet available; the dependency will
  /// be scheduled and this computation re-invoked once it is done. If the
  /// dependency failed, this also returns `None` and the failure propagates
  /// to this computation; use [`get_result`](Env::get_result) to observe the
  /// failure as data instead.
  ///
  /// After cancellation this immediately reports the value as missing.
  pub fn get_value(&mut self, key: &K) -> Option<Arc<dyn Value>> {
    if self.shared.cancel.is_cancelled() {
      self.missing = true;
      return None;
    }
    let mut state = self.shared.state.lock();
    match self.request(&mut state, key, DepMode::Strict) {
      Resolution::Value(value) => Some(value),
      Resolution::Error(error) => {
        self.failed.get_or_insert(error);
        self.missing = true;
        None
      }
      Resolution::Unresolved => None,
    }
  }

  /// Requests the values of all given `keys`, returning them in argument
  /// order.
  ///
  /// Unlike repeated [`get_value`](Env::get_value) calls with early returns,
  /// this always requests *every* listed key even when an earlier one is
  /// unavailable, so the full dependency set is discovered in a single
  /// attempt instead of one dependency per restart.
  pub fn get_values<'k>(&mut self, keys: impl IntoIterator<Item=&'k K>) -> Vec<Option<Arc<dyn Value>>> {
    if self.shared.cancel.is_cancelled() {
      self.missing = true;
      return keys.into_iter().map(|_| None).collect();
    }
    let mut state = self.shared.state.lock();
    keys.into_iter().map(|key| {
      match self.request(&mut state, key, DepMode::Strict) {
        Resolution::Value(value) => Some(value),
        Resolution::Error(error) => {
          self.failed.get_or_insert(error);
          self.missing = true;
          None
        }
        Resolution::Unresolved => None,
      }
    }).collect()
  }

  /// Requests the result of the computation identified by `key`, tolerating
  /// failure: a failed dependency is reported as `Some(Err(..))` data for
  /// this computation to inspect, instead of short-circuiting it.
  ///
  /// Returns `None` when the dependency is not yet resolved at all.
  pub fn get_result(&mut self, key: &K) -> Option<Result<Arc<dyn Value>, Arc<EvalError<K>>>> {
    if self.shared.cancel.is_cancelled() {
      self.missing = true;
      return None;
    }
    let mut state = self.shared.state.lock();
    match self.request(&mut state, key, DepMode::Tolerant) {
      Resolution::Value(value) => Some(Ok(value)),
      Resolution::Error(error) => Some(Err(error)),
      Resolution::Unresolved => None,
    }
  }

  /// Returns true if any value requested in this attempt was unavailable. A
  /// computation must check this before trusting data derived from dependency
  /// values, and must return
  /// [`Outcome::Incomplete`](crate::Outcome::Incomplete) instead of a value
  /// while this is true.
  #[inline]
  pub fn values_missing(&self) -> bool { self.missing }

  fn request(
    &mut self,
    state: &mut crate::scheduler::EvalState<'e, K>,
    key: &K,
    mode: DepMode,
  ) -> Resolution<K> {
    let node = state.store.get_or_create_node(key);
    let resolution = state.resolution(node);
    if self.recorded.insert(node) {
      let stamp = match &resolution {
        Resolution::Value(value) => Some(value.clone()),
        _ => None,
      };
      self.records.push((node, DepEdge { mode, stamp }));
    }
    if matches!(resolution, Resolution::Unresolved) {
      self.missing = true;
    }
    resolution
  }
}
