use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{EvalError, Key, Value};
use crate::store::Dirtiness;
use crate::tracker::Tracker;

/// A [`Tracker`] that aggregates counters per evaluation, for example the
/// number of computation invocations versus cache reuses.
#[derive(Clone, Debug)]
pub struct MetricsTracker<K> {
  report: Report,
  clear_on_evaluate_start: bool,
  last_evaluate_start: Option<Instant>,
  _key_phantom: PhantomData<K>,
}

impl<K> Default for MetricsTracker<K> {
  fn default() -> Self {
    Self {
      report: Report::default(),
      clear_on_evaluate_start: true,
      last_evaluate_start: None,
      _key_phantom: PhantomData,
    }
  }
}

impl<K> MetricsTracker<K> {
  /// Gets the report of the current (or last) evaluation.
  #[inline]
  pub fn report(&self) -> &Report { &self.report }
}

/// Aggregated engine metrics.
#[derive(Default, Clone, Debug)]
pub struct Report {
  /// Number of computation invocations.
  pub total_invocations: u32,
  /// Number of completed invocations.
  pub total_completions: u32,
  /// Number of suspended invocations.
  pub total_suspensions: u32,
  /// Number of keys settled on an error.
  pub total_failures: u32,
  /// Number of demanded keys served from cache without checking.
  pub total_reused: u32,
  /// Number of dirty keys verified without re-running.
  pub total_pruned: u32,
  /// Number of keys marked dirty by invalidation.
  pub total_dirtied: u32,
  /// Duration of the evaluation.
  pub evaluate_duration: Duration,
}

impl Report {
  fn clear(&mut self) {
    *self = Report { total_dirtied: self.total_dirtied, ..Report::default() };
  }
}

impl<K: Key> Tracker<K> for MetricsTracker<K> {
  #[inline]
  fn evaluate_start(&mut self, _roots: &[K]) {
    if self.clear_on_evaluate_start {
      self.report.clear();
    }
    self.last_evaluate_start = Some(Instant::now());
  }
  #[inline]
  fn evaluate_end(&mut self, _cancelled: bool) {
    if let Some(start) = &self.last_evaluate_start {
      self.report.evaluate_duration = start.elapsed();
    }
  }

  #[inline]
  fn reused(&mut self, _key: &K) {
    self.report.total_reused += 1;
  }
  #[inline]
  fn invoke_start(&mut self, _key: &K) {
    self.report.total_invocations += 1;
  }
  #[inline]
  fn completed(&mut self, _key: &K, _value: &Arc<dyn Value>, _changed: bool) {
    self.report.total_completions += 1;
  }
  #[inline]
  fn suspended(&mut self, _key: &K, _missing: &[K]) {
    self.report.total_suspensions += 1;
  }
  #[inline]
  fn failed(&mut self, _key: &K, _error: &Arc<EvalError<K>>) {
    self.report.total_failures += 1;
  }
  #[inline]
  fn pruned(&mut self, _key: &K) {
    self.report.total_pruned += 1;
  }

  #[inline]
  fn invalidate_start(&mut self, _changed: &[K]) {
    self.report.total_dirtied = 0;
  }
  #[inline]
  fn dirtied(&mut self, _key: &K, _dirtiness: Dirtiness) {
    self.report.total_dirtied += 1;
  }
}
