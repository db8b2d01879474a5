use std::io;
use std::io::{Stderr, Stdout};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{EvalError, Key, Value};
use crate::store::Dirtiness;
use crate::tracker::Tracker;

/// A [`Tracker`] that writes events to a [`std::io::Write`] instance, for
/// example [`std::io::Stdout`].
#[derive(Debug, Clone)]
pub struct WritingTracker<W, K> {
  writer: W,
  _key_phantom: PhantomData<K>,
}

impl<K> Default for WritingTracker<Stdout, K> {
  #[inline]
  fn default() -> Self { Self::with_stdout() }
}

impl<K> Default for WritingTracker<Stderr, K> {
  #[inline]
  fn default() -> Self { Self::with_stderr() }
}

impl<W: io::Write, K> WritingTracker<W, K> {
  /// Creates a writing tracker that writes to `writer`.
  #[inline]
  pub fn new(writer: W) -> Self { Self { writer, _key_phantom: PhantomData } }
}

impl<K> WritingTracker<Stdout, K> {
  /// Creates a writing tracker that writes to stdout.
  #[inline]
  pub fn with_stdout() -> Self { Self::new(io::stdout()) }
}

impl<K> WritingTracker<Stderr, K> {
  /// Creates a writing tracker that writes to stderr.
  #[inline]
  pub fn with_stderr() -> Self { Self::new(io::stderr()) }
}

impl<W: io::Write, K> WritingTracker<W, K> {
  #[inline]
  fn writeln(&mut self, args: std::fmt::Arguments) {
    writeln!(&mut self.writer, "{}", args).ok();
  }
}

impl<W: io::Write, K: Key> Tracker<K> for WritingTracker<W, K> {
  #[inline]
  fn evaluate_start(&mut self, roots: &[K]) {
    self.writeln(format_args!("Evaluation start: {:?}", roots));
  }
  #[inline]
  fn evaluate_end(&mut self, cancelled: bool) {
    if cancelled {
      self.writeln(format_args!("Evaluation end (cancelled)"));
    } else {
      self.writeln(format_args!("Evaluation end"));
    }
  }

  #[inline]
  fn scheduled(&mut self, key: &K) {
    self.writeln(format_args!("↑ {:?}", key));
  }
  #[inline]
  fn reused(&mut self, key: &K) {
    self.writeln(format_args!("✓ {:?}", key));
  }

  #[inline]
  fn invoke_start(&mut self, key: &K) {
    self.writeln(format_args!("→ {:?}", key));
  }
  #[inline]
  fn completed(&mut self, key: &K, value: &Arc<dyn Value>, changed: bool) {
    if changed {
      self.writeln(format_args!("← {:?} = {:?}", key, value));
    } else {
      self.writeln(format_args!("← {:?} = {:?} (unchanged)", key, value));
    }
  }
  #[inline]
  fn suspended(&mut self, key: &K, missing: &[K]) {
    self.writeln(format_args!("⋯ {:?} awaiting {:?}", key, missing));
  }
  #[inline]
  fn failed(&mut self, key: &K, error: &Arc<EvalError<K>>) {
    self.writeln(format_args!("✗ {:?} [{}]", key, error));
  }
  #[inline]
  fn pruned(&mut self, key: &K) {
    self.writeln(format_args!("☑ {:?}", key));
  }

  #[inline]
  fn invalidate_start(&mut self, changed: &[K]) {
    self.writeln(format_args!("Invalidate start: {:?}", changed));
  }
  #[inline]
  fn dirtied(&mut self, key: &K, dirtiness: Dirtiness) {
    self.writeln(format_args!("! {:?} [{:?}]", key, dirtiness));
  }
  #[inline]
  fn invalidate_end(&mut self) {
    self.writeln(format_args!("Invalidate end"));
  }
}
