//! Failure classification and evaluation errors.

use std::error::Error;

use crate::{Key, Kind};

/// Classification of a [`Failure`]: whether retrying the computation without
/// any change can be expected to succeed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Transience {
  /// Likely to succeed on retry without any change, for example a network
  /// fetch that timed out. Transient failures are re-attempted on the next
  /// evaluation without requiring an invalidation.
  Transient,
  /// Will keep failing until something changes, for example a malformed
  /// input. Persistent failures are cached as errors until a declared
  /// dependency changes.
  Persistent,
}

/// A failure reported by a computation, classified by [`Transience`].
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
  message: String,
  transience: Transience,
  #[source]
  source: Option<Box<dyn Error + Send + Sync>>,
}

impl Failure {
  /// Creates a failure with given `message` and `transience`.
  #[inline]
  pub fn new(message: impl Into<String>, transience: Transience) -> Self {
    Self { message: message.into(), transience, source: None }
  }
  /// Creates a [transient](Transience::Transient) failure with given `message`.
  #[inline]
  pub fn transient(message: impl Into<String>) -> Self {
    Self::new(message, Transience::Transient)
  }
  /// Creates a [persistent](Transience::Persistent) failure with given `message`.
  #[inline]
  pub fn persistent(message: impl Into<String>) -> Self {
    Self::new(message, Transience::Persistent)
  }
  /// Attaches the underlying `source` error to this failure.
  #[inline]
  pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
    self.source = Some(Box::new(source));
    self
  }

  /// Gets the message of this failure.
  #[inline]
  pub fn message(&self) -> &str { &self.message }
  /// Gets the transience of this failure.
  #[inline]
  pub fn transience(&self) -> Transience { self.transience }
  /// Returns true if this failure is [transient](Transience::Transient).
  #[inline]
  pub fn is_transient(&self) -> bool { self.transience == Transience::Transient }
}

/// An error result for a key, as stored in the dependency graph and reported
/// to callers of [`evaluate`](crate::Mason::evaluate).
///
/// Errors are shared as `Arc<EvalError>`: a dependent that fails because of a
/// failed dependency holds the same allocation as the dependency itself.
#[derive(Debug, thiserror::Error)]
pub enum EvalError<K: Key> {
  /// The computation for `key` reported a classified [`Failure`].
  #[error("computation for {key:?} failed: {failure}")]
  Failed {
    /// The key whose computation failed.
    key: K,
    /// The classified failure.
    #[source]
    failure: Failure,
  },
  /// A cyclic dependency was requested. Contains the ordered cycle: each key
  /// depends on the next, and the last depends on the first. Reported to
  /// every key on the cycle and never retried automatically.
  #[error("cyclic dependency between {0:?}")]
  Cycle(Vec<K>),
  /// No computation is registered for the kind of the requested key.
  #[error("no computation registered for key kind '{kind}'")]
  NoComputation {
    /// The kind that has no registered computation.
    kind: Kind,
  },
  /// The computation for `key` broke the engine contract. This indicates a
  /// bug in the computation, not a data problem, and is surfaced distinctly
  /// from consumer failures.
  #[error("computation for {key:?} violated an engine invariant: {violation}")]
  Invariant {
    /// The key whose computation misbehaved.
    key: K,
    /// The violated invariant.
    #[source]
    violation: InvariantViolation,
  },
  /// Evaluation terminated while `key` was still waiting on dependencies.
  #[error("evaluation stalled while {key:?} was waiting on dependencies")]
  Stalled {
    /// The key left waiting.
    key: K,
  },
  /// Evaluation was cancelled before this key was resolved.
  #[error("evaluation was cancelled")]
  Cancelled,
}

impl<K: Key> EvalError<K> {
  /// Returns true if this error may succeed on retry, and is therefore
  /// re-attempted on the next evaluation that demands its key.
  #[inline]
  pub fn is_transient(&self) -> bool {
    matches!(self, EvalError::Failed { failure, .. } if failure.is_transient())
  }
  /// Gets the consumer-reported failure, if this is a [`EvalError::Failed`].
  #[inline]
  pub fn failure(&self) -> Option<&Failure> {
    match self {
      EvalError::Failed { failure, .. } => Some(failure),
      _ => None,
    }
  }
  /// Gets the ordered dependency cycle, if this is a [`EvalError::Cycle`].
  #[inline]
  pub fn cycle(&self) -> Option<&[K]> {
    match self {
      EvalError::Cycle(keys) => Some(keys),
      _ => None,
    }
  }
}

/// Ways a computation can break the engine contract.
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
pub enum InvariantViolation {
  /// The computation returned a value while one or more requested dependency
  /// values were missing.
  #[error("completed with a value while dependency values were missing")]
  CompleteWithMissing,
  /// The computation suspended without any requested dependency value being
  /// missing.
  #[error("suspended without requesting any unavailable dependency")]
  IncompleteWithoutMissing,
}
