use crate::{Env, Failure, Key, Value};

/// The result of one completed invocation of a computation.
#[derive(Debug)]
pub enum Outcome {
  /// The computation ran to completion and produced a value.
  Complete(Box<dyn Value>),
  /// The computation could not complete because one or more dependency values
  /// were [missing](Env::values_missing). It will be re-invoked once those
  /// dependencies are available. Not an error.
  Incomplete,
}

impl Outcome {
  /// Creates a [`Outcome::Complete`] from given `value`.
  #[inline]
  pub fn complete(value: impl Value) -> Self { Outcome::Complete(Box::new(value)) }
}

/// A computation: the function that produces the value for keys of one
/// [kind](crate::Kind).
///
/// A computation must be a pure function of its key and the dependency values
/// it reads through `env`: it may be invoked multiple times for the same key
/// (once per restart after a suspension, and again when an input changes), it
/// may be invoked concurrently with computations for *other* keys, and its
/// value may be cached indefinitely. It must not share mutable state with
/// other computations outside the [`Env`] contract.
///
/// Protocol: request all needed dependency values through `env`, compute as
/// far as possible, and
///
/// - if any required dependency was unavailable, return
///   [`Outcome::Incomplete`] (check [`Env::values_missing`] before trusting
///   derived data);
/// - on success, return [`Outcome::Complete`] with the value;
/// - on failure, return a [`Failure`] classified as
///   [transient or persistent](crate::Transience).
///
/// Returning `Complete` while values are missing is an engine invariant
/// violation and fails the key.
pub trait Computation<K: Key>: Send + Sync {
  /// Computes the value for `key`, reading dependency values through `env`.
  fn compute(&self, key: &K, env: &mut Env<K>) -> Result<Outcome, Failure>;
}

impl<K: Key, F> Computation<K> for F where
  F: Fn(&K, &mut Env<K>) -> Result<Outcome, Failure> + Send + Sync
{
  #[inline]
  fn compute(&self, key: &K, env: &mut Env<K>) -> Result<Outcome, Failure> { self(key, env) }
}
