use std::collections::HashMap;
use std::sync::Arc;

use crate::{Computation, Key, Kind};

/// Maps each key [`Kind`] to the [`Computation`] responsible for it.
///
/// Dispatch is open and kind-indexed: the engine looks up the computation by
/// the tag of the requested key, never by inspecting the key's run-time type.
/// Evaluating a key whose kind is not registered yields a
/// [`NoComputation`](crate::EvalError::NoComputation) error for that key.
pub struct Registry<K: Key> {
  computations: HashMap<Kind, Arc<dyn Computation<K>>>,
}

impl<K: Key> Default for Registry<K> {
  #[inline]
  fn default() -> Self { Self { computations: HashMap::default() } }
}

impl<K: Key> Registry<K> {
  /// Creates an empty registry.
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Registers `computation` as the handler for keys of `kind`, replacing any
  /// previously registered computation for that kind.
  #[inline]
  pub fn register(&mut self, kind: Kind, computation: impl Computation<K> + 'static) -> &mut Self {
    self.computations.insert(kind, Arc::new(computation));
    self
  }

  /// Gets the computation registered for `kind`.
  #[inline]
  pub fn get(&self, kind: Kind) -> Option<Arc<dyn Computation<K>>> {
    self.computations.get(&kind).cloned()
  }

  /// Returns true if a computation is registered for `kind`.
  #[inline]
  pub fn contains(&self, kind: Kind) -> bool {
    self.computations.contains_key(&kind)
  }
}
