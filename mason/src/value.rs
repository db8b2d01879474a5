use std::any::Any;

/// Conversion into [`dyn Any`](Any). Implies `'static` because [`Any`]
/// requires `'static`.
pub trait AsAny: 'static {
  /// Convert `&self` into [`&dyn Any`](Any).
  fn as_any(&self) -> &dyn Any;
  /// Convert `Box<Self>` into [`Box<dyn Any>`](Any).
  fn into_box_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
  #[inline]
  fn as_any(&self) -> &dyn Any { self as &dyn Any }
  #[inline]
  fn into_box_any(self: Box<Self>) -> Box<dyn Any> { self as Box<dyn Any> }
}


/// Object safe [`Eq`] proxy, comparing against [`&dyn Any`](Any).
pub trait EqObj {
  /// Returns true if `self` equals `other`, where `other` must be of the same
  /// concrete type as `self`.
  fn eq_any(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + Any> EqObj for T {
  #[inline]
  fn eq_any(&self, other: &dyn Any) -> bool {
    other.downcast_ref::<Self>().map_or(false, |o| self == o)
  }
}


/// The immutable result of a completed computation.
///
/// Values are opaque to the engine: it stores them as `Arc<dyn Value>`, shares
/// them between concurrently-reading dependents without copying, and compares
/// them for equality to decide whether dependents must be recomputed. A
/// consumer downcasts to the concrete result type associated with a key's
/// kind via [`downcast_ref`](dyn Value::downcast_ref).
///
/// Implemented for every `T: Eq + Debug + Send + Sync + 'static`.
pub trait Value: AsAny + EqObj + std::fmt::Debug + Send + Sync {}

impl<T: Any + Eq + std::fmt::Debug + Send + Sync> Value for T {}

impl PartialEq for dyn Value {
  #[inline]
  fn eq(&self, other: &dyn Value) -> bool { self.eq_any(other.as_any()) }
}

impl Eq for dyn Value {}

impl dyn Value {
  /// Downcasts this value to a reference of concrete type `T`, returning
  /// `None` if the value is not a `T`.
  ///
  /// Note: when holding a `Box<dyn Value>` or `Arc<dyn Value>`, call this
  /// through a deref (`value.downcast_ref()`), not on the container itself;
  /// boxed trait objects also implement [`Value`], and downcasting the
  /// container always fails.
  #[inline]
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> { self.as_any().downcast_ref() }
}
