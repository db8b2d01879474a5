use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// The kind of a [`Key`]: the tag that selects which computation handles it.
///
/// Kinds are compared by name, so two `Kind` constants with the same name are
/// the same kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Kind(&'static str);

impl Kind {
  /// Creates a kind with given `name`.
  #[inline]
  pub const fn new(name: &'static str) -> Self { Self(name) }
  /// Gets the name of this kind.
  #[inline]
  pub const fn name(self) -> &'static str { self.0 }
}

impl Display for Kind {
  #[inline]
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.0) }
}

/// Identifier of one computation instance.
///
/// A key is pure data: two equal keys are requests for the same logical
/// computation, and everything that influences the computed value must either
/// be part of the key or be expressed as a dependency on another key. Keys are
/// grouped by [kind](Key::kind), which selects the computation responsible for
/// them in the [`Registry`](crate::Registry); consumers typically define one
/// key enum per engine with one variant per kind, carrying the kind-specific
/// arguments.
pub trait Key: Clone + Eq + Hash + Debug + Send + Sync + 'static {
  /// Gets the kind of this key, used for computation dispatch.
  fn kind(&self) -> Kind;
}
