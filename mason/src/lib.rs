//! Mason is an incremental, demand-driven computation engine for build tools:
//! callers ask for a set of root [keys](Key), the engine produces each by
//! invoking small, composable, cacheable [computations](Computation) that may
//! request each other's results, and later evaluations reuse everything whose
//! inputs did not change.
//!
//! Computations request dependency values through their [`Env`]; a value that
//! is not yet available is reported as missing, the computation returns the
//! [incomplete](Outcome::Incomplete) outcome, and it is re-invoked once the
//! dependency is done. Independent computations run in parallel on a bounded
//! worker pool, cyclic requests are detected and reported with the full
//! cycle, and failures are [classified](Transience) so transient ones are
//! retried on the next evaluation while persistent ones stay cached.
//!
//! Changed external inputs are reported through
//! [`invalidate`](Mason::invalidate); the next evaluation re-verifies only
//! the affected subgraph, and dependents of a recomputed key whose value came
//! out unchanged are not re-run.
//!
//! # Examples
//!
//! ```
//! use mason::{Computation, Env, Failure, Key, Kind, Mason, Outcome, Registry};
//!
//! const GREETING: Kind = Kind::new("greeting");
//!
//! #[derive(Clone, PartialEq, Eq, Hash, Debug)]
//! struct Greet(&'static str);
//!
//! impl Key for Greet {
//!   fn kind(&self) -> Kind { GREETING }
//! }
//!
//! struct GreetComputation;
//!
//! impl Computation<Greet> for GreetComputation {
//!   fn compute(&self, key: &Greet, _env: &mut Env<Greet>) -> Result<Outcome, Failure> {
//!     Ok(Outcome::complete(format!("Hello, {}!", key.0)))
//!   }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register(GREETING, GreetComputation);
//! let mut mason = Mason::new(registry);
//!
//! let result = mason.evaluate(&[Greet("World")]);
//! let value = result.value(&Greet("World")).unwrap();
//! assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("Hello, World!"));
//! ```

pub mod tracker;

mod compute;
mod env;
mod error;
mod invalidate;
mod key;
mod mason;
mod registry;
mod scheduler;
mod store;
mod value;

pub use compute::{Computation, Outcome};
pub use env::Env;
pub use error::{EvalError, Failure, InvariantViolation, Transience};
pub use key::{Key, Kind};
pub use mason::{CancelToken, EvalParams, EvalResult, Mason};
pub use registry::Registry;
pub use store::Dirtiness;
pub use value::{AsAny, EqObj, Value};
