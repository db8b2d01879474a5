//! Common test keys and computations, modeled after the consumers the engine
//! serves in a build tool: external inputs, repository downloads and
//! checkouts, text transformations, and parsers that report user-visible
//! errors as data.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use mason::{Computation, Env, Failure, Key, Kind, Outcome, Registry, Transience};

pub const CONSTANT: Kind = Kind::new("constant");
pub const DOWNLOAD: Kind = Kind::new("download");
pub const REPO: Kind = Kind::new("repo");
pub const LOWERCASE: Kind = Kind::new("lowercase");
pub const CONCAT: Kind = Kind::new("concat");
pub const PARSE: Kind = Kind::new("parse");
pub const FAIL: Kind = Kind::new("fail");
pub const FLAKY: Kind = Kind::new("flaky");
pub const TOLERANT: Kind = Kind::new("tolerant");
pub const CYCLE: Kind = Kind::new("cycle");
pub const ROGUE: Kind = Kind::new("rogue");

/// Key enum covering the common test computations.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TestKey {
  /// The value of the external input with this name.
  Constant(String),
  /// Download the archive with this name, producing an [`Archive`]. Depends
  /// on `Constant(name)` as the remote content.
  Download(String),
  /// Check out the repository with this name, producing a [`Checkout`].
  /// Depends on `Download("{name}.tar")`.
  Repo(String),
  /// The lowercased string value of the inner key.
  Lowercase(Box<TestKey>),
  /// The concatenated string values of all inner keys, requested as a batch.
  Concat(Vec<TestKey>),
  /// Parse the external input with this name as `name=value` lines,
  /// producing a [`ParseOutput`] that carries parse errors as data.
  Parse(String),
  /// Always fails with the given transience.
  Fail(String, Transience),
  /// Fails transiently on the first attempt, succeeds afterwards.
  Flaky(String),
  /// The result of the inner key, tolerating its failure.
  Tolerant(Box<TestKey>),
  /// Requires itself.
  CycleSelf,
  /// Requires [`TestKey::CycleB`].
  CycleA,
  /// Requires [`TestKey::CycleA`].
  CycleB,
  /// Misbehaves: returns a value while its dependency value is missing.
  Rogue,
}

impl TestKey {
  pub fn constant(name: impl Into<String>) -> Self { TestKey::Constant(name.into()) }
  pub fn download(name: impl Into<String>) -> Self { TestKey::Download(name.into()) }
  pub fn repo(name: impl Into<String>) -> Self { TestKey::Repo(name.into()) }
  pub fn lowercase(inner: TestKey) -> Self { TestKey::Lowercase(Box::new(inner)) }
  pub fn concat(parts: impl IntoIterator<Item=TestKey>) -> Self {
    TestKey::Concat(parts.into_iter().collect())
  }
  pub fn parse(name: impl Into<String>) -> Self { TestKey::Parse(name.into()) }
  pub fn fail(name: impl Into<String>, transience: Transience) -> Self {
    TestKey::Fail(name.into(), transience)
  }
  pub fn flaky(name: impl Into<String>) -> Self { TestKey::Flaky(name.into()) }
  pub fn tolerant(inner: TestKey) -> Self { TestKey::Tolerant(Box::new(inner)) }
}

impl Key for TestKey {
  fn kind(&self) -> Kind {
    match self {
      TestKey::Constant(_) => CONSTANT,
      TestKey::Download(_) => DOWNLOAD,
      TestKey::Repo(_) => REPO,
      TestKey::Lowercase(_) => LOWERCASE,
      TestKey::Concat(_) => CONCAT,
      TestKey::Parse(_) => PARSE,
      TestKey::Fail(_, _) => FAIL,
      TestKey::Flaky(_) => FLAKY,
      TestKey::Tolerant(_) => TOLERANT,
      TestKey::CycleSelf | TestKey::CycleA | TestKey::CycleB => CYCLE,
      TestKey::Rogue => ROGUE,
    }
  }
}

/// Mutable external inputs, standing in for the file system or network the
/// engine's host would provide. Change an input with [`set`](Inputs::set) and
/// report it changed with [`invalidate`](mason::Mason::invalidate) between
/// evaluations.
#[derive(Clone, Default)]
pub struct Inputs(Arc<Mutex<FxHashMap<String, String>>>);

impl Inputs {
  pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
    self.0.lock().insert(name.into(), value.into());
  }
  pub fn remove(&self, name: &str) -> Option<String> {
    self.0.lock().remove(name)
  }
  pub fn get(&self, name: &str) -> Option<String> {
    self.0.lock().get(name).cloned()
  }
}

/// A downloaded archive.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Archive {
  pub name: String,
  pub content: String,
}

/// A checked-out repository.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Checkout {
  pub path: String,
  pub content: String,
}

/// Output of [`TestKey::Parse`]: entries plus user-visible parse errors,
/// reported as data rather than as engine-level failures.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParseOutput {
  pub entries: Vec<(String, String)>,
  pub errors: Vec<String>,
}

/// Computes [`TestKey::Constant`] by reading [`Inputs`]; an unset input is a
/// persistent failure.
pub struct ConstantComputation {
  inputs: Inputs,
}

impl Computation<TestKey> for ConstantComputation {
  fn compute(&self, key: &TestKey, _env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Constant(name) = key else {
      panic!("BUG: constant computation invoked for {key:?}")
    };
    match self.inputs.get(name) {
      Some(value) => Ok(Outcome::complete(value)),
      None => Err(Failure::persistent(format!("input '{name}' is not set"))),
    }
  }
}

/// Computes [`TestKey::Download`] from the remote content in
/// `Constant(name)`.
pub struct DownloadComputation;

impl Computation<TestKey> for DownloadComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Download(name) = key else {
      panic!("BUG: download computation invoked for {key:?}")
    };
    let Some(content) = env.get_value(&TestKey::constant(name.clone())) else {
      return Ok(Outcome::Incomplete);
    };
    let content = content.downcast_ref::<String>()
      .expect("BUG: constant value is not a string")
      .clone();
    Ok(Outcome::complete(Archive { name: name.clone(), content }))
  }
}

/// Computes [`TestKey::Repo`] by materializing the archive of
/// `Download("{name}.tar")` into a checkout.
pub struct RepoComputation;

impl Computation<TestKey> for RepoComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Repo(name) = key else {
      panic!("BUG: repo computation invoked for {key:?}")
    };
    let Some(archive) = env.get_value(&TestKey::download(format!("{name}.tar"))) else {
      return Ok(Outcome::Incomplete);
    };
    let archive = archive.downcast_ref::<Archive>()
      .expect("BUG: download value is not an archive");
    Ok(Outcome::complete(Checkout {
      path: format!("/repos/{name}"),
      content: archive.content.clone(),
    }))
  }
}

/// Computes [`TestKey::Lowercase`] from the inner key's string value.
pub struct LowercaseComputation;

impl Computation<TestKey> for LowercaseComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Lowercase(inner) = key else {
      panic!("BUG: lowercase computation invoked for {key:?}")
    };
    let Some(value) = env.get_value(inner) else {
      return Ok(Outcome::Incomplete);
    };
    let Some(string) = value.downcast_ref::<String>() else {
      return Err(Failure::persistent(format!("value of {inner:?} is not a string")));
    };
    Ok(Outcome::complete(string.to_lowercase()))
  }
}

/// Computes [`TestKey::Concat`] by requesting all parts as a batch, so the
/// full dependency set is discovered in a single attempt.
pub struct ConcatComputation;

impl Computation<TestKey> for ConcatComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Concat(parts) = key else {
      panic!("BUG: concat computation invoked for {key:?}")
    };
    let values = env.get_values(parts);
    if env.values_missing() {
      return Ok(Outcome::Incomplete);
    }
    let mut joined = String::new();
    for (part, value) in parts.iter().zip(values) {
      let value = value.expect("BUG: value missing although values_missing is false");
      let Some(string) = value.downcast_ref::<String>() else {
        return Err(Failure::persistent(format!("value of {part:?} is not a string")));
      };
      joined.push_str(string);
    }
    Ok(Outcome::complete(joined))
  }
}

/// Computes [`TestKey::Parse`], reporting malformed lines as data in its
/// value: a parse error is a valid deterministic outcome, not a failure.
pub struct ParseComputation;

impl Computation<TestKey> for ParseComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Parse(name) = key else {
      panic!("BUG: parse computation invoked for {key:?}")
    };
    let Some(source) = env.get_value(&TestKey::constant(name.clone())) else {
      return Ok(Outcome::Incomplete);
    };
    let source = source.downcast_ref::<String>().expect("BUG: constant value is not a string");
    let mut output = ParseOutput { entries: Vec::new(), errors: Vec::new() };
    for (index, line) in source.lines().enumerate() {
      if line.is_empty() {
        continue;
      }
      match line.split_once('=') {
        Some((name, value)) => output.entries.push((name.to_string(), value.to_string())),
        None => output.errors.push(format!("line {}: expected 'name=value', got '{line}'", index + 1)),
      }
    }
    Ok(Outcome::complete(output))
  }
}

/// Computes [`TestKey::Fail`]: always fails with the transience in the key.
pub struct FailComputation;

impl Computation<TestKey> for FailComputation {
  fn compute(&self, key: &TestKey, _env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Fail(name, transience) = key else {
      panic!("BUG: fail computation invoked for {key:?}")
    };
    Err(Failure::new(format!("computation '{name}' failed"), *transience))
  }
}

/// Computes [`TestKey::Flaky`]: fails transiently on the first attempt per
/// name, succeeds on every attempt after that.
#[derive(Clone, Default)]
pub struct FlakyComputation {
  attempts: Arc<Mutex<FxHashMap<String, u32>>>,
}

impl Computation<TestKey> for FlakyComputation {
  fn compute(&self, key: &TestKey, _env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Flaky(name) = key else {
      panic!("BUG: flaky computation invoked for {key:?}")
    };
    let mut attempts = self.attempts.lock();
    let count = attempts.entry(name.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
      Err(Failure::transient(format!("transient glitch while computing '{name}'")))
    } else {
      Ok(Outcome::complete(format!("flaky:{name}")))
    }
  }
}

/// Computes [`TestKey::Tolerant`]: observes the inner key's failure as data
/// and produces a degraded-but-successful result from it.
pub struct TolerantComputation;

impl Computation<TestKey> for TolerantComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let TestKey::Tolerant(inner) = key else {
      panic!("BUG: tolerant computation invoked for {key:?}")
    };
    match env.get_result(inner) {
      None => Ok(Outcome::Incomplete),
      Some(Ok(value)) => Ok(Outcome::complete(format!("ok: {value:?}"))),
      Some(Err(error)) => Ok(Outcome::complete(format!("recovered: {error}"))),
    }
  }
}

/// Computes the cycle keys, each requiring the next key on its cycle.
pub struct CycleComputation;

impl Computation<TestKey> for CycleComputation {
  fn compute(&self, key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let target = match key {
      TestKey::CycleSelf => TestKey::CycleSelf,
      TestKey::CycleA => TestKey::CycleB,
      TestKey::CycleB => TestKey::CycleA,
      _ => panic!("BUG: cycle computation invoked for {key:?}"),
    };
    let Some(value) = env.get_value(&target) else {
      return Ok(Outcome::Incomplete);
    };
    Ok(Outcome::complete(format!("cycled: {value:?}")))
  }
}

/// Computes [`TestKey::Rogue`]: deliberately violates the engine contract by
/// completing while its dependency value is missing.
pub struct RogueComputation;

impl Computation<TestKey> for RogueComputation {
  fn compute(&self, _key: &TestKey, env: &mut Env<TestKey>) -> Result<Outcome, Failure> {
    let _ = env.get_value(&TestKey::constant("rogue-input"));
    Ok(Outcome::complete("rogue".to_string()))
  }
}

/// Creates a registry with all common test computations, reading external
/// state from `inputs`.
pub fn test_registry(inputs: &Inputs) -> Registry<TestKey> {
  let mut registry = Registry::new();
  registry
    .register(CONSTANT, ConstantComputation { inputs: inputs.clone() })
    .register(DOWNLOAD, DownloadComputation)
    .register(REPO, RepoComputation)
    .register(LOWERCASE, LowercaseComputation)
    .register(CONCAT, ConcatComputation)
    .register(PARSE, ParseComputation)
    .register(FAIL, FailComputation)
    .register(FLAKY, FlakyComputation::default())
    .register(TOLERANT, TolerantComputation)
    .register(CYCLE, CycleComputation)
    .register(ROGUE, RogueComputation);
  registry
}
