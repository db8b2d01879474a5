use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use assert_matches::assert_matches;
use rstest::rstest;
use testresult::TestResult;

use dev_shared::computations::{Inputs, ParseOutput, TestKey};
use dev_shared::test::{as_str, mason, TestMason, TestMasonExt};
use ::mason::{Env, EvalError, EvalParams, Failure, Key, Kind, Mason, Outcome, Registry};
use ::mason::tracker::event::Event::*;
use ::mason::tracker::metrics::MetricsTracker;

#[rstest]
fn test_exec(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("greeting", "Hello, World!");
  let key = TestKey::constant("greeting");

  let result = mason.evaluate_then_assert(std::slice::from_ref(&key), |events| {
    let events = events.slice();
    assert_matches!(events.get(0), Some(EvaluateStart { .. }));
    assert_matches!(events.get(1), Some(Scheduled { key: k }) if k == &key);
    assert_matches!(events.get(2), Some(InvokeStart { key: k }) if k == &key);
    assert_matches!(events.get(3), Some(Completed { key: k, changed: true, .. }) if k == &key);
    assert_matches!(events.get(4), Some(EvaluateEnd { cancelled: false }));
  });
  let value = result.get(&key).cloned().unwrap()?;
  assert_eq!(as_str(&value), "Hello, World!");
  Ok(())
}

#[rstest]
fn test_reuse(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("greeting", "Hello world");
  let key = TestKey::constant("greeting");
  // New key: computed.
  let value = mason.evaluate_then_assert_one_invoke(&key)?;
  assert_eq!(as_str(&value), "Hello world");
  // Nothing changed: served from cache without invoking anything.
  let value = mason.evaluate_then_assert_no_invoke(&key)?;
  assert_eq!(as_str(&value), "Hello world");
  assert!(mason.events().was_reused(&key));
  Ok(())
}

#[rstest]
fn test_dependency_restart(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("greeting", "HELLO WORLD!");
  let constant = TestKey::constant("greeting");
  let task = TestKey::lowercase(constant.clone());

  // The root suspends on its missing dependency, the dependency is computed,
  // and the root is re-invoked and completes after it.
  let result = mason.evaluate_then_assert(std::slice::from_ref(&task), |events| {
    assert_eq!(events.invocations_of(&task), 2);
    assert_eq!(events.suspensions_of(&task), 1);
    assert_eq!(events.invocations_of(&constant), 1);
    let constant_done = events.index_completed(&constant).unwrap();
    let task_done = events.index_completed(&task).unwrap();
    assert!(constant_done < task_done);
  });
  let value = result.get(&task).cloned().unwrap()?;
  assert_eq!(as_str(&value), "hello world!");
  Ok(())
}

#[rstest]
fn test_batch_requests_all_keys(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("a", "1");
  inputs.set("b", "2");
  inputs.set("c", "3");
  let parts = vec![TestKey::constant("a"), TestKey::constant("b"), TestKey::constant("c")];
  let task = TestKey::concat(parts.clone());

  let result = mason.evaluate_then_assert(std::slice::from_ref(&task), |events| {
    // The batch request discovers the full dependency set in one attempt
    // instead of one dependency per restart.
    let missing = events.slice().iter().find_map(|e| match e {
      Suspended { key, missing } if key == &task => Some(missing.clone()),
      _ => None,
    }).unwrap();
    assert_eq!(missing, parts);
    assert_eq!(events.invocations_of(&task), 2);
    for part in &parts {
      assert_eq!(events.invocations_of(part), 1);
    }
  });
  let value = result.get(&task).cloned().unwrap()?;
  assert_eq!(as_str(&value), "123");
  Ok(())
}

#[rstest]
fn test_roots_share_dependency(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("x", "ABC");
  let constant = TestKey::constant("x");
  let lower = TestKey::lowercase(constant.clone());
  let concat = TestKey::concat([constant.clone()]);

  let result = mason.evaluate_then_assert(&[lower.clone(), concat.clone()], |events| {
    assert_eq!(events.invocations_of(&constant), 1);
  });
  assert_eq!(as_str(&result.get(&lower).cloned().unwrap()?), "abc");
  assert_eq!(as_str(&result.get(&concat).cloned().unwrap()?), "ABC");
  Ok(())
}

#[rstest]
fn test_parse_errors_are_data(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("workspace", "name=mason\nbogus line\nversion=1");
  let key = TestKey::parse("workspace");

  // Malformed input is a valid deterministic outcome: the key completes with
  // the errors attached to its value instead of failing.
  let value = mason.evaluate_one(&key)?;
  let output = value.downcast_ref::<ParseOutput>().unwrap();
  assert_eq!(output.entries, vec![
    ("name".to_string(), "mason".to_string()),
    ("version".to_string(), "1".to_string()),
  ]);
  assert_eq!(output.errors.len(), 1);
  assert!(output.errors[0].contains("bogus line"));
  Ok(())
}

#[rstest]
fn test_empty_roots(mason: (TestMason, Inputs)) {
  let (mut mason, _inputs) = mason;
  let result = mason.evaluate_seq(&[]);
  assert!(result.is_empty());
  assert!(!result.is_cancelled());
}

#[test]
fn test_unregistered_kind() {
  #[derive(Clone, PartialEq, Eq, Hash, Debug)]
  struct Bare;
  impl Key for Bare {
    fn kind(&self) -> Kind { Kind::new("unregistered") }
  }

  let mut mason = Mason::new(Registry::<Bare>::new());
  let result = mason.evaluate(&[Bare]);
  assert_matches!(result.error(&Bare).map(Arc::as_ref), Some(EvalError::NoComputation { .. }));
}

#[test]
fn test_parallel_evaluation() {
  const LEAF: Kind = Kind::new("leaf");
  const SUM: Kind = Kind::new("sum");

  #[derive(Clone, PartialEq, Eq, Hash, Debug)]
  enum ParKey {
    Leaf(u32),
    Sum,
  }
  impl Key for ParKey {
    fn kind(&self) -> Kind {
      match self {
        ParKey::Leaf(_) => LEAF,
        ParKey::Sum => SUM,
      }
    }
  }

  static LEAF_INVOCATIONS: AtomicU32 = AtomicU32::new(0);

  fn leaf(key: &ParKey, _env: &mut Env<ParKey>) -> Result<Outcome, Failure> {
    let ParKey::Leaf(n) = key else {
      panic!("BUG: leaf computation invoked for {key:?}")
    };
    LEAF_INVOCATIONS.fetch_add(1, Ordering::SeqCst);
    Ok(Outcome::complete(n * 2))
  }

  fn sum(_key: &ParKey, env: &mut Env<ParKey>) -> Result<Outcome, Failure> {
    let leaves: Vec<ParKey> = (0..8).map(ParKey::Leaf).collect();
    let values = env.get_values(&leaves);
    if env.values_missing() {
      return Ok(Outcome::Incomplete);
    }
    let sum: u32 = values.into_iter()
      .map(|v| *v.unwrap().downcast_ref::<u32>().unwrap())
      .sum();
    Ok(Outcome::complete(sum))
  }

  let mut registry = Registry::new();
  registry.register(LEAF, leaf).register(SUM, sum);
  let mut mason = Mason::with_tracker(registry, MetricsTracker::default());

  let result = mason.evaluate_with(&[ParKey::Sum], EvalParams::new().with_workers(4));
  let value = result.value(&ParKey::Sum).expect("sum evaluates");
  assert_eq!(value.downcast_ref::<u32>(), Some(&56));

  // Every leaf ran exactly once even with concurrent workers.
  assert_eq!(LEAF_INVOCATIONS.load(Ordering::SeqCst), 8);
  let report = mason.tracker().report();
  assert_eq!(report.total_invocations, 10); // 8 leaves + 2 attempts of the sum
  assert_eq!(report.total_suspensions, 1);
  assert_eq!(report.total_completions, 9);
}
