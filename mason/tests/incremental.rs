use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use rstest::rstest;
use testresult::TestResult;

use dev_shared::computations::{Checkout, Inputs, TestKey};
use dev_shared::test::{as_str, mason, TestMason, TestMasonExt};
use ::mason::{CancelToken, Computation, Env, EvalError, EvalParams, Failure, Key, Kind, Mason, Outcome, Registry};
use ::mason::tracker::event::Event::*;
use ::mason::tracker::event::EventTracker;

#[rstest]
fn test_repo_chain_memoized(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("foo.tar", "repository bytes");
  let repo = TestKey::repo("foo");
  let download = TestKey::download("foo.tar");
  let constant = TestKey::constant("foo.tar");

  // Each link in the chain suspends once on its missing dependency, then
  // completes on re-invocation.
  let result = mason.evaluate_then_assert(std::slice::from_ref(&repo), |events| {
    assert_eq!(events.invocations_of(&repo), 2);
    assert_eq!(events.invocations_of(&download), 2);
    assert_eq!(events.invocations_of(&constant), 1);
  });
  let value = result.get(&repo).cloned().unwrap()?;
  let checkout = value.downcast_ref::<Checkout>().unwrap();
  assert_eq!(checkout.path, "/repos/foo");
  assert_eq!(checkout.content, "repository bytes");

  // Nothing changed: the whole chain is reused without invoking anything.
  let value = mason.evaluate_then_assert_no_invoke(&repo)?;
  assert!(value.downcast_ref::<Checkout>().is_some());
  Ok(())
}

#[rstest]
fn test_restart_records_full_dependency_set(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("a", "left ");
  inputs.set("b", "right");
  let a = TestKey::constant("a");
  let b = TestKey::constant("b");
  // Make a done before the batch computation ever runs.
  mason.evaluate_one(&a)?;

  let concat = TestKey::concat([a.clone(), b.clone()]);
  let result = mason.evaluate_then_assert(std::slice::from_ref(&concat), |events| {
    // The first attempt reads the cached a; only b suspends it.
    let missing = events.slice().iter().find_map(|e| match e {
      Suspended { key, missing } if key == &concat => Some(missing.clone()),
      _ => None,
    }).unwrap();
    assert_eq!(missing, vec![b.clone()]);
    assert_eq!(events.invocations_of(&concat), 2);
    assert_eq!(events.invocations_of(&a), 0);
  });
  assert_eq!(as_str(&result.get(&concat).cloned().unwrap()?), "left right");

  // The already-done dependency was recorded as well: invalidating a dirties
  // the concatenation.
  inputs.set("a", "LEFT ");
  mason.invalidate([a.clone()]);
  let value = mason.evaluate_one(&concat)?;
  assert_eq!(as_str(&value), "LEFT right");
  assert_eq!(mason.events().invocations_of(&concat), 1);
  Ok(())
}

#[rstest]
fn test_change_pruning_skips_sibling(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("x", "AAA");
  inputs.set("y", "BBB");
  let cx = TestKey::constant("x");
  let lx = TestKey::lowercase(cx.clone());
  let cy = TestKey::constant("y");
  let ly = TestKey::lowercase(cy.clone());
  mason.evaluate_seq(&[lx.clone(), ly.clone()]);

  inputs.set("x", "CCC");
  mason.invalidate([cx.clone()]);

  let result = mason.evaluate_then_assert(&[lx.clone(), ly.clone()], |events| {
    assert_eq!(events.invocations_of(&cx), 1);
    assert_eq!(events.invocations_of(&lx), 1);
    // The sibling subgraph has no path to the changed input and is never
    // re-invoked.
    assert_eq!(events.invocations_of(&cy), 0);
    assert_eq!(events.invocations_of(&ly), 0);
    assert!(events.was_reused(&ly));
  });
  assert_eq!(as_str(&result.get(&lx).cloned().unwrap()?), "ccc");
  assert_eq!(as_str(&result.get(&ly).cloned().unwrap()?), "bbb");
  Ok(())
}

#[rstest]
fn test_change_pruning_on_equal_value(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("z", "HELLO");
  let cz = TestKey::constant("z");
  let lz = TestKey::lowercase(cz.clone());
  assert_eq!(as_str(&mason.evaluate_one(&lz)?), "hello");

  // Touch the input without changing its content.
  inputs.set("z", "HELLO");
  mason.invalidate([cz.clone()]);

  let result = mason.evaluate_then_assert(std::slice::from_ref(&lz), |events| {
    assert_eq!(events.invocations_of(&cz), 1);
    // The recomputed value is identical, so the dependent is not re-run.
    assert_eq!(events.invocations_of(&lz), 0);
    assert!(events.was_pruned(&lz));
  });
  assert_eq!(as_str(&result.get(&lz).cloned().unwrap()?), "hello");
  Ok(())
}

#[rstest]
fn test_change_pruning_stops_mid_chain(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("w", "HeLLo");
  let cw = TestKey::constant("w");
  let p = TestKey::lowercase(cw.clone());
  let q = TestKey::lowercase(p.clone());
  assert_eq!(as_str(&mason.evaluate_one(&q)?), "hello");

  // The input changes and its direct dependent recomputes, but to the same
  // lowercased value; the rest of the chain is pruned.
  inputs.set("w", "HELLO");
  mason.invalidate([cw.clone()]);

  let result = mason.evaluate_then_assert(std::slice::from_ref(&q), |events| {
    assert_eq!(events.invocations_of(&cw), 1);
    assert_eq!(events.invocations_of(&p), 1);
    assert_eq!(events.invocations_of(&q), 0);
    assert!(events.was_pruned(&q));
  });
  assert_eq!(as_str(&result.get(&q).cloned().unwrap()?), "hello");
  Ok(())
}

#[rstest]
fn test_error_dependency_forces_recomputation(mason: (TestMason, Inputs)) -> TestResult {
  let (mut mason, inputs) = mason;
  inputs.set("e", "DATA");
  let ce = TestKey::constant("e");
  let le = TestKey::lowercase(ce.clone());
  assert_eq!(as_str(&mason.evaluate_one(&le)?), "data");

  // The input disappears: its computation now fails, and the dirty dependent
  // is recomputed conservatively, through which the failure propagates.
  inputs.remove("e");
  mason.invalidate([ce.clone()]);

  let result = mason.evaluate_seq(std::slice::from_ref(&le));
  let error = result.error(&le).unwrap();
  assert_matches!(error.as_ref(), EvalError::Failed { key, .. } if key == &ce);
  assert_eq!(mason.events().invocations_of(&le), 1);
  let dep_error = mason.events().error_of(&ce).unwrap();
  assert!(Arc::ptr_eq(error, dep_error));
  Ok(())
}

#[test]
fn test_suspended_fetch_across_evaluations() {
  const REPO: Kind = Kind::new("fetch-repo");
  const DOWNLOAD: Kind = Kind::new("fetch-download");

  #[derive(Clone, PartialEq, Eq, Hash, Debug)]
  enum FetchKey {
    Repo,
    Download,
  }
  impl Key for FetchKey {
    fn kind(&self) -> Kind {
      match self {
        FetchKey::Repo => REPO,
        FetchKey::Download => DOWNLOAD,
      }
    }
  }

  /// Fetches the repository from its downloaded archive; cancels the
  /// evaluation once, standing in for a caller interrupting the build while
  /// the download is pending.
  struct RepoFetch {
    interrupt: Mutex<Option<CancelToken>>,
  }
  impl Computation<FetchKey> for RepoFetch {
    fn compute(&self, _key: &FetchKey, env: &mut Env<FetchKey>) -> Result<Outcome, Failure> {
      if let Some(token) = self.interrupt.lock().unwrap().take() {
        token.cancel();
      }
      let Some(path) = env.get_value(&FetchKey::Download) else {
        return Ok(Outcome::Incomplete);
      };
      let path = path.downcast_ref::<String>().expect("download value is a string");
      Ok(Outcome::complete(format!("extracted {path} to /repos/foo")))
    }
  }

  fn download(_key: &FetchKey, _env: &mut Env<FetchKey>) -> Result<Outcome, Failure> {
    Ok(Outcome::complete("/tmp/foo.tar".to_string()))
  }

  let token = CancelToken::new();
  let mut registry = Registry::new();
  registry
    .register(REPO, RepoFetch { interrupt: Mutex::new(Some(token.clone())) })
    .register(DOWNLOAD, download);
  let mut mason = Mason::with_tracker(registry, EventTracker::default());

  // The evaluation is cancelled while the fetch awaits its download: the
  // fetch is left waiting on dependencies and the download is never invoked.
  let result = mason.evaluate_with(
    &[FetchKey::Repo],
    EvalParams::new().with_workers(1).with_cancel_token(token),
  );
  assert!(result.is_cancelled());
  assert_matches!(result.error(&FetchKey::Repo).map(Arc::as_ref), Some(EvalError::Cancelled));
  assert_eq!(mason.tracker().invocations_of(&FetchKey::Download), 0);

  // The next evaluation resumes: the download runs exactly once in total and
  // the fetch completes from its value.
  let result = mason.evaluate_with(&[FetchKey::Repo], EvalParams::new().with_workers(1));
  let value = result.value(&FetchKey::Repo).expect("repo fetch completes");
  assert_eq!(
    value.downcast_ref::<String>().map(String::as_str),
    Some("extracted /tmp/foo.tar to /repos/foo"),
  );
  assert_eq!(mason.tracker().invocations_of(&FetchKey::Download), 1);
  assert_eq!(mason.tracker().invocations_of(&FetchKey::Repo), 2);
}
