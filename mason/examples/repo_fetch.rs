//! Demand-driven repository fetching: a repo checkout depends on a download,
//! which depends on the origin's content. Evaluating twice reuses the cache;
//! invalidating the origin recomputes only what actually changed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mason::{Computation, Env, Failure, Key, Kind, Mason, Outcome, Registry};
use mason::tracker::writing::WritingTracker;

const ORIGIN: Kind = Kind::new("origin");
const DOWNLOAD: Kind = Kind::new("download");
const REPO: Kind = Kind::new("repo");

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum BuildKey {
  /// Content of the remote origin, an external input.
  Origin(&'static str),
  /// Archive downloaded from the origin.
  Download(&'static str),
  /// Repository checked out from the downloaded archive.
  Repo(&'static str),
}

impl Key for BuildKey {
  fn kind(&self) -> Kind {
    match self {
      BuildKey::Origin(_) => ORIGIN,
      BuildKey::Download(_) => DOWNLOAD,
      BuildKey::Repo(_) => REPO,
    }
  }
}

type Origins = Arc<Mutex<HashMap<&'static str, String>>>;

struct OriginComputation {
  origins: Origins,
}

impl Computation<BuildKey> for OriginComputation {
  fn compute(&self, key: &BuildKey, _env: &mut Env<BuildKey>) -> Result<Outcome, Failure> {
    let BuildKey::Origin(name) = key else { unreachable!() };
    match self.origins.lock().unwrap().get(name) {
      Some(content) => Ok(Outcome::complete(content.clone())),
      None => Err(Failure::transient(format!("origin '{name}' is unreachable"))),
    }
  }
}

struct DownloadComputation;

impl Computation<BuildKey> for DownloadComputation {
  fn compute(&self, key: &BuildKey, env: &mut Env<BuildKey>) -> Result<Outcome, Failure> {
    let BuildKey::Download(name) = key else { unreachable!() };
    let Some(content) = env.get_value(&BuildKey::Origin(name)) else {
      return Ok(Outcome::Incomplete);
    };
    let content = content.downcast_ref::<String>().unwrap();
    // The archive path only changes when the content size does.
    Ok(Outcome::complete(format!("/downloads/{name}-{}.tar", content.len())))
  }
}

struct RepoComputation;

impl Computation<BuildKey> for RepoComputation {
  fn compute(&self, key: &BuildKey, env: &mut Env<BuildKey>) -> Result<Outcome, Failure> {
    let BuildKey::Repo(name) = key else { unreachable!() };
    let Some(archive) = env.get_value(&BuildKey::Download(name)) else {
      return Ok(Outcome::Incomplete);
    };
    let archive = archive.downcast_ref::<String>().unwrap();
    Ok(Outcome::complete(format!("/repos/{name} (from {archive})")))
  }
}

fn main() {
  let origins: Origins = Origins::default();
  origins.lock().unwrap().insert("mason-lib", "fn lib() {}".to_string());

  let mut registry = Registry::new();
  registry
    .register(ORIGIN, OriginComputation { origins: origins.clone() })
    .register(DOWNLOAD, DownloadComputation)
    .register(REPO, RepoComputation);
  let mut mason = Mason::with_tracker(registry, WritingTracker::with_stdout());

  let repo = BuildKey::Repo("mason-lib");
  let result = mason.evaluate(&[repo.clone()]);
  println!("checked out: {:?}\n", result.value(&repo).unwrap());

  // Nothing changed: everything is served from cache.
  mason.evaluate(&[repo.clone()]);
  println!();

  // The origin changes but keeps its size: the download is recomputed to the
  // same archive path, so the checkout is pruned instead of re-run.
  origins.lock().unwrap().insert("mason-lib", "fn big() {}".to_string());
  mason.invalidate([BuildKey::Origin("mason-lib")]);
  let result = mason.evaluate(&[repo.clone()]);
  println!("still: {:?}", result.value(&repo).unwrap());
}
