//! The invalidator: marks the subgraph affected by changed external inputs.

use std::collections::VecDeque;

use crate::Key;
use crate::store::{Dirtiness, Store};
use crate::tracker::Tracker;

/// Marks every node that transitively depends on one of the `changed` keys.
///
/// The changed keys themselves are marked [`Dirtiness::Changed`] (recompute
/// when demanded); transitive dependents are marked [`Dirtiness::Dirty`]
/// (re-verify when demanded, recompute only if a dependency value actually
/// changed). Cached values and dependency edges are kept so re-verification
/// can prune unaffected dependents. Keys that were never requested are
/// ignored: nothing can depend on them yet.
pub(crate) fn invalidate<K: Key>(
  store: &mut Store<K>,
  tracker: &mut (dyn Tracker<K> + Send),
  changed: impl IntoIterator<Item=K>,
) {
  let seeds: Vec<K> = changed.into_iter().collect();
  tracker.invalidate_start(&seeds);

  let mut queue = VecDeque::new(); // OPTO: reuse allocation
  for key in &seeds {
    if let Some(node) = store.node_by_key(key) {
      store.mark_dirtiness(node, Dirtiness::Changed);
      tracker.dirtied(key, Dirtiness::Changed);
      queue.push_back(node);
    }
  }

  while let Some(node) = queue.pop_front() {
    let dependents: Vec<_> = store.dependents(node).map(|(n, _)| n).collect();
    for dependent in dependents {
      // A non-clean node was already visited (or is itself a changed seed,
      // which must not be downgraded).
      if store.dirtiness(dependent) == Dirtiness::Clean {
        store.mark_dirtiness(dependent, Dirtiness::Dirty);
        tracker.dirtied(store.key(dependent), Dirtiness::Dirty);
        queue.push_back(dependent);
      }
    }
  }

  tracker.invalidate_end();
}
