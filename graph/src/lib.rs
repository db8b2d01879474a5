#![forbid(unsafe_code, missing_docs)]

//! Arena-based dependency graph for the mason build engine.
//!
//! Nodes live in a slot arena and are addressed by stable [`Node`] indices, so
//! dependency and reverse-dependency edges are plain index pairs instead of
//! references. Both edge directions are stored explicitly and kept in exact
//! correspondence: after every mutation, `b` is a dependency of `a` if and
//! only if `a` is a dependent of `b`. Adjacency sets preserve insertion order,
//! so a node's dependencies iterate in the order the edges were added.
//!
//! The graph rejects edges that would make it cyclic. Unlike a plain
//! "cycle detected" flag, [`Dag::add_edge`] reports the full ordered path of
//! the would-be cycle, which callers need for diagnostics.
//!
//! ## Examples
//!
//! ```
//! use mason_graph::{Dag, Error};
//!
//! let mut dag = Dag::new();
//! let a = dag.add_node("a");
//! let b = dag.add_node("b");
//! let c = dag.add_node("c");
//!
//! assert!(dag.add_edge(&a, &b, ()).unwrap());
//! assert!(dag.add_edge(&b, &c, ()).unwrap());
//!
//! // Closing the loop is rejected, and the error carries the cycle: c would
//! // depend on a, a depends on b, and b depends on c.
//! assert_eq!(dag.add_edge(&c, &a, ()), Err(Error::WouldCycle(vec![c, a, b])));
//!
//! let deps: Vec<_> = dag.dependency_nodes_of(&a).copied().collect();
//! assert_eq!(deps, vec![b]);
//! let dependents: Vec<_> = dag.dependent_nodes_of(&b).copied().collect();
//! assert_eq!(dependents, vec![a]);
//! ```

use std::borrow::Borrow;
use std::cell::Cell;
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

use hashlink::LinkedHashSet;
use slotmap::{DefaultKey, SlotMap};

/// Directed acyclic graph with arena-allocated nodes, ordered adjacency in
/// both directions, and per-edge data.
pub struct Dag<N, E, H = RandomState> {
  nodes: SlotMap<DefaultKey, NodeInfo<N, H>>,
  edge_data: HashMap<(Node, Node), E, H>,
  scratch: Cell<Scratch<H>>,
}

/// A node (identifier) in a [`Dag`].
///
/// Identifiers are stable: they are never invalidated or reused while the
/// graph is alive.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Node(DefaultKey);

/// Node data along with its adjacency in both directions.
struct NodeInfo<N, H> {
  data: N,
  /// Nodes this node has an edge to, in edge insertion order.
  dependencies: LinkedHashSet<Node, H>,
  /// Nodes that have an edge to this node, in edge insertion order.
  dependents: LinkedHashSet<Node, H>,
}

impl<N, H: BuildHasher + Default> NodeInfo<N, H> {
  fn new(data: N) -> Self {
    Self {
      data,
      dependencies: Default::default(),
      dependents: Default::default(),
    }
  }
}

/// Failures that can occur while updating the graph.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  /// A given node was not found in the graph.
  #[error("node was not found in the graph")]
  NodeMissing,
  /// Adding the edge would make the graph cyclic. Carries the ordered cycle
  /// that the edge would have closed, starting at the edge's source node.
  #[error("edge would make the dependency graph cyclic")]
  WouldCycle(Vec<Node>),
}

impl<N, E, H: BuildHasher + Default> Default for Dag<N, E, H> {
  #[inline]
  fn default() -> Self {
    Self {
      nodes: SlotMap::default(),
      edge_data: Default::default(),
      scratch: Cell::default(),
    }
  }
}

impl<N, E> Dag<N, E> {
  /// Creates a new empty graph.
  #[inline]
  pub fn new() -> Self { Self::default() }
}

impl<N, E, H: BuildHasher + Default> Dag<N, E, H> {
  /// Adds a new node with `data` to the graph, returning the unique [`Node`]
  /// which identifies it. The node starts without any edges.
  #[inline]
  pub fn add_node(&mut self, data: N) -> Node {
    Node(self.nodes.insert(NodeInfo::new(data)))
  }

  /// Returns true if the graph contains `node`.
  #[inline]
  pub fn contains_node(&self, node: impl Borrow<Node>) -> bool {
    self.nodes.contains_key(node.borrow().0)
  }

  /// Gets the data of `node`.
  #[inline]
  pub fn get_node_data(&self, node: impl Borrow<Node>) -> Option<&N> {
    self.nodes.get(node.borrow().0).map(|n| &n.data)
  }

  /// Gets the mutable data of `node`.
  #[inline]
  pub fn get_node_data_mut(&mut self, node: impl Borrow<Node>) -> Option<&mut N> {
    self.nodes.get_mut(node.borrow().0).map(|n| &mut n.data)
  }

  /// Returns the number of nodes in the graph.
  #[inline]
  pub fn len(&self) -> usize { self.nodes.len() }

  /// Returns true if there are no nodes in the graph.
  #[inline]
  pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

  /// Returns an iterator over all nodes of the graph, in arbitrary order.
  #[inline]
  pub fn nodes(&self) -> impl Iterator<Item=Node> + '_ {
    self.nodes.keys().map(Node)
  }


  /// Adds an edge from `src` to `dst` with edge `data`, meaning `src` depends
  /// on `dst`.
  ///
  /// Returns `Ok(true)` if the edge was newly added, or `Ok(false)` if the
  /// edge already existed; in the latter case its data is replaced by `data`.
  ///
  /// # Errors
  ///
  /// Returns [`Error::NodeMissing`] if either node is not in the graph.
  /// Returns [`Error::WouldCycle`] if the edge would make the graph cyclic,
  /// without modifying the graph. The contained path starts at `src`,
  /// continues with `dst`, and follows existing edges back to a node with an
  /// edge to `src`.
  pub fn add_edge(&mut self, src: impl Borrow<Node>, dst: impl Borrow<Node>, data: E) -> Result<bool, Error> {
    let src = *src.borrow();
    let dst = *dst.borrow();

    if !self.nodes.contains_key(src.0) || !self.nodes.contains_key(dst.0) {
      return Err(Error::NodeMissing);
    }
    if src == dst { // An edge to self is the smallest possible cycle.
      return Err(Error::WouldCycle(vec![src]));
    }
    if self.nodes[src.0].dependencies.contains(&dst) {
      self.edge_data.insert((src, dst), data);
      return Ok(false);
    }

    if self.can_reach(dst, src) {
      // Unwrap OK: can_reach returned true, so a path must exist.
      let path = self.find_path(dst, src).unwrap();
      let mut cycle = Vec::with_capacity(path.len());
      cycle.push(src);
      cycle.extend(path.into_iter().filter(|node| *node != src));
      return Err(Error::WouldCycle(cycle));
    }

    self.nodes[src.0].dependencies.insert(dst);
    self.nodes[dst.0].dependents.insert(src);
    self.edge_data.insert((src, dst), data);
    Ok(true)
  }

  /// Returns true if the graph contains an edge from `src` to `dst`; false
  /// when there is no edge or either node is missing.
  #[inline]
  pub fn contains_edge(&self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> bool {
    self.edge_data.contains_key(&(*src.borrow(), *dst.borrow()))
  }

  /// Gets the data of the edge from `src` to `dst`.
  #[inline]
  pub fn get_edge_data(&self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> Option<&E> {
    self.edge_data.get(&(*src.borrow(), *dst.borrow()))
  }

  /// Removes the edge from `src` to `dst`, returning its data if the edge
  /// existed.
  pub fn remove_edge(&mut self, src: impl Borrow<Node>, dst: impl Borrow<Node>) -> Option<E> {
    let src = *src.borrow();
    let dst = *dst.borrow();
    let data = self.edge_data.remove(&(src, dst))?;
    self.nodes[src.0].dependencies.remove(&dst);
    self.nodes[dst.0].dependents.remove(&src);
    Some(data)
  }

  /// Removes all outgoing edges of `src`, returning the former dependency
  /// nodes with their edge data, in edge insertion order.
  pub fn remove_dependencies_of(&mut self, src: impl Borrow<Node>) -> Vec<(Node, E)> {
    let src = *src.borrow();
    let Some(info) = self.nodes.get_mut(src.0) else {
      return Vec::new();
    };
    let dependencies: Vec<_> = info.dependencies.drain().collect(); // OPTO: reuse allocation
    let mut removed = Vec::with_capacity(dependencies.len());
    for dst in dependencies {
      if let Some(dst_info) = self.nodes.get_mut(dst.0) {
        dst_info.dependents.remove(&src);
      }
      if let Some(data) = self.edge_data.remove(&(src, dst)) {
        removed.push((dst, data));
      }
    }
    removed
  }


  /// Gets the dependency nodes and edge data for all outgoing edges of `src`,
  /// in edge insertion order.
  #[inline]
  pub fn dependencies_of(&self, src: impl Borrow<Node>) -> impl Iterator<Item=(&Node, &E)> + '_ {
    let src = *src.borrow();
    self.nodes.get(src.0)
      .into_iter()
      .flat_map(|info| info.dependencies.iter())
      .map(move |dst| (dst, self.edge_data.get(&(src, *dst)).unwrap()))
  }

  /// Gets the dependency nodes for all outgoing edges of `src`, in edge
  /// insertion order.
  #[inline]
  pub fn dependency_nodes_of(&self, src: impl Borrow<Node>) -> impl Iterator<Item=&Node> + '_ {
    let src = *src.borrow();
    self.nodes.get(src.0)
      .into_iter()
      .flat_map(|info| info.dependencies.iter())
  }

  /// Gets the dependent nodes and edge data for all incoming edges of `dst`,
  /// in edge insertion order.
  #[inline]
  pub fn dependents_of(&self, dst: impl Borrow<Node>) -> impl Iterator<Item=(&Node, &E)> + '_ {
    let dst = *dst.borrow();
    self.nodes.get(dst.0)
      .into_iter()
      .flat_map(|info| info.dependents.iter())
      .map(move |src| (src, self.edge_data.get(&(*src, dst)).unwrap()))
  }

  /// Gets the dependent nodes for all incoming edges of `dst`, in edge
  /// insertion order.
  #[inline]
  pub fn dependent_nodes_of(&self, dst: impl Borrow<Node>) -> impl Iterator<Item=&Node> + '_ {
    let dst = *dst.borrow();
    self.nodes.get(dst.0)
      .into_iter()
      .flat_map(|info| info.dependents.iter())
  }


  /// Returns true if `dst` is reachable from `src` by following dependency
  /// edges (including `src == dst`).
  fn can_reach(&self, src: Node, dst: Node) -> bool {
    if src == dst {
      return true;
    }
    let mut scratch = self.scratch.take();
    scratch.clear();
    scratch.stack.push(src);

    let mut found = false;
    while let Some(node) = scratch.stack.pop() {
      if !scratch.visited.insert(node) {
        continue;
      }
      let dependencies = &self.nodes[node.0].dependencies;
      if dependencies.contains(&dst) {
        found = true;
        break;
      }
      scratch.stack.extend(dependencies.iter());
    }

    self.scratch.set(scratch);
    found
  }

  /// Finds a path of dependency edges from `src` to `dst`, inclusive of both.
  fn find_path(&self, src: Node, dst: Node) -> Option<Vec<Node>> {
    let mut scratch = self.scratch.take();
    scratch.clear();
    scratch.stack.push(src);
    let mut came_from = HashMap::<Node, Node, H>::default();

    let mut found = false;
    while let Some(node) = scratch.stack.pop() {
      if !scratch.visited.insert(node) {
        continue;
      }
      if node == dst {
        found = true;
        break;
      }
      for dependency in self.nodes[node.0].dependencies.iter() {
        if !scratch.visited.contains(dependency) {
          came_from.entry(*dependency).or_insert(node);
          scratch.stack.push(*dependency);
        }
      }
    }
    self.scratch.set(scratch);

    if !found {
      return None;
    }
    let mut path = vec![dst];
    let mut current = dst;
    while current != src {
      // Unwrap OK: every node on the path except `src` was discovered from a
      // predecessor.
      current = *came_from.get(&current).unwrap();
      path.push(current);
    }
    path.reverse();
    Some(path)
  }
}


/// Reusable stack and visited set for graph searches.
struct Scratch<H> {
  stack: Vec<Node>,
  visited: LinkedHashSet<Node, H>,
}

impl<H: BuildHasher + Default> Default for Scratch<H> {
  fn default() -> Self {
    Self { stack: Vec::new(), visited: Default::default() }
  }
}

impl<H> Scratch<H> {
  fn clear(&mut self) {
    self.stack.clear();
    self.visited.clear();
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn diamond() -> (Dag<&'static str, u32>, [Node; 4]) {
    let mut dag = Dag::new();
    let top = dag.add_node("top");
    let left = dag.add_node("left");
    let right = dag.add_node("right");
    let bottom = dag.add_node("bottom");
    dag.add_edge(top, left, 0).unwrap();
    dag.add_edge(top, right, 1).unwrap();
    dag.add_edge(left, bottom, 2).unwrap();
    dag.add_edge(right, bottom, 3).unwrap();
    (dag, [top, left, right, bottom])
  }

  #[test]
  fn add_and_get_nodes() {
    let mut dag = Dag::<_, ()>::new();
    let a = dag.add_node(1);
    let b = dag.add_node(2);
    assert_ne!(a, b);
    assert_eq!(dag.len(), 2);
    assert!(dag.contains_node(a));
    assert_eq!(dag.get_node_data(a), Some(&1));
    *dag.get_node_data_mut(b).unwrap() = 3;
    assert_eq!(dag.get_node_data(b), Some(&3));
    assert!(!dag.is_empty());
  }

  #[test]
  fn edges_are_transposed_and_ordered() {
    let (dag, [top, left, right, bottom]) = diamond();
    let dependencies: Vec<_> = dag.dependency_nodes_of(top).copied().collect();
    assert_eq!(dependencies, vec![left, right]);
    let dependents: Vec<_> = dag.dependent_nodes_of(bottom).copied().collect();
    assert_eq!(dependents, vec![left, right]);
    assert!(dag.contains_edge(top, left));
    assert!(!dag.contains_edge(left, top));
    assert_eq!(dag.get_edge_data(right, bottom), Some(&3));
  }

  #[test]
  fn duplicate_edge_replaces_data() {
    let (mut dag, [top, left, _, _]) = diamond();
    assert_eq!(dag.add_edge(top, left, 42), Ok(false));
    assert_eq!(dag.get_edge_data(top, left), Some(&42));
    let dependencies: Vec<_> = dag.dependency_nodes_of(top).copied().collect();
    assert_eq!(dependencies.len(), 2);
  }

  #[test]
  fn remove_edge_removes_both_directions() {
    let (mut dag, [top, left, right, _]) = diamond();
    assert_eq!(dag.remove_edge(top, left), Some(0));
    assert_eq!(dag.remove_edge(top, left), None);
    let dependencies: Vec<_> = dag.dependency_nodes_of(top).copied().collect();
    assert_eq!(dependencies, vec![right]);
    assert!(dag.dependent_nodes_of(left).next().is_none());
  }

  #[test]
  fn remove_dependencies_clears_transpose() {
    let (mut dag, [top, left, right, bottom]) = diamond();
    let removed = dag.remove_dependencies_of(top);
    assert_eq!(removed, vec![(left, 0), (right, 1)]);
    assert!(dag.dependency_nodes_of(top).next().is_none());
    assert!(dag.dependent_nodes_of(left).next().is_none());
    assert!(dag.dependent_nodes_of(right).next().is_none());
    // Unrelated edges are untouched.
    assert!(dag.contains_edge(left, bottom));
    assert_eq!(dag.remove_dependencies_of(top), Vec::new());
  }

  #[test]
  fn reject_self_cycle() {
    let mut dag = Dag::new();
    let a = dag.add_node(());
    assert_eq!(dag.add_edge(a, a, ()), Err(Error::WouldCycle(vec![a])));
  }

  #[test]
  fn reject_two_cycle() {
    let mut dag = Dag::new();
    let a = dag.add_node(());
    let b = dag.add_node(());
    assert!(dag.add_edge(a, b, ()).unwrap());
    assert_eq!(dag.add_edge(b, a, ()), Err(Error::WouldCycle(vec![b, a])));
    // The rejected edge must not have been inserted.
    assert!(!dag.contains_edge(b, a));
    assert!(dag.dependency_nodes_of(b).next().is_none());
  }

  #[test]
  fn reject_long_cycle_with_full_path() {
    let mut dag = Dag::new();
    let a = dag.add_node(());
    let b = dag.add_node(());
    let c = dag.add_node(());
    dag.add_edge(a, b, ()).unwrap();
    dag.add_edge(b, c, ()).unwrap();
    assert_eq!(dag.add_edge(c, a, ()), Err(Error::WouldCycle(vec![c, a, b])));
  }

  #[test]
  fn missing_node_is_rejected() {
    let mut dag = Dag::new();
    let a = dag.add_node(());
    let mut other = Dag::<(), ()>::new();
    other.add_node(());
    // The second slot of `other` does not exist in `dag`, which has one node.
    let foreign = other.add_node(());
    assert_eq!(dag.add_edge(a, foreign, ()), Err(Error::NodeMissing));
    assert_eq!(dag.add_edge(foreign, a, ()), Err(Error::NodeMissing));
  }

  #[test]
  fn diamond_is_not_a_cycle() {
    let (mut dag, [top, _, _, bottom]) = diamond();
    // Both paths reach bottom, but no edge back to top exists.
    assert!(dag.add_edge(bottom, top, 9).is_err());
    assert!(dag.add_edge(top, bottom, 4).unwrap());
  }
}
