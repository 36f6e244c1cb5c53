//! Compiled graph views.
//!
//! A [`Cluster`] is the immutable product of a builder compile: dense node
//! and edge arrays, a point-to-node lookup, and per-node adjacency packed
//! as neighbor-plus-edge links. Shared readers hold it behind an `Arc`;
//! anything that needs to flag nodes or edges during parallel work takes a
//! [`WorkingCopy`], which overlays its own atomic validity on top of the
//! shared cluster without touching it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::constants::{INLINE_ADJACENCY, INVALID_INDEX};
use crate::error::CorruptionError;
use crate::graph::edge::{AdjacencyLink, Edge};

// ============================================================================
// Compiled elements
// ============================================================================

/// A compiled graph node. `point_index` refers back to the originating
/// point set; adjacency stays inline for nodes of small degree.
#[derive(Clone, Debug)]
pub struct Node {
  pub point_index: u32,
  pub adjacency: SmallVec<[AdjacencyLink; INLINE_ADJACENCY]>,
  valid: bool,
}

impl Node {
  pub(crate) fn new(point_index: u32, valid: bool) -> Self {
    Self {
      point_index,
      adjacency: SmallVec::new(),
      valid,
    }
  }

  #[inline]
  pub fn is_valid(&self) -> bool {
    self.valid
  }

  #[inline]
  pub fn degree(&self) -> usize {
    self.adjacency.len()
  }
}

/// A compiled edge. Endpoints are node indices into the owning cluster,
/// not point indices.
#[derive(Clone, Copy, Debug)]
pub struct ClusterEdge {
  pub start: u32,
  pub end: u32,
  pub point_index: u32,
  valid: bool,
}

impl ClusterEdge {
  pub(crate) fn new(start: u32, end: u32, point_index: u32, valid: bool) -> Self {
    Self {
      start,
      end,
      point_index,
      valid,
    }
  }

  #[inline]
  pub fn is_valid(&self) -> bool {
    self.valid
  }

  /// The node opposite `node`, if `node` is an endpoint.
  #[inline]
  pub fn other_node(&self, node: u32) -> Option<u32> {
    if self.start == node {
      Some(self.end)
    } else if self.end == node {
      Some(self.start)
    } else {
      None
    }
  }
}

// ============================================================================
// Cluster
// ============================================================================

/// Point-index to node-index map of one compiled cluster.
pub type NodeIndexLookup = FxHashMap<u32, u32>;

/// Immutable compiled graph. Node indices are assigned by ascending point
/// index and edges are ordered by canonical key, so two compiles of the
/// same builder content produce identical clusters.
pub struct Cluster {
  nodes: Vec<Node>,
  edges: Vec<ClusterEdge>,
  lookup: NodeIndexLookup,
}

impl Cluster {
  pub(crate) fn new(nodes: Vec<Node>, edges: Vec<ClusterEdge>, lookup: NodeIndexLookup) -> Self {
    Self {
      nodes,
      edges,
      lookup,
    }
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn edge_count(&self) -> usize {
    self.edges.len()
  }

  pub fn is_empty(&self) -> bool {
    self.edges.is_empty()
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn edges(&self) -> &[ClusterEdge] {
    &self.edges
  }

  pub fn node(&self, index: u32) -> Option<&Node> {
    self.nodes.get(index as usize)
  }

  pub fn edge(&self, index: u32) -> Option<&ClusterEdge> {
    self.edges.get(index as usize)
  }

  /// Node index owning `point`, if the point participates in this cluster.
  pub fn node_of_point(&self, point: u32) -> Option<u32> {
    self.lookup.get(&point).copied()
  }

  pub fn point_of_node(&self, node: u32) -> Option<u32> {
    self.nodes.get(node as usize).map(|n| n.point_index)
  }

  /// Endpoint node indices of `edge`.
  pub fn edge_endpoints(&self, edge: u32) -> Option<(u32, u32)> {
    self.edges.get(edge as usize).map(|e| (e.start, e.end))
  }

  /// The node on the far side of `edge` from `from_node`.
  pub fn other_node(&self, edge: u32, from_node: u32) -> Option<&Node> {
    let other = self.edges.get(edge as usize)?.other_node(from_node)?;
    self.nodes.get(other as usize)
  }

  /// Walks the adjacency of `node` as `(neighbor node, edge index)` pairs.
  pub fn neighbors(&self, node: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
    self
      .nodes
      .get(node as usize)
      .into_iter()
      .flat_map(|n| n.adjacency.iter().map(|link| (link.node(), link.edge())))
  }

  /// Whether an edge still counts: its own flag plus both endpoint nodes.
  pub fn is_edge_live(&self, index: u32) -> bool {
    let Some(edge) = self.edges.get(index as usize) else {
      return false;
    };
    edge.is_valid()
      && self.nodes.get(edge.start as usize).is_some_and(Node::is_valid)
      && self.nodes.get(edge.end as usize).is_some_and(Node::is_valid)
  }

  /// Re-compacts the live edges into point-index form. Builds a fresh list
  /// on every call; validity flags never shrink the stored arrays.
  pub fn valid_edges(&self) -> Vec<Edge> {
    let mut edges = Vec::new();
    for (index, edge) in self.edges.iter().enumerate() {
      if !self.is_edge_live(index as u32) {
        continue;
      }
      let (Some(start), Some(end)) = (
        self.point_of_node(edge.start),
        self.point_of_node(edge.end),
      ) else {
        continue;
      };
      edges.push(Edge::with_point_index(start, end, edge.point_index));
    }
    edges
  }

  /// Re-compacts the valid nodes into their point indices, in node order.
  pub fn valid_nodes(&self) -> Vec<u32> {
    self
      .nodes
      .iter()
      .filter(|n| n.is_valid())
      .map(|n| n.point_index)
      .collect()
  }

  /// Structural cross-check of the three internal tables. Cheap enough to
  /// run before fanning work out over the cluster.
  pub fn check_integrity(&self) -> Result<(), CorruptionError> {
    let nodes = self.nodes.len();
    let edges = self.edges.len();
    for (index, edge) in self.edges.iter().enumerate() {
      for node in [edge.start, edge.end] {
        if node as usize >= nodes {
          return Err(CorruptionError::EdgeNodeOutOfBounds {
            edge: index as u32,
            node,
            nodes: nodes as u32,
          });
        }
      }
    }
    for (index, node) in self.nodes.iter().enumerate() {
      for link in &node.adjacency {
        if link.node() as usize >= nodes || link.edge() as usize >= edges {
          return Err(CorruptionError::AdjacencyOutOfBounds {
            node: index as u32,
            edge: link.edge(),
            edges: edges as u32,
          });
        }
      }
    }
    for (&point, &node) in &self.lookup {
      let actual = self.point_of_node(node);
      if actual != Some(point) {
        return Err(CorruptionError::LookupMismatch {
          point,
          node,
          actual: actual.unwrap_or(INVALID_INDEX),
        });
      }
    }
    Ok(())
  }
}

// ============================================================================
// Working copies
// ============================================================================

/// Which validity tables a working copy is allowed to touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyScope {
  Edges,
  Nodes,
  Full,
}

impl CopyScope {
  pub fn covers_nodes(&self) -> bool {
    matches!(self, CopyScope::Nodes | CopyScope::Full)
  }

  pub fn covers_edges(&self) -> bool {
    matches!(self, CopyScope::Edges | CopyScope::Full)
  }
}

/// Mutable validity overlay over a shared [`Cluster`].
///
/// Flags start as the compiled ones and only ever flip towards invalid;
/// the flip is a compare-exchange, so exactly one caller wins each flag
/// even under concurrent invalidation. The underlying cluster is never
/// written.
pub struct WorkingCopy {
  source: Arc<Cluster>,
  scope: CopyScope,
  node_valid: Vec<AtomicBool>,
  edge_valid: Vec<AtomicBool>,
  dirty: AtomicBool,
}

impl WorkingCopy {
  pub fn new(source: Arc<Cluster>, scope: CopyScope) -> Self {
    let node_valid = source
      .nodes()
      .iter()
      .map(|n| AtomicBool::new(n.is_valid()))
      .collect();
    let edge_valid = source
      .edges()
      .iter()
      .map(|e| AtomicBool::new(e.is_valid()))
      .collect();
    Self {
      source,
      scope,
      node_valid,
      edge_valid,
      dirty: AtomicBool::new(false),
    }
  }

  pub fn cluster(&self) -> &Cluster {
    &self.source
  }

  pub fn share(&self) -> Arc<Cluster> {
    Arc::clone(&self.source)
  }

  pub fn scope(&self) -> CopyScope {
    self.scope
  }

  /// Flags a node invalid. Returns true only for the call that flipped it;
  /// out-of-scope and out-of-range calls change nothing.
  pub fn invalidate_node(&self, node: u32) -> bool {
    if !self.scope.covers_nodes() {
      log::warn!("node invalidation outside {:?} working copy", self.scope);
      return false;
    }
    match self.node_valid.get(node as usize) {
      Some(flag) => {
        let flipped = flag
          .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
          .is_ok();
        if flipped {
          self.dirty.store(true, Ordering::Release);
        }
        flipped
      }
      None => false,
    }
  }

  /// Flags an edge invalid. Same contract as [`Self::invalidate_node`].
  pub fn invalidate_edge(&self, edge: u32) -> bool {
    if !self.scope.covers_edges() {
      log::warn!("edge invalidation outside {:?} working copy", self.scope);
      return false;
    }
    match self.edge_valid.get(edge as usize) {
      Some(flag) => {
        let flipped = flag
          .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
          .is_ok();
        if flipped {
          self.dirty.store(true, Ordering::Release);
        }
        flipped
      }
      None => false,
    }
  }

  /// True once any flag was flipped on this copy.
  pub fn is_dirty(&self) -> bool {
    self.dirty.load(Ordering::Acquire)
  }

  pub fn is_node_valid(&self, node: u32) -> bool {
    self
      .node_valid
      .get(node as usize)
      .is_some_and(|f| f.load(Ordering::Acquire))
  }

  pub fn is_edge_valid(&self, edge: u32) -> bool {
    self
      .edge_valid
      .get(edge as usize)
      .is_some_and(|f| f.load(Ordering::Acquire))
  }

  /// Live edges under the overlay, in point-index form, ready to feed a
  /// fresh builder. Fresh list per call.
  pub fn valid_edges(&self) -> Vec<Edge> {
    let cluster = self.cluster();
    let mut edges = Vec::new();
    for (index, edge) in cluster.edges().iter().enumerate() {
      if !self.is_edge_valid(index as u32)
        || !self.is_node_valid(edge.start)
        || !self.is_node_valid(edge.end)
      {
        continue;
      }
      let (Some(start), Some(end)) = (
        cluster.point_of_node(edge.start),
        cluster.point_of_node(edge.end),
      ) else {
        continue;
      };
      edges.push(Edge::with_point_index(start, end, edge.point_index));
    }
    edges
  }

  /// Point indices of nodes still valid under the overlay, in node order.
  pub fn valid_nodes(&self) -> Vec<u32> {
    self
      .cluster()
      .nodes()
      .iter()
      .enumerate()
      .filter(|(index, _)| self.is_node_valid(*index as u32))
      .map(|(_, n)| n.point_index)
      .collect()
  }
}

#[cfg(test)]
#[path = "cluster_test.rs"]
mod cluster_test;
