//! Edge primitives shared by the builder and compiled clusters.

use crate::constants::INVALID_INDEX;

/// An undirected edge between two point indices, as handed to the builder.
///
/// `start`/`end` keep the orientation of the producing processor; identity
/// for deduplication is the direction-free [`EdgeKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
  pub start: u32,
  pub end: u32,
  /// Index into an edge-attribute set, [`INVALID_INDEX`] when unused.
  pub point_index: u32,
}

impl Edge {
  #[inline]
  pub fn new(start: u32, end: u32) -> Self {
    Self {
      start,
      end,
      point_index: INVALID_INDEX,
    }
  }

  #[inline]
  pub fn with_point_index(start: u32, end: u32, point_index: u32) -> Self {
    Self {
      start,
      end,
      point_index,
    }
  }

  #[inline]
  pub fn key(&self) -> EdgeKey {
    EdgeKey::new(self.start, self.end)
  }

  #[inline]
  pub fn contains(&self, point: u32) -> bool {
    self.start == point || self.end == point
  }

  /// The endpoint opposite `point`, if `point` is one of the two.
  #[inline]
  pub fn other(&self, point: u32) -> Option<u32> {
    if self.start == point {
      Some(self.end)
    } else if self.end == point {
      Some(self.start)
    } else {
      None
    }
  }
}

/// Canonical identity of an undirected edge: smaller endpoint in the low
/// 32 bits, larger in the high. `(a, b)` and `(b, a)` pack to the same key,
/// and sorting keys orders edges by smaller endpoint first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(u64);

impl EdgeKey {
  #[inline]
  pub fn new(a: u32, b: u32) -> Self {
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    Self((min as u64) | ((max as u64) << 32))
  }

  #[inline]
  pub fn min_index(&self) -> u32 {
    self.0 as u32
  }

  #[inline]
  pub fn max_index(&self) -> u32 {
    (self.0 >> 32) as u32
  }

  #[inline]
  pub fn raw(&self) -> u64 {
    self.0
  }
}

/// One adjacency slot of a compiled node: neighbor node index in the low
/// half, connecting edge index in the high half.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdjacencyLink(u64);

impl AdjacencyLink {
  #[inline]
  pub fn new(node: u32, edge: u32) -> Self {
    Self((node as u64) | ((edge as u64) << 32))
  }

  #[inline]
  pub fn node(&self) -> u32 {
    self.0 as u32
  }

  #[inline]
  pub fn edge(&self) -> u32 {
    (self.0 >> 32) as u32
  }
}
