//! Concurrent edge accumulation and compilation.
//!
//! Producers on any number of worker threads feed raw edges into a
//! [`GraphBuilder`]; insertion dedups by canonical key, so the same pair
//! discovered twice (in either direction) lands exactly once. Validity is
//! tracked per node and per edge as one-way atomic flips. `compile`
//! snapshots the accumulated set into an immutable [`Cluster`] without
//! consuming or mutating the builder.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::constants::EDGE_SHARD_COUNT;
use crate::error::CompileError;
use crate::graph::cluster::{Cluster, ClusterEdge, Node, NodeIndexLookup};
use crate::graph::edge::{AdjacencyLink, Edge, EdgeKey};

/// Outcome counters for one [`GraphBuilder::insert`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InsertStats {
  /// Edges that were new to the builder.
  pub added: usize,
  /// Edges whose key was already present.
  pub duplicates: usize,
  /// Self-loops and edges referencing points outside the set.
  pub rejected: usize,
}

impl InsertStats {
  pub fn absorb(&mut self, other: InsertStats) {
    self.added += other.added;
    self.duplicates += other.duplicates;
    self.rejected += other.rejected;
  }
}

/// One stored edge. `start`/`end` and the attribute slot come from the
/// first insert that won the key; later duplicates change nothing.
struct EdgeEntry {
  start: u32,
  end: u32,
  point_index: u32,
  source: u32,
  valid: AtomicBool,
}

struct Shard {
  entries: Mutex<FxHashMap<u64, EdgeEntry>>,
}

#[derive(Default)]
struct InsertTotals {
  added: AtomicUsize,
  duplicates: AtomicUsize,
  rejected: AtomicUsize,
}

/// Deduplicating edge accumulator for one graph.
///
/// `insert` may be called concurrently; everything else is driver-side.
/// The edge set is sharded by key so concurrent producers rarely contend
/// on the same lock, while node validity is a dense atomic table sized to
/// the point set up front.
pub struct GraphBuilder {
  num_points: usize,
  shards: [Shard; EDGE_SHARD_COUNT],
  node_valid: Vec<AtomicBool>,
  totals: InsertTotals,
}

impl GraphBuilder {
  pub fn new(num_points: usize) -> Self {
    Self {
      num_points,
      shards: std::array::from_fn(|_| Shard {
        entries: Mutex::new(FxHashMap::default()),
      }),
      node_valid: (0..num_points).map(|_| AtomicBool::new(true)).collect(),
      totals: InsertTotals::default(),
    }
  }

  pub fn num_points(&self) -> usize {
    self.num_points
  }

  #[inline]
  fn shard_of(key: EdgeKey) -> usize {
    let raw = key.raw();
    ((raw ^ (raw >> 32)) as usize) & (EDGE_SHARD_COUNT - 1)
  }

  fn accept(&self, edge: &Edge) -> Option<EdgeKey> {
    if edge.start == edge.end {
      return None;
    }
    if edge.start as usize >= self.num_points || edge.end as usize >= self.num_points {
      return None;
    }
    Some(edge.key())
  }

  /// Adds a batch of candidate edges. Safe to call from multiple producer
  /// tasks at once; for each key, the first insert wins and keeps its
  /// orientation, attribute slot, and source tag.
  pub fn insert(&self, edges: &[Edge], source: u32) -> InsertStats {
    let mut stats = InsertStats::default();
    for edge in edges {
      let Some(key) = self.accept(edge) else {
        stats.rejected += 1;
        continue;
      };
      let mut entries = self.shards[Self::shard_of(key)].entries.lock().unwrap();
      match entries.entry(key.raw()) {
        Entry::Occupied(_) => stats.duplicates += 1,
        Entry::Vacant(slot) => {
          slot.insert(EdgeEntry {
            start: edge.start,
            end: edge.end,
            point_index: edge.point_index,
            source,
            valid: AtomicBool::new(true),
          });
          stats.added += 1;
        }
      }
    }
    self.totals.added.fetch_add(stats.added, Ordering::AcqRel);
    self.totals.duplicates.fetch_add(stats.duplicates, Ordering::AcqRel);
    self.totals.rejected.fetch_add(stats.rejected, Ordering::AcqRel);
    stats
  }

  /// Accounting totals over every insert since construction or the last
  /// [`take_insert_totals`](Self::take_insert_totals).
  pub fn insert_totals(&self) -> InsertStats {
    InsertStats {
      added: self.totals.added.load(Ordering::Acquire),
      duplicates: self.totals.duplicates.load(Ordering::Acquire),
      rejected: self.totals.rejected.load(Ordering::Acquire),
    }
  }

  /// Takes the accounting totals, resetting them so the next stage counts
  /// from zero.
  pub fn take_insert_totals(&self) -> InsertStats {
    InsertStats {
      added: self.totals.added.swap(0, Ordering::AcqRel),
      duplicates: self.totals.duplicates.swap(0, Ordering::AcqRel),
      rejected: self.totals.rejected.swap(0, Ordering::AcqRel),
    }
  }

  /// Unique edges accumulated so far, valid or not.
  pub fn edge_count(&self) -> usize {
    self
      .shards
      .iter()
      .map(|s| s.entries.lock().unwrap().len())
      .sum()
  }

  pub fn contains(&self, a: u32, b: u32) -> bool {
    let key = EdgeKey::new(a, b);
    self.shards[Self::shard_of(key)]
      .entries
      .lock()
      .unwrap()
      .contains_key(&key.raw())
  }

  /// Source tag recorded by the insert that won `(a, b)`.
  pub fn edge_source(&self, a: u32, b: u32) -> Option<u32> {
    let key = EdgeKey::new(a, b);
    self.shards[Self::shard_of(key)]
      .entries
      .lock()
      .unwrap()
      .get(&key.raw())
      .map(|e| e.source)
  }

  /// Flags a node invalid. Returns true only for the call that flipped the
  /// flag; repeat calls and out-of-range indices are no-ops.
  pub fn invalidate_node(&self, point: u32) -> bool {
    match self.node_valid.get(point as usize) {
      Some(flag) => flag
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_ok(),
      None => false,
    }
  }

  pub fn is_node_valid(&self, point: u32) -> bool {
    self
      .node_valid
      .get(point as usize)
      .is_some_and(|f| f.load(Ordering::Acquire))
  }

  /// Flags an edge invalid, same contract as [`Self::invalidate_node`].
  /// Unknown edges are no-ops.
  pub fn invalidate_edge(&self, a: u32, b: u32) -> bool {
    if a == b {
      return false;
    }
    let key = EdgeKey::new(a, b);
    let entries = self.shards[Self::shard_of(key)].entries.lock().unwrap();
    match entries.get(&key.raw()) {
      Some(entry) => entry
        .valid
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_ok(),
      None => false,
    }
  }

  pub fn is_edge_valid(&self, a: u32, b: u32) -> bool {
    let key = EdgeKey::new(a, b);
    self.shards[Self::shard_of(key)]
      .entries
      .lock()
      .unwrap()
      .get(&key.raw())
      .is_some_and(|e| e.valid.load(Ordering::Acquire))
  }

  /// Edges that would survive a pruning compile right now.
  pub fn live_edge_count(&self) -> usize {
    let mut live = 0;
    for shard in &self.shards {
      let entries = shard.entries.lock().unwrap();
      for entry in entries.values() {
        if entry.valid.load(Ordering::Acquire)
          && self.is_node_valid(entry.start)
          && self.is_node_valid(entry.end)
        {
          live += 1;
        }
      }
    }
    live
  }

  /// Compiles the accumulated edges into an immutable [`Cluster`].
  ///
  /// Node indices go to distinct endpoint points in ascending point-index
  /// order and edges are emitted in canonical key order, so the result does
  /// not depend on how insertion interleaved across threads. With
  /// `prune_invalid` the flagged edges, the flagged nodes, and every edge
  /// touching a flagged node are dropped; without it they stay in the
  /// arrays carrying their flags.
  ///
  /// Fails with [`CompileError::Empty`] when no live edge remains. The
  /// builder is untouched either way and can be compiled again.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "graph_compile"))]
  pub fn compile(&self, prune_invalid: bool) -> Result<Cluster, CompileError> {
    struct Snapshot {
      key: EdgeKey,
      start: u32,
      end: u32,
      point_index: u32,
      live: bool,
    }

    let mut flat: Vec<Snapshot> = Vec::with_capacity(self.edge_count());
    {
      #[cfg(feature = "tracing")]
      let _span = tracing::info_span!("snapshot_shards").entered();
      for shard in &self.shards {
        let entries = shard.entries.lock().unwrap();
        for entry in entries.values() {
          let live = entry.valid.load(Ordering::Acquire)
            && self.is_node_valid(entry.start)
            && self.is_node_valid(entry.end);
          if prune_invalid && !live {
            continue;
          }
          flat.push(Snapshot {
            key: EdgeKey::new(entry.start, entry.end),
            start: entry.start,
            end: entry.end,
            point_index: entry.point_index,
            live,
          });
        }
      }
    }

    if !flat.iter().any(|e| e.live) {
      return Err(CompileError::Empty);
    }
    let totals = self.insert_totals();
    log::debug!(
      "compiling {} edges ({} added, {} duplicates, {} rejected across inserts)",
      flat.len(),
      totals.added,
      totals.duplicates,
      totals.rejected
    );
    flat.sort_unstable_by_key(|e| e.key);

    let (lookup, mut nodes) = {
      #[cfg(feature = "tracing")]
      let _span = tracing::info_span!("assign_nodes").entered();
      let mut points: Vec<u32> = flat.iter().flat_map(|e| [e.start, e.end]).collect();
      points.sort_unstable();
      points.dedup();

      let mut lookup =
        NodeIndexLookup::with_capacity_and_hasher(points.len(), Default::default());
      let mut nodes = Vec::with_capacity(points.len());
      for (node_index, point) in points.iter().enumerate() {
        lookup.insert(*point, node_index as u32);
        nodes.push(Node::new(*point, self.is_node_valid(*point)));
      }
      (lookup, nodes)
    };

    let mut edges = Vec::with_capacity(flat.len());
    {
      #[cfg(feature = "tracing")]
      let _span = tracing::info_span!("link_adjacency").entered();
      for (edge_index, entry) in flat.iter().enumerate() {
        let start = lookup[&entry.start];
        let end = lookup[&entry.end];
        nodes[start as usize]
          .adjacency
          .push(AdjacencyLink::new(end, edge_index as u32));
        nodes[end as usize]
          .adjacency
          .push(AdjacencyLink::new(start, edge_index as u32));
        edges.push(ClusterEdge::new(start, end, entry.point_index, entry.live));
      }
    }

    Ok(Cluster::new(nodes, edges, lookup))
  }
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod builder_test;
