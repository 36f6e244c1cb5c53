//! Scheduling and accumulator layout constants.
//!
//! The defaults match the reference tuning: workloads below 256 items run
//! inline on the scheduling thread, larger workloads split into 256-item
//! ranges dispatched to the shared pool.
//!
//! # Range Chunking
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        PARALLEL-FOR LAYOUT                          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  total = 900, chunk_size = 256                                      │
//! │                                                                     │
//! │  ┌──────────┬──────────┬──────────┬──────┐                          │
//! │  │ 0..256   │ 256..512 │ 512..768 │768..900                         │
//! │  └────┬─────┴────┬─────┴────┬─────┴──┬───┘                          │
//! │       │          │          │        │     ranges run on any        │
//! │       ▼          ▼          ▼        ▼     worker, in any order     │
//! │  ════════════════ join barrier ═══════════                          │
//! │                      │                                              │
//! │                      ▼                                              │
//! │              on_complete fires once,                                │
//! │              after the last range                                   │
//! │                                                                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  total < SMALL_WORKLOAD_SIZE: a single range executes inline on     │
//! │  the calling thread, no dispatch. Same barrier semantics.           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

/// Work sizes below this execute inline on the scheduling thread.
pub const SMALL_WORKLOAD_SIZE: usize = 256;

/// Default number of items per dispatched range.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Number of dedup shards in the graph builder (must be a power of two).
pub const EDGE_SHARD_COUNT: usize = 16;

/// Sentinel for an unset point-index slot on an edge.
pub const INVALID_INDEX: u32 = u32::MAX;

/// Expected neighbor count per node; adjacency lists spill to the heap
/// beyond this.
pub const INLINE_ADJACENCY: usize = 8;

/// Number of ranges needed to cover `total` items at `chunk_size`.
///
/// A `chunk_size` of zero means "one range for everything".
#[inline(always)]
pub const fn chunk_count(total: usize, chunk_size: usize) -> usize {
  if total == 0 {
    return 0;
  }
  if chunk_size == 0 {
    return 1;
  }
  (total + chunk_size - 1) / chunk_size
}

/// Number of items in range `index` of `total` items at `chunk_size`.
#[inline(always)]
pub const fn chunk_len(total: usize, chunk_size: usize, index: usize) -> usize {
  let start = index * chunk_size;
  if start >= total {
    return 0;
  }
  let remaining = total - start;
  if remaining < chunk_size {
    remaining
  } else {
    chunk_size
  }
}

#[cfg(test)]
#[path = "constants_test.rs"]
mod constants_test;
