//! Processor state machine and batch drivers.
//!
//! ```text
//!                      one processor per entity
//!
//!   Setup ──▶ ParallelWork ──▶ CompleteWork ──▶ Write ──▶ Done
//!     │         (0..n ranges,     (single-       (output
//!     │          any order)        threaded)      view)
//!     └── failure drops the entity, siblings keep running
//!
//!   all entities Done ──▶ compile / consolidate ──▶ stage output
//! ```
//!
//! States only move forward. A batch publishes exactly one output, once
//! every entity has reached `Done`; a canceled batch publishes an empty
//! one and never stages partial results.

pub mod clusters;
pub mod points;

pub use clusters::{ClusterBatch, ClusterBatchOutput, ClusterEntity, ClusterProcessor};
pub use points::{BatchOutput, PointBatch, PointsProcessor};

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one processor. Monotonic; skipping forward is allowed
/// (a dropped entity goes straight to `Done`), moving backward is not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProcessorState {
  New = 0,
  Setup = 1,
  ParallelWork = 2,
  CompleteWork = 3,
  Write = 4,
  Done = 5,
}

impl ProcessorState {
  fn from_raw(raw: u8) -> Self {
    match raw {
      0 => ProcessorState::New,
      1 => ProcessorState::Setup,
      2 => ProcessorState::ParallelWork,
      3 => ProcessorState::CompleteWork,
      4 => ProcessorState::Write,
      _ => ProcessorState::Done,
    }
  }
}

/// Atomic state slot enforcing forward-only transitions.
pub(crate) struct StateCell {
  raw: AtomicU8,
}

impl StateCell {
  pub(crate) fn new() -> Self {
    Self {
      raw: AtomicU8::new(ProcessorState::New as u8),
    }
  }

  pub(crate) fn get(&self) -> ProcessorState {
    ProcessorState::from_raw(self.raw.load(Ordering::Acquire))
  }

  /// Moves to `state` unless the cell is already past it.
  pub(crate) fn advance(&self, state: ProcessorState) {
    self.raw.fetch_max(state as u8, Ordering::AcqRel);
  }
}

/// Counters reported with every batch output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
  /// Entities the batch was created with.
  pub entities: usize,
  /// Ranges dispatched across all entities, inline ones included.
  pub ranges: usize,
  /// Entities dropped by a setup failure or corruption.
  pub aborted: usize,
  /// Outputs actually staged.
  pub staged: usize,
  /// Wall time from batch creation to output.
  pub elapsed_us: u64,
  /// Portion of `elapsed_us` spent compiling and staging after the last
  /// entity finished.
  pub finish_us: u64,
}
