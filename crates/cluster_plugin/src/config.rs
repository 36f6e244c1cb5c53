//! Pipeline configuration.
//!
//! One explicit struct passed into the task manager and batches at
//! construction. There is no global settings object; independent executions
//! can run with independent configurations.

use crate::constants::{DEFAULT_CHUNK_SIZE, SMALL_WORKLOAD_SIZE};

/// Tuning and policy knobs for one pipeline execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
	/// Work sizes below this run inline on the scheduling thread.
	pub small_workload_size: usize,
	/// Items per dispatched range.
	pub chunk_size: usize,
	/// Keep compiled clusters in the batch output after staging.
	/// When false, clusters are dropped at stage end.
	pub cache_clusters: bool,
	/// Drop invalidated edges and orphaned nodes at compile time.
	/// When false, they stay in the compiled arrays flagged invalid.
	pub prune_invalid: bool,
}

impl PipelineConfig {
	/// Default tuning.
	pub const DEFAULT: Self = Self {
		small_workload_size: SMALL_WORKLOAD_SIZE,
		chunk_size: DEFAULT_CHUNK_SIZE,
		cache_clusters: true,
		prune_invalid: true,
	};

	/// Everything runs inline on the scheduling thread. Useful for
	/// debugging and for comparing against dispatched runs.
	pub const SERIAL: Self = Self {
		small_workload_size: usize::MAX,
		chunk_size: DEFAULT_CHUNK_SIZE,
		cache_clusters: true,
		prune_invalid: true,
	};

	/// Every workload is dispatched, even single items.
	pub const ALWAYS_PARALLEL: Self = Self {
		small_workload_size: 0,
		chunk_size: DEFAULT_CHUNK_SIZE,
		cache_clusters: true,
		prune_invalid: true,
	};

	/// True when a workload of `count` items should skip dispatch.
	#[inline]
	pub fn is_trivial(&self, count: usize) -> bool {
		count < self.small_workload_size
	}

	pub fn with_small_workload_size(mut self, size: usize) -> Self {
		self.small_workload_size = size;
		self
	}

	pub fn with_chunk_size(mut self, size: usize) -> Self {
		self.chunk_size = size;
		self
	}

	pub fn with_cache_clusters(mut self, cache: bool) -> Self {
		self.cache_clusters = cache;
		self
	}

	pub fn with_prune_invalid(mut self, prune: bool) -> Self {
		self.prune_invalid = prune;
		self
	}
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}
