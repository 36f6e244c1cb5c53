//! Engine-agnostic metrics collection for pipeline executions.
//!
//! Feature-gated and runtime-toggled to ensure zero overhead when disabled.
//!
//! # Usage
//!
//! ```ignore
//! use cluster_plugin::metrics::{PipelineMetrics, COLLECT_METRICS};
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! // Record accumulation results:
//! metrics.record_insert(&stats);
//!
//! // Record a finished stage:
//! metrics.record_points_batch(&output.stats);
//! ```

use std::collections::VecDeque;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::sync::atomic::AtomicBool;

use crate::graph::InsertStats;
use crate::processors::BatchStats;

/// Runtime toggle for metrics collection.
/// Set to false to disable metrics gathering at runtime.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "metrics")]
    {
        COLLECT_METRICS.load(Ordering::Relaxed)
    }
    #[cfg(not(feature = "metrics"))]
    {
        false
    }
}

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// Create a new rolling window with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new value, evicting the oldest if at capacity.
    pub fn push(&mut self, value: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    /// Get the number of values in the window.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear all values.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Iterate over values (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    /// Get the most recent value.
    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl<T: Copy + Default + std::ops::Add<Output = T>> RollingWindow<T> {
    /// Compute the sum of all values.
    pub fn sum(&self) -> T {
        self.buffer.iter().copied().fold(T::default(), |acc, x| acc + x)
    }
}

impl RollingWindow<u64> {
    /// Compute the average of all values.
    pub fn average(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum() as f64 / self.buffer.len() as f64
        }
    }

    /// Get min and max values.
    pub fn min_max(&self) -> Option<(u64, u64)> {
        if self.buffer.is_empty() {
            None
        } else {
            let min = *self.buffer.iter().min().unwrap();
            let max = *self.buffer.iter().max().unwrap();
            Some((min, max))
        }
    }
}

impl Default for RollingWindow<u64> {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Execution-level statistics updated at stage boundaries.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    // Accumulation
    /// Edges accepted into builders.
    pub edges_added: u64,
    /// Edges dropped as duplicate keys.
    pub edges_deduplicated: u64,
    /// Self-loops and out-of-range edges refused at insert.
    pub edges_rejected: u64,

    // Stages
    /// Batches run to completion.
    pub batches_run: u64,
    /// Entities that entered a batch.
    pub entities_processed: u64,
    /// Entities dropped by setup failure or corruption.
    pub entities_aborted: u64,
    /// Outputs staged for downstream stages.
    pub outputs_staged: u64,
    /// Outputs suppressed because their graph compiled empty.
    pub outputs_suppressed: u64,

    // Timing
    /// Rolling window of per-point stage times in microseconds.
    pub points_timings: RollingWindow<u64>,
    /// Rolling window of per-cluster stage times in microseconds.
    pub cluster_timings: RollingWindow<u64>,

    // Last stage snapshot (for UI)
    /// Last stage time in microseconds.
    pub last_batch_us: u64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            edges_added: 0,
            edges_deduplicated: 0,
            edges_rejected: 0,
            batches_run: 0,
            entities_processed: 0,
            entities_aborted: 0,
            outputs_staged: 0,
            outputs_suppressed: 0,
            points_timings: RollingWindow::new(128),
            cluster_timings: RollingWindow::new(128),
            last_batch_us: 0,
        }
    }
}

impl PipelineMetrics {
    /// Create new metrics with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all metrics to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record the outcome of one insert call.
    pub fn record_insert(&mut self, stats: &InsertStats) {
        if is_enabled() {
            self.edges_added += stats.added as u64;
            self.edges_deduplicated += stats.duplicates as u64;
            self.edges_rejected += stats.rejected as u64;
        }
    }

    /// Record a finished per-point stage.
    pub fn record_points_batch(&mut self, stats: &BatchStats) {
        if is_enabled() {
            self.record_stage(stats);
            self.points_timings.push(stats.elapsed_us);
        }
    }

    /// Record a finished per-cluster stage.
    pub fn record_clusters_batch(&mut self, stats: &BatchStats) {
        if is_enabled() {
            self.record_stage(stats);
            self.cluster_timings.push(stats.elapsed_us);
        }
    }

    /// Record entities whose compiled output came back empty.
    pub fn record_suppressed(&mut self, count: u64) {
        if is_enabled() {
            self.outputs_suppressed += count;
        }
    }

    fn record_stage(&mut self, stats: &BatchStats) {
        self.batches_run += 1;
        self.entities_processed += stats.entities as u64;
        self.entities_aborted += stats.aborted as u64;
        self.outputs_staged += stats.staged as u64;
        self.last_batch_us = stats.elapsed_us;
    }

    /// Get average per-point stage timing in microseconds.
    pub fn avg_points_timing_us(&self) -> f64 {
        self.points_timings.average()
    }

    /// Get average per-cluster stage timing in microseconds.
    pub fn avg_cluster_timing_us(&self) -> f64 {
        self.cluster_timings.average()
    }

    /// Share of inserted edges that were duplicates.
    pub fn dedup_ratio(&self) -> f64 {
        let seen = self.edges_added + self.edges_deduplicated;
        if seen == 0 {
            0.0
        } else {
            self.edges_deduplicated as f64 / seen as f64
        }
    }
}
