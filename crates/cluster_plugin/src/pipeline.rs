//! Stage orchestration for one execution.
//!
//! A [`ClusterPipeline`] owns the task manager and configuration of one
//! execution and runs batches as chained stages. Each `run_*` call is a
//! stage barrier: it returns only after every entity of that batch reached
//! `Done` and the batch published its one output, so a later stage never
//! observes a half-finished earlier one.
//!
//! # Flow
//!
//! ```text
//! Caller thread                     Pool (rayon)
//! ┌──────────────────┐
//! │ run_points_into_ │
//! │ graph(inputs)    │
//! └────────┬─────────┘
//!          │ start + park
//!          ▼
//!                                  ┌────────────────┐
//!                                  │ ranged work    │
//!                                  │ edge inserts   │
//!                                  └───────┬────────┘
//!                                          │ last entity
//!                                          ▼
//!                                  ┌────────────────┐
//!                                  │ compile + stage│
//!                                  └───────┬────────┘
//! ┌──────────────────┐                     │
//! │ BatchOutput      │◄────────────────────┘
//! │ (barrier crossed)│
//! └────────┬─────────┘
//!          ▼
//!   run_clusters(...) over the compiled cluster, same shape
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let pipeline = ClusterPipeline::new(PipelineConfig::DEFAULT);
//!
//! let graph = Arc::new(GraphBuilder::new(points.len()));
//! let output = pipeline
//!     .run_points_into_graph(inputs, Arc::clone(&graph), |_| EdgeScan::new())
//!     .expect("stage publishes exactly once");
//!
//! if let Some(cluster) = output.cluster {
//!     let cut = pipeline.run_clusters(
//!         vec![ClusterEntity { points, cluster }],
//!         |_| PlaneCut::new(0.0),
//!     );
//! }
//!
//! if let Some(err) = pipeline.take_error() {
//!     // the single run-level fault; the run was canceled
//! }
//! ```
//!
//! Compiled clusters outlive a stage only under
//! [`PipelineConfig::cache_clusters`]; with the cache off, the output's
//! references are the only ones and the clusters die with the caller.

use std::sync::{Arc, Mutex};

use crate::config::PipelineConfig;
use crate::error::TaskError;
use crate::filters::PointFilter;
use crate::graph::{Cluster, GraphBuilder};
use crate::metrics::PipelineMetrics;
use crate::points::PointIo;
use crate::processors::{
	BatchOutput, ClusterBatch, ClusterBatchOutput, ClusterEntity, ClusterProcessor, PointBatch,
	PointsProcessor,
};
use crate::tasks::TaskManager;

/// Owns the shared [`TaskManager`] and config for one execution.
pub struct ClusterPipeline {
	manager: TaskManager,
	clusters: Mutex<Vec<Arc<Cluster>>>,
	metrics: Mutex<PipelineMetrics>,
}

impl ClusterPipeline {
	/// Create a pipeline with its own manager over `config`.
	pub fn new(config: PipelineConfig) -> Self {
		Self {
			manager: TaskManager::new(config),
			clusters: Mutex::new(Vec::new()),
			metrics: Mutex::new(PipelineMetrics::new()),
		}
	}

	pub fn config(&self) -> PipelineConfig {
		self.manager.config()
	}

	/// The manager driving this execution. Batches constructed directly on
	/// it share the same cancellation flag and error slot.
	pub fn manager(&self) -> &TaskManager {
		&self.manager
	}

	/// Run a per-point stage to completion.
	///
	/// Returns `None` only if the batch dropped without publishing, which a
	/// completed run never does.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "pipeline::run_points"))]
	pub fn run_points<P, F>(&self, inputs: Vec<PointIo>, make: F) -> Option<BatchOutput>
	where
		P: PointsProcessor,
		F: FnMut(usize) -> P,
	{
		let batch = PointBatch::new(self.manager.clone(), inputs, make);
		self.finish_points(batch, false)
	}

	/// A per-point stage whose processors accumulate into `graph`; the
	/// output carries the compiled cluster unless it came back empty.
	#[cfg_attr(
		feature = "tracing",
		tracing::instrument(skip_all, name = "pipeline::run_points_into_graph")
	)]
	pub fn run_points_into_graph<P, F>(
		&self,
		inputs: Vec<PointIo>,
		graph: Arc<GraphBuilder>,
		make: F,
	) -> Option<BatchOutput>
	where
		P: PointsProcessor,
		F: FnMut(usize) -> P,
	{
		let batch = PointBatch::with_graph(self.manager.clone(), inputs, graph, make);
		self.finish_points(batch, true)
	}

	/// Same as [`run_points_into_graph`](Self::run_points_into_graph), with
	/// a validity pre-pass: points failing `filter` leave the graph before
	/// any ranged work runs.
	#[cfg_attr(
		feature = "tracing",
		tracing::instrument(skip_all, name = "pipeline::run_points_filtered")
	)]
	pub fn run_points_filtered<P, F>(
		&self,
		inputs: Vec<PointIo>,
		graph: Arc<GraphBuilder>,
		filter: Box<dyn PointFilter>,
		make: F,
	) -> Option<BatchOutput>
	where
		P: PointsProcessor,
		F: FnMut(usize) -> P,
	{
		let batch = PointBatch::with_node_filter(self.manager.clone(), inputs, graph, filter, make);
		self.finish_points(batch, true)
	}

	/// Run a per-cluster stage to completion.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "pipeline::run_clusters"))]
	pub fn run_clusters<C, F>(
		&self,
		entities: Vec<ClusterEntity>,
		make: F,
	) -> Option<ClusterBatchOutput>
	where
		C: ClusterProcessor,
		F: FnMut(usize) -> C,
	{
		let batch = ClusterBatch::new(self.manager.clone(), entities, make);
		self.finish_clusters(batch)
	}

	/// Same as [`run_clusters`](Self::run_clusters), with a node validity
	/// pre-pass applied to each working copy.
	#[cfg_attr(
		feature = "tracing",
		tracing::instrument(skip_all, name = "pipeline::run_clusters_filtered")
	)]
	pub fn run_clusters_filtered<C, F>(
		&self,
		entities: Vec<ClusterEntity>,
		filter: Box<dyn PointFilter>,
		make: F,
	) -> Option<ClusterBatchOutput>
	where
		C: ClusterProcessor,
		F: FnMut(usize) -> C,
	{
		let batch = ClusterBatch::with_filter(self.manager.clone(), entities, filter, make);
		self.finish_clusters(batch)
	}

	fn finish_points<P: PointsProcessor>(
		&self,
		batch: PointBatch<P>,
		compiles: bool,
	) -> Option<BatchOutput> {
		let output = batch.wait()?;
		log::debug!(
			"points stage done: {}/{} staged, {} aborted in {}us",
			output.staged.len(),
			output.stats.entities,
			output.stats.aborted,
			output.stats.elapsed_us
		);
		{
			let mut metrics = self.metrics.lock().unwrap();
			metrics.record_points_batch(&output.stats);
			metrics.record_insert(&output.inserts);
			if compiles && !output.canceled && output.cluster.is_none() {
				metrics.record_suppressed(1);
			}
		}
		if self.config().cache_clusters {
			if let Some(cluster) = &output.cluster {
				self.clusters.lock().unwrap().push(Arc::clone(cluster));
			}
		}
		Some(output)
	}

	fn finish_clusters<C: ClusterProcessor>(
		&self,
		batch: ClusterBatch<C>,
	) -> Option<ClusterBatchOutput> {
		let output = batch.wait()?;
		log::debug!(
			"clusters stage done: {}/{} staged, {} aborted in {}us",
			output.staged.len(),
			output.stats.entities,
			output.stats.aborted,
			output.stats.elapsed_us
		);
		{
			let mut metrics = self.metrics.lock().unwrap();
			metrics.record_clusters_batch(&output.stats);
			metrics.record_insert(&output.inserts);
			if !output.canceled {
				let survivors = output.stats.entities - output.stats.aborted;
				metrics.record_suppressed(survivors.saturating_sub(output.stats.staged) as u64);
			}
		}
		if self.config().cache_clusters {
			self
				.clusters
				.lock()
				.unwrap()
				.extend(output.staged.iter().cloned());
		}
		Some(output)
	}

	/// Clusters retained across stages under the cache policy. Empty when
	/// [`PipelineConfig::cache_clusters`] is off.
	pub fn cached_clusters(&self) -> Vec<Arc<Cluster>> {
		self.clusters.lock().unwrap().clone()
	}

	/// Snapshot of this execution's metrics.
	pub fn metrics(&self) -> PipelineMetrics {
		self.metrics.lock().unwrap().clone()
	}

	/// Cancel the execution; in-flight stages drain and publish as
	/// canceled.
	pub fn cancel(&self) {
		self.manager.cancel();
	}

	pub fn is_canceled(&self) -> bool {
		self.manager.is_canceled()
	}

	/// The run-level fault, surfaced exactly once.
	pub fn take_error(&self) -> Option<TaskError> {
		self.manager.take_error()
	}

	/// Clear manager state, the cluster cache and metrics so the pipeline
	/// can drive an independent execution.
	pub fn reset(&self) {
		self.manager.reset();
		self.clusters.lock().unwrap().clear();
		self.metrics.lock().unwrap().reset();
	}
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
