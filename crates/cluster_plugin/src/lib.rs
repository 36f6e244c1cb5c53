//! cluster_plugin - Framework/engine independent point-cloud clustering
//!
//! This crate provides the parallel core for turning point collections into
//! compiled cluster graphs: a fork-join task manager, a concurrent
//! deduplicating graph builder, immutable compiled cluster views, and a
//! processor/batch state machine that drives per-point and per-cluster
//! stages over all of it.
//!
//! # Features
//!
//! - **Fork-join scheduling**: ranged dispatch over rayon's shared pool
//!   with join barriers, cooperative cancellation and single-fault
//!   surfacing
//! - **Concurrent accumulation**: direction-free edge deduplication across
//!   worker threads; validity as one-way atomic flips
//! - **Deterministic compiles**: identical clusters from identical edge
//!   sets, whatever the accumulation thread count
//! - **Working copies**: destructive cutting passes on private validity
//!   overlays, consolidated into fresh compiled clusters at stage end
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use cluster_plugin::{ClusterPipeline, GraphBuilder, PipelineConfig};
//!
//! let pipeline = ClusterPipeline::new(PipelineConfig::DEFAULT);
//! let graph = Arc::new(GraphBuilder::new(points.len()));
//!
//! let output = pipeline
//!     .run_points_into_graph(inputs, Arc::clone(&graph), |_| EdgeScan::new())
//!     .expect("stage publishes exactly once");
//!
//! if let Some(cluster) = output.cluster {
//!     println!("compiled {} nodes, {} edges",
//!         cluster.node_count(), cluster.edge_count());
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;

// Re-export commonly used items
pub use config::PipelineConfig;
pub use constants::{chunk_count, chunk_len, INVALID_INDEX};
pub use error::{CompileError, CorruptionError, SetupError, TaskError};

// Point collections and per-stage io views
pub mod points;
pub use points::{FlagBuffer, FlagStore, OutputInit, Point, PointIo, PointSet};

// Per-point predicates for validity pre-passes
pub mod filters;
pub use filters::{BoundsFilter, DensityFilter, PointFilter};

// Fork-join task manager
pub mod tasks;
pub use tasks::{GroupHandle, TaskHandle, TaskManager, UnitOfWork, WorkRange};

// Edge accumulation and compiled cluster views
pub mod graph;
pub use graph::{
  AdjacencyLink, Cluster, ClusterEdge, CopyScope, Edge, EdgeKey, GraphBuilder, InsertStats, Node,
  NodeIndexLookup, WorkingCopy,
};

// Processor/batch state machine
pub mod processors;
pub use processors::{
  BatchOutput, BatchStats, ClusterBatch, ClusterBatchOutput, ClusterEntity, ClusterProcessor,
  PointBatch, PointsProcessor, ProcessorState,
};

// Stage orchestration
pub mod pipeline;
pub use pipeline::ClusterPipeline;

// Execution metrics (collection is feature-gated and runtime-toggled)
pub mod metrics;
