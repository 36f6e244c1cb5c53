//! Graph accumulation and compiled cluster views.
//!
//! ```text
//!  producers            builder                    compiled
//!  (any thread)         (deduplicated)             (immutable)
//!
//!  Edge[] ──insert──▶ [ sharded key set ] ──compile──▶ Cluster
//!                      [ validity flags  ]               │
//!                                                 WorkingCopy
//!                                                 (atomic overlay,
//!                                                  cut then rebuild)
//! ```
//!
//! Insertion order never shows in a compiled cluster: nodes are assigned
//! by ascending point index and edges sorted by canonical key before any
//! index is handed out.

pub mod builder;
pub mod cluster;
pub mod edge;

pub use builder::{GraphBuilder, InsertStats};
pub use cluster::{Cluster, ClusterEdge, CopyScope, Node, NodeIndexLookup, WorkingCopy};
pub use edge::{AdjacencyLink, Edge, EdgeKey};
