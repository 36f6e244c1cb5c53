//! Error taxonomy for the pipeline.
//!
//! Four classes with distinct blast radii:
//! - [`SetupError`]: one processor is dropped, siblings continue.
//! - [`CompileError`]: one entity's output is suppressed.
//! - [`TaskError`]: the enclosing run is canceled, surfaced once.
//! - [`CorruptionError`]: one processor aborts without touching shared state.

use thiserror::Error;

/// A processor failed to bind its required inputs during setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
  #[error("missing required attribute '{0}'")]
  MissingAttribute(String),
  #[error("missing required resource '{0}'")]
  MissingResource(String),
  #[error("input collection is empty")]
  EmptyInput,
}

/// Graph compilation could not produce a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompileError {
  /// No valid edges remained after accumulation and invalidation.
  #[error("graph has no valid edges")]
  Empty,
}

/// A fault inside a scheduled unit of work.
///
/// The first such fault cancels the enclosing run; siblings drain without
/// executing. Surfaced exactly once via [`TaskManager::take_error`].
///
/// [`TaskManager::take_error`]: crate::tasks::TaskManager::take_error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
  #[error("task failed: {0}")]
  Failed(String),
}

impl TaskError {
  /// Shorthand for a message-only fault.
  pub fn failed(msg: impl Into<String>) -> Self {
    Self::Failed(msg.into())
  }
}

/// A compiled cluster failed an integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptionError {
  #[error("edge {edge} references node {node}, but only {nodes} nodes exist")]
  EdgeNodeOutOfBounds { edge: u32, node: u32, nodes: u32 },
  #[error("adjacency of node {node} references edge {edge}, but only {edges} edges exist")]
  AdjacencyOutOfBounds { node: u32, edge: u32, edges: u32 },
  #[error("point {point} looks up node {node}, but that node owns point {actual}")]
  LookupMismatch { point: u32, node: u32, actual: u32 },
}
