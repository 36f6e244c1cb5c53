//! Fork-join task scheduling.
//!
//! One [`TaskManager`] per pipeline execution. All dispatch goes through
//! rayon's shared pool; completion is observed by polling handles or fires
//! through group callbacks on the worker that crosses the join barrier.
//! Nothing in this module blocks.

pub mod manager;

pub use manager::{GroupHandle, TaskHandle, TaskManager, UnitOfWork, WorkRange};
