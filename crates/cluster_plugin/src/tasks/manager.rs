//! Cooperative fork-join scheduler on top of rayon's global pool.
//!
//! The manager never blocks a worker on another task. Single tasks report
//! through a bounded(1) channel polled from the driving thread; ranged and
//! grouped work counts itself down through an atomic and the last range to
//! finish runs the completion callback in place. Cancellation is a flag:
//! ranges scheduled but not yet started observe it and drain without running
//! their body, so `is_complete()` still converges after `cancel()`.
//!
//! Usage:
//!
//! ```ignore
//! let manager = TaskManager::new(PipelineConfig::DEFAULT);
//! let group = manager.schedule_range(points.len(), 256, move |range| {
//!   for i in range.iter() {
//!     // per-point work
//!   }
//!   Ok(())
//! }, move || {
//!   // runs once, after every range above
//! });
//!
//! while !group.is_complete() {
//!   // pump frame
//! }
//! if let Some(err) = manager.take_error() {
//!   // first failure, surfaced exactly once
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{self as channel, Receiver, TryRecvError};

use crate::config::PipelineConfig;
use crate::constants::{chunk_count, chunk_len};
use crate::error::TaskError;

// ============================================================================
// Work ranges
// ============================================================================

/// A contiguous slice of a larger workload, handed to one range body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkRange {
  /// Position of this range within its parallel-for, counting from zero.
  pub index: usize,
  /// First item covered by this range.
  pub start: usize,
  /// Number of items covered.
  pub count: usize,
}

impl WorkRange {
  /// One past the last item covered.
  #[inline]
  pub fn end(&self) -> usize {
    self.start + self.count
  }

  /// Iterator over the item indices in this range.
  #[inline]
  pub fn iter(&self) -> std::ops::Range<usize> {
    self.start..self.end()
  }
}

/// A boxed unit of work for [`TaskManager::schedule_group`].
pub type UnitOfWork = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

// ============================================================================
// Manager
// ============================================================================

struct ManagerInner {
  config: PipelineConfig,
  canceled: AtomicBool,
  in_flight: AtomicUsize,
  error: Mutex<Option<TaskError>>,
}

impl ManagerInner {
  /// Records the first failure and flips the cancel flag so everything
  /// still queued drains instead of running.
  fn fault(&self, err: TaskError) {
    let mut slot = self.error.lock().unwrap();
    if slot.is_none() {
      *slot = Some(err);
    }
    drop(slot);
    self.canceled.store(true, Ordering::Release);
  }
}

/// Shared scheduler handle. Cloning is cheap and every clone drives the
/// same cancel flag, error slot, and in-flight counter.
pub struct TaskManager {
  inner: Arc<ManagerInner>,
}

impl Clone for TaskManager {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl TaskManager {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      inner: Arc::new(ManagerInner {
        config,
        canceled: AtomicBool::new(false),
        in_flight: AtomicUsize::new(0),
        error: Mutex::new(None),
      }),
    }
  }

  pub fn config(&self) -> PipelineConfig {
    self.inner.config
  }

  /// Worker threads available in the shared pool.
  pub fn num_threads(&self) -> usize {
    rayon::current_num_threads()
  }

  /// Tasks scheduled but not yet finished.
  pub fn pending_count(&self) -> usize {
    self.inner.in_flight.load(Ordering::Acquire)
  }

  /// True while nothing is in flight. Holds again after a cancel once the
  /// queue has drained.
  pub fn is_complete(&self) -> bool {
    self.inner.in_flight.load(Ordering::Acquire) == 0
  }

  /// Requests cancellation. Running bodies finish their current range;
  /// everything not yet started drains without running.
  pub fn cancel(&self) {
    self.inner.canceled.store(true, Ordering::Release);
  }

  pub fn is_canceled(&self) -> bool {
    self.inner.canceled.load(Ordering::Acquire)
  }

  /// Takes the first recorded failure, if any. Later failures in the same
  /// execution are dropped, so a fault is reported exactly once.
  pub fn take_error(&self) -> Option<TaskError> {
    self.inner.error.lock().unwrap().take()
  }

  pub fn has_error(&self) -> bool {
    self.inner.error.lock().unwrap().is_some()
  }

  /// Clears the cancel flag and any untaken error so the manager can drive
  /// another execution. Only valid once the previous one has drained.
  pub fn reset(&self) {
    debug_assert!(self.is_complete());
    self.inner.canceled.store(false, Ordering::Release);
    *self.inner.error.lock().unwrap() = None;
  }

  // --------------------------------------------------------------------------
  // Scheduling
  // --------------------------------------------------------------------------

  /// Dispatches one unit of work to the pool and returns a pollable handle.
  ///
  /// The handle yields the value at most once. A task that failed or was
  /// drained by cancellation never delivers; watch [`Self::is_complete`]
  /// and [`Self::take_error`] for those outcomes.
  pub fn schedule<F, T>(&self, work: F) -> TaskHandle<T>
  where
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    T: Send + 'static,
  {
    let (sender, receiver) = channel::bounded(1);
    let inner = Arc::clone(&self.inner);
    self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
    rayon::spawn(move || {
      if !inner.canceled.load(Ordering::Acquire) {
        match work() {
          Ok(value) => {
            let _ = sender.send(value);
          }
          Err(err) => inner.fault(err),
        }
      }
      inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    });
    TaskHandle { receiver }
  }

  /// Splits `total` items into ranges of `chunk_size` and runs `body` once
  /// per range. When the last range finishes, `on_complete` runs on that
  /// worker; no range of the next phase can observe a half-done ancestor.
  ///
  /// Workloads below the configured small-workload threshold skip the pool
  /// entirely: the body runs right here as a single range and the returned
  /// handle is already complete.
  pub fn schedule_range<B, C>(
    &self,
    total: usize,
    chunk_size: usize,
    body: B,
    on_complete: C,
  ) -> GroupHandle
  where
    B: Fn(WorkRange) -> Result<(), TaskError> + Send + Sync + 'static,
    C: FnOnce() + Send + 'static,
  {
    let chunk_size = if chunk_size == 0 { total } else { chunk_size };

    if total == 0 || self.inner.config.is_trivial(total) {
      let group = GroupInner::new(1, Box::new(on_complete));
      if total > 0 && !self.is_canceled() {
        let range = WorkRange {
          index: 0,
          start: 0,
          count: total,
        };
        if let Err(err) = body(range) {
          self.inner.fault(err);
        }
      }
      group.member_finished();
      return GroupHandle { inner: group };
    }

    let chunks = chunk_count(total, chunk_size);
    let group = GroupInner::new(chunks, Box::new(on_complete));
    let body = Arc::new(body);
    for index in 0..chunks {
      let range = WorkRange {
        index,
        start: index * chunk_size,
        count: chunk_len(total, chunk_size, index),
      };
      let inner = Arc::clone(&self.inner);
      let body = Arc::clone(&body);
      let group = Arc::clone(&group);
      self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
      rayon::spawn(move || {
        if !inner.canceled.load(Ordering::Acquire) {
          if let Err(err) = body(range) {
            inner.fault(err);
          }
        }
        group.member_finished();
        inner.in_flight.fetch_sub(1, Ordering::AcqRel);
      });
    }
    GroupHandle { inner: group }
  }

  /// Dispatches a set of heterogeneous tasks and runs `on_complete` on the
  /// worker that finishes last. Unlike ranges, grouped tasks always go
  /// through the pool.
  pub fn schedule_group<C>(&self, tasks: Vec<UnitOfWork>, on_complete: C) -> GroupHandle
  where
    C: FnOnce() + Send + 'static,
  {
    let group = GroupInner::new(tasks.len().max(1), Box::new(on_complete));
    if tasks.is_empty() {
      group.member_finished();
      return GroupHandle { inner: group };
    }
    for task in tasks {
      let inner = Arc::clone(&self.inner);
      let group = Arc::clone(&group);
      self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
      rayon::spawn(move || {
        if !inner.canceled.load(Ordering::Acquire) {
          if let Err(err) = task() {
            inner.fault(err);
          }
        }
        group.member_finished();
        inner.in_flight.fetch_sub(1, Ordering::AcqRel);
      });
    }
    GroupHandle { inner: group }
  }
}

// ============================================================================
// Handles
// ============================================================================

/// Pollable result slot for a single scheduled task.
pub struct TaskHandle<T> {
  receiver: Receiver<T>,
}

impl<T> TaskHandle<T> {
  /// Non-blocking. Returns the value exactly once if the task delivered
  /// one; `None` while it is still running and forever after a failed or
  /// drained task dropped its sender.
  pub fn poll(&mut self) -> Option<T> {
    match self.receiver.try_recv() {
      Ok(value) => Some(value),
      Err(TryRecvError::Empty) => None,
      Err(TryRecvError::Disconnected) => None,
    }
  }
}

struct GroupInner {
  remaining: AtomicUsize,
  completed: AtomicBool,
  on_complete: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl GroupInner {
  fn new(members: usize, on_complete: Box<dyn FnOnce() + Send>) -> Arc<Self> {
    Arc::new(Self {
      remaining: AtomicUsize::new(members),
      completed: AtomicBool::new(false),
      on_complete: Mutex::new(Some(on_complete)),
    })
  }

  /// Called once per member, on whichever worker ran (or drained) it. The
  /// AcqRel decrement is the join barrier: the last caller observes every
  /// other member's writes before taking the callback.
  fn member_finished(&self) {
    if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
      let callback = self.on_complete.lock().unwrap().take();
      if let Some(callback) = callback {
        callback();
      }
      self.completed.store(true, Ordering::Release);
    }
  }
}

/// Completion flag for a scheduled range or task group.
pub struct GroupHandle {
  inner: Arc<GroupInner>,
}

impl GroupHandle {
  /// True once every member has finished or drained and the completion
  /// callback has returned. Observing true therefore orders after every
  /// member body and the callback itself.
  pub fn is_complete(&self) -> bool {
    self.inner.completed.load(Ordering::Acquire)
  }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod manager_test;
