//! Per-collection processors and the batch that drives them.
//!
//! A [`PointBatch`] owns one processor per input collection and walks each
//! of them through the state machine via the task manager. Batch-level
//! completion gates everything shared: the graph compiles and outputs are
//! staged only after the last entity reaches `Done`, so downstream stages
//! never see a half-finished batch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{self as channel, Receiver, Sender};
use web_time::Instant;

use crate::config::PipelineConfig;
use crate::constants::chunk_count;
use crate::error::{CorruptionError, SetupError, TaskError};
use crate::filters::PointFilter;
use crate::graph::{Cluster, GraphBuilder, InsertStats};
use crate::points::{PointIo, PointSet};
use crate::processors::{BatchStats, ProcessorState, StateCell};
use crate::tasks::{TaskManager, WorkRange};

/// Per-collection processing logic, run by a [`PointBatch`].
///
/// One instance per input collection, alive for one batch. The framework
/// calls `setup` and `work_size` on the driving thread, `process_range`
/// from workers, and `complete_work`/`write` exclusively on whichever
/// thread crossed the processor's join barrier.
pub trait PointsProcessor: Send + Sync + 'static {
  /// Per-range result. Partials reach `complete_work` in range order no
  /// matter how ranges interleaved.
  type Partial: Send + 'static;

  /// Binds required resources, failing fast when one is missing. A failure
  /// drops this processor from the batch; siblings keep running.
  fn setup(&mut self, io: &PointIo) -> Result<(), SetupError>;

  /// Items to fan out over. Defaults to the input point count.
  fn work_size(&self, io: &PointIo) -> usize {
    io.len()
  }

  /// One range of parallel work. Ranges of the same processor run
  /// concurrently and in any order; shared writes belong in
  /// `complete_work`, not here.
  fn process_range(&self, range: WorkRange, io: &PointIo) -> Result<Self::Partial, TaskError>;

  /// Single-threaded reduction over all partials of this processor.
  fn complete_work(&mut self, partials: Vec<Self::Partial>) -> Result<(), CorruptionError>;

  /// Final writes into the output view.
  fn write(&mut self, io: &mut PointIo) -> Result<(), CorruptionError>;
}

struct EntitySlot<P: PointsProcessor> {
  processor: RwLock<P>,
  io: RwLock<Option<PointIo>>,
  state: StateCell,
  aborted: AtomicBool,
  partials: Mutex<Vec<Option<P::Partial>>>,
}

struct BatchCore<P: PointsProcessor> {
  manager: TaskManager,
  config: PipelineConfig,
  graph: Option<Arc<GraphBuilder>>,
  filter: Option<Mutex<Box<dyn PointFilter>>>,
  slots: Vec<EntitySlot<P>>,
  pending: AtomicUsize,
  ranges: AtomicUsize,
  started_at: Instant,
  output_tx: Sender<BatchOutput>,
}

/// What a finished batch hands downstream, published exactly once.
pub struct BatchOutput {
  /// Staged collections in entity order. Entities with `NoOutput`, a
  /// failed setup, or a corruption abort contribute nothing.
  pub staged: Vec<Arc<PointSet>>,
  /// Compiled graph, when the batch carried a builder and it had edges.
  pub cluster: Option<Arc<Cluster>>,
  /// True when the run was canceled; nothing was staged or compiled.
  pub canceled: bool,
  pub stats: BatchStats,
  /// Insert accounting drained from the builder, zero without one.
  pub inserts: InsertStats,
}

/// Drives one processor per input collection through the state machine.
pub struct PointBatch<P: PointsProcessor> {
  core: Arc<BatchCore<P>>,
  output_rx: Receiver<BatchOutput>,
  started: bool,
}

impl<P: PointsProcessor> PointBatch<P> {
  pub fn new<F>(manager: TaskManager, inputs: Vec<PointIo>, make: F) -> Self
  where
    F: FnMut(usize) -> P,
  {
    Self::build(manager, inputs, None, None, make)
  }

  /// A batch whose processors feed `graph`; the builder compiles into the
  /// output cluster once every entity is done.
  pub fn with_graph<F>(
    manager: TaskManager,
    inputs: Vec<PointIo>,
    graph: Arc<GraphBuilder>,
    make: F,
  ) -> Self
  where
    F: FnMut(usize) -> P,
  {
    Self::build(manager, inputs, Some(graph), None, make)
  }

  /// Like [`with_graph`](Self::with_graph), with a validity pre-pass:
  /// before an entity's ranged work starts, points failing `filter` have
  /// their graph nodes invalidated, so the compile never keeps edges that
  /// lean on filtered-out points.
  pub fn with_node_filter<F>(
    manager: TaskManager,
    inputs: Vec<PointIo>,
    graph: Arc<GraphBuilder>,
    filter: Box<dyn PointFilter>,
    make: F,
  ) -> Self
  where
    F: FnMut(usize) -> P,
  {
    Self::build(manager, inputs, Some(graph), Some(Mutex::new(filter)), make)
  }

  fn build<F>(
    manager: TaskManager,
    inputs: Vec<PointIo>,
    graph: Option<Arc<GraphBuilder>>,
    filter: Option<Mutex<Box<dyn PointFilter>>>,
    mut make: F,
  ) -> Self
  where
    F: FnMut(usize) -> P,
  {
    let config = manager.config();
    let slots: Vec<EntitySlot<P>> = inputs
      .into_iter()
      .enumerate()
      .map(|(index, io)| EntitySlot {
        processor: RwLock::new(make(index)),
        io: RwLock::new(Some(io)),
        state: StateCell::new(),
        aborted: AtomicBool::new(false),
        partials: Mutex::new(Vec::new()),
      })
      .collect();
    let (output_tx, output_rx) = channel::bounded(1);
    let pending = AtomicUsize::new(slots.len());
    Self {
      core: Arc::new(BatchCore {
        manager,
        config,
        graph,
        filter,
        slots,
        pending,
        ranges: AtomicUsize::new(0),
        started_at: Instant::now(),
        output_tx,
      }),
      output_rx,
      started: false,
    }
  }

  /// Runs setup for every entity and dispatches their ranged work. Trivial
  /// entities complete synchronously inside this call.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "point_batch_start"))]
  pub fn start(&mut self) {
    if std::mem::replace(&mut self.started, true) {
      log::warn!("batch already started");
      return;
    }
    if self.core.slots.is_empty() {
      BatchCore::finish(&self.core);
      return;
    }
    for index in 0..self.core.slots.len() {
      BatchCore::launch(&self.core, index);
    }
  }

  /// Non-blocking. Yields the batch output exactly once.
  pub fn poll(&mut self) -> Option<BatchOutput> {
    self.output_rx.try_recv().ok()
  }

  /// Consumes the batch and parks the calling thread until the output
  /// arrives, starting the batch first if nothing did. Ranged work keeps
  /// running on the pool; use [`poll`](Self::poll) to observe without
  /// blocking.
  pub fn wait(mut self) -> Option<BatchOutput> {
    if !self.started {
      self.start();
    }
    self.output_rx.recv().ok()
  }

  /// True once every entity reached `Done`.
  pub fn is_complete(&self) -> bool {
    self.core.pending.load(Ordering::Acquire) == 0
  }

  pub fn entity_count(&self) -> usize {
    self.core.slots.len()
  }

  pub fn state_of(&self, entity: usize) -> Option<ProcessorState> {
    self.core.slots.get(entity).map(|s| s.state.get())
  }
}

impl<P: PointsProcessor> BatchCore<P> {
  fn launch(core: &Arc<Self>, index: usize) {
    let slot = &core.slots[index];
    slot.state.advance(ProcessorState::Setup);

    let setup = {
      let io_guard = slot.io.read().unwrap();
      match io_guard.as_ref() {
        Some(io) => slot.processor.write().unwrap().setup(io),
        None => Err(SetupError::MissingResource("point io".into())),
      }
    };
    if let Err(err) = setup {
      log::warn!("dropping processor {}: {}", index, err);
      slot.aborted.store(true, Ordering::Release);
      Self::entity_done(core, index);
      return;
    }

    // Points failing the filter leave the shared graph before any ranged
    // work can lean on them.
    if let (Some(graph), Some(filter)) = (&core.graph, &core.filter) {
      let bound = {
        let io_guard = slot.io.read().unwrap();
        match io_guard.as_ref() {
          Some(io) => {
            let mut filter = filter.lock().unwrap();
            filter.bind(io.input()).map(|()| {
              for point in 0..io.len() {
                if !filter.test(point) {
                  graph.invalidate_node(point as u32);
                }
              }
            })
          }
          None => Ok(()),
        }
      };
      if let Err(err) = bound {
        log::warn!("filter rejected entity {}: {}", index, err);
        slot.aborted.store(true, Ordering::Release);
        Self::entity_done(core, index);
        return;
      }
    }

    let size = {
      let io_guard = slot.io.read().unwrap();
      let processor = slot.processor.read().unwrap();
      io_guard.as_ref().map_or(0, |io| processor.work_size(io))
    };

    slot.state.advance(ProcessorState::ParallelWork);
    let chunk_size = core.config.chunk_size.max(1);
    let ranges = if size == 0 {
      0
    } else if core.config.is_trivial(size) {
      1
    } else {
      chunk_count(size, chunk_size)
    };
    *slot.partials.lock().unwrap() = (0..ranges).map(|_| None).collect();
    core.ranges.fetch_add(ranges, Ordering::AcqRel);

    let body_core = Arc::clone(core);
    let done_core = Arc::clone(core);
    core.manager.schedule_range(
      size,
      chunk_size,
      move |range| {
        let slot = &body_core.slots[index];
        let io_guard = slot.io.read().unwrap();
        let Some(io) = io_guard.as_ref() else {
          return Err(TaskError::failed("point io gone mid-batch"));
        };
        let partial = slot.processor.read().unwrap().process_range(range, io)?;
        slot.partials.lock().unwrap()[range.index] = Some(partial);
        Ok(())
      },
      move || Self::finish_entity(&done_core, index),
    );
  }

  /// Runs on the worker that crossed this entity's join barrier; the only
  /// place `complete_work` and `write` are ever called.
  fn finish_entity(core: &Arc<Self>, index: usize) {
    let slot = &core.slots[index];
    if core.manager.is_canceled() {
      Self::entity_done(core, index);
      return;
    }

    slot.state.advance(ProcessorState::CompleteWork);
    let partials: Vec<P::Partial> = {
      let mut stored = slot.partials.lock().unwrap();
      debug_assert!(stored.iter().all(Option::is_some));
      stored.drain(..).flatten().collect()
    };
    if let Err(err) = slot.processor.write().unwrap().complete_work(partials) {
      log::error!("processor {} failed reduction: {}", index, err);
      slot.aborted.store(true, Ordering::Release);
      Self::entity_done(core, index);
      return;
    }

    slot.state.advance(ProcessorState::Write);
    let wrote = {
      let mut io_guard = slot.io.write().unwrap();
      match io_guard.as_mut() {
        Some(io) => slot.processor.write().unwrap().write(io),
        None => Ok(()),
      }
    };
    if let Err(err) = wrote {
      log::error!("processor {} failed write: {}", index, err);
      slot.aborted.store(true, Ordering::Release);
    }

    Self::entity_done(core, index);
  }

  fn entity_done(core: &Arc<Self>, index: usize) {
    core.slots[index].state.advance(ProcessorState::Done);
    if core.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
      Self::finish(core);
    }
  }

  /// Batch-level completion. Compiling and staging happen here and only
  /// here, after the last entity, so the output is all-or-nothing.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "point_batch_finish"))]
  fn finish(core: &Arc<Self>) {
    let finish_started = Instant::now();
    let canceled = core.manager.is_canceled();
    let aborted = core
      .slots
      .iter()
      .filter(|s| s.aborted.load(Ordering::Acquire))
      .count();

    let mut staged = Vec::new();
    let mut cluster = None;
    if !canceled {
      if let Some(graph) = &core.graph {
        match graph.compile(core.config.prune_invalid) {
          Ok(compiled) => cluster = Some(Arc::new(compiled)),
          Err(err) => log::warn!("graph output suppressed: {}", err),
        }
      }
      for slot in &core.slots {
        if slot.aborted.load(Ordering::Acquire) {
          continue;
        }
        if let Some(io) = slot.io.write().unwrap().take() {
          if let Some(output) = io.stage() {
            staged.push(output);
          }
        }
      }
    }

    let stats = BatchStats {
      entities: core.slots.len(),
      ranges: core.ranges.load(Ordering::Acquire),
      aborted,
      staged: staged.len(),
      elapsed_us: core.started_at.elapsed().as_micros() as u64,
      finish_us: finish_started.elapsed().as_micros() as u64,
    };
    let inserts = core
      .graph
      .as_ref()
      .map(|g| g.take_insert_totals())
      .unwrap_or_default();
    let _ = core.output_tx.send(BatchOutput {
      staged,
      cluster,
      canceled,
      stats,
      inserts,
    });
  }
}

#[cfg(test)]
#[path = "points_test.rs"]
mod points_test;
