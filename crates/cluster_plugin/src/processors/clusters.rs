//! Cluster-bound processors and their batch.
//!
//! A [`ClusterBatch`] takes vtx+edges pairs: each entity is a point set
//! plus the compiled cluster built over it. The processor mutates validity
//! on a private [`WorkingCopy`] while the shared cluster stays read-only;
//! at batch completion each dirty copy is consolidated into a fresh
//! compiled cluster, and untouched copies stage the original without a
//! rebuild.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{self as channel, Receiver, Sender};
use web_time::Instant;

use crate::config::PipelineConfig;
use crate::constants::chunk_count;
use crate::error::{CorruptionError, SetupError, TaskError};
use crate::filters::PointFilter;
use crate::graph::{Cluster, CopyScope, GraphBuilder, InsertStats, WorkingCopy};
use crate::points::PointSet;
use crate::processors::{BatchStats, ProcessorState, StateCell};
use crate::tasks::{TaskManager, WorkRange};

/// Per-cluster processing logic, run by a [`ClusterBatch`].
///
/// Same state machine as points processing; ranges typically fan out over
/// edges or nodes of the cluster and flip validity on the working copy.
pub trait ClusterProcessor: Send + Sync + 'static {
  /// Per-range result, merged in range order by `complete_work`.
  type Partial: Send + 'static;

  /// Validity tables this processor mutates. Narrower scopes make misuse
  /// loud: invalidation outside the scope is rejected.
  fn scope(&self) -> CopyScope {
    CopyScope::Full
  }

  fn setup(&mut self, points: &PointSet, cluster: &Cluster) -> Result<(), SetupError>;

  /// Items to fan out over. Defaults to the edge count, the usual target
  /// of cutting passes.
  fn work_size(&self, cluster: &Cluster) -> usize {
    cluster.edge_count()
  }

  fn process_range(
    &self,
    range: WorkRange,
    points: &PointSet,
    copy: &WorkingCopy,
  ) -> Result<Self::Partial, TaskError>;

  fn complete_work(
    &mut self,
    partials: Vec<Self::Partial>,
    copy: &WorkingCopy,
  ) -> Result<(), CorruptionError>;

  fn write(&mut self, copy: &WorkingCopy) -> Result<(), CorruptionError>;
}

/// One vtx+edges input pair.
pub struct ClusterEntity {
  pub points: Arc<PointSet>,
  pub cluster: Arc<Cluster>,
}

struct ClusterSlot<C: ClusterProcessor> {
  points: Arc<PointSet>,
  cluster: Arc<Cluster>,
  copy: RwLock<Option<WorkingCopy>>,
  processor: RwLock<C>,
  state: StateCell,
  aborted: AtomicBool,
  partials: Mutex<Vec<Option<C::Partial>>>,
}

struct ClusterCore<C: ClusterProcessor> {
  manager: TaskManager,
  config: PipelineConfig,
  filter: Option<Mutex<Box<dyn PointFilter>>>,
  slots: Vec<ClusterSlot<C>>,
  pending: AtomicUsize,
  ranges: AtomicUsize,
  started_at: Instant,
  output_tx: Sender<ClusterBatchOutput>,
}

/// What a finished cluster batch hands downstream.
pub struct ClusterBatchOutput {
  /// Consolidated clusters in entity order. An untouched entity stages its
  /// source cluster; one whose surviving edge set is empty stages nothing.
  pub staged: Vec<Arc<Cluster>>,
  pub canceled: bool,
  pub stats: BatchStats,
  /// Insert accounting summed over the consolidation rebuilds.
  pub inserts: InsertStats,
}

/// Drives one processor per vtx+edges pair through the state machine.
pub struct ClusterBatch<C: ClusterProcessor> {
  core: Arc<ClusterCore<C>>,
  output_rx: Receiver<ClusterBatchOutput>,
  started: bool,
}

impl<C: ClusterProcessor> ClusterBatch<C> {
  pub fn new<F>(manager: TaskManager, entities: Vec<ClusterEntity>, make: F) -> Self
  where
    F: FnMut(usize) -> C,
  {
    Self::build(manager, entities, None, make)
  }

  /// A batch with a validity pre-pass: before any ranged work, nodes whose
  /// point fails `filter` are invalidated on the working copy.
  pub fn with_filter<F>(
    manager: TaskManager,
    entities: Vec<ClusterEntity>,
    filter: Box<dyn PointFilter>,
    make: F,
  ) -> Self
  where
    F: FnMut(usize) -> C,
  {
    Self::build(manager, entities, Some(Mutex::new(filter)), make)
  }

  fn build<F>(
    manager: TaskManager,
    entities: Vec<ClusterEntity>,
    filter: Option<Mutex<Box<dyn PointFilter>>>,
    mut make: F,
  ) -> Self
  where
    F: FnMut(usize) -> C,
  {
    let config = manager.config();
    let slots: Vec<ClusterSlot<C>> = entities
      .into_iter()
      .enumerate()
      .map(|(index, entity)| ClusterSlot {
        points: entity.points,
        cluster: entity.cluster,
        copy: RwLock::new(None),
        processor: RwLock::new(make(index)),
        state: StateCell::new(),
        aborted: AtomicBool::new(false),
        partials: Mutex::new(Vec::new()),
      })
      .collect();
    let (output_tx, output_rx) = channel::bounded(1);
    let pending = AtomicUsize::new(slots.len());
    Self {
      core: Arc::new(ClusterCore {
        manager,
        config,
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

  /// Checks, sets up, and dispatches every entity. Trivial entities
  /// complete synchronously inside this call.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "cluster_batch_start"))]
  pub fn start(&mut self) {
    if std::mem::replace(&mut self.started, true) {
      log::warn!("batch already started");
      return;
    }
    if self.core.slots.is_empty() {
      ClusterCore::finish(&self.core);
      return;
    }
    for index in 0..self.core.slots.len() {
      ClusterCore::launch(&self.core, index);
    }
  }

  /// Non-blocking. Yields the batch output exactly once.
  pub fn poll(&mut self) -> Option<ClusterBatchOutput> {
    self.output_rx.try_recv().ok()
  }

  /// Consumes the batch and parks the calling thread until the output
  /// arrives, starting the batch first if nothing did.
  pub fn wait(mut self) -> Option<ClusterBatchOutput> {
    if !self.started {
      self.start();
    }
    self.output_rx.recv().ok()
  }

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

impl<C: ClusterProcessor> ClusterCore<C> {
  fn launch(core: &Arc<Self>, index: usize) {
    let slot = &core.slots[index];
    slot.state.advance(ProcessorState::Setup);

    // A cluster that fails its integrity check aborts this entity before
    // any work is dispatched over it.
    if let Err(err) = slot.cluster.check_integrity() {
      log::error!("entity {} cluster rejected: {}", index, err);
      slot.aborted.store(true, Ordering::Release);
      Self::entity_done(core, index);
      return;
    }

    let setup = slot
      .processor
      .write()
      .unwrap()
      .setup(&slot.points, &slot.cluster);
    if let Err(err) = setup {
      log::warn!("dropping processor {}: {}", index, err);
      slot.aborted.store(true, Ordering::Release);
      Self::entity_done(core, index);
      return;
    }

    // The filter pre-pass needs the node table, whatever the processor
    // asked for.
    let scope = slot.processor.read().unwrap().scope();
    let scope = if core.filter.is_some() && !scope.covers_nodes() {
      CopyScope::Full
    } else {
      scope
    };
    let copy = WorkingCopy::new(Arc::clone(&slot.cluster), scope);

    if let Some(filter) = &core.filter {
      let mut filter = filter.lock().unwrap();
      if let Err(err) = filter.bind(&slot.points) {
        log::warn!("filter rejected entity {}: {}", index, err);
        slot.aborted.store(true, Ordering::Release);
        Self::entity_done(core, index);
        return;
      }
      for (node_index, node) in slot.cluster.nodes().iter().enumerate() {
        if !filter.test(node.point_index as usize) {
          copy.invalidate_node(node_index as u32);
        }
      }
    }
    *slot.copy.write().unwrap() = Some(copy);

    let size = slot.processor.read().unwrap().work_size(&slot.cluster);
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
        let copy_guard = slot.copy.read().unwrap();
        let Some(copy) = copy_guard.as_ref() else {
          return Err(TaskError::failed("working copy gone mid-batch"));
        };
        let partial = slot
          .processor
          .read()
          .unwrap()
          .process_range(range, &slot.points, copy)?;
        slot.partials.lock().unwrap()[range.index] = Some(partial);
        Ok(())
      },
      move || Self::finish_entity(&done_core, index),
    );
  }

  fn finish_entity(core: &Arc<Self>, index: usize) {
    let slot = &core.slots[index];
    if core.manager.is_canceled() {
      Self::entity_done(core, index);
      return;
    }

    slot.state.advance(ProcessorState::CompleteWork);
    let partials: Vec<C::Partial> = {
      let mut stored = slot.partials.lock().unwrap();
      debug_assert!(stored.iter().all(Option::is_some));
      stored.drain(..).flatten().collect()
    };
    let reduced = {
      let copy_guard = slot.copy.read().unwrap();
      match copy_guard.as_ref() {
        Some(copy) => slot.processor.write().unwrap().complete_work(partials, copy),
        None => Ok(()),
      }
    };
    if let Err(err) = reduced {
      log::error!("processor {} failed reduction: {}", index, err);
      slot.aborted.store(true, Ordering::Release);
      Self::entity_done(core, index);
      return;
    }

    slot.state.advance(ProcessorState::Write);
    let wrote = {
      let copy_guard = slot.copy.read().unwrap();
      match copy_guard.as_ref() {
        Some(copy) => slot.processor.write().unwrap().write(copy),
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

  /// Batch-level completion: consolidate each surviving copy and publish.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "cluster_batch_finish"))]
  fn finish(core: &Arc<Self>) {
    let finish_started = Instant::now();
    let canceled = core.manager.is_canceled();
    let aborted = core
      .slots
      .iter()
      .filter(|s| s.aborted.load(Ordering::Acquire))
      .count();

    let mut staged = Vec::new();
    let mut inserts = InsertStats::default();
    if !canceled {
      for (index, slot) in core.slots.iter().enumerate() {
        if slot.aborted.load(Ordering::Acquire) {
          continue;
        }
        let copy_guard = slot.copy.read().unwrap();
        let Some(copy) = copy_guard.as_ref() else {
          continue;
        };
        if !copy.is_dirty() {
          staged.push(copy.share());
          continue;
        }
        let survivors = copy.valid_edges();
        let rebuilt = GraphBuilder::new(slot.points.len());
        inserts.absorb(rebuilt.insert(&survivors, index as u32));
        match rebuilt.compile(true) {
          Ok(consolidated) => staged.push(Arc::new(consolidated)),
          Err(err) => log::warn!("entity {} output suppressed: {}", index, err),
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
    let _ = core.output_tx.send(ClusterBatchOutput {
      staged,
      canceled,
      stats,
      inserts,
    });
  }
}

#[cfg(test)]
#[path = "clusters_test.rs"]
mod clusters_test;
