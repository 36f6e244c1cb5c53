use super::*;

use std::thread;
use std::time::Duration;

use glam::Vec3;

use crate::filters::DensityFilter;
use crate::graph::Edge;
use crate::points::{OutputInit, Point};

fn wait_for(label: &str, mut done: impl FnMut() -> bool) {
  for _ in 0..1000 {
    if done() {
      return;
    }
    thread::sleep(Duration::from_millis(1));
  }
  panic!("timed out waiting for {}", label);
}

fn take_output<P: PointsProcessor>(batch: &mut PointBatch<P>) -> BatchOutput {
  let mut output = None;
  wait_for("batch output", || {
    output = output.take().or_else(|| batch.poll());
    output.is_some()
  });
  output.unwrap()
}

fn line_points(count: usize) -> Arc<PointSet> {
  let points = (0..count)
    .map(|i| {
      let mut p = Point::at(Vec3::new(i as f32, 0.0, 0.0));
      p.density = i as f32;
      p.seed = i as u32;
      p
    })
    .collect();
  Arc::new(PointSet::from_points(points))
}

// ============================================================================
// Test processors
// ============================================================================

/// Scales every density into the duplicated output.
struct DensityScale {
  factor: f32,
  merged: Vec<(usize, f32)>,
}

impl DensityScale {
  fn new(factor: f32) -> Self {
    Self {
      factor,
      merged: Vec::new(),
    }
  }
}

impl PointsProcessor for DensityScale {
  type Partial = Vec<(usize, f32)>;

  fn setup(&mut self, io: &PointIo) -> Result<(), SetupError> {
    if io.is_empty() {
      return Err(SetupError::EmptyInput);
    }
    Ok(())
  }

  fn process_range(&self, range: WorkRange, io: &PointIo) -> Result<Self::Partial, TaskError> {
    let mut out = Vec::with_capacity(range.count);
    for i in range.iter() {
      let density = io
        .input()
        .get(i)
        .map(|p| p.density)
        .ok_or_else(|| TaskError::failed("point index out of range"))?;
      out.push((i, density * self.factor));
    }
    Ok(out)
  }

  fn complete_work(&mut self, partials: Vec<Self::Partial>) -> Result<(), CorruptionError> {
    self.merged = partials.into_iter().flatten().collect();
    Ok(())
  }

  fn write(&mut self, io: &mut PointIo) -> Result<(), CorruptionError> {
    if let Some(out) = io.output_mut() {
      for (i, density) in &self.merged {
        if let Some(p) = out.points_mut().get_mut(*i) {
          p.density = *density;
        }
      }
    }
    Ok(())
  }
}

/// Links consecutive points into a shared graph.
struct ChainLinker {
  graph: Arc<GraphBuilder>,
}

impl PointsProcessor for ChainLinker {
  type Partial = ();

  fn setup(&mut self, _io: &PointIo) -> Result<(), SetupError> {
    Ok(())
  }

  fn process_range(&self, range: WorkRange, io: &PointIo) -> Result<(), TaskError> {
    let mut edges = Vec::new();
    for i in range.iter() {
      if i + 1 < io.len() {
        edges.push(Edge::new(i as u32, i as u32 + 1));
      }
    }
    self.graph.insert(&edges, range.index as u32);
    Ok(())
  }

  fn complete_work(&mut self, _partials: Vec<()>) -> Result<(), CorruptionError> {
    Ok(())
  }

  fn write(&mut self, _io: &mut PointIo) -> Result<(), CorruptionError> {
    Ok(())
  }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn batch_scales_densities_through_all_states() {
  let manager = TaskManager::new(PipelineConfig::ALWAYS_PARALLEL.with_chunk_size(64));
  let inputs = vec![
    PointIo::new(line_points(300), OutputInit::DuplicateInput),
    PointIo::new(line_points(500), OutputInit::DuplicateInput),
  ];
  let mut batch = PointBatch::new(manager.clone(), inputs, |_| DensityScale::new(2.0));
  batch.start();

  let output = take_output(&mut batch);
  assert!(!output.canceled);
  assert_eq!(output.staged.len(), 2);
  assert_eq!(output.stats.entities, 2);
  assert_eq!(output.stats.aborted, 0);
  for staged in &output.staged {
    for (i, p) in staged.points().iter().enumerate() {
      assert_eq!(p.density, i as f32 * 2.0);
    }
  }

  assert!(batch.is_complete());
  assert_eq!(batch.state_of(0), Some(ProcessorState::Done));
  assert_eq!(batch.state_of(1), Some(ProcessorState::Done));
  assert!(manager.take_error().is_none());
}

#[test]
fn trivial_and_parallel_runs_match_bitwise() {
  let run = |config: PipelineConfig| {
    let manager = TaskManager::new(config);
    let inputs = vec![PointIo::new(line_points(777), OutputInit::DuplicateInput)];
    let mut batch = PointBatch::new(manager, inputs, |_| DensityScale::new(3.5));
    batch.start();
    take_output(&mut batch).staged
  };

  let inline = run(PipelineConfig::SERIAL);
  let dispatched = run(PipelineConfig::ALWAYS_PARALLEL.with_chunk_size(32));

  assert_eq!(inline.len(), 1);
  assert_eq!(dispatched.len(), 1);
  assert_eq!(inline[0].points(), dispatched[0].points());
}

#[test]
fn setup_failure_drops_entity_without_aborting_siblings() {
  let manager = TaskManager::new(PipelineConfig::DEFAULT);
  let inputs = vec![
    PointIo::new(Arc::new(PointSet::new()), OutputInit::DuplicateInput),
    PointIo::new(line_points(40), OutputInit::DuplicateInput),
  ];
  let mut batch = PointBatch::new(manager.clone(), inputs, |_| DensityScale::new(2.0));
  batch.start();

  let output = take_output(&mut batch);
  assert!(!output.canceled);
  assert_eq!(output.stats.aborted, 1);
  assert_eq!(output.staged.len(), 1);
  assert_eq!(output.staged[0].len(), 40);
  assert_eq!(batch.state_of(0), Some(ProcessorState::Done));
  // A setup failure is not a scheduler fault.
  assert!(manager.take_error().is_none());
}

#[test]
fn no_output_mode_stages_zero_entries() {
  let manager = TaskManager::new(PipelineConfig::DEFAULT);
  let inputs = vec![PointIo::new(line_points(5), OutputInit::NoOutput)];
  let mut batch = PointBatch::new(manager.clone(), inputs, |_| DensityScale::new(2.0));
  batch.start();

  // 5 points are trivial, so the whole batch ran inline.
  let output = batch.poll().expect("trivial batch finishes in start");
  assert!(!output.canceled);
  assert_eq!(output.staged.len(), 0);
  assert_eq!(output.stats.entities, 1);
  assert_eq!(output.stats.aborted, 0);
  assert!(manager.take_error().is_none());
}

#[test]
fn edge_producers_share_one_graph() {
  let manager = TaskManager::new(PipelineConfig::ALWAYS_PARALLEL.with_chunk_size(16));
  let graph = Arc::new(GraphBuilder::new(200));
  let inputs = vec![
    PointIo::new(line_points(200), OutputInit::ForwardInput),
    PointIo::new(line_points(200), OutputInit::ForwardInput),
  ];
  let make_graph = Arc::clone(&graph);
  let mut batch = PointBatch::with_graph(manager, inputs, Arc::clone(&graph), move |_| {
    ChainLinker {
      graph: Arc::clone(&make_graph),
    }
  });
  batch.start();

  let output = take_output(&mut batch);
  assert_eq!(output.staged.len(), 2);

  // Both entities inserted the same chain; dedup kept each link once.
  assert_eq!(graph.edge_count(), 199);
  assert_eq!(
    output.inserts,
    InsertStats {
      added: 199,
      duplicates: 199,
      rejected: 0,
    }
  );
  let cluster = output.cluster.expect("chain compiles");
  assert_eq!(cluster.node_count(), 200);
  assert_eq!(cluster.edge_count(), 199);
  assert!(cluster.check_integrity().is_ok());
}

#[test]
fn node_filter_prunes_graph_before_compile() {
  let manager = TaskManager::new(PipelineConfig::DEFAULT);
  let graph = Arc::new(GraphBuilder::new(50));
  let inputs = vec![PointIo::new(line_points(50), OutputInit::ForwardInput)];
  let make_graph = Arc::clone(&graph);
  let mut batch = PointBatch::with_node_filter(
    manager.clone(),
    inputs,
    Arc::clone(&graph),
    Box::new(DensityFilter::new(10.0)),
    move |_| ChainLinker {
      graph: Arc::clone(&make_graph),
    },
  );
  batch.start();

  let output = take_output(&mut batch);
  assert!(!output.canceled);

  // Densities 0..10 fail the filter; the chain over 10..50 survives.
  let cluster = output.cluster.expect("filtered chain compiles");
  assert_eq!(cluster.node_count(), 40);
  assert_eq!(cluster.edge_count(), 39);
  assert_eq!(cluster.node_of_point(9), None);
  assert!(cluster.node_of_point(10).is_some());
  assert!(manager.take_error().is_none());
}

#[test]
fn staging_waits_for_last_entity() {
  struct Gated {
    gate: Option<Receiver<()>>,
  }

  impl PointsProcessor for Gated {
    type Partial = ();

    fn setup(&mut self, _io: &PointIo) -> Result<(), SetupError> {
      Ok(())
    }

    fn process_range(&self, _range: WorkRange, _io: &PointIo) -> Result<(), TaskError> {
      if let Some(gate) = &self.gate {
        let _ = gate.recv();
      }
      Ok(())
    }

    fn complete_work(&mut self, _partials: Vec<()>) -> Result<(), CorruptionError> {
      Ok(())
    }

    fn write(&mut self, _io: &mut PointIo) -> Result<(), CorruptionError> {
      Ok(())
    }
  }

  let manager = TaskManager::new(PipelineConfig::ALWAYS_PARALLEL);
  let (gate_tx, gate_rx) = channel::bounded::<()>(0);
  let inputs = vec![
    PointIo::new(line_points(4), OutputInit::ForwardInput),
    PointIo::new(line_points(4), OutputInit::ForwardInput),
  ];
  let mut batch = PointBatch::new(manager, inputs, |index| Gated {
    gate: (index == 1).then(|| gate_rx.clone()),
  });
  batch.start();

  wait_for("first entity", || {
    batch.state_of(0) == Some(ProcessorState::Done)
  });
  // Entity 0 is done, entity 1 is gated: nothing may be staged yet.
  assert!(batch.poll().is_none());
  assert!(!batch.is_complete());

  drop(gate_tx);
  let output = take_output(&mut batch);
  assert_eq!(output.staged.len(), 2);
  assert!(batch.is_complete());
}

#[test]
fn cancel_mid_parallel_work_never_compiles() {
  struct InsertThenBlock {
    graph: Arc<GraphBuilder>,
    gate: Receiver<()>,
  }

  impl PointsProcessor for InsertThenBlock {
    type Partial = ();

    fn setup(&mut self, _io: &PointIo) -> Result<(), SetupError> {
      Ok(())
    }

    fn process_range(&self, range: WorkRange, io: &PointIo) -> Result<(), TaskError> {
      let i = range.start as u32;
      if (i as usize) + 1 < io.len() {
        self.graph.insert(&[Edge::new(i, i + 1)], 0);
      }
      let _ = self.gate.recv();
      Ok(())
    }

    fn complete_work(&mut self, _partials: Vec<()>) -> Result<(), CorruptionError> {
      Ok(())
    }

    fn write(&mut self, _io: &mut PointIo) -> Result<(), CorruptionError> {
      Ok(())
    }
  }

  let manager = TaskManager::new(PipelineConfig::ALWAYS_PARALLEL.with_chunk_size(1));
  let count = manager.num_threads() + 2;
  let graph = Arc::new(GraphBuilder::new(count));
  let (gate_tx, gate_rx) = channel::bounded::<()>(0);
  let inputs = vec![PointIo::new(line_points(count), OutputInit::DuplicateInput)];
  let make_graph = Arc::clone(&graph);
  let mut batch = PointBatch::with_graph(
    manager.clone(),
    inputs,
    Arc::clone(&graph),
    move |_| InsertThenBlock {
      graph: Arc::clone(&make_graph),
      gate: gate_rx.clone(),
    },
  );
  batch.start();

  wait_for("some accumulation", || graph.edge_count() >= 1);
  manager.cancel();
  drop(gate_tx);

  let output = take_output(&mut batch);
  assert!(output.canceled);
  assert!(output.cluster.is_none());
  assert!(output.staged.is_empty());
  assert!(manager.is_canceled());
}

#[test]
fn corruption_aborts_one_entity_alone() {
  struct BadWriter {
    fail: bool,
  }

  impl PointsProcessor for BadWriter {
    type Partial = ();

    fn setup(&mut self, _io: &PointIo) -> Result<(), SetupError> {
      Ok(())
    }

    fn process_range(&self, _range: WorkRange, _io: &PointIo) -> Result<(), TaskError> {
      Ok(())
    }

    fn complete_work(&mut self, _partials: Vec<()>) -> Result<(), CorruptionError> {
      Ok(())
    }

    fn write(&mut self, _io: &mut PointIo) -> Result<(), CorruptionError> {
      if self.fail {
        return Err(CorruptionError::LookupMismatch {
          point: 0,
          node: 0,
          actual: u32::MAX,
        });
      }
      Ok(())
    }
  }

  let manager = TaskManager::new(PipelineConfig::DEFAULT);
  let inputs = vec![
    PointIo::new(line_points(10), OutputInit::DuplicateInput),
    PointIo::new(line_points(10), OutputInit::DuplicateInput),
  ];
  let mut batch = PointBatch::new(manager.clone(), inputs, |index| BadWriter {
    fail: index == 0,
  });
  batch.start();

  let output = take_output(&mut batch);
  assert!(!output.canceled);
  assert_eq!(output.stats.aborted, 1);
  assert_eq!(output.staged.len(), 1);
  // Corruption is entity-local, not a run-level fault.
  assert!(manager.take_error().is_none());
}

#[test]
fn complete_work_sees_every_range_in_order() {
  struct RangeAudit {
    total: usize,
    verified: Arc<AtomicBool>,
  }

  impl PointsProcessor for RangeAudit {
    type Partial = WorkRange;

    fn setup(&mut self, _io: &PointIo) -> Result<(), SetupError> {
      Ok(())
    }

    fn process_range(&self, range: WorkRange, _io: &PointIo) -> Result<WorkRange, TaskError> {
      Ok(range)
    }

    fn complete_work(&mut self, partials: Vec<WorkRange>) -> Result<(), CorruptionError> {
      let ordered = partials.iter().enumerate().all(|(k, r)| r.index == k);
      let contiguous = partials
        .windows(2)
        .all(|pair| pair[0].end() == pair[1].start);
      let covered = partials.iter().map(|r| r.count).sum::<usize>() == self.total;
      let starts_at_zero = partials.first().map_or(false, |r| r.start == 0);
      self
        .verified
        .store(ordered && contiguous && covered && starts_at_zero, Ordering::Release);
      Ok(())
    }

    fn write(&mut self, _io: &mut PointIo) -> Result<(), CorruptionError> {
      Ok(())
    }
  }

  let total = 1000;
  let verified = Arc::new(AtomicBool::new(false));
  let manager = TaskManager::new(PipelineConfig::ALWAYS_PARALLEL.with_chunk_size(64));
  let inputs = vec![PointIo::new(line_points(total), OutputInit::NoOutput)];
  let flag = Arc::clone(&verified);
  let mut batch = PointBatch::new(manager, inputs, move |_| RangeAudit {
    total,
    verified: Arc::clone(&flag),
  });
  batch.start();

  let output = take_output(&mut batch);
  assert!(!output.canceled);
  assert!(verified.load(Ordering::Acquire));
}
