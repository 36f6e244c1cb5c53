//! Point collections and their input/output views.
//!
//! A [`PointSet`] is index-stable: point index N refers to the same point for
//! the lifetime of a processing pass. Remapping indices across passes is
//! always explicit (a new set), never an in-place mutation.
//!
//! A [`PointIo`] pairs a shared read-only input with an output view resolved
//! from an [`OutputInit`] mode at construction, before any processor writes.
//! Alongside the output it carries a [`FlagStore`] of lazily allocated
//! per-point marks that producers can set from worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use glam::Vec3;
use rustc_hash::FxHashMap;

/// One point of a collection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    /// Position in collection-local space.
    pub position: Vec3,
    /// Density weight, blended by annotation stages.
    pub density: f32,
    /// Deterministic per-point seed.
    pub seed: u32,
}

impl Point {
    /// Point at `position` with default density and seed.
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            density: 1.0,
            seed: 0,
        }
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Ordered, index-stable point storage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointSet {
    points: Vec<Point>,
}

impl PointSet {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// `count` default points in a row. Handy for tests and benches.
    pub fn with_len(count: usize) -> Self {
        Self {
            points: vec![Point::default(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    /// Append a point, returning its index. Indices of existing points
    /// never change.
    pub fn push(&mut self, point: Point) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}

/// One named per-point flag buffer. Bits are atomic, so producers on
/// different ranges may mark overlapping indices without coordination.
#[derive(Debug)]
pub struct FlagBuffer {
    bits: Vec<AtomicBool>,
}

impl FlagBuffer {
    fn with_len(len: usize) -> Self {
        Self {
            bits: (0..len).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Sets the flag for `index`, returning the previous value. Indices
    /// outside the collection are ignored and read as false.
    pub fn set(&self, index: usize, value: bool) -> bool {
        match self.bits.get(index) {
            Some(bit) => bit.swap(value, Ordering::AcqRel),
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits
            .get(index)
            .is_some_and(|bit| bit.load(Ordering::Acquire))
    }

    /// Number of set flags.
    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .filter(|bit| bit.load(Ordering::Acquire))
            .count()
    }
}

/// Named per-point flag buffers, allocated on first request and sized to
/// the owning collection. This is the write path collaborators use to
/// attach marks like "on hull" to points by index.
#[derive(Debug)]
pub struct FlagStore {
    len: usize,
    buffers: Mutex<FxHashMap<String, Arc<FlagBuffer>>>,
}

impl FlagStore {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            buffers: Mutex::new(FxHashMap::default()),
        }
    }

    /// The buffer named `name`, created empty on first use.
    pub fn buffer(&self, name: &str) -> Arc<FlagBuffer> {
        let mut buffers = self.buffers.lock().unwrap();
        match buffers.get(name) {
            Some(buffer) => Arc::clone(buffer),
            None => {
                let buffer = Arc::new(FlagBuffer::with_len(self.len));
                buffers.insert(name.to_owned(), Arc::clone(&buffer));
                buffer
            }
        }
    }

    /// The buffer named `name`, only if something already wrote to it.
    pub fn get(&self, name: &str) -> Option<Arc<FlagBuffer>> {
        self.buffers.lock().unwrap().get(name).cloned()
    }

    /// Buffer names allocated so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buffers.lock().unwrap().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// How the output view of a [`PointIo`] is initialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputInit {
    /// Fresh empty output; the write phase fills it.
    NewEmpty,
    /// Output starts as a copy of the input.
    DuplicateInput,
    /// Output is the input, passed through unchanged (read-only).
    ForwardInput,
    /// Nothing is staged for this collection.
    NoOutput,
}

/// Resolved output storage. `Forward` borrows the input at read time so a
/// pass-through never copies point data.
#[derive(Debug)]
enum OutputView {
    None,
    Forward,
    Owned(PointSet),
}

/// One entity of a batch: a shared input view plus its resolved output.
#[derive(Debug)]
pub struct PointIo {
    input: Arc<PointSet>,
    output: OutputView,
    init: OutputInit,
    flags: FlagStore,
}

impl PointIo {
    /// Resolve `init` against `input`. This is the only place output storage
    /// is allocated; processors only ever fill it.
    pub fn new(input: Arc<PointSet>, init: OutputInit) -> Self {
        let output = match init {
            OutputInit::NewEmpty => OutputView::Owned(PointSet::new()),
            OutputInit::DuplicateInput => OutputView::Owned((*input).clone()),
            OutputInit::ForwardInput => OutputView::Forward,
            OutputInit::NoOutput => OutputView::None,
        };
        let flags = FlagStore::new(input.len());
        Self {
            input,
            output,
            init,
            flags,
        }
    }

    pub fn input(&self) -> &PointSet {
        &self.input
    }

    pub fn init_mode(&self) -> OutputInit {
        self.init
    }

    /// Per-point marks keyed by input index. Pass-scoped scratch; anything
    /// worth keeping is written into the output during the write phase.
    pub fn flags(&self) -> &FlagStore {
        &self.flags
    }

    /// Number of input points, the default work size for per-point stages.
    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Read view of the output, if this io produces one.
    pub fn output(&self) -> Option<&PointSet> {
        match &self.output {
            OutputView::None => None,
            OutputView::Forward => Some(&self.input),
            OutputView::Owned(set) => Some(set),
        }
    }

    /// Mutable output view. `ForwardInput` and `NoOutput` have none.
    pub fn output_mut(&mut self) -> Option<&mut PointSet> {
        match &mut self.output {
            OutputView::Owned(set) => Some(set),
            _ => None,
        }
    }

    /// Consume the io and hand the output to downstream stages.
    ///
    /// `NoOutput` stages nothing; `ForwardInput` stages the input without
    /// copying.
    pub fn stage(self) -> Option<Arc<PointSet>> {
        match self.output {
            OutputView::None => None,
            OutputView::Forward => Some(self.input),
            OutputView::Owned(set) => Some(Arc::new(set)),
        }
    }
}

#[cfg(test)]
#[path = "points_test.rs"]
mod points_test;
