//! Per-point predicates used to mask work before it reaches a processor.

use glam::Vec3;

use crate::error::SetupError;
use crate::points::PointSet;

/// A predicate over point indices. `bind` runs once per execution on the
/// driving thread and may snapshot whatever it needs; `test` is then called
/// from worker threads and must stay cheap.
pub trait PointFilter: Send + Sync {
  fn bind(&mut self, points: &PointSet) -> Result<(), SetupError>;

  fn test(&self, index: usize) -> bool;
}

impl PointFilter for Box<dyn PointFilter> {
  fn bind(&mut self, points: &PointSet) -> Result<(), SetupError> {
    (**self).bind(points)
  }

  fn test(&self, index: usize) -> bool {
    (**self).test(index)
  }
}

/// Keeps points at or above a density threshold.
pub struct DensityFilter {
  min_density: f32,
  densities: Vec<f32>,
}

impl DensityFilter {
  pub fn new(min_density: f32) -> Self {
    Self {
      min_density,
      densities: Vec::new(),
    }
  }
}

impl PointFilter for DensityFilter {
  fn bind(&mut self, points: &PointSet) -> Result<(), SetupError> {
    if points.is_empty() {
      return Err(SetupError::EmptyInput);
    }
    self.densities = points.iter().map(|p| p.density).collect();
    Ok(())
  }

  fn test(&self, index: usize) -> bool {
    self
      .densities
      .get(index)
      .is_some_and(|d| *d >= self.min_density)
  }
}

/// Keeps points inside an axis-aligned box.
pub struct BoundsFilter {
  min: Vec3,
  max: Vec3,
  positions: Vec<Vec3>,
}

impl BoundsFilter {
  pub fn new(min: Vec3, max: Vec3) -> Self {
    Self {
      min,
      max,
      positions: Vec::new(),
    }
  }
}

impl PointFilter for BoundsFilter {
  fn bind(&mut self, points: &PointSet) -> Result<(), SetupError> {
    if points.is_empty() {
      return Err(SetupError::EmptyInput);
    }
    self.positions = points.iter().map(|p| p.position).collect();
    Ok(())
  }

  fn test(&self, index: usize) -> bool {
    let Some(pos) = self.positions.get(index) else {
      return false;
    };
    pos.cmpge(self.min).all() && pos.cmple(self.max).all()
  }
}
