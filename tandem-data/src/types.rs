//! Core sample types shared by the loaders and the training engine.

use glam::Vec3;

/// A colored sample point in 3D space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Position in dataset space.
    pub position: Vec3,
    /// RGB color (linear, 0-1 range).
    pub color: Vec3,
}

impl Point {
    /// Create a new point with position and color.
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Create a light grey point at the given position.
    pub fn grey(position: Vec3) -> Self {
        Self {
            position,
            color: Vec3::splat(0.8),
        }
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::grey(Vec3::ZERO)
    }
}

/// Axis-aligned bounds of a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// Compute the bounds of `points`, or `None` if there are none.
    pub fn of(points: &[Point]) -> Option<Self> {
        let first = points.first()?.position;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), p| (min.min(p.position), max.max(p.position)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Largest side length, never zero.
    pub fn extent(&self) -> f32 {
        (self.max - self.min).max_element().max(f32::EPSILON)
    }

    /// Map a position into the unit cube centred on the origin.
    pub fn normalize(&self, position: Vec3) -> Vec3 {
        (position - self.center()) / self.extent()
    }
}
