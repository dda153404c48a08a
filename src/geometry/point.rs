//! `Point2`: an immutable 2D coordinate pair.
//!
//! The type is `repr(C)` and [`bytemuck::Pod`], so a `&[Point2]` can be viewed
//! as the flat `x0, y0, x1, y1, ...` real buffer the native engine expects
//! without copying.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// A point in the plane.
///
/// Equality is exact coordinate equality; geometric matching uses
/// [`Point2::approx_eq`] with an explicit tolerance.
#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Pod, Zeroable, serde::Serialize, serde::Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const ORIGIN: Point2 = Point2 { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn dist_sq(self, other: Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn dist(self, other: Point2) -> f64 {
        self.dist_sq(other).sqrt()
    }

    /// True if both points lie within `eps` of each other.
    #[inline]
    pub fn approx_eq(self, other: Point2, eps: f64) -> bool {
        self.dist_sq(other) <= eps * eps
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    #[inline]
    pub(crate) fn sub(self, other: Point2) -> Point2 {
        Point2::new(self.x - other.x, self.y - other.y)
    }

    #[inline]
    pub(crate) fn add_scaled(self, dir: Point2, s: f64) -> Point2 {
        Point2::new(self.x + dir.x * s, self.y + dir.y * s)
    }

    #[inline]
    pub(crate) fn dot(self, other: Point2) -> f64 {
        self.x * other.x + self.y * other.y
    }
}

impl From<[f64; 2]> for Point2 {
    fn from(p: [f64; 2]) -> Self {
        Point2::new(p[0], p[1])
    }
}

impl From<(f64, f64)> for Point2 {
    fn from(p: (f64, f64)) -> Self {
        Point2::new(p.0, p.1)
    }
}

impl fmt::Debug for Point2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
