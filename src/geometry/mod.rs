//! Geometry model exchanged across the native boundary.
//!
//! - [`Point2`]: plain `(x, y)` value with a `repr(C)` layout shared with the
//!   native point buffers.
//! - [`Mesh`]: points, edges and polygonal cells plus the boundary tags of its
//!   boundary edges.
//! - [`Contour`]: points and tagged edges, possibly open and multiply connected.
//! - [`BoundaryTagMap`]: sparse edge → tag assignment.

pub mod contour;
pub mod mesh;
pub mod point;
pub mod predicates;
pub mod tags;

pub use contour::{Contour, ContourEdge, SegmentTags};
pub use mesh::{BoundaryContour, Mesh};
pub use point::Point2;
pub use tags::{BoundaryTag, BoundaryTagMap, DEFAULT_TAG};
