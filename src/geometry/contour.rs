//! Contour: points plus tagged edges.
//!
//! A contour may be open or closed and may consist of several disjoint loops.
//! Edge order and point order are significant: tag transfer and the native
//! engine both address edges by position.

use std::collections::BTreeSet;

use super::point::Point2;
use super::tags::{BoundaryTag, BoundaryTagMap, DEFAULT_TAG};
use crate::bridge_error::BridgeError;
use crate::debug_invariants::DebugInvariants;

/// One contour edge: two point indices and a boundary tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContourEdge {
    pub start: usize,
    pub end: usize,
    pub tag: BoundaryTag,
}

impl ContourEdge {
    pub const fn new(start: usize, end: usize, tag: BoundaryTag) -> Self {
        Self { start, end, tag }
    }
}

/// Tags for the segments of a polyline: one for all, or one per segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentTags {
    Uniform(BoundaryTag),
    PerSegment(Vec<BoundaryTag>),
}

impl From<BoundaryTag> for SegmentTags {
    fn from(tag: BoundaryTag) -> Self {
        SegmentTags::Uniform(tag)
    }
}

impl From<Vec<BoundaryTag>> for SegmentTags {
    fn from(tags: Vec<BoundaryTag>) -> Self {
        SegmentTags::PerSegment(tags)
    }
}

/// A (possibly multiply connected) set of polylines with per-edge tags.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "ContourRepr")]
pub struct Contour {
    points: Vec<Point2>,
    edges: Vec<ContourEdge>,
}

#[derive(serde::Deserialize)]
struct ContourRepr {
    points: Vec<Point2>,
    edges: Vec<ContourEdge>,
}

impl TryFrom<ContourRepr> for Contour {
    type Error = BridgeError;

    fn try_from(raw: ContourRepr) -> Result<Self, Self::Error> {
        Self::new(raw.points, raw.edges)
    }
}

impl Contour {
    /// Builds a contour from explicit points and edges, validating indices.
    pub fn new(points: Vec<Point2>, edges: Vec<ContourEdge>) -> Result<Self, BridgeError> {
        let c = Self { points, edges };
        c.validate_invariants()?;
        Ok(c)
    }

    /// Builds a singly connected contour from a point sequence.
    ///
    /// If the first and last points are equal the contour is closed: the last
    /// point is dropped and the closing edge reuses point `0`.
    ///
    /// # Example
    /// ```rust
    /// # fn main() -> Result<(), crossgrid_bridge::bridge_error::BridgeError> {
    /// use crossgrid_bridge::geometry::{Contour, Point2};
    /// let tri = Contour::from_polyline(
    ///     vec![[0.0, 0.0].into(), [1.0, 0.0].into(), [1.0, 1.0].into(), [0.0, 0.0].into()],
    ///     5,
    /// )?;
    /// assert_eq!(tri.n_points(), 3);
    /// assert_eq!(tri.n_edges(), 3);
    /// assert!(tri.is_closed());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_polyline(
        mut points: Vec<Point2>,
        tags: impl Into<SegmentTags>,
    ) -> Result<Self, BridgeError> {
        if points.len() < 2 {
            return Err(BridgeError::BufferLength {
                what: "polyline points",
                expected: 2,
                actual: points.len(),
            });
        }
        let n_segments = points.len() - 1;
        let closed = points.len() > 2 && points[0] == points[n_segments];
        if closed {
            points.pop();
        }
        let tags = match tags.into() {
            SegmentTags::Uniform(t) => vec![t; n_segments],
            SegmentTags::PerSegment(v) => {
                if v.len() != n_segments {
                    return Err(BridgeError::BufferLength {
                        what: "polyline segment tags",
                        expected: n_segments,
                        actual: v.len(),
                    });
                }
                v
            }
        };
        let n = points.len();
        let edges = tags
            .into_iter()
            .enumerate()
            .map(|(i, tag)| {
                let end = if closed { (i + 1) % n } else { i + 1 };
                ContourEdge::new(i, end, tag)
            })
            .collect();
        Self::new(points, edges)
    }

    /// Wraps parts whose indices were already checked by the caller.
    pub(crate) fn from_validated_parts(points: Vec<Point2>, edges: Vec<ContourEdge>) -> Self {
        let c = Self { points, edges };
        c.debug_assert_invariants();
        c
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn edges(&self) -> &[ContourEdge] {
        &self.edges
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_tag(&self, edge: usize) -> Option<BoundaryTag> {
        self.edges.get(edge).map(|e| e.tag)
    }

    /// Endpoint coordinates of `edge`.
    ///
    /// # Panics
    /// Panics if `edge` is out of range.
    pub fn edge_segment(&self, edge: usize) -> (Point2, Point2) {
        let e = self.edges[edge];
        (self.points[e.start], self.points[e.end])
    }

    pub fn segments(&self) -> impl Iterator<Item = (Point2, Point2)> + '_ {
        self.edges
            .iter()
            .map(|e| (self.points[e.start], self.points[e.end]))
    }

    /// Distinct tags used by any edge, including the default.
    pub fn tags(&self) -> BTreeSet<BoundaryTag> {
        self.edges.iter().map(|e| e.tag).collect()
    }

    pub fn has_non_default_tags(&self) -> bool {
        self.edges.iter().any(|e| e.tag != DEFAULT_TAG)
    }

    /// Current non-default tags as a sparse map.
    pub fn tag_map(&self) -> BoundaryTagMap {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.tag != DEFAULT_TAG)
            .map(|(i, e)| (i, e.tag))
            .collect()
    }

    /// Resets every edge to [`DEFAULT_TAG`].
    pub fn reset_tags(&mut self) {
        for e in &mut self.edges {
            e.tag = DEFAULT_TAG;
        }
    }

    /// Writes the entries of `tags` onto the listed edges; other edges keep their tag.
    ///
    /// Entries addressing edges beyond the contour are ignored.
    pub fn add_edge_tags(&mut self, tags: &BoundaryTagMap) {
        for (edge, tag) in tags.iter() {
            if let Some(e) = self.edges.get_mut(edge) {
                e.tag = tag;
            }
        }
    }

    /// Replaces all tags: listed edges get their entry, the rest the default.
    pub fn set_edge_tags(&mut self, tags: &BoundaryTagMap) {
        self.reset_tags();
        self.add_edge_tags(tags);
    }

    /// True when every point is shared by exactly two edges (all loops closed).
    pub fn is_closed(&self) -> bool {
        if self.edges.is_empty() {
            return false;
        }
        let mut degree = vec![0usize; self.points.len()];
        for e in &self.edges {
            degree[e.start] += 1;
            degree[e.end] += 1;
        }
        degree.iter().all(|&d| d == 2)
    }
}

impl DebugInvariants for Contour {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Contour");
    }

    fn validate_invariants(&self) -> Result<(), BridgeError> {
        if let Some(i) = self.points.iter().position(|p| !p.is_finite()) {
            return Err(BridgeError::NonFiniteCoordinate { point: i });
        }
        let len = self.points.len();
        for (i, e) in self.edges.iter().enumerate() {
            for index in [e.start, e.end] {
                if index >= len {
                    return Err(BridgeError::DanglingIndex {
                        what: "contour edge",
                        item: i,
                        index,
                        len,
                    });
                }
            }
            if e.start == e.end {
                return Err(BridgeError::DegenerateEdge {
                    what: "contour",
                    edge: i,
                    point: e.start,
                });
            }
        }
        Ok(())
    }
}
