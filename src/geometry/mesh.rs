//! Mesh (grid): points, edges and polygonal cells.
//!
//! Cells are ordered point-index sequences of arbitrary arity (≥ 3). Edges are
//! point-index pairs; meshes built from cells derive them deterministically in
//! first-appearance order, while meshes decoded from the native engine keep the
//! order the engine returned.
//!
//! Boundary tags live on the mesh as a sparse map over *mesh* edge indices.
//! [`Mesh::boundary_contour`] exposes the tagged boundary as a [`Contour`] so the
//! tag transfer algorithm can work on it, and [`Mesh::set_boundary_tags_from`]
//! writes results back.

use hashbrown::HashMap;

use super::contour::{Contour, ContourEdge};
use super::point::Point2;
use super::tags::{BoundaryTag, BoundaryTagMap};
use crate::bridge_error::BridgeError;
use crate::debug_invariants::DebugInvariants;

/// Polygonal 2D grid.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "MeshRepr")]
pub struct Mesh {
    points: Vec<Point2>,
    edges: Vec<[usize; 2]>,
    cells: Vec<Vec<usize>>,
    boundary_tags: BoundaryTagMap,
}

/// Unchecked serde image of a [`Mesh`].
#[derive(serde::Deserialize)]
struct MeshRepr {
    points: Vec<Point2>,
    edges: Vec<[usize; 2]>,
    cells: Vec<Vec<usize>>,
    #[serde(default)]
    boundary_tags: BoundaryTagMap,
}

impl TryFrom<MeshRepr> for Mesh {
    type Error = BridgeError;

    fn try_from(raw: MeshRepr) -> Result<Self, Self::Error> {
        let mut m = Self::from_engine_parts(raw.points, raw.edges, raw.cells)?;
        m.boundary_tags = raw.boundary_tags;
        Ok(m)
    }
}

/// The boundary of a mesh as a contour, with the contour edge → mesh edge map.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryContour {
    pub contour: Contour,
    pub mesh_edges: Vec<usize>,
}

#[inline]
fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

/// Derives the unique edges of `cells` in first-appearance order.
pub fn derive_edges(cells: &[Vec<usize>]) -> Vec<[usize; 2]> {
    let mut seen: HashMap<(usize, usize), usize> = HashMap::new();
    let mut edges = Vec::new();
    for cell in cells {
        let n = cell.len();
        for i in 0..n {
            let (a, b) = (cell[i], cell[(i + 1) % n]);
            seen.entry(edge_key(a, b)).or_insert_with(|| {
                edges.push([a, b]);
                edges.len() - 1
            });
        }
    }
    edges
}

impl Mesh {
    /// Builds a mesh from points and cells; edges are derived.
    ///
    /// # Example
    /// ```rust
    /// # fn main() -> Result<(), crossgrid_bridge::bridge_error::BridgeError> {
    /// use crossgrid_bridge::geometry::{Mesh, Point2};
    /// let m = Mesh::from_cells(
    ///     vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)],
    ///     vec![vec![0, 1, 2]],
    /// )?;
    /// assert_eq!(m.n_edges(), 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_cells(points: Vec<Point2>, cells: Vec<Vec<usize>>) -> Result<Self, BridgeError> {
        let edges = derive_edges(&cells);
        Self::from_engine_parts(points, edges, cells)
    }

    /// Builds a mesh from explicit parts.
    ///
    /// `edges` must be exactly the list [`derive_edges`] yields for `cells`
    /// (same order and direction), since the native engine rebuilds edges from
    /// the cells and nothing else would survive an encode/decode cycle.
    pub fn from_parts(
        points: Vec<Point2>,
        edges: Vec<[usize; 2]>,
        cells: Vec<Vec<usize>>,
    ) -> Result<Self, BridgeError> {
        let derived = derive_edges(&cells);
        if edges != derived {
            let edge = edges
                .iter()
                .zip(&derived)
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| edges.len().min(derived.len()));
            return Err(BridgeError::EdgeMismatch {
                edge,
                expected: derived.len(),
                actual: edges.len(),
            });
        }
        Self::from_engine_parts(points, edges, cells)
    }

    /// Builds a mesh keeping `edges` in the order given, validating indices only.
    pub(crate) fn from_engine_parts(
        points: Vec<Point2>,
        edges: Vec<[usize; 2]>,
        cells: Vec<Vec<usize>>,
    ) -> Result<Self, BridgeError> {
        let m = Self {
            points,
            edges,
            cells,
            boundary_tags: BoundaryTagMap::new(),
        };
        m.validate_invariants()?;
        Ok(m)
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Sum of cell arities.
    pub fn n_cell_indices(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn boundary_tags(&self) -> &BoundaryTagMap {
        &self.boundary_tags
    }

    /// Tags a mesh edge. Tags on interior edges are kept but never exported.
    pub fn set_boundary_tag(&mut self, edge: usize, tag: BoundaryTag) -> Option<BoundaryTag> {
        self.boundary_tags.insert(edge, tag)
    }

    /// Replaces all boundary tags.
    pub fn replace_boundary_tags(&mut self, tags: BoundaryTagMap) {
        self.boundary_tags = tags.without_defaults();
    }

    /// Cell points of `cell` as coordinates.
    pub fn cell_points(&self, cell: usize) -> Vec<Point2> {
        self.cells[cell].iter().map(|&i| self.points[i]).collect()
    }

    /// Mesh edges used by exactly one cell, oriented as in that cell, in edge order.
    pub fn boundary_edges(&self) -> Vec<(usize, [usize; 2])> {
        let index: HashMap<(usize, usize), usize> = self
            .edges
            .iter()
            .enumerate()
            .map(|(i, &[a, b])| (edge_key(a, b), i))
            .collect();
        let mut uses = vec![0usize; self.edges.len()];
        let mut orient = vec![[0usize; 2]; self.edges.len()];
        for cell in &self.cells {
            let n = cell.len();
            for i in 0..n {
                let (a, b) = (cell[i], cell[(i + 1) % n]);
                if let Some(&e) = index.get(&edge_key(a, b)) {
                    uses[e] += 1;
                    orient[e] = [a, b];
                }
            }
        }
        uses.iter()
            .enumerate()
            .filter(|&(_, &u)| u == 1)
            .map(|(e, _)| (e, orient[e]))
            .collect()
    }

    /// Extracts the boundary as a contour carrying this mesh's boundary tags.
    ///
    /// Contour points are the boundary points in order of first use; contour edge
    /// `i` corresponds to mesh edge `mesh_edges[i]`.
    pub fn boundary_contour(&self) -> BoundaryContour {
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut points = Vec::new();
        let mut edges = Vec::new();
        let mut mesh_edges = Vec::new();
        for (e, [a, b]) in self.boundary_edges() {
            let mut local = |p: usize| {
                *remap.entry(p).or_insert_with(|| {
                    points.push(self.points[p]);
                    points.len() - 1
                })
            };
            let (la, lb) = (local(a), local(b));
            edges.push(ContourEdge::new(la, lb, self.boundary_tags.tag_or_default(e)));
            mesh_edges.push(e);
        }
        BoundaryContour {
            contour: Contour::from_validated_parts(points, edges),
            mesh_edges,
        }
    }

    /// Copies the tags of `boundary` (as returned by [`Mesh::boundary_contour`])
    /// back onto the mesh edges, replacing all existing boundary tags. Default
    /// tags are not stored.
    pub fn set_boundary_tags_from(&mut self, boundary: &BoundaryContour) {
        let tags: BoundaryTagMap = boundary
            .contour
            .edges()
            .iter()
            .zip(&boundary.mesh_edges)
            .map(|(ce, &me)| (me, ce.tag))
            .collect();
        self.replace_boundary_tags(tags);
    }
}

impl DebugInvariants for Mesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Mesh");
    }

    fn validate_invariants(&self) -> Result<(), BridgeError> {
        if let Some(i) = self.points.iter().position(|p| !p.is_finite()) {
            return Err(BridgeError::NonFiniteCoordinate { point: i });
        }
        let len = self.points.len();
        for (i, &[a, b]) in self.edges.iter().enumerate() {
            for index in [a, b] {
                if index >= len {
                    return Err(BridgeError::DanglingIndex {
                        what: "edge",
                        item: i,
                        index,
                        len,
                    });
                }
            }
            if a == b {
                return Err(BridgeError::DegenerateEdge {
                    what: "mesh",
                    edge: i,
                    point: a,
                });
            }
        }
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.len() < 3 {
                return Err(BridgeError::DegenerateCell {
                    cell: i,
                    len: cell.len(),
                });
            }
            if let Some(&index) = cell.iter().find(|&&p| p >= len) {
                return Err(BridgeError::DanglingIndex {
                    what: "cell",
                    item: i,
                    index,
                    len,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_squares() -> Mesh {
        let points = [
            [0.0, 0.0],
            [1.0, 0.0],
            [2.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, 1.0],
        ]
        .into_iter()
        .map(Point2::from)
        .collect();
        Mesh::from_cells(points, vec![vec![0, 1, 4, 3], vec![1, 2, 5, 4]]).unwrap()
    }

    #[test]
    fn derived_edges_are_unique_and_ordered() {
        let m = two_squares();
        assert_eq!(m.n_edges(), 7);
        assert_eq!(m.edges()[0], [0, 1]);
        assert_eq!(m.edges()[4], [1, 2]);
    }

    #[test]
    fn shared_edge_is_not_boundary() {
        let m = two_squares();
        let boundary = m.boundary_edges();
        assert_eq!(boundary.len(), 6);
        // edge 1 is (1, 4), shared by both cells
        assert!(boundary.iter().all(|&(e, _)| e != 1));
    }

    #[test]
    fn boundary_contour_round_trips_tags() {
        let mut m = two_squares();
        m.set_boundary_tag(0, 3);
        let mut bc = m.boundary_contour();
        assert!(bc.contour.is_closed());
        assert_eq!(bc.contour.n_edges(), 6);
        assert_eq!(bc.contour.edge_tag(0), Some(3));
        bc.contour.add_edge_tags(&[(1, 8)].into_iter().collect());
        m.set_boundary_tags_from(&bc);
        assert_eq!(m.boundary_tags().get(0), Some(3));
        assert_eq!(m.boundary_tags().get(bc.mesh_edges[1]), Some(8));
    }

    #[test]
    fn degenerate_cell_rejected() {
        let err = Mesh::from_cells(vec![Point2::ORIGIN, Point2::new(1.0, 0.0)], vec![vec![0, 1]])
            .unwrap_err();
        assert_eq!(err, BridgeError::DegenerateCell { cell: 0, len: 2 });
    }

    #[test]
    fn dangling_cell_index_rejected() {
        let err = Mesh::from_cells(
            vec![Point2::ORIGIN, Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)],
            vec![vec![0, 1, 3]],
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::DanglingIndex { what: "cell", index: 3, .. }));
    }

    #[test]
    fn explicit_edges_must_match_the_cells() {
        let tri = vec![Point2::ORIGIN, Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        let err = Mesh::from_parts(tri.clone(), vec![[2, 0], [1, 2], [0, 1]], vec![vec![0, 1, 2]])
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::EdgeMismatch {
                edge: 0,
                expected: 3,
                actual: 3
            }
        );
        let err = Mesh::from_parts(tri.clone(), vec![[0, 1], [1, 2]], vec![vec![0, 1, 2]]).unwrap_err();
        assert!(matches!(err, BridgeError::EdgeMismatch { edge: 2, .. }));
        let m = Mesh::from_parts(tri, vec![[0, 1], [1, 2], [2, 0]], vec![vec![0, 1, 2]]).unwrap();
        assert_eq!(m.n_edges(), 3);
    }

    #[test]
    fn deserialization_validates() {
        let bad = r#"{ "points": [{ "x": 0.0, "y": 0.0 }], "edges": [], "cells": [[0, 1, 2]] }"#;
        let err = serde_json::from_str::<Mesh>(bad).unwrap_err();
        assert!(err.to_string().contains("references point 1"));

        let good = serde_json::to_string(&two_squares()).unwrap();
        assert_eq!(serde_json::from_str::<Mesh>(&good).unwrap(), two_squares());
    }
}
