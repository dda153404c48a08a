//! Geometry exchange codec.
//!
//! Converts [`Mesh`] and [`Contour`] values to and from the flat buffers the
//! native engine consumes, and wraps the handles the engine builds from them.
//!
//! Buffer layouts (all indices are native `int`, i.e. `i32`):
//! - mesh: `points[2N]` as `x0, y0, x1, y1, ...` and `cells[K]` as
//!   length-prefixed runs `count, idx * count, count, ...`
//! - contour, legacy form: `points[2N]`, `edges[2M]` as index pairs
//! - contour, tagged form: `points[2N]`, `edges[3M]` as `start, end, tag`
//!
//! Every buffer is sized from the input counts before it is filled.
//!
//! The `pack_*`/`unpack_*` functions are pure. The `encode_*` functions
//! additionally call a native constructor and return the buffer together with an
//! [`OwnedHandle`]. [`decode_mesh`] reads a grid back through the paired
//! info/free entry points.

pub mod wire;

use itertools::Itertools;

use crate::bridge_error::BridgeError;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{Contour, ContourEdge, Mesh, Point2};
use crate::native::handle::{
    ContourKind, ContourTreeKind, GridHandle, GridKind, HandleKind, OwnedHandle,
};
use crate::native::{NativeEngine, RawGridInfo};

/// Flat mesh buffers: points and length-prefixed cell runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshBuffer {
    pub points: Vec<f64>,
    pub n_cells: usize,
    pub cells: Vec<i32>,
}

/// Edge record width of a contour buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeForm {
    /// `start, end` pairs; tags are not transmitted.
    Plain,
    /// `start, end, tag` triples.
    Tagged,
}

impl EdgeForm {
    #[inline]
    pub const fn stride(self) -> usize {
        match self {
            EdgeForm::Plain => 2,
            EdgeForm::Tagged => 3,
        }
    }
}

/// Flat contour buffers.
#[derive(Clone, Debug, PartialEq)]
pub struct ContourBuffer {
    pub points: Vec<f64>,
    pub edges: Vec<i32>,
    pub form: EdgeForm,
}

impl ContourBuffer {
    pub fn n_edges(&self) -> usize {
        self.edges.len() / self.form.stride()
    }
}

/// Any exchange buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum ExchangeBuffer {
    Mesh(MeshBuffer),
    Contour(ContourBuffer),
}

impl From<MeshBuffer> for ExchangeBuffer {
    fn from(b: MeshBuffer) -> Self {
        ExchangeBuffer::Mesh(b)
    }
}

impl From<ContourBuffer> for ExchangeBuffer {
    fn from(b: ContourBuffer) -> Self {
        ExchangeBuffer::Contour(b)
    }
}

/// A buffer together with the native handle built from it.
#[derive(Debug)]
pub struct Encoded<'e, B, K: HandleKind> {
    pub buffer: B,
    pub handle: OwnedHandle<'e, K>,
}

#[inline]
fn to_native(value: usize, what: &'static str) -> Result<i32, BridgeError> {
    i32::try_from(value).map_err(|_| BridgeError::IndexOverflow { what, value })
}

#[inline]
pub(crate) fn from_native(value: i32, what: &'static str) -> Result<usize, BridgeError> {
    usize::try_from(value).map_err(|_| BridgeError::NegativeIndex {
        what,
        value: i64::from(value),
    })
}

fn flatten_points(points: &[Point2]) -> Vec<f64> {
    bytemuck::cast_slice::<Point2, f64>(points).to_vec()
}

/// Reads `x0, y0, x1, y1, ...` into points.
pub(crate) fn points_from_flat(flat: &[f64]) -> Result<Vec<Point2>, BridgeError> {
    if flat.len() % 2 != 0 {
        return Err(BridgeError::BufferLength {
            what: "points",
            expected: flat.len() + 1,
            actual: flat.len(),
        });
    }
    Ok(flat
        .iter()
        .tuples()
        .map(|(&x, &y)| Point2::new(x, y))
        .collect())
}

/// Reads exactly `n_cells` length-prefixed runs; the buffer must hold nothing else.
pub(crate) fn cells_from_runs(runs: &[i32], n_cells: usize) -> Result<Vec<Vec<usize>>, BridgeError> {
    let mut cells = Vec::with_capacity(n_cells);
    let mut pos = 0usize;
    for cell in 0..n_cells {
        let count = *runs.get(pos).ok_or(BridgeError::BufferLength {
            what: "cell runs",
            expected: pos + 1,
            actual: runs.len(),
        })?;
        let count = from_native(count, "cell size")?;
        if count < 3 {
            return Err(BridgeError::DegenerateCell { cell, len: count });
        }
        pos += 1;
        let run = runs.get(pos..pos + count).ok_or(BridgeError::BufferLength {
            what: "cell runs",
            expected: pos + count,
            actual: runs.len(),
        })?;
        cells.push(
            run.iter()
                .map(|&i| from_native(i, "cell point index"))
                .collect::<Result<Vec<_>, _>>()?,
        );
        pos += count;
    }
    if pos != runs.len() {
        return Err(BridgeError::BufferLength {
            what: "cell runs",
            expected: pos,
            actual: runs.len(),
        });
    }
    Ok(cells)
}

/// Builds the mesh exchange buffers.
pub fn pack_mesh(mesh: &Mesh) -> Result<MeshBuffer, BridgeError> {
    mesh.validate_invariants()?;
    to_native(mesh.n_points(), "point count")?;
    let n_cells = mesh.n_cells();
    to_native(n_cells, "cell count")?;

    let mut cells = Vec::with_capacity(mesh.n_cell_indices() + n_cells);
    for cell in mesh.cells() {
        cells.push(to_native(cell.len(), "cell size")?);
        for &p in cell {
            cells.push(to_native(p, "cell point index")?);
        }
    }
    Ok(MeshBuffer {
        points: flatten_points(mesh.points()),
        n_cells,
        cells,
    })
}

/// Inverse of [`pack_mesh`]; edges are derived from the cells.
pub fn unpack_mesh(buffer: &MeshBuffer) -> Result<Mesh, BridgeError> {
    let points = points_from_flat(&buffer.points)?;
    let cells = cells_from_runs(&buffer.cells, buffer.n_cells)?;
    Mesh::from_cells(points, cells)
}

/// Builds the contour exchange buffers in the requested form.
pub fn pack_contour(contour: &Contour, form: EdgeForm) -> Result<ContourBuffer, BridgeError> {
    contour.validate_invariants()?;
    to_native(contour.n_points(), "point count")?;
    let mut edges = Vec::with_capacity(contour.n_edges() * form.stride());
    for e in contour.edges() {
        edges.push(to_native(e.start, "contour point index")?);
        edges.push(to_native(e.end, "contour point index")?);
        if form == EdgeForm::Tagged {
            edges.push(e.tag);
        }
    }
    Ok(ContourBuffer {
        points: flatten_points(contour.points()),
        edges,
        form,
    })
}

/// Inverse of [`pack_contour`]. Plain buffers decode with default tags.
pub fn unpack_contour(buffer: &ContourBuffer) -> Result<Contour, BridgeError> {
    let points = points_from_flat(&buffer.points)?;
    let stride = buffer.form.stride();
    if buffer.edges.len() % stride != 0 {
        return Err(BridgeError::BufferLength {
            what: "contour edges",
            expected: buffer.edges.len().next_multiple_of(stride),
            actual: buffer.edges.len(),
        });
    }
    let edges = buffer
        .edges
        .chunks_exact(stride)
        .map(|rec| {
            let start = from_native(rec[0], "contour point index")?;
            let end = from_native(rec[1], "contour point index")?;
            let tag = if stride == 3 { rec[2] } else { 0 };
            Ok(ContourEdge::new(start, end, tag))
        })
        .collect::<Result<Vec<_>, BridgeError>>()?;
    Contour::new(points, edges)
}

/// Packs `mesh` and builds a native grid from it (`grid_construct`).
pub fn encode_mesh<'e>(
    engine: &'e dyn NativeEngine,
    mesh: &Mesh,
) -> Result<Encoded<'e, MeshBuffer, GridKind>, BridgeError> {
    let buffer = pack_mesh(mesh)?;
    let raw = engine
        .grid_construct(&buffer.points, buffer.n_cells, &buffer.cells)
        .ok_or(BridgeError::NativeConstruct {
            entry: "grid_construct",
        })?;
    // SAFETY: freshly constructed by `engine` as a grid; nobody else holds it.
    let handle = unsafe { OwnedHandle::from_raw(engine, raw) };
    Ok(Encoded { buffer, handle })
}

/// Packs `contour` in tagged form and builds a native contour tree.
pub fn encode_contour<'e>(
    engine: &'e dyn NativeEngine,
    contour: &Contour,
) -> Result<Encoded<'e, ContourBuffer, ContourTreeKind>, BridgeError> {
    let buffer = pack_contour(contour, EdgeForm::Tagged)?;
    let raw = engine
        .contour_tree_construct(&buffer.points, &buffer.edges)
        .ok_or(BridgeError::NativeConstruct {
            entry: "create_contour_tree",
        })?;
    // SAFETY: freshly constructed by `engine` as a contour tree.
    let handle = unsafe { OwnedHandle::from_raw(engine, raw) };
    Ok(Encoded { buffer, handle })
}

/// Packs `contour` in legacy form and builds a crossing-library contour.
pub fn encode_contour_legacy<'e>(
    engine: &'e dyn NativeEngine,
    contour: &Contour,
) -> Result<Encoded<'e, ContourBuffer, ContourKind>, BridgeError> {
    let buffer = pack_contour(contour, EdgeForm::Plain)?;
    let raw = engine
        .contour_construct(&buffer.points, &buffer.edges)
        .ok_or(BridgeError::NativeConstruct {
            entry: "contour_construct",
        })?;
    // SAFETY: freshly constructed by `engine` as a legacy contour.
    let handle = unsafe { OwnedHandle::from_raw(engine, raw) };
    Ok(Encoded { buffer, handle })
}

/// Frees native info buffers when dropped, so every exit path pairs info with free.
struct InfoGuard<'e> {
    engine: &'e dyn NativeEngine,
    info: Option<RawGridInfo>,
}

impl Drop for InfoGuard<'_> {
    fn drop(&mut self) {
        if let Some(info) = self.info.take() {
            log::trace!("grid_free_edges_info");
            // SAFETY: `info` came from `grid_info` on this engine and is freed only here.
            unsafe { self.engine.grid_free_info(info) };
        }
    }
}

/// Copies `len` values from a native buffer.
///
/// # Safety
/// `ptr` must be valid for `len` reads when `len > 0`.
unsafe fn copy_native<T: Copy>(ptr: *const T, len: usize, what: &'static str) -> Result<Vec<T>, BridgeError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(BridgeError::MalformedBuffer(format!("{what} buffer is null")));
    }
    // SAFETY: guaranteed by the caller.
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

/// Reads a native grid back into a [`Mesh`].
///
/// Point, edge and cell order are kept exactly as the engine reports them. The
/// info buffers are freed before returning, on success and on error alike. The
/// grid handle itself is not released.
pub fn decode_mesh(engine: &dyn NativeEngine, grid: &GridHandle<'_>) -> Result<Mesh, BridgeError> {
    let info = engine
        .grid_info(grid.raw())
        .ok_or(BridgeError::NativeConstruct {
            entry: "grid_get_edges_info",
        })?;
    let (points_ptr, edges_ptr, sizes_ptr, cells_ptr) =
        (info.points, info.edges, info.cell_sizes, info.cell_points);
    let counts = (info.n_points, info.n_edges, info.n_cells);
    let guard = InfoGuard {
        engine,
        info: Some(info),
    };

    let n_points = from_native(counts.0, "point count")?;
    let n_edges = from_native(counts.1, "edge count")?;
    let n_cells = from_native(counts.2, "cell count")?;

    // SAFETY: the engine guarantees the buffer lengths implied by the counts
    // until `grid_free_info`, which the guard calls after these copies.
    let (flat, raw_edges, sizes) = unsafe {
        (
            copy_native(points_ptr, 2 * n_points, "points")?,
            copy_native(edges_ptr, 2 * n_edges, "edges")?,
            copy_native(sizes_ptr, n_cells, "cell sizes")?,
        )
    };
    let mut total = 0usize;
    for (cell, &s) in sizes.iter().enumerate() {
        let s = from_native(s, "cell size")?;
        if s < 3 {
            return Err(BridgeError::DegenerateCell { cell, len: s });
        }
        total += s;
    }
    // SAFETY: as above; `total` is the sum of the reported cell sizes.
    let cell_points = unsafe { copy_native(cells_ptr, total, "cell points")? };
    drop(guard);

    let points = points_from_flat(&flat)?;
    let edges = raw_edges
        .iter()
        .tuples()
        .map(|(&a, &b)| Ok([from_native(a, "edge point index")?, from_native(b, "edge point index")?]))
        .collect::<Result<Vec<_>, BridgeError>>()?;
    let mut cells = Vec::with_capacity(n_cells);
    let mut pos = 0usize;
    for &s in &sizes {
        let s = s as usize;
        cells.push(
            cell_points[pos..pos + s]
                .iter()
                .map(|&i| from_native(i, "cell point index"))
                .collect::<Result<Vec<_>, _>>()?,
        );
        pos += s;
    }
    let mesh = Mesh::from_engine_parts(points, edges, cells)?;
    log::debug!(
        "decoded grid: {} points, {} edges, {} cells",
        mesh.n_points(),
        mesh.n_edges(),
        mesh.n_cells()
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::reference::ReferenceEngine;

    fn quad_and_tri() -> Mesh {
        Mesh::from_cells(
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
                Point2::new(2.0, 0.5),
            ],
            vec![vec![0, 1, 2, 3], vec![1, 4, 2]],
        )
        .unwrap()
    }

    #[test]
    fn cell_runs_are_length_prefixed() {
        let buf = pack_mesh(&quad_and_tri()).unwrap();
        assert_eq!(buf.n_cells, 2);
        assert_eq!(buf.cells, vec![4, 0, 1, 2, 3, 3, 1, 4, 2]);
        assert_eq!(buf.points.len(), 10);
        assert_eq!(&buf.points[8..], &[2.0, 0.5]);
    }

    #[test]
    fn pack_unpack_mesh() {
        let m = quad_and_tri();
        let back = unpack_mesh(&pack_mesh(&m).unwrap()).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn truncated_run_rejected() {
        let err = cells_from_runs(&[4, 0, 1, 2], 1).unwrap_err();
        assert!(matches!(err, BridgeError::BufferLength { expected: 5, actual: 4, .. }));
    }

    #[test]
    fn trailing_entries_rejected() {
        let err = cells_from_runs(&[3, 0, 1, 2, 7], 1).unwrap_err();
        assert!(matches!(err, BridgeError::BufferLength { expected: 4, actual: 5, .. }));
    }

    #[test]
    fn negative_index_rejected() {
        let err = cells_from_runs(&[3, 0, -1, 2], 1).unwrap_err();
        assert!(matches!(err, BridgeError::NegativeIndex { value: -1, .. }));
    }

    #[test]
    fn contour_forms() {
        let c = Contour::from_polyline(
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 0.0),
            ],
            vec![1, 2, 3],
        )
        .unwrap();
        let tagged = pack_contour(&c, EdgeForm::Tagged).unwrap();
        assert_eq!(tagged.edges, vec![0, 1, 1, 1, 2, 2, 2, 0, 3]);
        assert_eq!(unpack_contour(&tagged).unwrap(), c);

        let plain = pack_contour(&c, EdgeForm::Plain).unwrap();
        assert_eq!(plain.edges, vec![0, 1, 1, 2, 2, 0]);
        assert_eq!(plain.n_edges(), 3);
        let untagged = unpack_contour(&plain).unwrap();
        assert!(!untagged.has_non_default_tags());
    }

    #[test]
    fn odd_edge_buffer_rejected() {
        let buf = ContourBuffer {
            points: vec![0.0, 0.0, 1.0, 0.0],
            edges: vec![0, 1, 5, 1],
            form: EdgeForm::Tagged,
        };
        assert!(matches!(
            unpack_contour(&buf),
            Err(BridgeError::BufferLength { expected: 6, actual: 4, .. })
        ));
    }

    #[test]
    fn encode_decode_through_engine() {
        let engine = ReferenceEngine::new();
        let m = quad_and_tri();
        let enc = encode_mesh(&engine, &m).unwrap();
        let back = decode_mesh(&engine, &enc.handle).unwrap();
        assert_eq!(back.points(), m.points());
        assert_eq!(back.cells(), m.cells());
        assert_eq!(back.edges(), m.edges());
        let ledger = engine.ledger();
        assert_eq!(ledger.infos.acquired, 1);
        assert_eq!(ledger.infos.released, 1);
        drop(enc);
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn explicit_edges_survive_the_engine() {
        let engine = ReferenceEngine::new();
        let pts = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        let m = Mesh::from_parts(pts, vec![[0, 1], [1, 2], [2, 0]], vec![vec![0, 1, 2]]).unwrap();
        let enc = encode_mesh(&engine, &m).unwrap();
        assert_eq!(decode_mesh(&engine, &enc.handle).unwrap(), m);
    }

    #[test]
    fn failed_constructor_allocates_nothing() {
        let engine = ReferenceEngine::new();
        engine.fail_operation("grid_construct");
        let err = encode_mesh(&engine, &quad_and_tri()).unwrap_err();
        assert_eq!(err, BridgeError::NativeConstruct { entry: "grid_construct" });
        assert_eq!(engine.ledger().acquired(), 0);
    }
}
