//! In-process engine with an allocation ledger.
//!
//! `ReferenceEngine` implements the full [`NativeEngine`] contract without
//! linking the native library. Every handle and info buffer it hands out is
//! recorded, so tests can assert that each acquisition was paired with exactly
//! one release. Releasing an unknown handle, or releasing it through the wrong
//! entry point, panics.
//!
//! The geometric operations are simple stand-ins for the native algorithms:
//! - `cross_grids` drops the base cells whose centroid lies inside the overlay
//!   or within the buffer distance of its boundary, then merges the two cell
//!   sets on coincident points. With `fix_boundary`, overlay cells outside the
//!   base are dropped too. Gaps are never re-meshed.
//! - `grid_exclude_contour` keeps the cells whose centroid lies on the kept
//!   side of the contour.
//! - `boundary_layer_grid` walks each source contour from the vertex nearest
//!   `start` to the vertex nearest `end` and extrudes quads along averaged left
//!   normals at the partition offsets.
//!
//! Each operation runs in stages. The callback is polled before every stage,
//! and an optional delay per stage makes the calls long enough to cancel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{NativeCallback, NativeEngine, NativeKind, NativeLayerOption, Progress, RawGridInfo, RawHandle};
use crate::codec::{cells_from_runs, from_native, points_from_flat};
use crate::geometry::predicates::{point_in_region, point_segment_distance, vertex_centroid};
use crate::geometry::{Contour, ContourEdge, Mesh, Point2};

/// Coordinates closer than this are merged when assembling result grids.
const MERGE_QUANTUM: f64 = 1e-9;

/// Acquire/release counts of one allocation kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KindCount {
    pub acquired: usize,
    pub released: usize,
}

impl KindCount {
    pub fn live(&self) -> usize {
        self.acquired - self.released
    }
}

/// Snapshot of the engine's allocation ledger.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    pub grids: KindCount,
    pub contours: KindCount,
    pub contour_trees: KindCount,
    pub infos: KindCount,
}

impl Ledger {
    fn all(&self) -> [KindCount; 4] {
        [self.grids, self.contours, self.contour_trees, self.infos]
    }

    pub fn acquired(&self) -> usize {
        self.all().iter().map(|k| k.acquired).sum()
    }

    pub fn released(&self) -> usize {
        self.all().iter().map(|k| k.released).sum()
    }

    pub fn live(&self) -> usize {
        self.acquired() - self.released()
    }

    /// True when every acquisition has been released.
    pub fn is_balanced(&self) -> bool {
        self.live() == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Grid = 0,
    Contour = 1,
    ContourTree = 2,
    Info = 3,
}

impl From<NativeKind> for Slot {
    fn from(kind: NativeKind) -> Self {
        match kind {
            NativeKind::Grid => Slot::Grid,
            NativeKind::Contour => Slot::Contour,
            NativeKind::ContourTree => Slot::ContourTree,
        }
    }
}

struct InfoBuffers {
    points: Vec<f64>,
    edges: Vec<i32>,
    cell_sizes: Vec<i32>,
    cell_points: Vec<i32>,
}

enum Allocation {
    Grid(Mesh),
    Contour(Contour),
    ContourTree(Contour),
    // held only so the pointers handed out in `RawGridInfo` stay valid
    Info { _buffers: InfoBuffers },
}

impl Allocation {
    fn slot(&self) -> Slot {
        match self {
            Allocation::Grid(_) => Slot::Grid,
            Allocation::Contour(_) => Slot::Contour,
            Allocation::ContourTree(_) => Slot::ContourTree,
            Allocation::Info { .. } => Slot::Info,
        }
    }
}

/// In-process [`NativeEngine`] backend.
pub struct ReferenceEngine {
    next_id: AtomicUsize,
    live: DashMap<usize, Allocation>,
    acquired: [AtomicUsize; 4],
    released: [AtomicUsize; 4],
    stage_delay: Duration,
    /// Entry point → successful calls left before it starts failing.
    failing: Mutex<HashMap<&'static str, usize>>,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            live: DashMap::new(),
            acquired: Default::default(),
            released: Default::default(),
            stage_delay: Duration::ZERO,
            failing: Mutex::new(HashMap::new()),
        }
    }

    /// Sleeps for `delay` before every stage of a long-running operation.
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    /// Makes the named entry point return the null sentinel from now on.
    ///
    /// Names: `grid_construct`, `contour_construct`, `create_contour_tree`,
    /// `grid_get_edges_info`, `cross_grids`, `grid_exclude_contour`,
    /// `boundary_layer_grid`.
    pub fn fail_operation(&self, name: &'static str) {
        self.fail_operation_after(name, 0);
    }

    /// Like [`ReferenceEngine::fail_operation`], but lets `calls` more calls succeed first.
    pub fn fail_operation_after(&self, name: &'static str, calls: usize) {
        self.failing.lock().insert(name, calls);
    }

    pub fn ledger(&self) -> Ledger {
        let count = |slot: Slot| KindCount {
            acquired: self.acquired[slot as usize].load(Ordering::SeqCst),
            released: self.released[slot as usize].load(Ordering::SeqCst),
        };
        Ledger {
            grids: count(Slot::Grid),
            contours: count(Slot::Contour),
            contour_trees: count(Slot::ContourTree),
            infos: count(Slot::Info),
        }
    }

    fn fails(&self, name: &str) -> bool {
        let failing = match self.failing.lock().get_mut(name) {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if failing {
            log::trace!("{name}: injected failure");
        }
        failing
    }

    fn allocate(&self, alloc: Allocation) -> RawHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.acquired[alloc.slot() as usize].fetch_add(1, Ordering::SeqCst);
        self.live.insert(id, alloc);
        // ids start at 1 and only grow
        RawHandle::new(id).unwrap_or_else(|| unreachable!())
    }

    fn free(&self, slot: Slot, id: usize) {
        let Some((_, alloc)) = self.live.remove(&id) else {
            panic!("release of unknown handle {id:#x} as {slot:?}");
        };
        assert_eq!(
            alloc.slot(),
            slot,
            "handle {id:#x} released through the wrong entry point"
        );
        self.released[slot as usize].fetch_add(1, Ordering::SeqCst);
    }

    fn grid(&self, h: RawHandle) -> Mesh {
        match self.live.get(&h.get()).as_deref() {
            Some(Allocation::Grid(m)) => m.clone(),
            _ => panic!("{:#x} is not a live grid handle", h.get()),
        }
    }

    fn contour(&self, h: RawHandle, slot: Slot) -> Contour {
        match (self.live.get(&h.get()).as_deref(), slot) {
            (Some(Allocation::Contour(c)), Slot::Contour) => c.clone(),
            (Some(Allocation::ContourTree(c)), Slot::ContourTree) => c.clone(),
            _ => panic!("{:#x} is not a live {slot:?} handle", h.get()),
        }
    }

    /// Polls the callback once per stage; false when the operation must stop.
    fn run_stages(&self, operation: &str, stages: &[&str], callback: &mut dyn NativeCallback) -> bool {
        let n = stages.len() as f64;
        for (i, step) in stages.iter().enumerate() {
            if !self.stage_delay.is_zero() {
                thread::sleep(self.stage_delay);
            }
            let stop = callback.report(Progress {
                stage: operation.to_string(),
                step: (*step).to_string(),
                fraction: i as f64 / n,
                step_fraction: 0.0,
            });
            if stop {
                log::trace!("{operation}: stop requested at {step:?}");
                return false;
            }
        }
        !self.fails(operation)
    }

    fn finish(&self, mesh: Option<Mesh>) -> Option<RawHandle> {
        mesh.map(|m| self.allocate(Allocation::Grid(m)))
    }
}

fn contour_from_records(points: &[f64], edges: &[i32], stride: usize) -> Option<Contour> {
    if edges.len() % stride != 0 {
        return None;
    }
    let points = points_from_flat(points).ok()?;
    let edges = edges
        .chunks_exact(stride)
        .map(|r| {
            let tag = if stride == 3 { r[2] } else { 0 };
            Some(ContourEdge::new(
                from_native(r[0], "contour point index").ok()?,
                from_native(r[1], "contour point index").ok()?,
                tag,
            ))
        })
        .collect::<Option<Vec<_>>>()?;
    Contour::new(points, edges).ok()
}

/// Builds a grid cell by cell, merging coincident points.
#[derive(Default)]
struct Assembler {
    points: Vec<Point2>,
    index: HashMap<(i64, i64), usize>,
    cells: Vec<Vec<usize>>,
}

impl Assembler {
    fn point(&mut self, p: Point2) -> usize {
        let key = (
            (p.x / MERGE_QUANTUM).round() as i64,
            (p.y / MERGE_QUANTUM).round() as i64,
        );
        *self.index.entry(key).or_insert_with(|| {
            self.points.push(p);
            self.points.len() - 1
        })
    }

    fn cell<I: IntoIterator<Item = Point2>>(&mut self, pts: I) {
        let mut cell: Vec<usize> = Vec::new();
        for p in pts {
            let i = self.point(p);
            if cell.last() != Some(&i) {
                cell.push(i);
            }
        }
        if cell.len() > 1 && cell.first() == cell.last() {
            cell.pop();
        }
        if cell.len() >= 3 {
            self.cells.push(cell);
        }
    }

    fn finish(self) -> Option<Mesh> {
        Mesh::from_cells(self.points, self.cells).ok()
    }
}

fn boundary_segments(mesh: &Mesh) -> Vec<(Point2, Point2)> {
    mesh.boundary_contour().contour.segments().collect()
}

fn near_boundary(p: Point2, segments: &[(Point2, Point2)], distance: f64) -> bool {
    distance > 0.0
        && segments
            .iter()
            .any(|&(a, b)| point_segment_distance(p, a, b) < distance)
}

/// Vertex chain of `contour` from the vertex nearest `start` to the one nearest `end`.
fn layer_chain(contour: &Contour, start: Point2, end: Point2) -> Option<Vec<Point2>> {
    let nearest = |q: Point2| {
        (0..contour.n_points()).min_by(|&a, &b| {
            contour.points()[a]
                .dist_sq(q)
                .total_cmp(&contour.points()[b].dist_sq(q))
        })
    };
    let (first, last) = (nearest(start)?, nearest(end)?);
    let next: HashMap<usize, usize> = contour
        .edges()
        .iter()
        .map(|e| (e.start, e.end))
        .collect();
    let mut chain = vec![first];
    let mut cur = first;
    while let Some(&n) = next.get(&cur) {
        chain.push(n);
        if n == last || n == first || chain.len() > contour.n_points() {
            break;
        }
        cur = n;
    }
    if chain.len() < 2 {
        return None;
    }
    Some(chain.into_iter().map(|i| contour.points()[i]).collect())
}

fn left_normal(a: Point2, b: Point2) -> Point2 {
    let d = b.sub(a);
    let len = d.dot(d).sqrt();
    if len == 0.0 {
        Point2::ORIGIN
    } else {
        Point2::new(-d.y / len, d.x / len)
    }
}

fn extrude(asm: &mut Assembler, chain: &[Point2], offsets: &[f64]) {
    let closed = chain.len() > 2 && chain.first() == chain.last();
    let n = chain.len();
    let normals: Vec<Point2> = (0..n)
        .map(|j| {
            let before = if j > 0 {
                Some(left_normal(chain[j - 1], chain[j]))
            } else if closed {
                Some(left_normal(chain[n - 2], chain[0]))
            } else {
                None
            };
            let after = if j + 1 < n {
                Some(left_normal(chain[j], chain[j + 1]))
            } else if closed {
                Some(left_normal(chain[0], chain[1]))
            } else {
                None
            };
            let sum = match (before, after) {
                (Some(a), Some(b)) => Point2::new(a.x + b.x, a.y + b.y),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => Point2::ORIGIN,
            };
            let len = sum.dot(sum).sqrt();
            if len > 0.0 {
                Point2::new(sum.x / len, sum.y / len)
            } else {
                after.or(before).unwrap_or(Point2::ORIGIN)
            }
        })
        .collect();
    for j in 0..n - 1 {
        for l in 0..offsets.len() - 1 {
            asm.cell([
                chain[j].add_scaled(normals[j], offsets[l]),
                chain[j + 1].add_scaled(normals[j + 1], offsets[l]),
                chain[j + 1].add_scaled(normals[j + 1], offsets[l + 1]),
                chain[j].add_scaled(normals[j], offsets[l + 1]),
            ]);
        }
    }
}

impl NativeEngine for ReferenceEngine {
    fn grid_construct(&self, points: &[f64], n_cells: usize, cells: &[i32]) -> Option<RawHandle> {
        if self.fails("grid_construct") {
            return None;
        }
        let points = points_from_flat(points).ok()?;
        let cells = cells_from_runs(cells, n_cells).ok()?;
        let mesh = Mesh::from_cells(points, cells).ok()?;
        Some(self.allocate(Allocation::Grid(mesh)))
    }

    fn contour_construct(&self, points: &[f64], edges: &[i32]) -> Option<RawHandle> {
        if self.fails("contour_construct") {
            return None;
        }
        let c = contour_from_records(points, edges, 2)?;
        Some(self.allocate(Allocation::Contour(c)))
    }

    fn contour_tree_construct(&self, points: &[f64], edges: &[i32]) -> Option<RawHandle> {
        if self.fails("create_contour_tree") {
            return None;
        }
        let c = contour_from_records(points, edges, 3)?;
        Some(self.allocate(Allocation::ContourTree(c)))
    }

    fn grid_info(&self, grid: RawHandle) -> Option<RawGridInfo> {
        if self.fails("grid_get_edges_info") {
            return None;
        }
        let mesh = self.grid(grid);
        let as_int = |v: usize| i32::try_from(v).ok();
        let bufs = InfoBuffers {
            points: bytemuck::cast_slice::<Point2, f64>(mesh.points()).to_vec(),
            edges: mesh
                .edges()
                .iter()
                .flat_map(|e| e.iter().copied())
                .map(as_int)
                .collect::<Option<_>>()?,
            cell_sizes: mesh
                .cells()
                .iter()
                .map(|c| as_int(c.len()))
                .collect::<Option<_>>()?,
            cell_points: mesh
                .cells()
                .iter()
                .flatten()
                .map(|&p| as_int(p))
                .collect::<Option<_>>()?,
        };
        let info = RawGridInfo {
            n_points: as_int(mesh.n_points())?,
            n_edges: as_int(mesh.n_edges())?,
            n_cells: as_int(mesh.n_cells())?,
            points: bufs.points.as_ptr(),
            edges: bufs.edges.as_ptr(),
            cell_sizes: bufs.cell_sizes.as_ptr(),
            cell_points: bufs.cell_points.as_ptr(),
            cookie: 0,
        };
        // moving the vectors into the map keeps their heap buffers in place
        let cookie = self.allocate(Allocation::Info { _buffers: bufs }).get();
        Some(RawGridInfo { cookie, ..info })
    }

    unsafe fn grid_free_info(&self, info: RawGridInfo) {
        self.free(Slot::Info, info.cookie);
    }

    fn release(&self, kind: NativeKind, handle: RawHandle) {
        self.free(Slot::from(kind), handle.get());
    }

    fn cross_grids(
        &self,
        base: RawHandle,
        overlay: RawHandle,
        buffer_distance: f64,
        fix_boundary: bool,
        _fill_holes: bool,
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle> {
        let (base, overlay) = (self.grid(base), self.grid(overlay));
        if !self.run_stages(
            "cross_grids",
            &["boundary extraction", "overlay", "assembly"],
            callback,
        ) {
            return None;
        }
        let over_bnd = boundary_segments(&overlay);
        let base_bnd = boundary_segments(&base);
        let mut asm = Assembler::default();
        for c in 0..base.n_cells() {
            let pts = base.cell_points(c);
            let probe = vertex_centroid(&pts);
            if point_in_region(probe, over_bnd.iter().copied())
                || near_boundary(probe, &over_bnd, buffer_distance)
            {
                continue;
            }
            asm.cell(pts);
        }
        for c in 0..overlay.n_cells() {
            let pts = overlay.cell_points(c);
            if fix_boundary && !point_in_region(vertex_centroid(&pts), base_bnd.iter().copied()) {
                continue;
            }
            asm.cell(pts);
        }
        self.finish(asm.finish())
    }

    fn grid_exclude_contour(
        &self,
        grid: RawHandle,
        contour: RawHandle,
        inner: bool,
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle> {
        let mesh = self.grid(grid);
        let cont = self.contour(contour, Slot::Contour);
        if !self.run_stages("grid_exclude_contour", &["classification", "assembly"], callback) {
            return None;
        }
        let mut asm = Assembler::default();
        for c in 0..mesh.n_cells() {
            let pts = mesh.cell_points(c);
            let inside = point_in_region(vertex_centroid(&pts), cont.segments());
            if inside != inner {
                asm.cell(pts);
            }
        }
        self.finish(asm.finish())
    }

    fn boundary_layer_grid(
        &self,
        options: &[NativeLayerOption<'_>],
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle> {
        let sources: Vec<Contour> = options
            .iter()
            .map(|o| self.contour(o.contour, Slot::ContourTree))
            .collect();
        if !self.run_stages(
            "boundary_layer_grid",
            &["source paths", "extrusion", "assembly"],
            callback,
        ) {
            return None;
        }
        if options.is_empty() {
            return None;
        }
        let mut asm = Assembler::default();
        for (opt, src) in options.iter().zip(&sources) {
            if opt.partition.len() < 2 {
                return None;
            }
            let chain = layer_chain(src, opt.start, opt.end)?;
            extrude(&mut asm, &chain, opt.partition);
        }
        self.finish(asm.finish())
    }
}
