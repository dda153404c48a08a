//! The native engine call contract.
//!
//! The meshing engine itself is a black box. This module fixes the calls the
//! bridge makes into it, in the shape of the crossing library's C entry points:
//! constructors that turn flat exchange buffers into opaque handles, an info/free
//! pair that exposes a grid's native-allocated output buffers, one release entry
//! point per handle kind, and the long-running operations that take a progress
//! callback and return either a grid handle or the null sentinel.
//!
//! Backends:
//! - [`reference::ReferenceEngine`]: in-process engine with an allocation ledger,
//!   used by tests and as a functional stand-in.
//! - `crossgrid::CrossgridEngine` (feature `crossgrid`): FFI bindings to the
//!   native library.
//!
//! Handles returned by this trait are raw. Callers are expected to wrap them
//! immediately in the owned types of [`handle`], which pair every acquisition
//! with exactly one release.

pub mod handle;
pub mod reference;

#[cfg(feature = "crossgrid")]
pub mod crossgrid;

use std::ffi::c_void;
use std::num::NonZeroUsize;

use crate::geometry::Point2;

/// Opaque reference into engine-owned memory.
///
/// Wraps a non-zero address so that `Option<RawHandle>` models the native
/// "pointer or null" return exactly; `0` is reserved as the null sentinel.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    /// Returns `None` for the null sentinel.
    #[inline]
    pub fn new(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(RawHandle)
    }

    #[inline]
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        Self::new(ptr as usize)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }
}

/// What a handle refers to; selects the matching release entry point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NativeKind {
    /// Grid built by `grid_construct` or returned by an operation (`grid_free`).
    Grid,
    /// Crossing-library contour in the legacy untagged form (`cont_free`).
    Contour,
    /// Tagged contour tree (`free_contour_tree`).
    ContourTree,
}

impl NativeKind {
    /// Name of the native release entry point for this kind.
    pub const fn free_entry(self) -> &'static str {
        match self {
            NativeKind::Grid => "grid_free",
            NativeKind::Contour => "cont_free",
            NativeKind::ContourTree => "free_contour_tree",
        }
    }
}

/// Native-allocated output buffers describing a grid.
///
/// Produced by [`NativeEngine::grid_info`] and valid until passed to
/// [`NativeEngine::grid_free_info`]. Buffer layout:
/// - `points`: `2 * n_points` reals, `x0, y0, x1, y1, ...`
/// - `edges`: `2 * n_edges` point indices
/// - `cell_sizes`: `n_cells` counts
/// - `cell_points`: the concatenated point indices of every cell, `cell_sizes[i]`
///   entries per cell
#[derive(Debug)]
pub struct RawGridInfo {
    pub n_points: i32,
    pub n_edges: i32,
    pub n_cells: i32,
    pub points: *const f64,
    pub edges: *const i32,
    pub cell_sizes: *const i32,
    pub cell_points: *const i32,
    /// Engine-private cookie; backends that do not need one leave it zero.
    pub cookie: usize,
}

/// Progress reported by a running native operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    pub stage: String,
    pub step: String,
    /// Completion of the whole operation in `[0, 1]`.
    pub fraction: f64,
    /// Completion of the current step in `[0, 1]`.
    pub step_fraction: f64,
}

/// Callback handed to long-running native operations.
///
/// The engine calls [`NativeCallback::report`] between units of work; a `true`
/// answer asks it to stop and return the null sentinel.
pub trait NativeCallback {
    fn report(&mut self, progress: Progress) -> bool;
}

/// How a boundary layer treats the vertices of its source contour.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshContPolicy {
    /// Keep the contour as given.
    Ignore,
    /// Re-mesh the contour, keeping its original vertices.
    KeepOrigin,
    /// Re-mesh the contour, keeping only shape-defining vertices.
    KeepShape,
    /// Re-mesh the contour ignoring all existing vertices.
    IgnoreAll,
}

impl MeshContPolicy {
    /// Spelling used by the native options record.
    pub const fn native_name(self) -> &'static str {
        match self {
            MeshContPolicy::Ignore => "NO",
            MeshContPolicy::KeepOrigin => "KEEP_ORIGIN",
            MeshContPolicy::KeepShape => "KEEP_SHAPE",
            MeshContPolicy::IgnoreAll => "IGNORE_ALL",
        }
    }
}

/// One boundary-layer segment as passed to the engine.
#[derive(Clone, Copy, Debug)]
pub struct NativeLayerOption<'a> {
    pub contour: RawHandle,
    pub start: Point2,
    pub end: Point2,
    pub partition_kind: &'static str,
    pub round_off: bool,
    pub max_sharp_angle: f64,
    pub mesh_cont: MeshContPolicy,
    pub mesh_cont_step: f64,
    /// Increasing layer offsets starting at zero.
    pub partition: &'a [f64],
}

/// Fixed call contract of the native engine.
///
/// Implementations must be safe to call from a worker thread while other,
/// independent handle sets are used from other threads. No guarantee is made
/// for concurrent access to the *same* handle, and the bridge never does that.
pub trait NativeEngine: Send + Sync {
    /// `grid_construct`: builds a grid from `points[2N]` and the length-prefixed
    /// cell buffer holding `n_cells` runs.
    fn grid_construct(&self, points: &[f64], n_cells: usize, cells: &[i32]) -> Option<RawHandle>;

    /// `contour_construct`: legacy contour from `points[2N]` and `edges[2M]`.
    fn contour_construct(&self, points: &[f64], edges: &[i32]) -> Option<RawHandle>;

    /// `create_contour_tree`: tagged contour from `points[2N]` and `edges[3M]`.
    fn contour_tree_construct(&self, points: &[f64], edges: &[i32]) -> Option<RawHandle>;

    /// `grid_get_edges_info`: exposes a grid's buffers. Every successful call must
    /// be followed by exactly one [`NativeEngine::grid_free_info`].
    fn grid_info(&self, grid: RawHandle) -> Option<RawGridInfo>;

    /// `grid_free_edges_info`.
    ///
    /// # Safety
    /// `info` must come from [`NativeEngine::grid_info`] on this engine and must
    /// not have been freed already. Its pointers are dangling afterwards.
    unsafe fn grid_free_info(&self, info: RawGridInfo);

    /// Releases a handle through the entry point matching `kind`.
    fn release(&self, kind: NativeKind, handle: RawHandle);

    /// `cross_grids_wcb`: unites two grids. Inputs stay owned by the caller.
    fn cross_grids(
        &self,
        base: RawHandle,
        overlay: RawHandle,
        buffer_distance: f64,
        fix_boundary: bool,
        fill_holes: bool,
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle>;

    /// `grid_exclude_cont_wcb`: removes the inner or outer contour area from a grid.
    fn grid_exclude_contour(
        &self,
        grid: RawHandle,
        contour: RawHandle,
        inner: bool,
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle>;

    /// `boundary_layer_grid_wcb`: builds a boundary-layer grid.
    fn boundary_layer_grid(
        &self,
        options: &[NativeLayerOption<'_>],
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(RawHandle, usize);
    assert_eq_size!(Option<RawHandle>, usize);

    #[test]
    fn null_is_none() {
        assert!(RawHandle::new(0).is_none());
        assert!(RawHandle::from_ptr(std::ptr::null_mut()).is_none());
        assert_eq!(RawHandle::new(42).unwrap().get(), 42);
    }

    #[test]
    fn native_policy_names() {
        assert_eq!(MeshContPolicy::Ignore.native_name(), "NO");
        assert_eq!(MeshContPolicy::IgnoreAll.native_name(), "IGNORE_ALL");
        assert_eq!(NativeKind::ContourTree.free_entry(), "free_contour_tree");
    }
}
