//! Bindings to the native crossing library.
//!
//! The library is located by the build script (pkg-config `crossgrid`, or the
//! `CROSSGRID_LIB_DIR` override). Its progress callback carries no user-data
//! pointer, so the active [`NativeCallback`] is parked in a process-wide slot for
//! the duration of each long-running call and calls are serialized.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{
    NativeCallback, NativeEngine, NativeKind, NativeLayerOption, Progress, RawGridInfo, RawHandle,
};

/// `int (*)(const char* stage, const char* step, double fraction, double step_fraction)`;
/// a non-zero return asks the library to stop.
type RawCallback = extern "C" fn(*const c_char, *const c_char, f64, f64) -> c_int;

/// One boundary-layer option record as laid out by the library.
#[repr(C)]
struct RawLayerOption {
    cont: *mut c_void,
    start: [f64; 2],
    end: [f64; 2],
    tp: *const c_char,
    round_off: c_int,
    maxsharp: f64,
    mesh_cont: *const c_char,
    mesh_cont_step: f64,
    n_partition: c_int,
    partition: *const f64,
}

unsafe extern "C" {
    fn grid_construct(npts: c_int, ncells: c_int, points: *const f64, cells: *const c_int) -> *mut c_void;
    fn contour_construct(npts: c_int, neds: c_int, points: *const f64, edges: *const c_int) -> *mut c_void;
    fn create_contour_tree(npts: c_int, neds: c_int, points: *const f64, edges: *const c_int) -> *mut c_void;
    fn grid_get_edges_info(
        grid: *mut c_void,
        npts: *mut c_int,
        neds: *mut c_int,
        ncells: *mut c_int,
        points: *mut *mut f64,
        edges: *mut *mut c_int,
        cell_sizes: *mut *mut c_int,
        cell_points: *mut *mut c_int,
    ) -> c_int;
    fn grid_free_edges_info(
        points: *mut *mut f64,
        edges: *mut *mut c_int,
        cell_sizes: *mut *mut c_int,
        cell_points: *mut *mut c_int,
    );
    fn grid_free(grid: *mut c_void);
    fn cont_free(cont: *mut c_void);
    fn free_contour_tree(tree: *mut c_void);
    fn cross_grids_wcb(
        base: *mut c_void,
        overlay: *mut c_void,
        buffer_size: f64,
        preserve_bp: c_int,
        empty_holes: c_int,
        cb: RawCallback,
    ) -> *mut c_void;
    fn grid_exclude_cont_wcb(grid: *mut c_void, cont: *mut c_void, is_inner: c_int, cb: RawCallback) -> *mut c_void;
    fn boundary_layer_grid_wcb(n: c_int, opts: *const RawLayerOption, cb: RawCallback) -> *mut c_void;
}

/// Lifetime-erased pointer to the callback of the running call.
struct ActiveCallback(*mut (dyn NativeCallback + 'static));

// SAFETY: the pointer is only dereferenced by the thread that installed it,
// inside the native call it was installed for.
unsafe impl Send for ActiveCallback {}

static ACTIVE: Lazy<Mutex<Option<ActiveCallback>>> = Lazy::new(|| Mutex::new(None));
static CALL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Clears the slot when the call returns or unwinds.
struct Installed;

impl Installed {
    fn new(callback: &mut dyn NativeCallback) -> Self {
        let ptr: *mut (dyn NativeCallback + '_) = callback;
        // SAFETY: the slot is cleared in `Drop` before `callback`'s borrow ends.
        let ptr: *mut (dyn NativeCallback + 'static) = unsafe { std::mem::transmute(ptr) };
        *ACTIVE.lock() = Some(ActiveCallback(ptr));
        Installed
    }
}

impl Drop for Installed {
    fn drop(&mut self) {
        *ACTIVE.lock() = None;
    }
}

unsafe fn lossy(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        // SAFETY: the library passes NUL-terminated strings.
        unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
    }
}

extern "C" fn trampoline(stage: *const c_char, step: *const c_char, fraction: f64, step_fraction: f64) -> c_int {
    let progress = Progress {
        // SAFETY: see `lossy`.
        stage: unsafe { lossy(stage) },
        step: unsafe { lossy(step) },
        fraction,
        step_fraction,
    };
    let Some(ptr) = ACTIVE.lock().as_ref().map(|a| a.0) else {
        return 0;
    };
    // SAFETY: installed by the thread now inside the native call; cleared on return.
    let stop = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe { (*ptr).report(progress) }))
        .unwrap_or(true);
    c_int::from(stop)
}

fn count(n: usize) -> Option<c_int> {
    c_int::try_from(n)
        .inspect_err(|_| log::warn!("crossgrid: count {n} exceeds the native int range"))
        .ok()
}

fn handle(p: *mut c_void) -> Option<RawHandle> {
    RawHandle::from_ptr(p)
}

/// The native library as a [`NativeEngine`].
#[derive(Debug, Default)]
pub struct CrossgridEngine {
    _private: (),
}

impl CrossgridEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_callback<R>(&self, callback: &mut dyn NativeCallback, call: impl FnOnce(RawCallback) -> R) -> R {
        let _serial = CALL_LOCK.lock();
        let _installed = Installed::new(callback);
        call(trampoline)
    }
}

impl NativeEngine for CrossgridEngine {
    fn grid_construct(&self, points: &[f64], n_cells: usize, cells: &[i32]) -> Option<RawHandle> {
        let (npts, ncells) = (count(points.len() / 2)?, count(n_cells)?);
        // SAFETY: buffers outlive the call; the library copies them.
        handle(unsafe { grid_construct(npts, ncells, points.as_ptr(), cells.as_ptr()) })
    }

    fn contour_construct(&self, points: &[f64], edges: &[i32]) -> Option<RawHandle> {
        let (npts, neds) = (count(points.len() / 2)?, count(edges.len() / 2)?);
        // SAFETY: as above.
        handle(unsafe { contour_construct(npts, neds, points.as_ptr(), edges.as_ptr()) })
    }

    fn contour_tree_construct(&self, points: &[f64], edges: &[i32]) -> Option<RawHandle> {
        let (npts, neds) = (count(points.len() / 2)?, count(edges.len() / 3)?);
        // SAFETY: as above.
        handle(unsafe { create_contour_tree(npts, neds, points.as_ptr(), edges.as_ptr()) })
    }

    fn grid_info(&self, grid: RawHandle) -> Option<RawGridInfo> {
        let (mut npts, mut neds, mut ncells) = (0, 0, 0);
        let mut points: *mut f64 = ptr::null_mut();
        let (mut edges, mut sizes, mut cell_points): (*mut c_int, *mut c_int, *mut c_int) =
            (ptr::null_mut(), ptr::null_mut(), ptr::null_mut());
        // SAFETY: `grid` is a live grid handle; out-pointers are valid locals.
        let ok = unsafe {
            grid_get_edges_info(
                grid.as_ptr(),
                &mut npts,
                &mut neds,
                &mut ncells,
                &mut points,
                &mut edges,
                &mut sizes,
                &mut cell_points,
            )
        };
        if ok == 0 {
            return None;
        }
        Some(RawGridInfo {
            n_points: npts,
            n_edges: neds,
            n_cells: ncells,
            points,
            edges,
            cell_sizes: sizes,
            cell_points,
            cookie: 0,
        })
    }

    unsafe fn grid_free_info(&self, info: RawGridInfo) {
        let mut points = info.points as *mut f64;
        let mut edges = info.edges as *mut c_int;
        let mut sizes = info.cell_sizes as *mut c_int;
        let mut cell_points = info.cell_points as *mut c_int;
        // SAFETY: forwarded from the caller's contract.
        unsafe { grid_free_edges_info(&mut points, &mut edges, &mut sizes, &mut cell_points) }
    }

    fn release(&self, kind: NativeKind, h: RawHandle) {
        log::trace!("crossgrid: {} {:#x}", kind.free_entry(), h.get());
        // SAFETY: the handle wrappers release each handle once, through its own kind.
        unsafe {
            match kind {
                NativeKind::Grid => grid_free(h.as_ptr()),
                NativeKind::Contour => cont_free(h.as_ptr()),
                NativeKind::ContourTree => free_contour_tree(h.as_ptr()),
            }
        }
    }

    fn cross_grids(
        &self,
        base: RawHandle,
        overlay: RawHandle,
        buffer_distance: f64,
        fix_boundary: bool,
        fill_holes: bool,
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle> {
        self.with_callback(callback, |cb| {
            // SAFETY: inputs are live grid handles owned by the caller.
            handle(unsafe {
                cross_grids_wcb(
                    base.as_ptr(),
                    overlay.as_ptr(),
                    buffer_distance,
                    c_int::from(fix_boundary),
                    c_int::from(!fill_holes),
                    cb,
                )
            })
        })
    }

    fn grid_exclude_contour(
        &self,
        grid: RawHandle,
        contour: RawHandle,
        inner: bool,
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle> {
        self.with_callback(callback, |cb| {
            // SAFETY: inputs are live handles owned by the caller.
            handle(unsafe { grid_exclude_cont_wcb(grid.as_ptr(), contour.as_ptr(), c_int::from(inner), cb) })
        })
    }

    fn boundary_layer_grid(
        &self,
        options: &[NativeLayerOption<'_>],
        callback: &mut dyn NativeCallback,
    ) -> Option<RawHandle> {
        let n = count(options.len())?;
        // owns the strings the records point into
        let mut strings = Vec::with_capacity(options.len() * 2);
        let mut records = Vec::with_capacity(options.len());
        for o in options {
            let tp = CString::new(o.partition_kind).ok()?;
            let mesh_cont = CString::new(o.mesh_cont.native_name()).ok()?;
            records.push(RawLayerOption {
                cont: o.contour.as_ptr(),
                start: [o.start.x, o.start.y],
                end: [o.end.x, o.end.y],
                tp: tp.as_ptr(),
                round_off: c_int::from(o.round_off),
                maxsharp: o.max_sharp_angle,
                mesh_cont: mesh_cont.as_ptr(),
                mesh_cont_step: o.mesh_cont_step,
                n_partition: count(o.partition.len())?,
                partition: o.partition.as_ptr(),
            });
            strings.push(tp);
            strings.push(mesh_cont);
        }
        let result = self.with_callback(callback, |cb| {
            // SAFETY: records and the buffers they point into outlive the call.
            handle(unsafe { boundary_layer_grid_wcb(n, records.as_ptr(), cb) })
        });
        drop(strings);
        result
    }
}
