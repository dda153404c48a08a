//! Ownership of native handles.
//!
//! Every raw handle obtained from the engine is wrapped in an [`OwnedHandle`] as
//! soon as it crosses the boundary. The wrapper is move-only and releases through
//! the matching free entry point exactly once, when it is dropped. A released
//! handle no longer exists as a value, so use-after-release and double release
//! cannot be written.
//!
//! The handle kind is a type parameter ([`GridKind`], [`ContourKind`],
//! [`ContourTreeKind`]), so a contour can never be passed where a grid is
//! expected and is always freed by its own entry point.
//!
//! Two helpers cover composite operations:
//! - [`Lease`] distinguishes a handle the operation built itself (owned, freed on
//!   drop) from one supplied by the caller (borrowed, never freed here).
//! - [`ContourArena`] builds each distinct source contour once per invocation and
//!   releases each unique handle once when the invocation ends.

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use hashbrown::HashMap;

use super::{NativeEngine, NativeKind, RawHandle};
use crate::bridge_error::BridgeError;
use crate::geometry::Contour;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait tying a handle type to its native kind.
pub trait HandleKind: sealed::Sealed + Send + Sync + 'static {
    const KIND: NativeKind;
}

/// Marker for grid handles.
#[derive(Debug)]
pub enum GridKind {}
/// Marker for legacy contour handles.
#[derive(Debug)]
pub enum ContourKind {}
/// Marker for tagged contour-tree handles.
#[derive(Debug)]
pub enum ContourTreeKind {}

impl sealed::Sealed for GridKind {}
impl sealed::Sealed for ContourKind {}
impl sealed::Sealed for ContourTreeKind {}

impl HandleKind for GridKind {
    const KIND: NativeKind = NativeKind::Grid;
}
impl HandleKind for ContourKind {
    const KIND: NativeKind = NativeKind::Contour;
}
impl HandleKind for ContourTreeKind {
    const KIND: NativeKind = NativeKind::ContourTree;
}

/// Sole owner of one native handle.
pub struct OwnedHandle<'e, K: HandleKind> {
    engine: &'e dyn NativeEngine,
    raw: RawHandle,
    _kind: PhantomData<K>,
}

pub type GridHandle<'e> = OwnedHandle<'e, GridKind>;
pub type ContourHandle<'e> = OwnedHandle<'e, ContourKind>;
pub type ContourTreeHandle<'e> = OwnedHandle<'e, ContourTreeKind>;

impl<'e, K: HandleKind> OwnedHandle<'e, K> {
    /// Takes ownership of `raw`.
    ///
    /// # Safety
    /// `raw` must have been produced by `engine` as a handle of kind `K::KIND`,
    /// must still be live, and must not be owned by any other value. Violating
    /// this leads to a double release inside the native engine.
    pub unsafe fn from_raw(engine: &'e dyn NativeEngine, raw: RawHandle) -> Self {
        log::trace!("adopt {:?} handle {:#x}", K::KIND, raw.get());
        Self {
            engine,
            raw,
            _kind: PhantomData,
        }
    }

    /// The raw value, for passing into a native call. Ownership is not transferred.
    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn kind(&self) -> NativeKind {
        K::KIND
    }

    pub fn engine(&self) -> &'e dyn NativeEngine {
        self.engine
    }

    /// Releases the handle now. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }

    /// Gives up ownership without releasing; the caller becomes responsible for it.
    pub fn into_raw(self) -> RawHandle {
        let this = ManuallyDrop::new(self);
        this.raw
    }
}

impl<K: HandleKind> Drop for OwnedHandle<'_, K> {
    fn drop(&mut self) {
        log::trace!("{} {:#x}", K::KIND.free_entry(), self.raw.get());
        self.engine.release(K::KIND, self.raw);
    }
}

impl<K: HandleKind> fmt::Debug for OwnedHandle<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("kind", &K::KIND)
            .field("raw", &format_args!("{:#x}", self.raw.get()))
            .finish()
    }
}

/// A handle an operation may or may not own.
///
/// `Owned` was created by the operation and is freed when the lease drops;
/// `Supplied` belongs to the caller and is left alone.
#[derive(Debug)]
pub enum Lease<'h, 'e, K: HandleKind> {
    Owned(OwnedHandle<'e, K>),
    Supplied(&'h OwnedHandle<'e, K>),
}

impl<'h, 'e, K: HandleKind> Lease<'h, 'e, K> {
    /// Uses `supplied` if present, otherwise builds an owned handle with `build`.
    pub fn supplied_or<F>(supplied: Option<&'h OwnedHandle<'e, K>>, build: F) -> Result<Self, BridgeError>
    where
        F: FnOnce() -> Result<OwnedHandle<'e, K>, BridgeError>,
    {
        match supplied {
            Some(h) => Ok(Lease::Supplied(h)),
            None => build().map(Lease::Owned),
        }
    }

    pub fn raw(&self) -> RawHandle {
        match self {
            Lease::Owned(h) => h.raw(),
            Lease::Supplied(h) => h.raw(),
        }
    }

    /// True if dropping this lease frees the handle.
    pub fn owns(&self) -> bool {
        matches!(self, Lease::Owned(_))
    }
}

/// Per-invocation cache of contour-tree handles keyed by contour identity.
///
/// Two option entries that share the same `Arc<Contour>` share one native
/// contour. The arena keeps the `Arc` alive so identities stay unique while it
/// exists, and releases each handle exactly once on drop.
pub struct ContourArena<'e> {
    engine: &'e dyn NativeEngine,
    entries: HashMap<*const Contour, (Arc<Contour>, ContourTreeHandle<'e>)>,
    order: Vec<Arc<Contour>>,
}

impl<'e> ContourArena<'e> {
    pub fn new(engine: &'e dyn NativeEngine) -> Self {
        Self {
            engine,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Returns the native handle of `contour`, encoding it on first use.
    pub fn get_or_encode(&mut self, contour: &Arc<Contour>) -> Result<RawHandle, BridgeError> {
        let key = Arc::as_ptr(contour);
        if let Some((_, h)) = self.entries.get(&key) {
            return Ok(h.raw());
        }
        let encoded = crate::codec::encode_contour(self.engine, contour)?;
        let raw = encoded.handle.raw();
        self.entries
            .insert(key, (Arc::clone(contour), encoded.handle));
        self.order.push(Arc::clone(contour));
        Ok(raw)
    }

    /// Number of distinct contours encoded so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct source contours in order of first use.
    pub fn sources(&self) -> impl Iterator<Item = &Contour> + '_ {
        self.order.iter().map(|c| c.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::geometry::{Mesh, Point2};
    use crate::native::reference::ReferenceEngine;

    fn square() -> Mesh {
        Mesh::from_cells(
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
            vec![vec![0, 1, 2, 3]],
        )
        .unwrap()
    }

    fn triangle() -> Arc<Contour> {
        Arc::new(
            Contour::from_polyline(
                vec![
                    Point2::new(0.0, 0.0),
                    Point2::new(1.0, 0.0),
                    Point2::new(1.0, 1.0),
                    Point2::new(0.0, 0.0),
                ],
                1,
            )
            .unwrap(),
        )
    }

    #[test]
    fn drop_releases_once() {
        let engine = ReferenceEngine::new();
        {
            let enc = codec::encode_mesh(&engine, &square()).unwrap();
            assert_eq!(engine.ledger().live(), 1);
            drop(enc);
        }
        let ledger = engine.ledger();
        assert_eq!(ledger.acquired(), 1);
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn into_raw_transfers_ownership() {
        let engine = ReferenceEngine::new();
        let enc = codec::encode_mesh(&engine, &square()).unwrap();
        let raw = enc.handle.into_raw();
        assert_eq!(engine.ledger().live(), 1);
        // SAFETY: `raw` was produced by this engine as a grid and is owned by nobody.
        let again = unsafe { GridHandle::from_raw(&engine, raw) };
        again.release();
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn supplied_lease_is_not_released() {
        let engine = ReferenceEngine::new();
        let c = triangle();
        let supplied = codec::encode_contour_legacy(&engine, &c).unwrap().handle;
        {
            let lease = Lease::supplied_or(Some(&supplied), || unreachable!()).unwrap();
            assert!(!lease.owns());
            assert_eq!(lease.raw(), supplied.raw());
        }
        assert_eq!(engine.ledger().live(), 1);
        {
            let lease: Lease<'_, '_, ContourKind> = Lease::supplied_or(None, || {
                codec::encode_contour_legacy(&engine, &c).map(|e| e.handle)
            })
            .unwrap();
            assert!(lease.owns());
            assert_eq!(engine.ledger().live(), 2);
        }
        assert_eq!(engine.ledger().live(), 1);
        drop(supplied);
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn arena_encodes_each_contour_once() {
        let engine = ReferenceEngine::new();
        let a = triangle();
        let b = triangle();
        {
            let mut arena = ContourArena::new(&engine);
            let h1 = arena.get_or_encode(&a).unwrap();
            let h2 = arena.get_or_encode(&Arc::clone(&a)).unwrap();
            let h3 = arena.get_or_encode(&b).unwrap();
            assert_eq!(h1, h2);
            assert_ne!(h1, h3);
            assert_eq!(arena.len(), 2);
            assert_eq!(arena.sources().count(), 2);
        }
        let ledger = engine.ledger();
        assert_eq!(ledger.acquired(), 2);
        assert!(ledger.is_balanced());
    }
}
