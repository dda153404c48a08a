#![cfg_attr(docsrs, feature(doc_cfg))]
//! # crossgrid-bridge
//!
//! crossgrid-bridge is the interop boundary between Rust grid data and a native
//! 2D meshing engine. It converts meshes and contours into the engine's flat
//! exchange buffers, tracks every native allocation with an owned handle, runs
//! long engine calls on a worker thread with progress reporting and cooperative
//! cancellation, and carries boundary tags across operations that rebuild the
//! grid.
//!
//! ## Layout
//! - [`geometry`]: plain meshes, contours and sparse boundary-tag maps
//! - [`codec`]: packing to and unpacking from exchange buffers, plus a
//!   versioned byte framing of those buffers
//! - [`native`]: the engine call contract, owned handles and the in-process
//!   [`native::reference::ReferenceEngine`]
//! - [`exec`]: the cancellable `initialize → execute → result` command
//! - [`bc`]: boundary-tag transfer between contours by segment coincidence
//! - [`ops`]: the orchestrators [`ops::unite_grids`], [`ops::grid_exclusion`] and
//!   [`ops::boundary_layer_grid`]
//!
//! ## Features
//! - `crossgrid`: link the native library (located with pkg-config) and expose
//!   `native::crossgrid::CrossgridEngine`
//! - `rayon`: parallel edge matching inside [`bc::propagate_tags`]
//! - `check-invariants`: run the structural invariant checks in release builds
//!
//! ## Usage
//!
//! ```
//! use crossgrid_bridge::prelude::*;
//!
//! # fn main() -> Result<(), BridgeError> {
//! let square = |x0: f64| {
//!     Mesh::from_cells(
//!         vec![
//!             Point2::new(x0, 0.0),
//!             Point2::new(x0 + 1.0, 0.0),
//!             Point2::new(x0 + 1.0, 1.0),
//!             Point2::new(x0, 1.0),
//!         ],
//!         vec![vec![0, 1, 2, 3]],
//!     )
//! };
//! let engine = ReferenceEngine::new();
//! let mut ctx = OpContext::new(&engine);
//! let united = unite_grids(&mut ctx, &square(0.0)?, &square(1.0)?, &UniteOptions::default())?;
//! assert_eq!(united.completed().map(|m| m.n_cells()), Some(2));
//! assert!(engine.ledger().is_balanced());
//! # Ok(())
//! # }
//! ```

pub mod bc;
pub mod bridge_error;
pub mod codec;
pub mod config;
pub mod debug_invariants;
pub mod exec;
pub mod geometry;
pub mod native;
pub mod ops;

pub use bridge_error::BridgeError;
pub use debug_invariants::DebugInvariants;

/// The types and entry points most callers need.
pub mod prelude {
    pub use crate::bc::{
        add_tags_from_contour, propagate_tags, setbc_from_conts, TransferOptions, UnmatchedPolicy,
    };
    pub use crate::bridge_error::BridgeError;
    pub use crate::codec::{ContourBuffer, EdgeForm, ExchangeBuffer, MeshBuffer};
    pub use crate::config::BridgeConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::exec::{CancelToken, Flow, ProgressObserver, Silent};
    pub use crate::geometry::{BoundaryTag, BoundaryTagMap, Contour, Mesh, Point2, DEFAULT_TAG};
    pub use crate::native::handle::{ContourHandle, ContourTreeHandle, GridHandle};
    pub use crate::native::reference::ReferenceEngine;
    pub use crate::native::{MeshContPolicy, NativeEngine, Progress};
    pub use crate::ops::{
        boundary_layer_grid, grid_exclusion, grid_exclusion_with, unite_grids,
        BoundaryLayerOptions, LayerPartition, OpContext, Outcome, UniteOptions,
    };
}
