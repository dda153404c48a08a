//! Geometric operation orchestrators.
//!
//! Every operation follows the same sequence:
//! 1. validate and encode the inputs into native handles,
//! 2. run the native call through [`NativeCommand`],
//! 3. decode a non-null result and release it right away,
//! 4. re-derive boundary tags on the result from the tagged inputs,
//! 5. release the input handles.
//!
//! Handles are owned values, so step 5 (and step 3's release) also happen on
//! every early return. The "no result" family comes back as [`Outcome`] values;
//! only genuine failures are errors.

pub mod boundary_layer;

pub use boundary_layer::{boundary_layer_grid, BoundaryLayerOptions, LayerPartition};

use crate::bc::setbc_from_conts;
use crate::bridge_error::BridgeError;
use crate::codec;
use crate::config::BridgeConfig;
use crate::exec::{CancelToken, CompletedCommand, NativeCommand, ProgressObserver, Silent};
use crate::geometry::{Contour, Mesh};
use crate::native::handle::{ContourHandle, GridKind, Lease};
use crate::native::{NativeCallback, NativeEngine, RawHandle};

/// Result of an orchestrated operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    /// The operation succeeded but produced an empty region.
    Empty,
    /// Cancellation was requested before the native call completed.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_completed(&self) -> Option<&T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Empty => Outcome::Empty,
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

/// Engine, settings, cancellation token and progress observer for a series of
/// operations.
pub struct OpContext<'e, 'o> {
    engine: &'e dyn NativeEngine,
    config: BridgeConfig,
    token: CancelToken,
    observer: Box<dyn ProgressObserver + 'o>,
}

impl<'e, 'o> OpContext<'e, 'o> {
    pub fn new(engine: &'e dyn NativeEngine) -> Self {
        Self {
            engine,
            config: BridgeConfig::default(),
            token: CancelToken::new(),
            observer: Box::new(Silent),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Uses `token`, so clones held elsewhere can cancel these operations.
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_observer<O: ProgressObserver + 'o>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn engine(&self) -> &'e dyn NativeEngine {
        self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    fn run<F>(&mut self, operation: &'static str, entry: F) -> Result<CompletedCommand<'e, GridKind>, BridgeError>
    where
        F: FnOnce(&dyn NativeEngine, &mut dyn NativeCallback) -> Option<RawHandle> + Send,
    {
        // observer-initiated cancels stay local to this invocation
        let token = self.token.child();
        NativeCommand::<GridKind, F>::initialize(self.engine, operation, entry).execute(
            &token,
            self.observer.as_mut(),
            self.config.exec_settings(),
        )
    }
}

/// Re-tags the boundary of `mesh` from `sources`, in order.
///
/// Skipped when no source carries a non-default tag.
pub(crate) fn retag_boundary<'a, I>(mesh: &mut Mesh, sources: I, tolerance: f64) -> Result<(), BridgeError>
where
    I: IntoIterator<Item = &'a Contour>,
{
    let sources: Vec<&Contour> = sources.into_iter().collect();
    if !sources.iter().any(|c| c.has_non_default_tags()) {
        log::trace!("no tagged sources; boundary tags left empty");
        return Ok(());
    }
    let mut boundary = mesh.boundary_contour();
    setbc_from_conts(&mut boundary.contour, sources, tolerance)?;
    mesh.set_boundary_tags_from(&boundary);
    Ok(())
}

/// Turns a completed command into an [`Outcome`].
///
/// The result handle is released right after decoding, whether or not decoding
/// succeeded.
pub(crate) fn finish<F>(
    engine: &dyn NativeEngine,
    done: CompletedCommand<'_, GridKind>,
    retag: F,
) -> Result<Outcome<Mesh>, BridgeError>
where
    F: FnOnce(&mut Mesh) -> Result<(), BridgeError>,
{
    let operation = done.operation();
    let cancelled = done.was_cancelled();
    let Some(result) = done.into_result() else {
        if cancelled {
            return Ok(Outcome::Cancelled);
        }
        log::warn!("{operation}: native call returned null");
        return Err(BridgeError::NativeFailure { operation });
    };
    let decoded = codec::decode_mesh(engine, &result);
    drop(result);
    let mut mesh = decoded.inspect_err(|e| log::warn!("{operation}: decoding the result failed: {e}"))?;
    if mesh.is_empty() {
        log::debug!("{operation}: empty result");
        return Ok(Outcome::Empty);
    }
    retag(&mut mesh)?;
    log::debug!(
        "{operation}: {} cells, {} tagged boundary edges",
        mesh.n_cells(),
        mesh.boundary_tags().len()
    );
    Ok(Outcome::Completed(mesh))
}

/// Parameters of [`unite_grids`].
#[derive(Copy, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UniteOptions {
    /// Width of the zone around the overlay where base cells are rebuilt.
    pub buffer_distance: f64,
    /// Preserve the outer boundary of the base grid.
    pub fix_boundary: bool,
    /// Mesh enclosed gaps instead of leaving them void.
    pub fill_holes: bool,
}

impl UniteOptions {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.buffer_distance.is_finite() && self.buffer_distance >= 0.0 {
            Ok(())
        } else {
            Err(BridgeError::InvalidConfig(format!(
                "buffer_distance {} must be finite and non-negative",
                self.buffer_distance
            )))
        }
    }
}

/// Unites `overlay` into `base`.
///
/// Boundary tags of the result are recovered from the boundaries of `base` and
/// then `overlay`; new edges get the default tag.
pub fn unite_grids(
    ctx: &mut OpContext<'_, '_>,
    base: &Mesh,
    overlay: &Mesh,
    options: &UniteOptions,
) -> Result<Outcome<Mesh>, BridgeError> {
    options.validate()?;
    log::debug!(
        "unite_grids: {} + {} cells, buffer {}",
        base.n_cells(),
        overlay.n_cells(),
        options.buffer_distance
    );
    let engine = ctx.engine();
    let g1 = codec::encode_mesh(engine, base)?;
    let g2 = codec::encode_mesh(engine, overlay)?;
    let (h1, h2) = (g1.handle.raw(), g2.handle.raw());
    let UniteOptions {
        buffer_distance,
        fix_boundary,
        fill_holes,
    } = *options;

    let done = ctx.run("cross_grids", move |e, cb| {
        e.cross_grids(h1, h2, buffer_distance, fix_boundary, fill_holes, cb)
    })?;
    let tolerance = ctx.config().tolerance;
    finish(engine, done, |mesh| {
        let b1 = base.boundary_contour();
        let b2 = overlay.boundary_contour();
        retag_boundary(mesh, [&b1.contour, &b2.contour], tolerance)
    })
}

/// Removes the inner (or outer) area of `contour` from `grid`.
pub fn grid_exclusion(
    ctx: &mut OpContext<'_, '_>,
    grid: &Mesh,
    contour: &Contour,
    inner: bool,
) -> Result<Outcome<Mesh>, BridgeError> {
    grid_exclusion_with(ctx, grid, contour, None, inner)
}

/// [`grid_exclusion`] reusing a native contour the caller already built.
///
/// `supplied` must represent `contour`. It stays owned by the caller and is not
/// released here; without it a temporary contour is built and released.
/// Boundary tags are recovered from the grid boundary first, then from the
/// cutting contour.
pub fn grid_exclusion_with<'e>(
    ctx: &mut OpContext<'e, '_>,
    grid: &Mesh,
    contour: &Contour,
    supplied: Option<&ContourHandle<'e>>,
    inner: bool,
) -> Result<Outcome<Mesh>, BridgeError> {
    log::debug!(
        "grid_exclusion: {} cells, {} contour edges, inner={inner}",
        grid.n_cells(),
        contour.n_edges()
    );
    let engine = ctx.engine();
    let g = codec::encode_mesh(engine, grid)?;
    let c = Lease::supplied_or(supplied, || {
        codec::encode_contour_legacy(engine, contour).map(|enc| enc.handle)
    })?;
    let (hg, hc) = (g.handle.raw(), c.raw());

    let done = ctx.run("grid_exclude_contour", move |e, cb| {
        e.grid_exclude_contour(hg, hc, inner, cb)
    })?;
    let tolerance = ctx.config().tolerance;
    finish(engine, done, |mesh| {
        let bnd = grid.boundary_contour();
        retag_boundary(mesh, [&bnd.contour, contour], tolerance)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Flow;
    use crate::geometry::Point2;
    use crate::native::reference::ReferenceEngine;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Mesh {
        Mesh::from_cells(
            vec![
                Point2::new(x0, y0),
                Point2::new(x1, y0),
                Point2::new(x1, y1),
                Point2::new(x0, y1),
            ],
            vec![vec![0, 1, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn outcome_helpers() {
        let o: Outcome<i32> = Outcome::Completed(2);
        assert_eq!(o.clone().map(|v| v * 2), Outcome::Completed(4));
        assert_eq!(o.as_completed(), Some(&2));
        assert!(Outcome::<i32>::Cancelled.is_cancelled());
        assert_eq!(Outcome::<i32>::Empty.completed(), None);
    }

    #[test]
    fn native_failure_is_an_error_and_releases_inputs() {
        let engine = ReferenceEngine::new();
        engine.fail_operation("cross_grids");
        let mut ctx = OpContext::new(&engine);
        let err = unite_grids(
            &mut ctx,
            &rect(0.0, 0.0, 1.0, 1.0),
            &rect(1.0, 0.0, 2.0, 1.0),
            &UniteOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, BridgeError::NativeFailure { operation: "cross_grids" });
        let ledger = engine.ledger();
        assert_eq!(ledger.grids.acquired, 2);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn second_encode_failure_releases_the_first() {
        let engine = ReferenceEngine::new();
        engine.fail_operation_after("grid_construct", 1);
        let mut ctx = OpContext::new(&engine);
        let err = unite_grids(
            &mut ctx,
            &rect(0.0, 0.0, 1.0, 1.0),
            &rect(1.0, 0.0, 2.0, 1.0),
            &UniteOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, BridgeError::NativeConstruct { entry: "grid_construct" });
        let ledger = engine.ledger();
        assert_eq!(ledger.acquired(), 1);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn exclusion_of_everything_is_empty() {
        let engine = ReferenceEngine::new();
        let mut ctx = OpContext::new(&engine);
        let cut = Contour::from_polyline(
            vec![
                Point2::new(-1.0, -1.0),
                Point2::new(2.0, -1.0),
                Point2::new(2.0, 2.0),
                Point2::new(-1.0, 2.0),
                Point2::new(-1.0, -1.0),
            ],
            0,
        )
        .unwrap();
        let out = grid_exclusion(&mut ctx, &rect(0.0, 0.0, 1.0, 1.0), &cut, true).unwrap();
        assert_eq!(out, Outcome::Empty);
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn supplied_contour_survives_exclusion() {
        let engine = ReferenceEngine::new();
        let cut = Contour::from_polyline(
            vec![
                Point2::new(1.0, -1.0),
                Point2::new(3.0, -1.0),
                Point2::new(3.0, 2.0),
                Point2::new(1.0, 2.0),
                Point2::new(1.0, -1.0),
            ],
            7,
        )
        .unwrap();
        let supplied = codec::encode_contour_legacy(&engine, &cut).unwrap().handle;
        let grid = Mesh::from_cells(
            [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]]
                .into_iter()
                .map(Point2::from)
                .collect(),
            vec![vec![0, 1, 4, 3], vec![1, 2, 5, 4]],
        )
        .unwrap();
        let mut ctx = OpContext::new(&engine);
        let out = grid_exclusion_with(&mut ctx, &grid, &cut, Some(&supplied), true)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(out.n_cells(), 1);
        // the cut edge x = 1 lies on the contour
        let tagged: Vec<_> = out.boundary_tags().iter().collect();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].1, 7);
        assert_eq!(engine.ledger().live(), 1);
        drop(supplied);
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn observer_cancellation_is_an_outcome() {
        let engine = ReferenceEngine::new();
        let mut ctx = OpContext::new(&engine).with_observer(|_: &crate::native::Progress| Flow::Cancel);
        let out = unite_grids(
            &mut ctx,
            &rect(0.0, 0.0, 1.0, 1.0),
            &rect(1.0, 0.0, 2.0, 1.0),
            &UniteOptions::default(),
        )
        .unwrap();
        assert_eq!(out, Outcome::Cancelled);
        assert!(!ctx.token().is_cancelled());
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn context_runs_again_after_a_cancelled_operation() {
        let engine = ReferenceEngine::new();
        let mut first = true;
        let mut ctx = OpContext::new(&engine).with_observer(move |_: &crate::native::Progress| {
            if std::mem::take(&mut first) { Flow::Cancel } else { Flow::Continue }
        });
        fn unite_once(ctx: &mut OpContext<'_, '_>) -> Outcome<Mesh> {
            unite_grids(
                ctx,
                &rect(0.0, 0.0, 1.0, 1.0),
                &rect(1.0, 0.0, 2.0, 1.0),
                &UniteOptions::default(),
            )
            .unwrap()
        }
        assert!(unite_once(&mut ctx).is_cancelled());
        let second = unite_once(&mut ctx).completed().unwrap();
        assert_eq!(second.n_cells(), 2);
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn caller_token_cancels_every_later_operation() {
        let engine = ReferenceEngine::new();
        let token = CancelToken::new();
        let mut ctx = OpContext::new(&engine).with_token(token.clone());
        token.cancel();
        for _ in 0..2 {
            let out = unite_grids(
                &mut ctx,
                &rect(0.0, 0.0, 1.0, 1.0),
                &rect(1.0, 0.0, 2.0, 1.0),
                &UniteOptions::default(),
            )
            .unwrap();
            assert_eq!(out, Outcome::Cancelled);
        }
        assert!(engine.ledger().is_balanced());
    }

    #[test]
    fn invalid_buffer_distance_rejected_before_encoding() {
        let engine = ReferenceEngine::new();
        let mut ctx = OpContext::new(&engine);
        let opts = UniteOptions {
            buffer_distance: f64::NAN,
            ..Default::default()
        };
        let r = unite_grids(&mut ctx, &rect(0.0, 0.0, 1.0, 1.0), &rect(1.0, 0.0, 2.0, 1.0), &opts);
        assert!(matches!(r, Err(BridgeError::InvalidConfig(_))));
        assert_eq!(engine.ledger().acquired(), 0);
    }
}
