//! Boundary-layer grid construction.
//!
//! Each [`BoundaryLayerOptions`] entry describes one layer along a stretch of a
//! source contour. Entries that share the same `Arc<Contour>` share one native
//! contour, built on first use and released once when the call ends.

use std::sync::Arc;

use super::{finish, retag_boundary, OpContext, Outcome};
use crate::bridge_error::BridgeError;
use crate::geometry::{Contour, Mesh, Point2};
use crate::native::handle::ContourArena;
use crate::native::{MeshContPolicy, NativeLayerOption};

/// Layer offsets away from the source contour.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerPartition {
    /// Increasing offsets starting at `0`.
    Explicit(Vec<f64>),
    /// `count` layers of equal thickness.
    Const { step: f64, count: usize },
    /// `count` layers, the first `first` thick, each next one `ratio` times thicker.
    Geometric { first: f64, ratio: f64, count: usize },
}

impl LayerPartition {
    /// Partition-type tag passed to the engine.
    pub const fn kind_tag(&self) -> &'static str {
        match self {
            LayerPartition::Explicit(_) => "explicit",
            LayerPartition::Const { .. } => "const",
            LayerPartition::Geometric { .. } => "geometric",
        }
    }

    /// The explicit partition array: starts at `0`, strictly increasing, at
    /// least two entries.
    pub fn to_steps(&self) -> Result<Vec<f64>, String> {
        let positive = |v: f64, name: &str| {
            if v.is_finite() && v > 0.0 {
                Ok(v)
            } else {
                Err(format!("{name} must be finite and positive, got {v}"))
            }
        };
        let steps = match self {
            LayerPartition::Explicit(v) => v.clone(),
            LayerPartition::Const { step, count } => {
                let step = positive(*step, "step")?;
                (0..=*count).map(|i| i as f64 * step).collect()
            }
            LayerPartition::Geometric { first, ratio, count } => {
                let (first, ratio) = (positive(*first, "first")?, positive(*ratio, "ratio")?);
                std::iter::once(0.0)
                    .chain((0..*count).scan((0.0, first), |(acc, h), _| {
                        *acc += *h;
                        *h *= ratio;
                        Some(*acc)
                    }))
                    .collect()
            }
        };
        if steps.len() < 2 {
            return Err("partition needs at least one layer".into());
        }
        if steps[0] != 0.0 {
            return Err(format!("partition must start at 0, starts at {}", steps[0]));
        }
        if let Some(w) = steps.windows(2).find(|w| !(w[1] > w[0]) || !w[1].is_finite()) {
            return Err(format!("partition is not strictly increasing at {} -> {}", w[0], w[1]));
        }
        Ok(steps)
    }
}

/// One boundary-layer segment.
#[derive(Clone, Debug)]
pub struct BoundaryLayerOptions {
    pub source: Arc<Contour>,
    pub start: Point2,
    pub end: Point2,
    pub partition: LayerPartition,
    /// Round off sharp corners.
    pub round_off: bool,
    /// Corners sharper than this many degrees are treated as sharp; `(0, 180]`.
    pub max_sharp_angle: f64,
    pub mesh_cont: MeshContPolicy,
    /// Re-meshing step along the source; used unless `mesh_cont` is `Ignore`.
    pub mesh_cont_step: f64,
}

impl BoundaryLayerOptions {
    /// Options with no corner rounding, a 120° sharp-angle threshold and the
    /// source contour kept as given.
    pub fn new(source: Arc<Contour>, start: Point2, end: Point2, partition: LayerPartition) -> Self {
        Self {
            source,
            start,
            end,
            partition,
            round_off: false,
            max_sharp_angle: 120.0,
            mesh_cont: MeshContPolicy::Ignore,
            mesh_cont_step: 1.0,
        }
    }

    /// Checks the entry and returns its partition array.
    pub fn validate(&self, entry: usize) -> Result<Vec<f64>, BridgeError> {
        let invalid = |reason: String| BridgeError::InvalidLayerOptions { entry, reason };
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(invalid("start and end must be finite".into()));
        }
        if !(self.max_sharp_angle > 0.0 && self.max_sharp_angle <= 180.0) {
            return Err(invalid(format!(
                "max_sharp_angle {} outside (0, 180]",
                self.max_sharp_angle
            )));
        }
        if self.mesh_cont != MeshContPolicy::Ignore
            && !(self.mesh_cont_step.is_finite() && self.mesh_cont_step > 0.0)
        {
            return Err(invalid(format!(
                "mesh_cont_step {} must be positive",
                self.mesh_cont_step
            )));
        }
        if self.source.n_edges() == 0 {
            return Err(invalid("source contour has no edges".into()));
        }
        self.partition.to_steps().map_err(invalid)
    }
}

/// Builds a boundary-layer grid from one or more option entries.
///
/// Every entry is validated before any native resource is allocated. The
/// result's boundary tags are recovered from the distinct source contours in
/// order of first use.
pub fn boundary_layer_grid(
    ctx: &mut OpContext<'_, '_>,
    options: &[BoundaryLayerOptions],
) -> Result<Outcome<Mesh>, BridgeError> {
    if options.is_empty() {
        return Err(BridgeError::InvalidLayerOptions {
            entry: 0,
            reason: "no option entries".into(),
        });
    }
    let steps = options
        .iter()
        .enumerate()
        .map(|(i, o)| o.validate(i))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("boundary_layer_grid: {} entries", options.len());

    let engine = ctx.engine();
    let mut arena = ContourArena::new(engine);
    let mut native = Vec::with_capacity(options.len());
    for (opt, partition) in options.iter().zip(&steps) {
        native.push(NativeLayerOption {
            contour: arena.get_or_encode(&opt.source)?,
            start: opt.start,
            end: opt.end,
            partition_kind: opt.partition.kind_tag(),
            round_off: opt.round_off,
            max_sharp_angle: opt.max_sharp_angle,
            mesh_cont: opt.mesh_cont,
            mesh_cont_step: opt.mesh_cont_step,
            partition,
        });
    }
    log::trace!(
        "boundary_layer_grid: {} distinct source contours",
        arena.len()
    );

    let native = native.as_slice();
    let done = ctx.run("boundary_layer_grid", move |e, cb| e.boundary_layer_grid(native, cb))?;
    let tolerance = ctx.config().tolerance;
    finish(engine, done, |mesh| {
        retag_boundary(mesh, arena.sources(), tolerance)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::reference::ReferenceEngine;

    fn segment() -> Arc<Contour> {
        Arc::new(
            Contour::from_polyline(
                vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)],
                vec![3, 4],
            )
            .unwrap(),
        )
    }

    #[test]
    fn const_and_geometric_steps() {
        let c = LayerPartition::Const { step: 0.5, count: 3 };
        assert_eq!(c.to_steps().unwrap(), vec![0.0, 0.5, 1.0, 1.5]);
        let g = LayerPartition::Geometric {
            first: 1.0,
            ratio: 2.0,
            count: 3,
        };
        assert_eq!(g.to_steps().unwrap(), vec![0.0, 1.0, 3.0, 7.0]);
        assert_eq!(g.kind_tag(), "geometric");
    }

    #[test]
    fn explicit_partition_checked() {
        assert!(LayerPartition::Explicit(vec![0.0]).to_steps().is_err());
        assert!(LayerPartition::Explicit(vec![0.1, 0.2]).to_steps().is_err());
        assert!(LayerPartition::Explicit(vec![0.0, 0.2, 0.2]).to_steps().is_err());
        assert!(LayerPartition::Const { step: 0.1, count: 0 }.to_steps().is_err());
        assert_eq!(
            LayerPartition::Explicit(vec![0.0, 0.1, 0.3]).to_steps().unwrap(),
            vec![0.0, 0.1, 0.3]
        );
    }

    #[test]
    fn invalid_entry_reported_by_index() {
        let engine = ReferenceEngine::new();
        let mut ctx = OpContext::new(&engine);
        let good = BoundaryLayerOptions::new(
            segment(),
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            LayerPartition::Const { step: 0.1, count: 2 },
        );
        let mut bad = good.clone();
        bad.max_sharp_angle = 0.0;
        let err = boundary_layer_grid(&mut ctx, &[good, bad]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidLayerOptions { entry: 1, .. }));
        assert_eq!(engine.ledger().acquired(), 0);
    }

    #[test]
    fn layer_along_open_segment() {
        let engine = ReferenceEngine::new();
        let mut ctx = OpContext::new(&engine);
        let opt = BoundaryLayerOptions::new(
            segment(),
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            LayerPartition::Explicit(vec![0.0, 0.1, 0.25]),
        );
        let mesh = boundary_layer_grid(&mut ctx, &[opt]).unwrap().completed().unwrap();
        assert_eq!(mesh.n_cells(), 4);
        // the two source-side edges keep their tags
        let tags: Vec<i32> = mesh.boundary_tags().iter().map(|(_, t)| t).collect();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&3) && tags.contains(&4));
        let ledger = engine.ledger();
        assert_eq!(ledger.contour_trees.acquired, 1);
        assert!(ledger.is_balanced());
    }
}
