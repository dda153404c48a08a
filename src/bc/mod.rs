//! Boundary-tag transfer between contours.
//!
//! Native geometric operations return untagged geometry. These helpers
//! re-derive tags on a result contour from the tagged contours that went in.
//!
//! A target edge *lies on* a source edge when both of its endpoints are within
//! `tolerance` of the source segment. When several source edges qualify, the
//! one with the smallest larger-endpoint distance wins; remaining ties go to the
//! lowest source edge index. A matched edge receives the source tag even when
//! that tag is the default, so a later source can clear an earlier one.

use hashbrown::HashMap;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::bridge_error::BridgeError;
use crate::geometry::predicates::point_segment_distance;
use crate::geometry::{BoundaryTag, BoundaryTagMap, Contour, Point2, DEFAULT_TAG};

/// Segments spanning more buckets than this are kept in a separate list that
/// every query scans.
const MAX_BUCKET_SPAN: i64 = 16;

/// What [`propagate_tags`] records for target edges without a match.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Leave them out of the map.
    #[default]
    Omit,
    /// Map them explicitly to [`DEFAULT_TAG`].
    Default,
}

/// Parameters of one transfer invocation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TransferOptions {
    /// Edge-coincidence epsilon, used for every comparison of the invocation.
    pub tolerance: f64,
    pub unmatched: UnmatchedPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            unmatched: UnmatchedPolicy::Omit,
        }
    }
}

impl TransferOptions {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.tolerance.is_finite() && self.tolerance >= 0.0 {
            Ok(())
        } else {
            Err(BridgeError::InvalidTolerance(self.tolerance))
        }
    }
}

/// Uniform bucket grid over the segments of a source contour.
///
/// Each segment is registered in every bucket its tolerance-inflated bounding
/// box touches, so any point within tolerance of a segment finds it in the
/// point's own bucket.
pub struct SegmentIndex<'c> {
    source: &'c Contour,
    tolerance: f64,
    cell: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
    oversized: Vec<usize>,
}

impl<'c> SegmentIndex<'c> {
    pub fn new(source: &'c Contour, tolerance: f64) -> Self {
        let n = source.n_edges();
        let total: f64 = source.segments().map(|(a, b)| a.dist(b)).sum();
        let mean = if n > 0 { total / n as f64 } else { 0.0 };
        let cell = if mean.is_finite() && mean > 0.0 {
            mean.max(4.0 * tolerance)
        } else {
            1.0
        };

        let mut index = Self {
            source,
            tolerance,
            cell,
            buckets: HashMap::new(),
            oversized: Vec::new(),
        };
        for (e, (a, b)) in source.segments().enumerate() {
            let (lo_x, lo_y) = index.bucket(Point2::new(a.x.min(b.x) - tolerance, a.y.min(b.y) - tolerance));
            let (hi_x, hi_y) = index.bucket(Point2::new(a.x.max(b.x) + tolerance, a.y.max(b.y) + tolerance));
            if hi_x - lo_x > MAX_BUCKET_SPAN || hi_y - lo_y > MAX_BUCKET_SPAN {
                index.oversized.push(e);
                continue;
            }
            for i in lo_x..=hi_x {
                for j in lo_y..=hi_y {
                    index.buckets.entry((i, j)).or_default().push(e);
                }
            }
        }
        index
    }

    #[inline]
    fn bucket(&self, p: Point2) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    /// Best source edge for the target segment `[a, b]`, if any lies under it.
    pub fn best_match(&self, a: Point2, b: Point2) -> Option<usize> {
        let candidates = self
            .buckets
            .get(&self.bucket(a))
            .into_iter()
            .flatten()
            .chain(self.oversized.iter());
        let mut best: Option<(f64, usize)> = None;
        for &e in candidates {
            let (s0, s1) = self.source.edge_segment(e);
            let da = point_segment_distance(a, s0, s1);
            if da > self.tolerance {
                continue;
            }
            let db = point_segment_distance(b, s0, s1);
            if db > self.tolerance {
                continue;
            }
            let score = da.max(db);
            let better = match best {
                None => true,
                Some((s, i)) => score < s || (score == s && e < i),
            };
            if better {
                best = Some((score, e));
            }
        }
        best.map(|(_, e)| e)
    }

    /// Tag of the best source edge under `[a, b]`.
    pub fn tag_for(&self, a: Point2, b: Point2) -> Option<BoundaryTag> {
        self.best_match(a, b).and_then(|e| self.source.edge_tag(e))
    }
}

/// Computes tags for the edges of `target` from the coincident edges of `source`.
///
/// The result is a function of its inputs only: repeated calls give identical
/// maps, with or without the `rayon` feature.
pub fn propagate_tags(
    source: &Contour,
    target: &Contour,
    options: &TransferOptions,
) -> Result<BoundaryTagMap, BridgeError> {
    options.validate()?;
    let index = SegmentIndex::new(source, options.tolerance);
    let lookup = |edge: usize| {
        let (a, b) = target.edge_segment(edge);
        match (index.tag_for(a, b), options.unmatched) {
            (Some(tag), _) => Some((edge, tag)),
            (None, UnmatchedPolicy::Default) => Some((edge, DEFAULT_TAG)),
            (None, UnmatchedPolicy::Omit) => None,
        }
    };

    #[cfg(feature = "rayon")]
    let tags: BoundaryTagMap = (0..target.n_edges())
        .into_par_iter()
        .filter_map(lookup)
        .collect::<Vec<_>>()
        .into_iter()
        .collect();
    #[cfg(not(feature = "rayon"))]
    let tags: BoundaryTagMap = (0..target.n_edges()).filter_map(lookup).collect();

    log::trace!(
        "propagate_tags: {} of {} target edges tagged from {} source edges",
        tags.len(),
        target.n_edges(),
        source.n_edges()
    );
    Ok(tags)
}

/// Writes tags from `source` onto the matching edges of `target`.
///
/// Unmatched edges keep their current tag. Returns the number of edges written.
pub fn add_tags_from_contour(
    target: &mut Contour,
    source: &Contour,
    tolerance: f64,
) -> Result<usize, BridgeError> {
    let tags = propagate_tags(source, target, &TransferOptions::with_tolerance(tolerance))?;
    target.add_edge_tags(&tags);
    Ok(tags.len())
}

/// Resets every edge of `target` to the default tag, then applies each source
/// in order. A later source overwrites an earlier one on edges both cover.
pub fn setbc_from_conts<'a, I>(target: &mut Contour, sources: I, tolerance: f64) -> Result<(), BridgeError>
where
    I: IntoIterator<Item = &'a Contour>,
{
    TransferOptions::with_tolerance(tolerance).validate()?;
    target.reset_tags();
    for source in sources {
        add_tags_from_contour(target, source, tolerance)?;
    }
    Ok(())
}
