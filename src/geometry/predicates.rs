//! Small planar predicates shared by tag transfer and the in-process engine.

use super::point::Point2;

/// Distance from `p` to the closed segment `[a, b]`.
pub fn point_segment_distance(p: Point2, a: Point2, b: Point2) -> f64 {
    let ab = b.sub(a);
    let len_sq = ab.dot(ab);
    if len_sq == 0.0 {
        return p.dist(a);
    }
    let t = (p.sub(a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.dist(a.add_scaled(ab, t))
}

/// Even-odd point-in-region test over an arbitrary set of segments.
///
/// Works for multiply connected regions as long as every loop is closed.
/// Points exactly on a segment are classified arbitrarily.
pub fn point_in_region<I>(p: Point2, segments: I) -> bool
where
    I: IntoIterator<Item = (Point2, Point2)>,
{
    let mut inside = false;
    for (a, b) in segments {
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

/// Vertex average of a polygon. Used as a cheap interior probe for convex cells.
pub fn vertex_centroid(points: &[Point2]) -> Point2 {
    if points.is_empty() {
        return Point2::ORIGIN;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2::new(sx / n, sy / n)
}
