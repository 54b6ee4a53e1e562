// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 2D polygon Boolean operations for cross-section clipping
//!
//! Section polygons are clipped against collapse-pillar footprints with a
//! Weiler–Atherton boundary traversal. The traversal expects the subject
//! wound clockwise and the clip counter-clockwise; both rings are walked
//! forward for a difference and the clip is walked backward for an
//! intersection. Inputs the traversal cannot classify (vertices touching
//! the other boundary, collinear overlapping edges) are handed to i_overlay.

use crate::error::{Error, Result};
use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use nalgebra::Point2;
use tracing::debug;

/// Parametric tolerance for edge crossings
const EPSILON_2D: f64 = 1e-9;

/// Polygons smaller than this are considered degenerate
const MIN_AREA_THRESHOLD: f64 = 1e-10;

/// A polygon with optional holes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shape2D {
    pub outer: Vec<Point2<f64>>,
    pub holes: Vec<Vec<Point2<f64>>>,
}

impl Shape2D {
    pub fn new(outer: Vec<Point2<f64>>) -> Self {
        Self {
            outer,
            holes: Vec::new(),
        }
    }

    /// Enclosed area (outer minus holes)
    pub fn area(&self) -> f64 {
        signed_area(&self.outer).abs() - self.holes.iter().map(|h| signed_area(h).abs()).sum::<f64>()
    }
}

/// Boolean operation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    Difference,
    Intersection,
}

/// Signed area, positive for counter-clockwise rings
pub fn signed_area(contour: &[Point2<f64>]) -> f64 {
    let n = contour.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += contour[i].x * contour[j].y - contour[j].x * contour[i].y;
    }
    area * 0.5
}

pub fn is_valid_contour(contour: &[Point2<f64>]) -> bool {
    contour.len() >= 3 && signed_area(contour).abs() > MIN_AREA_THRESHOLD
}

pub fn ensure_ccw(contour: &[Point2<f64>]) -> Vec<Point2<f64>> {
    if signed_area(contour) < 0.0 {
        contour.iter().rev().cloned().collect()
    } else {
        contour.to_vec()
    }
}

pub fn ensure_cw(contour: &[Point2<f64>]) -> Vec<Point2<f64>> {
    if signed_area(contour) > 0.0 {
        contour.iter().rev().cloned().collect()
    } else {
        contour.to_vec()
    }
}

/// Even-odd ray casting test
pub fn point_in_contour(point: &Point2<f64>, contour: &[Point2<f64>]) -> bool {
    let n = contour.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = &contour[i];
        let pj = &contour[j];
        if ((pi.y > point.y) != (pj.y > point.y))
            && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

pub fn contour_bounds(contour: &[Point2<f64>]) -> Option<(Point2<f64>, Point2<f64>)> {
    let first = contour.first()?;
    let mut min = *first;
    let mut max = *first;
    for p in contour.iter().skip(1) {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    Some((min, max))
}

pub fn bounds_overlap(
    a: &(Point2<f64>, Point2<f64>),
    b: &(Point2<f64>, Point2<f64>),
) -> bool {
    a.0.x <= b.1.x && a.1.x >= b.0.x && a.0.y <= b.1.y && a.1.y >= b.0.y
}

#[derive(Debug, Clone, Copy)]
struct Crossing {
    point: Point2<f64>,
    subject_edge: usize,
    t: f64,
    clip_edge: usize,
    u: f64,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    point: Point2<f64>,
    crossing: Option<usize>,
}

/// Proper crossing of segments `p0p1` and `q0q1`.
///
/// `Ok(None)` when they miss, `Err` when they touch at an endpoint or
/// overlap collinearly.
fn segment_crossing(
    p0: &Point2<f64>,
    p1: &Point2<f64>,
    q0: &Point2<f64>,
    q1: &Point2<f64>,
) -> Result<Option<(f64, f64)>> {
    let r = p1 - p0;
    let s = q1 - q0;
    let qp = q0 - p0;
    let denom = r.perp(&s);
    let scale = r.norm() * s.norm();

    if denom.abs() <= EPSILON_2D * scale {
        // Parallel: only collinear overlaps matter
        if qp.perp(&r).abs() > EPSILON_2D * scale.max(1.0) {
            return Ok(None);
        }
        let rr = r.dot(&r);
        if rr <= 0.0 {
            return Ok(None);
        }
        let t0 = qp.dot(&r) / rr;
        let t1 = t0 + s.dot(&r) / rr;
        let (lo, hi) = if t0 < t1 { (t0, t1) } else { (t1, t0) };
        if hi < -EPSILON_2D || lo > 1.0 + EPSILON_2D {
            return Ok(None);
        }
        return Err(Error::InvalidPolygon("collinear overlapping edges".to_string()));
    }

    let t = qp.perp(&s) / denom;
    let u = qp.perp(&r) / denom;
    let outside = |x: f64| !(-EPSILON_2D..=1.0 + EPSILON_2D).contains(&x);
    if outside(t) || outside(u) {
        return Ok(None);
    }
    let touches = |x: f64| x.abs() <= EPSILON_2D || (1.0 - x).abs() <= EPSILON_2D;
    if touches(t) || touches(u) {
        return Err(Error::InvalidPolygon("vertex on boundary".to_string()));
    }
    Ok(Some((t, u)))
}

/// Interleave ring vertices with the crossings on each edge
fn build_ring(
    ring: &[Point2<f64>],
    crossings: &[Crossing],
    edge_of: impl Fn(&Crossing) -> (usize, f64),
) -> (Vec<Node>, Vec<usize>) {
    let mut nodes = Vec::with_capacity(ring.len() + crossings.len());
    let mut position = vec![0usize; crossings.len()];
    for (edge, point) in ring.iter().enumerate() {
        nodes.push(Node {
            point: *point,
            crossing: None,
        });
        let mut on_edge: Vec<(f64, usize)> = crossings
            .iter()
            .enumerate()
            .filter_map(|(c, x)| {
                let (e, param) = edge_of(x);
                (e == edge).then_some((param, c))
            })
            .collect();
        on_edge.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, c) in on_edge {
            position[c] = nodes.len();
            nodes.push(Node {
                point: crossings[c].point,
                crossing: Some(c),
            });
        }
    }
    (nodes, position)
}

/// Weiler–Atherton Boolean of two simple polygons.
///
/// `subject` must be clockwise and `clip` counter-clockwise. Errors when the
/// configuration is degenerate for boundary traversal.
pub fn weiler_atherton(
    subject: &[Point2<f64>],
    clip: &[Point2<f64>],
    op: BoolOp,
) -> Result<Vec<Shape2D>> {
    if !is_valid_contour(subject) || !is_valid_contour(clip) {
        return Err(Error::InvalidPolygon(
            "contours need at least 3 points and non-zero area".to_string(),
        ));
    }

    let (ns, nc) = (subject.len(), clip.len());
    let mut crossings = Vec::new();
    for i in 0..ns {
        let (p0, p1) = (&subject[i], &subject[(i + 1) % ns]);
        for j in 0..nc {
            let (q0, q1) = (&clip[j], &clip[(j + 1) % nc]);
            if let Some((t, u)) = segment_crossing(p0, p1, q0, q1)? {
                crossings.push(Crossing {
                    point: p0 + (p1 - p0) * t,
                    subject_edge: i,
                    t,
                    clip_edge: j,
                    u,
                });
            }
        }
    }

    if crossings.is_empty() {
        return Ok(nested_result(subject, clip, op));
    }
    if crossings.len() % 2 != 0 {
        return Err(Error::InvalidPolygon(format!(
            "odd number of crossings ({})",
            crossings.len()
        )));
    }

    let (subject_nodes, subject_pos) = build_ring(subject, &crossings, |c| (c.subject_edge, c.t));
    let (clip_nodes, clip_pos) = build_ring(clip, &crossings, |c| (c.clip_edge, c.u));

    // Whether the subject runs inside the clip right after each crossing
    let enters: Vec<bool> = (0..crossings.len())
        .map(|c| {
            let a = subject_nodes[subject_pos[c]].point;
            let b = subject_nodes[(subject_pos[c] + 1) % subject_nodes.len()].point;
            point_in_contour(&Point2::from((a.coords + b.coords) * 0.5), clip)
        })
        .collect();

    let clip_forward = op == BoolOp::Difference;
    let starts_outside = op == BoolOp::Difference;
    let step_limit = 2 * (subject_nodes.len() + clip_nodes.len());

    let mut visited = vec![false; crossings.len()];
    let mut shapes = Vec::new();

    for start in 0..crossings.len() {
        if visited[start] || enters[start] == starts_outside {
            continue;
        }
        let mut ring = Vec::new();
        let mut on_subject = true;
        let mut c = start;
        let mut steps = 0;

        loop {
            visited[c] = true;
            ring.push(crossings[c].point);

            let (nodes, pos, forward) = if on_subject {
                (&subject_nodes, subject_pos[c], true)
            } else {
                (&clip_nodes, clip_pos[c], clip_forward)
            };
            let n = nodes.len();
            let mut k = pos;
            let next = loop {
                k = if forward { (k + 1) % n } else { (k + n - 1) % n };
                steps += 1;
                if steps > step_limit {
                    return Err(Error::InvalidPolygon("traversal did not close".to_string()));
                }
                match nodes[k].crossing {
                    Some(next) => break next,
                    None => ring.push(nodes[k].point),
                }
            };

            // Leaving the subject must happen where it dives into the region
            // being removed (difference) or leaves the kept one (intersection)
            let expected_switch = if on_subject {
                enters[next] == starts_outside
            } else {
                enters[next] != starts_outside
            };
            if !expected_switch {
                return Err(Error::InvalidPolygon(
                    "inconsistent entry/exit classification".to_string(),
                ));
            }

            c = next;
            if c == start {
                break;
            }
            on_subject = !on_subject;
        }

        if is_valid_contour(&ring) {
            shapes.push(Shape2D::new(ring));
        }
    }

    Ok(shapes)
}

/// Result when the boundaries never cross
fn nested_result(subject: &[Point2<f64>], clip: &[Point2<f64>], op: BoolOp) -> Vec<Shape2D> {
    let subject_in_clip = subject.iter().all(|p| point_in_contour(p, clip));
    let clip_in_subject = clip.iter().all(|p| point_in_contour(p, subject));

    match op {
        BoolOp::Difference if subject_in_clip => Vec::new(),
        BoolOp::Difference if clip_in_subject => vec![Shape2D {
            outer: subject.to_vec(),
            holes: vec![clip.to_vec()],
        }],
        BoolOp::Difference => vec![Shape2D::new(subject.to_vec())],
        BoolOp::Intersection if subject_in_clip => vec![Shape2D::new(subject.to_vec())],
        BoolOp::Intersection if clip_in_subject => vec![Shape2D::new(clip.to_vec())],
        BoolOp::Intersection => Vec::new(),
    }
}

fn contour_to_path(contour: &[Point2<f64>]) -> Vec<[f64; 2]> {
    contour.iter().map(|p| [p.x, p.y]).collect()
}

fn path_to_contour(path: &[[f64; 2]]) -> Vec<Point2<f64>> {
    path.iter().map(|p| Point2::new(p[0], p[1])).collect()
}

/// Boolean via i_overlay. Each output shape is an outer ring followed by holes.
pub fn overlay(subject: &[Point2<f64>], clip: &[Point2<f64>], op: BoolOp) -> Vec<Shape2D> {
    overlay_paths(vec![contour_to_path(subject)], clip, op)
}

fn overlay_paths(subject_paths: Vec<Vec<[f64; 2]>>, clip: &[Point2<f64>], op: BoolOp) -> Vec<Shape2D> {
    let clip_paths = vec![contour_to_path(clip)];
    let rule = match op {
        BoolOp::Difference => OverlayRule::Difference,
        BoolOp::Intersection => OverlayRule::Intersect,
    };
    let result = subject_paths.overlay(&clip_paths, rule, FillRule::EvenOdd);

    result
        .iter()
        .filter_map(|shape| {
            let (outer, holes) = shape.split_first()?;
            let outer = path_to_contour(outer);
            if !is_valid_contour(&outer) {
                return None;
            }
            Some(Shape2D {
                outer,
                holes: holes
                    .iter()
                    .map(|h| path_to_contour(h))
                    .filter(|h| is_valid_contour(h))
                    .collect(),
            })
        })
        .collect()
}

/// `subject − clip`, normalising winding first and falling back to
/// i_overlay when boundary traversal cannot classify the crossings
pub fn difference(subject: &[Point2<f64>], clip: &[Point2<f64>]) -> Vec<Shape2D> {
    boolean(subject, clip, BoolOp::Difference)
}

/// `shape` minus `clip`, holes included
pub fn shape_difference(shape: &Shape2D, clip: &[Point2<f64>]) -> Vec<Shape2D> {
    if shape.holes.is_empty() {
        return difference(&shape.outer, clip);
    }
    let subject_paths = std::iter::once(&shape.outer)
        .chain(&shape.holes)
        .map(|ring| contour_to_path(ring))
        .collect();
    overlay_paths(subject_paths, clip, BoolOp::Difference)
}

pub fn intersection(subject: &[Point2<f64>], clip: &[Point2<f64>]) -> Vec<Shape2D> {
    boolean(subject, clip, BoolOp::Intersection)
}

fn boolean(subject: &[Point2<f64>], clip: &[Point2<f64>], op: BoolOp) -> Vec<Shape2D> {
    let subject = ensure_cw(subject);
    let clip = ensure_ccw(clip);
    match weiler_atherton(&subject, &clip, op) {
        Ok(shapes) => shapes,
        Err(e) => {
            debug!(error = %e, ?op, "Weiler-Atherton traversal failed, using overlay");
            overlay(&subject, &clip, op)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point2<f64>> {
        vec![
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ]
    }

    fn total_area(shapes: &[Shape2D]) -> f64 {
        shapes.iter().map(Shape2D::area).sum()
    }

    #[test]
    fn test_signed_area_orientation() {
        let ccw = square(0.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(signed_area(&ccw), 1.0);
        assert_relative_eq!(signed_area(&ensure_cw(&ccw)), -1.0);
        assert_relative_eq!(signed_area(&ensure_ccw(&ensure_cw(&ccw))), 1.0);
    }

    #[test]
    fn test_weiler_atherton_difference_corner() {
        let subject = ensure_cw(&square(0.0, 0.0, 2.0, 2.0));
        let clip = square(1.0, 1.0, 3.0, 3.0);
        let shapes = weiler_atherton(&subject, &clip, BoolOp::Difference).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].outer.len(), 6);
        assert_relative_eq!(total_area(&shapes), 3.0, epsilon = 1e-9);
        assert!(!point_in_contour(&Point2::new(1.5, 1.5), &shapes[0].outer));
        assert!(point_in_contour(&Point2::new(0.5, 0.5), &shapes[0].outer));
    }

    #[test]
    fn test_weiler_atherton_intersection_corner() {
        let subject = ensure_cw(&square(0.0, 0.0, 2.0, 2.0));
        let clip = square(1.0, 1.0, 3.0, 3.0);
        let shapes = weiler_atherton(&subject, &clip, BoolOp::Intersection).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_relative_eq!(total_area(&shapes), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_weiler_atherton_split_in_two() {
        // A vertical bar through the middle of a wide rectangle
        let subject = ensure_cw(&square(0.0, 0.0, 4.0, 1.0));
        let clip = square(1.5, -1.0, 2.5, 2.0);
        let shapes = weiler_atherton(&subject, &clip, BoolOp::Difference).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_relative_eq!(total_area(&shapes), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nested_difference_makes_hole() {
        let subject = ensure_cw(&square(0.0, 0.0, 10.0, 10.0));
        let clip = square(4.0, 4.0, 6.0, 6.0);
        let shapes = weiler_atherton(&subject, &clip, BoolOp::Difference).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].holes.len(), 1);
        assert_relative_eq!(total_area(&shapes), 96.0, epsilon = 1e-9);
    }

    #[test]
    fn test_disjoint_and_covered() {
        let subject = ensure_cw(&square(0.0, 0.0, 1.0, 1.0));
        let far = square(5.0, 5.0, 6.0, 6.0);
        let cover = square(-1.0, -1.0, 2.0, 2.0);
        assert_eq!(
            weiler_atherton(&subject, &far, BoolOp::Difference).unwrap().len(),
            1
        );
        assert!(weiler_atherton(&subject, &cover, BoolOp::Difference)
            .unwrap()
            .is_empty());
        assert!(weiler_atherton(&subject, &far, BoolOp::Intersection)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_collinear_edges_fall_back_to_overlay() {
        let subject = ensure_cw(&square(0.0, 0.0, 2.0, 2.0));
        let clip = square(1.0, 0.0, 3.0, 2.0);
        assert!(weiler_atherton(&subject, &clip, BoolOp::Difference).is_err());

        let shapes = difference(&subject, &clip);
        assert_relative_eq!(total_area(&shapes), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_difference_normalises_winding() {
        // Subject given counter-clockwise, clip clockwise
        let subject = square(0.0, 0.0, 2.0, 2.0);
        let clip = ensure_cw(&square(1.0, 1.0, 3.0, 3.0));
        let shapes = difference(&subject, &clip);
        assert_relative_eq!(total_area(&shapes), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shape_difference_keeps_holes() {
        let shape = Shape2D {
            outer: square(0.0, 0.0, 4.0, 4.0),
            holes: vec![square(1.0, 1.0, 2.0, 3.0)],
        };
        let shapes = shape_difference(&shape, &square(3.0, 0.0, 5.0, 4.0));
        assert_relative_eq!(total_area(&shapes), 10.0, epsilon = 1e-9);
        assert_eq!(shapes.iter().map(|s| s.holes.len()).sum::<usize>(), 1);

        // A cut through the hole opens it up
        let shapes = shape_difference(&shape, &square(1.5, 2.0, 5.0, 2.5));
        assert_relative_eq!(total_area(&shapes), 14.0 - 1.25, epsilon = 1e-9);
    }

    #[test]
    fn test_point_in_contour() {
        let contour = square(0.0, 0.0, 10.0, 10.0);
        assert!(point_in_contour(&Point2::new(5.0, 5.0), &contour));
        assert!(!point_in_contour(&Point2::new(15.0, 5.0), &contour));
    }

    #[test]
    fn test_bounds_overlap() {
        let a = contour_bounds(&square(0.0, 0.0, 10.0, 10.0)).unwrap();
        let b = contour_bounds(&square(5.0, 5.0, 15.0, 15.0)).unwrap();
        let c = contour_bounds(&square(20.0, 20.0, 30.0, 30.0)).unwrap();
        assert!(bounds_overlap(&a, &b));
        assert!(!bounds_overlap(&a, &c));
    }
}
