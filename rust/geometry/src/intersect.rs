// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Intersection primitives shared by clipping and cross sections

use nalgebra::{Point2, Point3, Vector3};
use smallvec::SmallVec;

/// Scratch polygon produced by clipping a triangle
pub type ClippedPolygon = SmallVec<[Point3<f64>; 8]>;

/// Plane definition
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Point on the plane
    pub point: Point3<f64>,
    /// Unit normal
    pub normal: Vector3<f64>,
}

impl Plane {
    pub fn new(point: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            point,
            normal: normal.normalize(),
        }
    }

    /// Signed distance, positive in front of the plane
    #[inline]
    pub fn signed_distance(&self, point: &Point3<f64>) -> f64 {
        (point - self.point).dot(&self.normal)
    }
}

/// Point where segment `ab` crosses `plane`, `None` when both ends lie
/// strictly on one side or the segment lies in the plane
pub fn segment_plane_intersection(
    a: &Point3<f64>,
    b: &Point3<f64>,
    plane: &Plane,
) -> Option<Point3<f64>> {
    let da = plane.signed_distance(a);
    let db = plane.signed_distance(b);
    if (da > 0.0 && db > 0.0) || (da < 0.0 && db < 0.0) {
        return None;
    }
    let denom = da - db;
    if denom.abs() < 1e-15 {
        // Both on the plane
        return None;
    }
    let t = da / denom;
    Some(a + (b - a) * t)
}

/// Möller–Trumbore ray/triangle intersection, returning the ray parameter
pub fn ray_triangle_intersection(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    triangle: &[Point3<f64>; 3],
) -> Option<f64> {
    const EPSILON: f64 = 1e-12;
    let edge1 = triangle[1] - triangle[0];
    let edge2 = triangle[2] - triangle[0];
    let h = direction.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < EPSILON {
        return None;
    }
    let f = 1.0 / a;
    let s = origin - triangle[0];
    let u = f * s.dot(&h);
    if !(-EPSILON..=1.0 + EPSILON).contains(&u) {
        return None;
    }
    let q = s.cross(&edge1);
    let v = f * direction.dot(&q);
    if v < -EPSILON || u + v > 1.0 + EPSILON {
        return None;
    }
    let t = f * edge2.dot(&q);
    (t >= -EPSILON).then_some(t)
}

/// Clip a convex polygon to the half-space in front of `plane`
fn clip_to_half_space(polygon: &[Point3<f64>], plane: &Plane) -> ClippedPolygon {
    let mut out = ClippedPolygon::new();
    let n = polygon.len();
    for i in 0..n {
        let current = &polygon[i];
        let next = &polygon[(i + 1) % n];
        let dc = plane.signed_distance(current);
        let dn = plane.signed_distance(next);
        if dc >= 0.0 {
            out.push(*current);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            let t = dc / (dc - dn);
            out.push(current + (next - current) * t);
        }
    }
    out
}

/// Portion of a triangle inside the horizontal slab `z_min..=z_max`
pub fn clip_triangle_to_slab(triangle: &[Point3<f64>; 3], z_min: f64, z_max: f64) -> ClippedPolygon {
    let below_top = Plane::new(Point3::new(0.0, 0.0, z_max), -Vector3::z());
    let above_bottom = Plane::new(Point3::new(0.0, 0.0, z_min), Vector3::z());
    let clipped = clip_to_half_space(triangle, &below_top);
    if clipped.is_empty() {
        return clipped;
    }
    clip_to_half_space(&clipped, &above_bottom)
}

/// Distance from `p` to segment `ab` in 2D
pub fn point_segment_distance_2d(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f64::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Minimum distance between segments `ab` and `cd` in 2D
pub fn segment_segment_distance_2d(
    a: &Point2<f64>,
    b: &Point2<f64>,
    c: &Point2<f64>,
    d: &Point2<f64>,
) -> f64 {
    let r = b - a;
    let s = d - c;
    let denom = r.perp(&s);
    if denom.abs() > f64::EPSILON {
        let qp = c - a;
        let t = qp.perp(&s) / denom;
        let u = qp.perp(&r) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            return 0.0;
        }
    }
    point_segment_distance_2d(a, c, d)
        .min(point_segment_distance_2d(b, c, d))
        .min(point_segment_distance_2d(c, a, b))
        .min(point_segment_distance_2d(d, a, b))
}

/// True when segment `ab` meets the closed rectangle `[lo, hi]`
/// (Liang–Barsky). An empty rectangle is never met.
pub fn segment_meets_rect_2d(a: &Point2<f64>, b: &Point2<f64>, lo: &Point2<f64>, hi: &Point2<f64>) -> bool {
    if lo.x > hi.x || lo.y > hi.y {
        return false;
    }
    let d = b - a;
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [
        (-d.x, a.x - lo.x),
        (d.x, hi.x - a.x),
        (-d.y, a.y - lo.y),
        (d.y, hi.y - a.y),
    ] {
        if p.abs() <= f64::EPSILON {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return false;
        }
    }
    true
}
