// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clip volumes for ground modifications
//!
//! A [`FrustumGeoArea`] is a vertical prism: a counter-clockwise footprint in
//! the tile-local XY plane extruded between two heights. [`FrustumTester`]
//! answers sphere and triangle queries against it, and the area converts into
//! a closed brush for CSG subtraction.

use crate::bool2d::{ensure_ccw, is_valid_contour, point_in_contour};
use crate::buffer::{TileGeometry, VertexRecord};
use crate::error::{Error, Result};
use crate::intersect::{
    clip_triangle_to_slab, point_segment_distance_2d, segment_meets_rect_2d, segment_segment_distance_2d,
};
use crate::triangulation::triangulate_polygon;
use nalgebra::{Point2, Point3, Vector3};
use strata_core::FaceType;

/// Vertical prism over a local footprint
#[derive(Debug, Clone, PartialEq)]
pub struct FrustumGeoArea {
    footprint: Vec<Point2<f64>>,
    pub bottom: f64,
    pub top: f64,
}

impl FrustumGeoArea {
    /// Footprint winding is normalised to counter-clockwise
    pub fn new(footprint: Vec<Point2<f64>>, bottom: f64, top: f64) -> Result<Self> {
        let mut footprint = footprint;
        if footprint.len() > 1 && footprint.first() == footprint.last() {
            footprint.pop();
        }
        if !is_valid_contour(&footprint) {
            return Err(Error::InvalidPolygon(format!(
                "footprint with {} points has no area",
                footprint.len()
            )));
        }
        if !(top > bottom) {
            return Err(Error::InvalidPolygon(format!(
                "clip volume top {} is not above bottom {}",
                top, bottom
            )));
        }
        Ok(Self {
            footprint: ensure_ccw(&footprint),
            bottom,
            top,
        })
    }

    pub fn footprint(&self) -> &[Point2<f64>] {
        &self.footprint
    }

    /// Bounding sphere of the prism
    pub fn bounding_sphere(&self) -> (Point3<f64>, f64) {
        let n = self.footprint.len() as f64;
        let (sx, sy) = self
            .footprint
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
        let center = Point3::new(sx / n, sy / n, (self.top + self.bottom) * 0.5);
        let half_height = (self.top - self.bottom) * 0.5;
        let radius = self
            .footprint
            .iter()
            .map(|p| ((p.x - center.x).powi(2) + (p.y - center.y).powi(2) + half_height.powi(2)).sqrt())
            .fold(0.0, f64::max);
        (center, radius)
    }

    /// Distance from a 2D point to the footprint boundary
    fn boundary_distance(&self, p: &Point2<f64>) -> f64 {
        let n = self.footprint.len();
        (0..n)
            .map(|i| point_segment_distance_2d(p, &self.footprint[i], &self.footprint[(i + 1) % n]))
            .fold(f64::MAX, f64::min)
    }

    /// Closed prism brush tagged as boundary faces
    pub fn to_brush(&self) -> Result<TileGeometry> {
        extrude_prism(&self.footprint, self.bottom, self.top, FaceType::BOUNDARY_SIDE)
    }
}

/// Extrude a counter-clockwise footprint into a closed prism: top cap,
/// reversed bottom cap and two triangles per side
pub fn extrude_prism(
    footprint: &[Point2<f64>],
    bottom: f64,
    top: f64,
    face_type: FaceType,
) -> Result<TileGeometry> {
    let cap = triangulate_polygon(footprint)?;
    let n = footprint.len();
    let mut brush = TileGeometry::with_capacity(cap.len() * 2 + n * 6, 0);

    let up = |p: &Point2<f64>| Point3::new(p.x, p.y, top);
    let down = |p: &Point2<f64>| Point3::new(p.x, p.y, bottom);

    for tri in cap.chunks_exact(3) {
        let [a, b, c] = [&footprint[tri[0]], &footprint[tri[1]], &footprint[tri[2]]];
        let ccw = (b - a).perp(&(c - a)) > 0.0;
        let (b, c) = if ccw { (b, c) } else { (c, b) };
        push_triangle(&mut brush, [up(a), up(b), up(c)], face_type);
        push_triangle(&mut brush, [down(a), down(c), down(b)], face_type);
    }

    for i in 0..n {
        let a = &footprint[i];
        let b = &footprint[(i + 1) % n];
        push_triangle(&mut brush, [down(a), down(b), up(b)], face_type);
        push_triangle(&mut brush, [down(a), up(b), up(a)], face_type);
    }

    brush.ensure_index();
    Ok(brush)
}

fn push_triangle(geometry: &mut TileGeometry, corners: [Point3<f64>; 3], face_type: FaceType) {
    let normal = (corners[1] - corners[0])
        .cross(&(corners[2] - corners[0]))
        .try_normalize(1e-12)
        .unwrap_or_else(Vector3::z);
    for p in corners {
        geometry.push_vertex(&VertexRecord {
            position: [p.x as f32, p.y as f32, p.z as f32],
            normal: [normal.x as f32, normal.y as f32, normal.z as f32],
            face_type,
            ..Default::default()
        });
    }
}

/// Sphere classification against a clip volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersects,
    Inside,
}

/// Spatial predicate over one [`FrustumGeoArea`]
#[derive(Debug, Clone)]
pub struct FrustumTester {
    area: FrustumGeoArea,
    sphere_center: Point3<f64>,
    sphere_radius: f64,
    epsilon: f64,
}

impl FrustumTester {
    pub fn new(area: FrustumGeoArea, epsilon: f64) -> Self {
        let (sphere_center, sphere_radius) = area.bounding_sphere();
        Self {
            area,
            sphere_center,
            sphere_radius,
            epsilon,
        }
    }

    pub fn area(&self) -> &FrustumGeoArea {
        &self.area
    }

    pub fn bounding_sphere(&self) -> (Point3<f64>, f64) {
        (self.sphere_center, self.sphere_radius)
    }

    /// Grow the coarse bounding sphere to enclose another sphere
    pub fn expand_to_sphere(&mut self, center: &Point3<f64>, radius: f64) {
        let d = (center - self.sphere_center).norm();
        if d + radius <= self.sphere_radius {
            return;
        }
        if d + self.sphere_radius <= radius {
            self.sphere_center = *center;
            self.sphere_radius = radius;
            return;
        }
        let new_radius = (d + radius + self.sphere_radius) * 0.5;
        let shift = (new_radius - self.sphere_radius) / d;
        self.sphere_center += (center - self.sphere_center) * shift;
        self.sphere_radius = new_radius;
    }

    #[inline]
    fn coarse_reject(&self, center: &Point3<f64>, radius: f64) -> bool {
        (center - self.sphere_center).norm() > self.sphere_radius + radius + self.epsilon
    }

    /// Classify a sphere against the prism
    pub fn intersects_sphere(&self, center: &Point3<f64>, radius: f64) -> Containment {
        if self.coarse_reject(center, radius) {
            return Containment::Outside;
        }
        let area = &self.area;
        if center.z + radius < area.bottom - self.epsilon || center.z - radius > area.top + self.epsilon {
            return Containment::Outside;
        }

        let xy = Point2::new(center.x, center.y);
        let inside = point_in_contour(&xy, area.footprint());
        let edge_distance = area.boundary_distance(&xy);
        if !inside && edge_distance > radius + self.epsilon {
            return Containment::Outside;
        }
        if inside
            && edge_distance >= radius
            && center.z - radius >= area.bottom
            && center.z + radius <= area.top
        {
            return Containment::Inside;
        }
        Containment::Intersects
    }

    /// Exact classification of an axis-aligned box against the prism.
    ///
    /// Overlaps no thicker than the tolerance count as outside, so a box
    /// sharing a face with the volume is not clipped. Inside means the whole
    /// box lies in the volume.
    pub fn classify_aabb(&self, min: &Point3<f64>, max: &Point3<f64>) -> Containment {
        let area = &self.area;
        let eps = self.epsilon;
        let footprint = area.footprint();
        let (lo, hi) = footprint.iter().fold(
            (Point2::new(f64::MAX, f64::MAX), Point2::new(f64::MIN, f64::MIN)),
            |(lo, hi), p| (lo.inf(p), hi.sup(p)),
        );
        if max.x <= lo.x + eps
            || min.x >= hi.x - eps
            || max.y <= lo.y + eps
            || min.y >= hi.y - eps
            || max.z <= area.bottom + eps
            || min.z >= area.top - eps
        {
            return Containment::Outside;
        }

        // Footprint edges reaching into the shrunk box split it
        let inner_lo = Point2::new(min.x + eps, min.y + eps);
        let inner_hi = Point2::new(max.x - eps, max.y - eps);
        let n = footprint.len();
        let crossed = (0..n).any(|i| segment_meets_rect_2d(&footprint[i], &footprint[(i + 1) % n], &inner_lo, &inner_hi));
        if crossed {
            return Containment::Intersects;
        }

        let center = Point2::new((min.x + max.x) * 0.5, (min.y + max.y) * 0.5);
        if !point_in_contour(&center, footprint) {
            return Containment::Outside;
        }
        if min.z >= area.bottom - eps && max.z <= area.top + eps {
            Containment::Inside
        } else {
            Containment::Intersects
        }
    }

    /// True when the triangle touches the prism, within the tester tolerance
    pub fn intersects_triangle(&self, triangle: &[Point3<f64>; 3]) -> bool {
        let centroid = Point3::from((triangle[0].coords + triangle[1].coords + triangle[2].coords) / 3.0);
        let radius = triangle
            .iter()
            .map(|p| (p - centroid).norm())
            .fold(0.0, f64::max);
        if self.coarse_reject(&centroid, radius) {
            return false;
        }

        let area = &self.area;
        let slab = clip_triangle_to_slab(triangle, area.bottom - self.epsilon, area.top + self.epsilon);
        if slab.is_empty() {
            return false;
        }
        let flat: Vec<Point2<f64>> = slab.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let footprint = area.footprint();

        if flat.iter().any(|p| point_in_contour(p, footprint)) {
            return true;
        }
        if footprint.iter().any(|p| point_in_contour(p, &flat)) {
            return true;
        }
        let (n, m) = (flat.len(), footprint.len());
        (0..n).any(|i| {
            (0..m).any(|j| {
                segment_segment_distance_2d(
                    &flat[i],
                    &flat[(i + 1) % n],
                    &footprint[j],
                    &footprint[(j + 1) % m],
                ) <= self.epsilon
            })
        })
    }
}
