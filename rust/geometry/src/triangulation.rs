// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planar polygon triangulation
//!
//! Section polygons and brush caps are planar but arbitrarily oriented in
//! 3D. They are mapped into a [`PlaneBasis`], triangulated with earcutr and
//! the resulting indices applied to the original 3D points.

use crate::{Error, Point2, Point3, Result, Vector3};

/// Orthonormal 2D frame embedded in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneBasis {
    pub origin: Point3<f64>,
    pub u: Vector3<f64>,
    pub v: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl PlaneBasis {
    /// Build a basis from a plane normal, choosing the reference axis
    /// least parallel to it
    pub fn from_normal(origin: Point3<f64>, normal: &Vector3<f64>) -> Self {
        let normal = normal.normalize();
        let (ax, ay, az) = (normal.x.abs(), normal.y.abs(), normal.z.abs());
        let reference = if ax <= ay && ax <= az {
            Vector3::x()
        } else if ay <= az {
            Vector3::y()
        } else {
            Vector3::z()
        };
        let u = normal.cross(&reference).normalize();
        let v = normal.cross(&u).normalize();
        Self { origin, u, v, normal }
    }

    /// Basis with explicit in-plane axes; `v` is made orthogonal to `u`
    pub fn from_axes(origin: Point3<f64>, u: Vector3<f64>, v: Vector3<f64>) -> Option<Self> {
        let u = u.try_normalize(1e-12)?;
        let v = (v - u * v.dot(&u)).try_normalize(1e-12)?;
        Some(Self {
            origin,
            u,
            v,
            normal: u.cross(&v),
        })
    }

    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        let d = p - self.origin;
        Point2::new(d.dot(&self.u), d.dot(&self.v))
    }

    #[inline]
    pub fn unproject(&self, p: &Point2<f64>) -> Point3<f64> {
        self.origin + self.u * p.x + self.v * p.y
    }

    pub fn project_all(&self, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        points.iter().map(|p| self.project(p)).collect()
    }
}

#[inline]
fn is_convex(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0i8;
    for i in 0..n {
        let p0 = &points[i];
        let p1 = &points[(i + 1) % n];
        let p2 = &points[(i + 2) % n];
        let cross = (p1.x - p0.x) * (p2.y - p1.y) - (p1.y - p0.y) * (p2.x - p1.x);
        if cross.abs() > 1e-10 {
            let current = if cross > 0.0 { 1 } else { -1 };
            if sign == 0 {
                sign = current;
            } else if sign != current {
                return false;
            }
        }
    }
    true
}

/// Triangulate a simple 2D polygon, returning indices into `points`
pub fn triangulate_polygon(points: &[Point2<f64>]) -> Result<Vec<usize>> {
    let n = points.len();
    if n < 3 {
        return Err(Error::TriangulationError(format!(
            "need at least 3 points, got {}",
            n
        )));
    }
    if n == 3 {
        return Ok(vec![0, 1, 2]);
    }
    if n <= 8 && is_convex(points) {
        return Ok((1..n - 1).flat_map(|i| [0, i, i + 1]).collect());
    }

    let flat: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y]).collect();
    earcutr::earcut(&flat, &[], 2).map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Triangulate a polygon with holes.
///
/// Indices refer to the outer ring followed by every hole with at least
/// three points, in order.
pub fn triangulate_polygon_with_holes(
    outer: &[Point2<f64>],
    holes: &[Vec<Point2<f64>>],
) -> Result<Vec<usize>> {
    let holes: Vec<&Vec<Point2<f64>>> = holes.iter().filter(|h| h.len() >= 3).collect();
    if holes.is_empty() {
        return triangulate_polygon(outer);
    }
    if outer.len() < 3 {
        return Err(Error::TriangulationError(
            "need at least 3 points in outer boundary".to_string(),
        ));
    }

    let mut flat: Vec<f64> = outer.iter().flat_map(|p| [p.x, p.y]).collect();
    let mut hole_starts = Vec::with_capacity(holes.len());
    for hole in holes {
        hole_starts.push(flat.len() / 2);
        flat.extend(hole.iter().flat_map(|p| [p.x, p.y]));
    }
    earcutr::earcut(&flat, &hole_starts, 2)
        .map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Newell normal of a 3D polygon, `None` when degenerate
pub fn polygon_normal(points: &[Point3<f64>]) -> Option<Vector3<f64>> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let mut normal = Vector3::<f64>::zeros();
    for i in 0..n {
        let current = &points[i];
        let next = &points[(i + 1) % n];
        normal.x += (current.y - next.y) * (current.z + next.z);
        normal.y += (current.z - next.z) * (current.x + next.x);
        normal.z += (current.x - next.x) * (current.y + next.y);
    }
    normal.try_normalize(1e-12)
}

/// Triangulate a planar 3D polygon within a known basis
pub fn triangulate_in_basis(points: &[Point3<f64>], basis: &PlaneBasis) -> Result<Vec<usize>> {
    triangulate_polygon(&basis.project_all(points))
}

/// Triangulate a planar 3D polygon, deriving the plane from its vertices
pub fn triangulate_planar(points: &[Point3<f64>]) -> Result<Vec<usize>> {
    let normal = polygon_normal(points)
        .ok_or_else(|| Error::TriangulationError("degenerate polygon".to_string()))?;
    let basis = PlaneBasis::from_normal(points[0], &normal);
    triangulate_in_basis(points, &basis)
}
