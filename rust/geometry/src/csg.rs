// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CSG (Constructive Solid Geometry) subtraction
//!
//! [`ClippableGeometry`] holds one closed brush and subtracts other closed
//! volumes from it with csgrs. Voxels and collapse pillars both compose it.

use crate::buffer::{AttributeSet, TileGeometry, VertexRecord};
use crate::error::{Error, Result};
use crate::triangulation::{polygon_normal, triangulate_in_basis, PlaneBasis};
use crate::uv::UvMapper;
use csgrs::mesh::{polygon::Polygon, vertex::Vertex, Mesh as CSGMesh};
use csgrs::traits::CSG;
use nalgebra::{Point3, Vector3};
use strata_core::FaceType;

/// Per-polygon attributes carried through the BSP
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceMeta {
    face_type: FaceType,
    material_id: u16,
    voxel_index: u32,
    layer_index: u32,
}

/// A closed brush that supports Boolean subtraction
#[derive(Debug, Clone, Default)]
pub struct ClippableGeometry {
    brush: TileGeometry,
}

impl ClippableGeometry {
    pub fn new(brush: TileGeometry) -> Self {
        Self { brush }
    }

    pub fn brush(&self) -> &TileGeometry {
        &self.brush
    }

    pub fn into_brush(self) -> TileGeometry {
        self.brush
    }

    /// Compute `brush − other`.
    ///
    /// Faces cut out of `other` become `BOUNDARY_SIDE` walls carrying the
    /// brush's material, voxel and layer. Both operands are expected to be
    /// closed; callers validate that before getting here.
    pub fn clip_against(
        &self,
        other: &TileGeometry,
        attributes: AttributeSet,
        uv: Option<&UvMapper>,
    ) -> Result<TileGeometry> {
        let host = brush_to_csgrs(&self.brush, true)?;
        let cutter = brush_to_csgrs(other, false)?;

        let fallback = self.dominant_meta();
        let result = host.difference(&cutter);
        let mut geometry = csgrs_to_geometry(&result, fallback, uv)?;

        geometry.retain_attributes(attributes);
        geometry.ensure_index();
        Ok(geometry)
    }

    /// Attributes of the brush's first vertex, used for cut walls
    fn dominant_meta(&self) -> FaceMeta {
        let v = self.brush.vertex(0);
        FaceMeta {
            face_type: FaceType::BOUNDARY_SIDE,
            material_id: v.material_id,
            voxel_index: v.voxel_index,
            layer_index: v.layer_index,
        }
    }
}

fn brush_to_csgrs(geometry: &TileGeometry, keep_meta: bool) -> Result<CSGMesh<FaceMeta>> {
    let mut polygons = Vec::with_capacity(geometry.triangle_count());

    for t in 0..geometry.triangle_count() {
        let [a, b, c] = geometry.triangle_vertices(t);
        let [p0, p1, p2] = geometry.triangle_positions(t);

        let face_normal = match (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-12) {
            Some(n) => n,
            None => continue,
        };

        let meta = keep_meta.then(|| {
            let first = geometry.vertex(a);
            FaceMeta {
                face_type: geometry.triangle_face_type(t),
                material_id: first.material_id,
                voxel_index: first.voxel_index,
                layer_index: first.layer_index,
            }
        });

        let vertices = [a, b, c]
            .iter()
            .zip([p0, p1, p2])
            .map(|(&i, p)| {
                let n = geometry.vertex(i).normal;
                let normal = Vector3::new(n[0] as f64, n[1] as f64, n[2] as f64)
                    .try_normalize(1e-12)
                    .unwrap_or(face_normal);
                Vertex::new(p, normal)
            })
            .collect();

        polygons.push(Polygon::new(vertices, meta));
    }

    if polygons.is_empty() {
        return Err(Error::csg("operand has no non-degenerate triangles"));
    }
    Ok(CSGMesh::from_polygons(&polygons, None))
}

fn csgrs_to_geometry(
    mesh: &CSGMesh<FaceMeta>,
    fallback: FaceMeta,
    uv: Option<&UvMapper>,
) -> Result<TileGeometry> {
    let mut geometry = TileGeometry::new();

    for polygon in &mesh.polygons {
        let vertices = &polygon.vertices;
        if vertices.len() < 3 {
            continue;
        }
        let points: Vec<Point3<f64>> = vertices.iter().map(|v| v.pos).collect();
        if points
            .iter()
            .any(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(Error::csg("non-finite vertex in Boolean result"));
        }

        // Split polygons keep interpolated vertex normals; the plane comes
        // from the positions
        let normal = match polygon_normal(&points) {
            Some(n) => n,
            None => continue,
        };

        let meta = polygon.metadata.unwrap_or(fallback);

        let triangles = if points.len() == 3 {
            vec![0, 1, 2]
        } else {
            let basis = PlaneBasis::from_normal(points[0], &normal);
            match triangulate_in_basis(&points, &basis) {
                Ok(t) => t,
                Err(_) => continue,
            }
        };

        let base = geometry.vertex_count() as u32;
        for p in &points {
            let position = [p.x, p.y, p.z];
            let normal = [normal.x, normal.y, normal.z];
            let uv = uv
                .map(|m| m.uv(position, normal, meta.face_type, meta.material_id))
                .unwrap_or_default();
            geometry.push_vertex(&VertexRecord {
                position: position.map(|c| c as f32),
                normal: normal.map(|c| c as f32),
                uv,
                face_type: meta.face_type,
                material_id: meta.material_id,
                voxel_index: meta.voxel_index,
                layer_index: meta.layer_index,
            });
        }
        for tri in triangles.chunks_exact(3) {
            geometry.add_triangle(
                base + tri[0] as u32,
                base + tri[1] as u32,
                base + tri[2] as u32,
            );
        }
    }

    Ok(geometry)
}
