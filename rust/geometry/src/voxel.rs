// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-voxel views over the tile geometry

use crate::buffer::{is_geometry_closed, GeometryView, TileGeometry};
use crate::csg::ClippableGeometry;
use crate::layer::VoxelEntry;
use nalgebra::Point3;
use strata_core::FaceType;

/// Center and radius of a bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Point3<f64>,
    pub radius: f64,
}

impl BoundingSphere {
    /// Two-pass approximation: average the points, then take the farthest.
    /// `None` for an empty point set.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point3<f64>> + Clone,
    {
        let mut sum = nalgebra::Vector3::zeros();
        let mut count = 0usize;
        for p in points.clone() {
            sum += p.coords;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let center = Point3::from(sum / count as f64);
        let max_sq = points
            .into_iter()
            .map(|p| (p - center).norm_squared())
            .fold(0.0, f64::max);
        Some(Self {
            center,
            radius: max_sq.sqrt(),
        })
    }
}

/// Borrowed view of one voxel of a layer
#[derive(Debug, Clone, Copy)]
pub struct StratumVoxel<'t> {
    geometry: &'t TileGeometry,
    entry: &'t VoxelEntry,
    index: usize,
    layer_index: u32,
}

impl<'t> StratumVoxel<'t> {
    pub(crate) fn new(
        geometry: &'t TileGeometry,
        entry: &'t VoxelEntry,
        index: usize,
        layer_index: u32,
    ) -> Self {
        Self {
            geometry,
            entry,
            index,
            layer_index,
        }
    }

    /// Position of the voxel within its layer
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn layer_index(&self) -> u32 {
        self.layer_index
    }

    pub fn material_id(&self) -> u16 {
        self.entry.material_id
    }

    pub fn entry(&self) -> &'t VoxelEntry {
        self.entry
    }

    pub fn triangle_count(&self) -> usize {
        self.entry.index_count() / 3
    }

    /// Neighbor on side `slot` (0..3) as an index into the layer's voxels
    pub fn neighbor(&self, slot: usize) -> Option<usize> {
        self.entry.neighbors.get(slot).copied().flatten()
    }

    pub fn neighbors(&self) -> [Option<usize>; 3] {
        self.entry.neighbors
    }

    /// Index-slice view sharing the tile's attribute buffers
    pub fn view(&self) -> GeometryView<'t> {
        self.geometry
            .slice_indices(self.entry.start as usize..self.entry.end as usize)
    }

    /// Bounding sphere, computed on first use and cached on the voxel entry
    pub fn bounding_sphere(&self) -> BoundingSphere {
        *self.entry.sphere.get_or_init(|| {
            let view = self.view();
            let points = view.vertex_indices().map(|i| view.source.position(i));
            BoundingSphere::from_points(points).unwrap_or(BoundingSphere {
                center: Point3::origin(),
                radius: 0.0,
            })
        })
    }

    /// Axis-aligned bounds of the voxel's vertices
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let view = self.view();
        view.vertex_indices().map(|i| view.source.position(i)).fold(
            (
                Point3::new(f64::MAX, f64::MAX, f64::MAX),
                Point3::new(f64::MIN, f64::MIN, f64::MIN),
            ),
            |(min, max), p| (min.inf(&p), max.sup(&p)),
        )
    }

    /// Flat `[x, y, z] x 3` positions of every triangle whose face type
    /// intersects `face_type`
    pub fn get_triangles_by_face_type(&self, face_type: FaceType) -> Vec<f32> {
        let view = self.view();
        let mut out = Vec::new();
        for t in 0..view.triangle_count() {
            if !view.triangle_face_type(t).intersects(face_type) {
                continue;
            }
            for i in view.triangle_vertices(t) {
                out.extend_from_slice(&self.geometry.positions[i * 3..i * 3 + 3]);
            }
        }
        out
    }

    /// Owned copy of the voxel's geometry
    pub fn geometry(&self) -> TileGeometry {
        self.view().to_geometry()
    }

    pub fn is_closed(&self, scale: f64) -> bool {
        is_geometry_closed(&self.geometry(), scale)
    }

    pub fn to_clippable(&self) -> ClippableGeometry {
        ClippableGeometry::new(self.geometry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::box_geometry;
    use approx::assert_relative_eq;
    use std::cell::OnceCell;

    fn entry(start: u32, end: u32) -> VoxelEntry {
        VoxelEntry {
            start,
            end,
            material_id: 2,
            source_index: 0,
            neighbors: [Some(1), None, None],
            sphere: OnceCell::new(),
        }
    }

    #[test]
    fn test_bounding_sphere_of_cube() {
        let cube = box_geometry([0.0; 3], [2.0; 3], FaceType::SIDE);
        let e = entry(0, 36);
        let voxel = StratumVoxel::new(&cube, &e, 0, 0);
        let sphere = voxel.bounding_sphere();
        assert_relative_eq!(sphere.center, Point3::new(1.0, 1.0, 1.0), epsilon = 1e-9);
        assert_relative_eq!(sphere.radius, 3f64.sqrt(), epsilon = 1e-9);
        assert!(e.sphere.get().is_some());
    }

    #[test]
    fn test_neighbor_slots() {
        let cube = box_geometry([0.0; 3], [1.0; 3], FaceType::SIDE);
        let e = entry(0, 36);
        let voxel = StratumVoxel::new(&cube, &e, 0, 0);
        assert_eq!(voxel.neighbor(0), Some(1));
        assert_eq!(voxel.neighbor(1), None);
        assert_eq!(voxel.neighbor(7), None);
    }

    #[test]
    fn test_triangles_by_face_type() {
        let mut cube = box_geometry([0.0; 3], [1.0; 3], FaceType::SIDE);
        // Second triangle pair is the +z face
        for v in 6..12 {
            cube.face_types[v] = FaceType::TOP.bits();
        }
        let e = entry(0, 36);
        let voxel = StratumVoxel::new(&cube, &e, 0, 0);

        let top = voxel.get_triangles_by_face_type(FaceType::TOP_SURFACES);
        assert_eq!(top.len(), 18);
        assert!(top.chunks_exact(3).all(|p| p[2] == 1.0));
        assert!(voxel.get_triangles_by_face_type(FaceType::BASE).is_empty());
    }

    #[test]
    fn test_view_is_sub_range() {
        let cube = box_geometry([0.0; 3], [1.0; 3], FaceType::SIDE);
        let e = entry(6, 12);
        let voxel = StratumVoxel::new(&cube, &e, 0, 0);
        assert_eq!(voxel.triangle_count(), 2);
        assert_eq!(voxel.geometry().triangle_count(), 2);
        assert!(!voxel.is_closed(1e6));
    }
}
