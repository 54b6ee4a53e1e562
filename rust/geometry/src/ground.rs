// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Merged ground surface

use crate::buffer::TileGeometry;
use crate::sections::StratumCrossSections;
use crate::tile::StratumTileData;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use strata_core::FaceType;

/// Quantized geographic vertex key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GeoKey([i64; 3]);

impl GeoKey {
    fn new(geographic: [f64; 3], scale: f64) -> Self {
        Self(geographic.map(|c| (c * scale).round() as i64))
    }
}

impl Hash for GeoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let [x, y, z] = self.0;
        state.write_i64(x ^ (y << 21) ^ (z << 42));
    }
}

/// Top-ground triangles of every stratum layer with shared vertices merged
#[derive(Debug, Clone, Default)]
pub struct GroundSurface {
    pub geometry: TileGeometry,
    /// `[min_lon, min_lat, min_height, max_lon, max_lat, max_height]`
    pub extents: [f64; 6],
}

impl StratumTileData {
    /// Merge the top-ground faces of all stratum layers into one indexed
    /// surface, joining vertices that coincide geographically
    pub fn extract_ground_faces(&self) -> GroundSurface {
        let scale = self.config().ground_hash_scale;
        let source = self.geometry();
        let mut surface = TileGeometry::new();
        let mut remap: FxHashMap<GeoKey, u32> = FxHashMap::default();
        let mut extents = [f64::MAX, f64::MAX, f64::MAX, f64::MIN, f64::MIN, f64::MIN];

        for voxel in self.stratum_voxels() {
            let view = voxel.view();
            for t in 0..view.triangle_count() {
                if !view.triangle_face_type(t).intersects(FaceType::TOP_GROUND) {
                    continue;
                }
                let corners = view.triangle_vertices(t).map(|v| {
                    let geographic = self.to_geographic(&source.position(v));
                    *remap.entry(GeoKey::new(geographic, scale)).or_insert_with(|| {
                        for i in 0..3 {
                            extents[i] = extents[i].min(geographic[i]);
                            extents[i + 3] = extents[i + 3].max(geographic[i]);
                        }
                        surface.push_vertex(&source.vertex(v))
                    })
                });
                if corners[0] != corners[1] && corners[1] != corners[2] && corners[2] != corners[0] {
                    surface.add_triangle(corners[0], corners[1], corners[2]);
                }
            }
        }

        if surface.is_empty() {
            extents = [0.0; 6];
        }
        GroundSurface {
            geometry: surface,
            extents,
        }
    }
}

impl StratumCrossSections<'_> {
    pub fn extract_ground_faces(&self) -> GroundSurface {
        self.tile().extract_ground_faces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHasher;
    use std::hash::{BuildHasher, BuildHasherDefault};

    #[test]
    fn test_keys_quantize_before_hashing() {
        let a = GeoKey::new([120.123_400_1, 30.5, 12.0], 1000.0);
        let b = GeoKey::new([120.123_399_9, 30.5, 12.0], 1000.0);
        assert_eq!(a, b);

        let hasher = BuildHasherDefault::<FxHasher>::default();
        assert_eq!(hasher.hash_one(a), hasher.hash_one(b));
        assert_ne!(a, GeoKey::new([120.124, 30.5, 12.0], 1000.0));
    }
}
