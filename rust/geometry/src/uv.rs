// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Texture coordinates for tile vertices
//!
//! Ground faces are draped with imagery spanning the tile's geographic box,
//! so their UVs are the normalized longitude and the Mercator-corrected
//! latitude. Every other face uses a box projection scaled by its material.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strata_core::{mercator_y, FaceType, Header, MaterialRecord, Projection};

/// UV transform of one material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvTransform {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl Default for UvTransform {
    fn default() -> Self {
        Self {
            scale: [1.0, 1.0],
            offset: [0.0, 0.0],
        }
    }
}

/// Computes vertex UVs from tile-local positions
#[derive(Debug, Clone)]
pub struct UvMapper {
    header: Header,
    projection: Projection,
    center: [f64; 3],
    materials: FxHashMap<u16, UvTransform>,
}

impl UvMapper {
    /// `center` is the projected tile origin subtracted from local positions
    pub fn new(
        header: Header,
        projection: Projection,
        center: [f64; 3],
        materials: &[MaterialRecord],
    ) -> Self {
        let materials = materials
            .iter()
            .map(|m| {
                (
                    m.id,
                    UvTransform {
                        scale: m.uv_scale,
                        offset: m.uv_offset,
                    },
                )
            })
            .collect();
        Self {
            header,
            projection,
            center,
            materials,
        }
    }

    pub fn material(&self, id: u16) -> UvTransform {
        self.materials.get(&id).copied().unwrap_or_default()
    }

    /// Ground UV from geographic coordinates
    pub fn ground_uv(&self, lon: f64, lat: f64) -> [f32; 2] {
        let h = &self.header;
        let span_lon = h.max_lon - h.min_lon;
        let u = if span_lon > 0.0 {
            (lon - h.min_lon) / span_lon
        } else {
            0.0
        };
        let y_min = mercator_y(h.min_lat);
        let y_span = mercator_y(h.max_lat) - y_min;
        let v = if y_span.abs() > 0.0 {
            (mercator_y(lat) - y_min) / y_span
        } else {
            0.0
        };
        [u as f32, v as f32]
    }

    /// Box-projected material UV from a local position and normal
    pub fn material_uv(&self, local: [f64; 3], normal: [f64; 3], material_id: u16) -> [f32; 2] {
        let [nx, ny, nz] = normal.map(f64::abs);
        let (a, b) = if nz >= nx && nz >= ny {
            (local[0], local[1])
        } else if nx >= ny {
            (local[1], local[2])
        } else {
            (local[0], local[2])
        };
        let t = self.material(material_id);
        [
            a as f32 * t.scale[0] + t.offset[0],
            b as f32 * t.scale[1] + t.offset[1],
        ]
    }

    /// UV of a vertex given in the tile-local frame
    pub fn uv(
        &self,
        local: [f64; 3],
        normal: [f64; 3],
        face_type: FaceType,
        material_id: u16,
    ) -> [f32; 2] {
        if face_type.intersects(FaceType::TOP_GROUND) {
            let [lon, lat, _] = self.projection.unproject([
                local[0] + self.center[0],
                local[1] + self.center[1],
                local[2] + self.center[2],
            ]);
            self.ground_uv(lon, lat)
        } else {
            self.material_uv(local, normal, material_id)
        }
    }
}
