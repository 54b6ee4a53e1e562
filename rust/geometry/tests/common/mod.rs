// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic tiles for integration tests.
//!
//! Coordinates are quantized with 16384 steps per unit over a 0..4 box, so
//! integer and half-unit positions survive the binary round trip exactly.
//! The header center sits at the origin of the ellipsoid frame and tiles use
//! the planar projection, making local and geographic coordinates equal.

#![allow(dead_code)]

use strata_core::{
    decode_tile, encode_tile, geodetic_to_ecef, DecodeResult, FaceType, Header, LayerKind,
    PipelineConfig, Projection, RawVertices, StratumLayerData, StratumVoxelData, TileExtensions,
};
use strata_geometry::StratumTileData;

pub const STEP: f64 = 16384.0;

/// Face types of a box voxel
#[derive(Debug, Clone, Copy)]
pub struct BoxFaces {
    pub top: FaceType,
    pub base: FaceType,
    pub side: FaceType,
}

impl Default for BoxFaces {
    fn default() -> Self {
        Self {
            top: FaceType::TOP,
            base: FaceType::BASE,
            side: FaceType::SIDE,
        }
    }
}

pub struct TileBuilder {
    vertices: RawVertices,
    indices: Vec<u32>,
    face_types: Vec<u8>,
    layers: Vec<StratumLayerData>,
    pub extensions: TileExtensions,
}

pub fn header() -> Header {
    let max = 65535.0 / STEP;
    Header {
        min_lon: 0.0,
        min_lat: 0.0,
        max_lon: max,
        max_lat: max,
        min_height: 0.0,
        max_height: max,
        center: geodetic_to_ecef(0.0, 0.0, 0.0),
    }
}

fn quantize(x: f64) -> u16 {
    (x * STEP).round() as u16
}

impl TileBuilder {
    pub fn new() -> Self {
        Self {
            vertices: RawVertices {
                u: Vec::new(),
                v: Vec::new(),
                h: Vec::new(),
                normals: Vec::new(),
            },
            indices: Vec::new(),
            face_types: Vec::new(),
            layers: Vec::new(),
            extensions: TileExtensions::default(),
        }
    }

    pub fn layer(&mut self, id: u32, kind: LayerKind, name: &str, material_id: u16) -> usize {
        self.layers.push(StratumLayerData {
            id,
            kind,
            name: name.to_string(),
            material_id,
            voxels: Vec::new(),
        });
        self.layers.len() - 1
    }

    fn vertex(&mut self, p: [f64; 3], normal: [i8; 3]) -> u32 {
        let index = self.vertices.u.len() as u32;
        self.vertices.u.push(quantize(p[0]));
        self.vertices.v.push(quantize(p[1]));
        self.vertices.h.push(quantize(p[2]));
        self.vertices.normals.extend_from_slice(&normal);
        index
    }

    /// Closed axis-aligned box with outward winding, 8 shared vertices and
    /// 12 triangles. `skip` leaves out that many trailing triangles.
    pub fn add_box_with_gap(
        &mut self,
        layer: usize,
        min: [f64; 3],
        max: [f64; 3],
        faces: BoxFaces,
        skip: usize,
    ) -> usize {
        let corners = [
            [min[0], min[1], min[2]],
            [max[0], min[1], min[2]],
            [max[0], max[1], min[2]],
            [min[0], max[1], min[2]],
            [min[0], min[1], max[2]],
            [max[0], min[1], max[2]],
            [max[0], max[1], max[2]],
            [min[0], max[1], max[2]],
        ];
        let base = self.vertices.u.len() as u32;
        for c in corners {
            self.vertex(c, [0, 0, 127]);
        }

        let triangles: [([u32; 3], FaceType); 12] = [
            ([0, 2, 1], faces.base),
            ([0, 3, 2], faces.base),
            ([4, 5, 6], faces.top),
            ([4, 6, 7], faces.top),
            ([0, 4, 7], faces.side),
            ([0, 7, 3], faces.side),
            ([1, 2, 6], faces.side),
            ([1, 6, 5], faces.side),
            ([0, 1, 5], faces.side),
            ([0, 5, 4], faces.side),
            ([3, 7, 6], faces.side),
            ([3, 6, 2], faces.side),
        ];

        let start = self.indices.len() as u32;
        for (tri, face) in &triangles[..12 - skip] {
            self.indices.extend(tri.iter().map(|i| base + i));
            self.face_types.push(face.bits());
        }

        let material_id = self.layers[layer].material_id;
        let voxels = &mut self.layers[layer].voxels;
        voxels.push(StratumVoxelData {
            start,
            end: self.indices.len() as u32,
            material_id,
            neighbors: [-1; 3],
        });
        voxels.len() - 1
    }

    pub fn add_box(&mut self, layer: usize, min: [f64; 3], max: [f64; 3], faces: BoxFaces) -> usize {
        self.add_box_with_gap(layer, min, max, faces, 0)
    }

    /// Link voxel `a` to `b` on `slot`
    pub fn link(&mut self, layer: usize, a: usize, slot: usize, b: usize) {
        self.layers[layer].voxels[a].neighbors[slot] = b as i32;
    }

    pub fn build(self) -> DecodeResult {
        DecodeResult {
            header: header(),
            vertices: self.vertices,
            indices: self.indices,
            face_types: self.face_types,
            layers: self.layers,
            extensions: self.extensions,
        }
    }

    /// Encode, decode and assemble the tile
    pub fn tile(self) -> StratumTileData {
        let bytes = encode_tile(&self.build());
        let decoded = decode_tile(&bytes).expect("synthetic tile decodes");
        StratumTileData::from_decode(decoded, Projection::Planar, PipelineConfig::builtin())
            .expect("synthetic tile assembles")
    }
}

/// Sum of triangle areas
pub fn mesh_area(geometry: &strata_geometry::TileGeometry) -> f64 {
    geometry
        .triangles()
        .map(|[a, b, c]| (b - a).cross(&(c - a)).norm() * 0.5)
        .sum()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
