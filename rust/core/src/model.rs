// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoded tile data model
//!
//! Plain records produced by the binary decoder. Geometry construction in
//! `strata-geometry` consumes these without re-reading the binary payload.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest value of a 16-bit normalized quantized coordinate
pub const QUANTIZED_MAX: f64 = 65535.0;

/// Dequantize a normalized unsigned integer of `bits` width into `[0, 1]`
#[inline]
pub fn dequantize_normalized(raw: u32, bits: u32) -> f64 {
    let max = ((1u64 << bits) - 1) as f64;
    raw as f64 / max
}

/// Linear dequantization domain for quantized vector attributes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizedRange {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Bit width of each raw component (8 for UNSIGNED_BYTE, 16 for UNSIGNED_SHORT)
    pub bits: u32,
}

impl QuantizedRange {
    pub fn new(min: [f64; 3], max: [f64; 3], bits: u32) -> Self {
        Self { min, max, bits }
    }

    /// Map raw components onto `[min, max]`
    #[inline]
    pub fn dequantize(&self, raw: [u32; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for axis in 0..3 {
            let t = dequantize_normalized(raw[axis], self.bits);
            out[axis] = self.min[axis] + (self.max[axis] - self.min[axis]) * t;
        }
        out
    }
}

/// Tile header: geographic bounds, height range and ellipsoid center
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub min_height: f64,
    pub max_height: f64,
    /// Tile center in ECEF metres
    pub center: [f64; 3],
}

impl Header {
    /// Quantization domain of the tile vertices (lon, lat, height)
    pub fn quantization_range(&self) -> QuantizedRange {
        QuantizedRange::new(
            [self.min_lon, self.min_lat, self.min_height],
            [self.max_lon, self.max_lat, self.max_height],
            16,
        )
    }

    /// Dequantize a vertex's u/v/h into (lon, lat, height)
    #[inline]
    pub fn dequantize(&self, u: u16, v: u16, h: u16) -> [f64; 3] {
        self.quantization_range()
            .dequantize([u as u32, v as u32, h as u32])
    }

    /// True when (lon, lat) falls inside the geographic box
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Kind of geological layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LayerKind {
    Voxel = 0,
    Borehole = 1,
    Fault = 2,
    Collapse = 3,
}

impl TryFrom<u8> for LayerKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LayerKind::Voxel),
            1 => Ok(LayerKind::Borehole),
            2 => Ok(LayerKind::Fault),
            3 => Ok(LayerKind::Collapse),
            other => Err(Error::UnsupportedLayerKind(other)),
        }
    }
}

/// One voxel record: a range into the triangle index buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumVoxelData {
    /// First index (inclusive) into the triangle index buffer
    pub start: u32,
    /// Last index (exclusive)
    pub end: u32,
    pub material_id: u16,
    /// Voxel indices of the neighbours within the layer, `-1` for none
    pub neighbors: [i32; 3],
}

impl StratumVoxelData {
    #[inline]
    pub fn index_count(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.index_count() / 3
    }
}

/// One layer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumLayerData {
    pub id: u32,
    pub kind: LayerKind,
    pub name: String,
    pub material_id: u16,
    pub voxels: Vec<StratumVoxelData>,
}

/// Raw quantized vertex arrays, indexed by the triangle buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVertices {
    pub u: Vec<u16>,
    pub v: Vec<u16>,
    pub h: Vec<u16>,
    /// Signed normalized normals, three components per vertex
    pub normals: Vec<i8>,
}

impl RawVertices {
    #[inline]
    pub fn len(&self) -> usize {
        self.u.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    /// Decode the normal of vertex `i`
    #[inline]
    pub fn normal(&self, i: usize) -> [f64; 3] {
        let decode = |raw: i8| (raw as f64 / 127.0).max(-1.0);
        [
            decode(self.normals[i * 3]),
            decode(self.normals[i * 3 + 1]),
            decode(self.normals[i * 3 + 2]),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapsePillarRecord {
    pub layer_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoreholeRecord {
    pub id: u32,
    pub layer_id: u32,
    pub name: String,
    pub lon: f64,
    pub lat: f64,
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub layer_id: u32,
    pub name: String,
    /// Dip angle in degrees
    pub dip: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionLineRecord {
    pub id: u32,
    pub name: String,
    /// (lon, lat) vertices of the line
    pub points: Vec<[f64; 2]>,
}

/// Per-material UV transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub id: u16,
    pub name: String,
    pub uv_scale: [f32; 2],
    pub uv_offset: [f32; 2],
}

/// Ground elevation grid covering the tile's geographic box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemGrid {
    pub cols: u16,
    pub rows: u16,
    /// Row-major heights, row 0 at `min_lat`
    pub heights: Vec<f32>,
}

impl DemGrid {
    /// Bilinear height at (lon, lat), `None` outside the header box
    pub fn sample(&self, header: &Header, lon: f64, lat: f64) -> Option<f64> {
        if self.cols < 2 || self.rows < 2 || !header.contains(lon, lat) {
            return None;
        }
        let span_lon = header.max_lon - header.min_lon;
        let span_lat = header.max_lat - header.min_lat;
        if span_lon <= 0.0 || span_lat <= 0.0 {
            return None;
        }

        let fx = (lon - header.min_lon) / span_lon * (self.cols - 1) as f64;
        let fy = (lat - header.min_lat) / span_lat * (self.rows - 1) as f64;
        let x0 = (fx.floor() as usize).min(self.cols as usize - 2);
        let y0 = (fy.floor() as usize).min(self.rows as usize - 2);
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let at = |x: usize, y: usize| self.heights[y * self.cols as usize + x] as f64;
        let bottom = at(x0, y0) * (1.0 - tx) + at(x0 + 1, y0) * tx;
        let top = at(x0, y0 + 1) * (1.0 - tx) + at(x0 + 1, y0 + 1) * tx;
        Some(bottom * (1.0 - ty) + top * ty)
    }
}

/// Optional records carried after the layer table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileExtensions {
    pub collapse_pillars: Vec<CollapsePillarRecord>,
    pub boreholes: Vec<BoreholeRecord>,
    pub faults: Vec<FaultRecord>,
    pub section_lines: Vec<SectionLineRecord>,
    pub materials: Vec<MaterialRecord>,
    pub dem: Option<DemGrid>,
}

impl TileExtensions {
    pub fn material(&self, id: u16) -> Option<&MaterialRecord> {
        self.materials.iter().find(|m| m.id == id)
    }
}

/// Output of the binary tile decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResult {
    pub header: Header,
    pub vertices: RawVertices,
    /// Triangle index buffer into `vertices`
    pub indices: Vec<u32>,
    /// One face-type byte per triangle
    pub face_types: Vec<u8>,
    pub layers: Vec<StratumLayerData>,
    pub extensions: TileExtensions,
}

impl DecodeResult {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Structural validation: buffer lengths, index bounds and voxel ranges
    pub fn validate(&self) -> Result<()> {
        let vertex_count = self.vertices.len();
        let raw = &self.vertices;
        if raw.v.len() != vertex_count
            || raw.h.len() != vertex_count
            || raw.normals.len() != vertex_count * 3
        {
            return Err(Error::malformed("vertex attribute arrays differ in length"));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::malformed(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if self.face_types.len() != self.triangle_count() {
            return Err(Error::malformed(format!(
                "{} face types for {} triangles",
                self.face_types.len(),
                self.triangle_count()
            )));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::malformed(format!(
                "index {} out of range for {} vertices",
                bad, vertex_count
            )));
        }

        for layer in &self.layers {
            for (voxel_index, voxel) in layer.voxels.iter().enumerate() {
                if voxel.start > voxel.end
                    || voxel.end as usize > self.indices.len()
                    || voxel.start % 3 != 0
                    || voxel.end % 3 != 0
                {
                    return Err(Error::malformed(format!(
                        "layer {} voxel {} has invalid index range {}..{}",
                        layer.id, voxel_index, voxel.start, voxel.end
                    )));
                }
            }
        }

        if let Some(dem) = &self.extensions.dem {
            if dem.heights.len() != dem.cols as usize * dem.rows as usize {
                return Err(Error::malformed("DEM grid size does not match its dimensions"));
            }
        }

        Ok(())
    }
}
