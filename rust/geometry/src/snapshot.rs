// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tile snapshots
//!
//! [`DecodedStratumTileData`] carries the flat attribute arrays as they are
//! plus a JSON blob for everything else, so a tile can be handed to another
//! worker and rebuilt without decoding the binary again.

use crate::buffer::TileGeometry;
use crate::error::{Error, Result};
use crate::layer::StratumLayer;
use crate::tile::StratumTileData;
use serde::{Deserialize, Serialize};
use strata_core::{Header, PipelineConfig, Projection, TileExtensions};

/// Transferable form of a [`StratumTileData`]
#[derive(Debug, Clone)]
pub struct DecodedStratumTileData {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub face_types: Vec<u8>,
    pub material_ids: Vec<u16>,
    pub voxel_indices: Vec<u32>,
    pub layer_indices: Vec<u32>,
    pub indices: Vec<u32>,
    /// JSON: header, projection, center, layers and extensions
    pub metadata: String,
    pub config: PipelineConfig,
}

#[derive(Serialize, Deserialize)]
struct SnapshotMetadata {
    header: Header,
    projection: Projection,
    center: [f64; 3],
    layers: Vec<StratumLayer>,
    extensions: TileExtensions,
}

impl StratumTileData {
    pub fn to_decoded(&self) -> Result<DecodedStratumTileData> {
        let metadata = serde_json::to_string(&SnapshotMetadata {
            header: *self.header(),
            projection: self.projection(),
            center: self.center(),
            layers: self.layers().to_vec(),
            extensions: self.extensions().clone(),
        })?;
        let g = self.geometry().clone();
        Ok(DecodedStratumTileData {
            positions: g.positions,
            normals: g.normals,
            uvs: g.uvs,
            face_types: g.face_types,
            material_ids: g.material_ids,
            voxel_indices: g.voxel_indices,
            layer_indices: g.layer_indices,
            indices: g.indices,
            metadata,
            config: self.config().clone(),
        })
    }

    /// Rebuild a tile from a snapshot
    pub fn from_decoded(decoded: DecodedStratumTileData) -> Result<Self> {
        let metadata: SnapshotMetadata = serde_json::from_str(&decoded.metadata)?;
        let geometry = TileGeometry {
            positions: decoded.positions,
            normals: decoded.normals,
            uvs: decoded.uvs,
            face_types: decoded.face_types,
            material_ids: decoded.material_ids,
            voxel_indices: decoded.voxel_indices,
            layer_indices: decoded.layer_indices,
            indices: decoded.indices,
        };

        let vertex_count = geometry.vertex_count();
        if geometry.positions.len() % 3 != 0 || geometry.face_types.len() != vertex_count {
            return Err(Error::malformed(format!(
                "snapshot holds {} position floats and {} face types",
                geometry.positions.len(),
                geometry.face_types.len()
            )));
        }
        for layer in &metadata.layers {
            if let Some(range) = layer.index_range() {
                if range.end > geometry.indices.len() {
                    return Err(Error::malformed(format!(
                        "layer {} range ends at {} past {} indices",
                        layer.id,
                        range.end,
                        geometry.indices.len()
                    )));
                }
            }
        }

        Ok(StratumTileData::from_parts(
            metadata.header,
            metadata.projection,
            metadata.center,
            geometry,
            metadata.layers,
            metadata.extensions,
            decoded.config,
        ))
    }
}
