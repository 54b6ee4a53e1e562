// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layer assembly
//!
//! Voxels of a layer are built in three explicit stages. [`VoxelArena`]
//! allocates every voxel by index, [`VoxelArena::link`] resolves the raw
//! neighbor indices once all voxels exist, and [`LinkedVoxels::filter`]
//! drops empty voxels and remaps the links into a [`StratumLayer`].

use crate::buffer::TileGeometry;
use crate::voxel::{BoundingSphere, StratumVoxel};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use strata_core::{LayerKind, StratumLayerData};
use tracing::{debug, error};

/// Voxel record owned by a layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelEntry {
    /// First index of the voxel's range in the tile index buffer
    pub start: u32,
    /// End of the range (exclusive)
    pub end: u32,
    pub material_id: u16,
    /// Position of the voxel in the decoded layer record
    pub source_index: usize,
    /// Neighbors as indices into the layer's voxel list
    pub neighbors: [Option<usize>; 3],
    #[serde(skip)]
    pub(crate) sphere: OnceCell<BoundingSphere>,
}

impl PartialEq for VoxelEntry {
    // The cached sphere is derived data
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.material_id == other.material_id
            && self.source_index == other.source_index
            && self.neighbors == other.neighbors
    }
}

impl VoxelEntry {
    #[inline]
    pub fn index_count(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index_count() == 0
    }
}

/// Layer metadata shared by every construction stage
#[derive(Debug, Clone)]
struct LayerHeader {
    id: u32,
    kind: LayerKind,
    name: String,
    material_id: u16,
    layer_index: u32,
}

/// First stage: voxels allocated, neighbor indices still raw
#[derive(Debug)]
pub struct VoxelArena {
    header: LayerHeader,
    voxels: Vec<VoxelEntry>,
    raw_neighbors: Vec<[i32; 3]>,
}

/// Second stage: neighbor links resolved against the full arena
#[derive(Debug)]
pub struct LinkedVoxels {
    header: LayerHeader,
    voxels: Vec<VoxelEntry>,
}

impl VoxelArena {
    /// Allocate one entry per voxel record of `data`
    pub fn allocate(data: &StratumLayerData, layer_index: u32) -> Self {
        let voxels = data
            .voxels
            .iter()
            .enumerate()
            .map(|(source_index, v)| VoxelEntry {
                start: v.start,
                end: v.end,
                material_id: v.material_id,
                source_index,
                neighbors: [None; 3],
                sphere: OnceCell::new(),
            })
            .collect();
        Self {
            header: LayerHeader {
                id: data.id,
                kind: data.kind,
                name: data.name.clone(),
                material_id: data.material_id,
                layer_index,
            },
            voxels,
            raw_neighbors: data.voxels.iter().map(|v| v.neighbors).collect(),
        }
    }

    /// Resolve neighbor indices. Links outside the arena are logged and
    /// left unset.
    pub fn link(self) -> LinkedVoxels {
        let VoxelArena {
            header,
            mut voxels,
            raw_neighbors,
        } = self;
        let count = voxels.len();

        for (index, raw) in raw_neighbors.iter().enumerate() {
            for (slot, &neighbor) in raw.iter().enumerate() {
                if neighbor < 0 {
                    continue;
                }
                if neighbor as usize >= count || neighbor as usize == index {
                    error!(
                        layer = header.id,
                        voxel = index,
                        slot,
                        neighbor,
                        "invalid voxel neighbor link"
                    );
                    continue;
                }
                voxels[index].neighbors[slot] = Some(neighbor as usize);
            }
        }

        LinkedVoxels { header, voxels }
    }
}

impl LinkedVoxels {
    /// Drop voxels without triangles and remap links to the survivors
    pub fn filter(self) -> StratumLayer {
        let LinkedVoxels { header, voxels } = self;

        let mut remap = vec![None; voxels.len()];
        let mut next = 0usize;
        for (old, voxel) in voxels.iter().enumerate() {
            if !voxel.is_empty() {
                remap[old] = Some(next);
                next += 1;
            }
        }
        let dropped = voxels.len() - next;
        if dropped > 0 {
            debug!(layer = header.id, dropped, "dropped empty voxels");
        }

        let voxels: Vec<VoxelEntry> = voxels
            .into_iter()
            .filter(|v| !v.is_empty())
            .map(|mut v| {
                v.neighbors = v.neighbors.map(|n| n.and_then(|old| remap[old]));
                v
            })
            .collect();

        if voxels.is_empty() && header.kind == LayerKind::Voxel {
            error!(layer = header.id, name = %header.name, "stratum layer has no voxels");
        }

        StratumLayer {
            id: header.id,
            kind: header.kind,
            name: header.name,
            material_id: header.material_id,
            layer_index: header.layer_index,
            voxels,
        }
    }
}

/// A named collection of voxels sharing one lithology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumLayer {
    pub id: u32,
    pub kind: LayerKind,
    pub name: String,
    pub material_id: u16,
    /// Position of the layer in the decoded tile
    pub layer_index: u32,
    pub(crate) voxels: Vec<VoxelEntry>,
}

impl StratumLayer {
    /// Run the full allocate, link and filter pipeline
    pub fn build(data: &StratumLayerData, layer_index: u32) -> Self {
        VoxelArena::allocate(data, layer_index).link().filter()
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn entries(&self) -> &[VoxelEntry] {
        &self.voxels
    }

    /// View of voxel `index` over `geometry`
    pub fn voxel<'t>(&'t self, geometry: &'t TileGeometry, index: usize) -> Option<StratumVoxel<'t>> {
        self.voxels
            .get(index)
            .map(|entry| StratumVoxel::new(geometry, entry, index, self.layer_index))
    }

    pub fn voxels<'t>(&'t self, geometry: &'t TileGeometry) -> impl Iterator<Item = StratumVoxel<'t>> + 't {
        let layer_index = self.layer_index;
        self.voxels
            .iter()
            .enumerate()
            .map(move |(i, entry)| StratumVoxel::new(geometry, entry, i, layer_index))
    }

    /// Range of the tile index buffer covered by this layer's voxels
    pub fn index_range(&self) -> Option<std::ops::Range<usize>> {
        let start = self.voxels.iter().map(|v| v.start).min()?;
        let end = self.voxels.iter().map(|v| v.end).max()?;
        Some(start as usize..end as usize)
    }
}
