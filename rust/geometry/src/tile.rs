// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tile assembly
//!
//! [`StratumTileData`] owns the decoded tile: one non-indexed attribute buffer
//! holding every voxel's triangles, the layers that slice it, and the
//! extension records. Everything derived from a tile borrows from it.

use crate::buffer::{GeometryView, TileGeometry, VertexRecord};
use crate::error::{Error, Result};
use crate::intersect::ray_triangle_intersection;
use crate::layer::StratumLayer;
use crate::uv::UvMapper;
use crate::voxel::StratumVoxel;
use nalgebra::{Point3, Vector3};
use strata_core::{
    ecef_to_geodetic, DecodeResult, FaceType, Header, LayerKind, PipelineConfig, Projection,
    StratumLayerData, StratumVoxelData, TileExtensions,
};
use tracing::debug;

/// A decoded stratum tile in its local frame
#[derive(Debug, Clone)]
pub struct StratumTileData {
    pub(crate) header: Header,
    pub(crate) projection: Projection,
    /// Projected tile center; local positions are relative to it
    pub(crate) center: [f64; 3],
    pub(crate) geometry: TileGeometry,
    pub(crate) layers: Vec<StratumLayer>,
    pub(crate) extensions: TileExtensions,
    pub(crate) config: PipelineConfig,
    pub(crate) uv: UvMapper,
}

/// Move the ECEF header center into the projection's frame
pub fn adjust_header_center(header: &Header, projection: Projection) -> [f64; 3] {
    let [lon, lat, height] = ecef_to_geodetic(header.center);
    projection.project(lon, lat, height)
}

impl StratumTileData {
    /// Build the tile from decoder output
    pub fn from_decode(
        decoded: DecodeResult,
        projection: Projection,
        config: PipelineConfig,
    ) -> Result<Self> {
        decoded.validate()?;

        let center = adjust_header_center(&decoded.header, projection);
        let uv = UvMapper::new(
            decoded.header,
            projection,
            center,
            &decoded.extensions.materials,
        );

        let (geometry, rewritten) = decode_vertex_data(&decoded, projection, center, &uv)?;
        let layers = rewritten
            .iter()
            .enumerate()
            .map(|(i, data)| StratumLayer::build(data, i as u32))
            .collect();

        debug!(
            projection = projection.name(),
            vertices = geometry.vertex_count(),
            layers = rewritten.len(),
            "decoded stratum tile"
        );

        Ok(Self {
            header: decoded.header,
            projection,
            center,
            geometry,
            layers,
            extensions: decoded.extensions,
            config,
            uv,
        })
    }

    pub(crate) fn from_parts(
        header: Header,
        projection: Projection,
        center: [f64; 3],
        geometry: TileGeometry,
        layers: Vec<StratumLayer>,
        extensions: TileExtensions,
        config: PipelineConfig,
    ) -> Self {
        let uv = UvMapper::new(header, projection, center, &extensions.materials);
        Self {
            header,
            projection,
            center,
            geometry,
            layers,
            extensions,
            config,
            uv,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    /// The full non-indexed tile geometry
    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn extensions(&self) -> &TileExtensions {
        &self.extensions
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn uv_mapper(&self) -> &UvMapper {
        &self.uv
    }

    pub fn layers(&self) -> &[StratumLayer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&StratumLayer> {
        self.layers.get(index)
    }

    pub fn layer_by_id(&self, id: u32) -> Option<&StratumLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Layers holding stratum voxels
    pub fn stratum_layers(&self) -> impl Iterator<Item = &StratumLayer> {
        self.layers.iter().filter(|l| l.kind == LayerKind::Voxel)
    }

    pub fn voxel_count(&self) -> usize {
        self.layers.iter().map(StratumLayer::voxel_count).sum()
    }

    pub fn voxel(&self, layer: usize, voxel: usize) -> Option<StratumVoxel<'_>> {
        self.layers.get(layer)?.voxel(&self.geometry, voxel)
    }

    /// Every voxel of every stratum layer
    pub fn stratum_voxels(&self) -> impl Iterator<Item = StratumVoxel<'_>> {
        self.stratum_layers()
            .flat_map(move |layer| layer.voxels(&self.geometry))
    }

    /// Attribute-sharing view of one voxel's triangles
    pub fn create_voxel_geometry(&self, layer: usize, voxel: usize) -> Option<GeometryView<'_>> {
        self.voxel(layer, voxel).map(|v| v.view())
    }

    /// Geometry of every voxel in a layer, indices into the shared buffers
    pub fn layer_geometry(&self, layer: &StratumLayer) -> TileGeometry {
        let triangles = layer.entries().iter().flat_map(|entry| {
            (entry.start as usize / 3..entry.end as usize / 3)
                .map(|t| self.geometry.triangle_vertices(t))
        });
        self.geometry.extract_triangles(triangles)
    }

    /// Triangles of the stratum layers that touch the outer shell.
    ///
    /// A triangle is kept when any one of its vertices is a ground, bedrock
    /// or boundary face.
    pub fn build_shell_geometry(&self) -> TileGeometry {
        let geometry = &self.geometry;
        let triangles = self
            .stratum_layers()
            .flat_map(|layer| layer.entries().iter())
            .flat_map(|entry| entry.start as usize / 3..entry.end as usize / 3)
            .map(|t| geometry.triangle_vertices(t))
            .filter(|tri| {
                tri.iter()
                    .any(|&v| geometry.vertex_face_type(v).intersects(FaceType::SHELL))
            });
        let mut shell = geometry.extract_triangles(triangles);
        shell.ensure_index();
        shell
    }

    /// Tile-local position of a geographic coordinate
    pub fn to_local(&self, lon: f64, lat: f64, height: f64) -> Point3<f64> {
        let p = self.projection.project(lon, lat, height);
        Point3::new(
            p[0] - self.center[0],
            p[1] - self.center[1],
            p[2] - self.center[2],
        )
    }

    /// Geographic (lon, lat, height) of a tile-local position
    pub fn to_geographic(&self, local: &Point3<f64>) -> [f64; 3] {
        self.projection.unproject([
            local.x + self.center[0],
            local.y + self.center[1],
            local.z + self.center[2],
        ])
    }

    /// Local height range covered by the tile
    pub fn local_height_range(&self) -> (f64, f64) {
        (
            self.header.min_height - self.center[2],
            self.header.max_height - self.center[2],
        )
    }

    /// Ground elevation from the DEM extension
    pub fn dem_height(&self, lon: f64, lat: f64) -> Option<f64> {
        self.extensions.dem.as_ref()?.sample(&self.header, lon, lat)
    }

    /// Highest top-ground surface below local (x, y), found by casting a
    /// vertical ray through the ground triangles
    pub fn ground_height_at(&self, x: f64, y: f64) -> Option<f64> {
        let (_, top) = self.local_height_range();
        let origin = Point3::new(x, y, top + 1.0);
        let down = -Vector3::z();

        self.stratum_voxels()
            .flat_map(|voxel| {
                let view = voxel.view();
                (0..view.triangle_count())
                    .filter(move |&t| view.triangle_face_type(t).intersects(FaceType::TOP_GROUND))
                    .map(move |t| view.triangle_positions(t))
            })
            .filter_map(|tri| ray_triangle_intersection(&origin, &down, &tri))
            .map(|t| origin.z - t)
            .fold(None, |best: Option<f64>, z| Some(best.map_or(z, |b| b.max(z))))
    }

    /// Local ground height at local (x, y): DEM first, then the mesh
    pub fn surface_height_at(&self, x: f64, y: f64) -> Option<f64> {
        let [lon, lat, _] = self.to_geographic(&Point3::new(x, y, 0.0));
        self.dem_height(lon, lat)
            .map(|h| self.to_local(lon, lat, h).z)
            .or_else(|| self.ground_height_at(x, y))
    }
}

#[derive(Debug, Clone, Copy)]
struct Dequantized {
    geographic: [f64; 3],
    local: [f64; 3],
}

/// Dequantized and projected positions of the shared vertices, filled on
/// first use. Lives for one decode; corners of neighbouring triangles hit
/// the same slots.
struct DequantizationCache<'d> {
    decoded: &'d DecodeResult,
    projection: Projection,
    center: [f64; 3],
    slots: Vec<Option<Dequantized>>,
}

impl<'d> DequantizationCache<'d> {
    fn new(decoded: &'d DecodeResult, projection: Projection, center: [f64; 3]) -> Self {
        Self {
            decoded,
            projection,
            center,
            slots: vec![None; decoded.vertices.len()],
        }
    }

    fn get(&mut self, vertex: usize) -> Dequantized {
        if let Some(hit) = self.slots[vertex] {
            return hit;
        }
        let raw = &self.decoded.vertices;
        let geographic = self
            .decoded
            .header
            .dequantize(raw.u[vertex], raw.v[vertex], raw.h[vertex]);
        let p = self.projection.project(geographic[0], geographic[1], geographic[2]);
        let c = self.center;
        let entry = Dequantized {
            geographic,
            local: [p[0] - c[0], p[1] - c[1], p[2] - c[2]],
        };
        self.slots[vertex] = Some(entry);
        entry
    }
}

/// Expand the shared vertices into one independent vertex per triangle
/// corner, voxel by voxel, and rewrite every voxel range into the new buffer
fn decode_vertex_data(
    decoded: &DecodeResult,
    projection: Projection,
    center: [f64; 3],
    uv: &UvMapper,
) -> Result<(TileGeometry, Vec<StratumLayerData>)> {
    let total: usize = decoded
        .layers
        .iter()
        .flat_map(|l| l.voxels.iter())
        .map(StratumVoxelData::index_count)
        .sum();
    let mut geometry = TileGeometry::with_capacity(total, total);
    let raw = &decoded.vertices;
    let mut cache = DequantizationCache::new(decoded, projection, center);
    let mut rewritten = Vec::with_capacity(decoded.layers.len());

    for (layer_index, layer) in decoded.layers.iter().enumerate() {
        let mut voxels = Vec::with_capacity(layer.voxels.len());

        for (voxel_index, voxel) in layer.voxels.iter().enumerate() {
            let start = geometry.vertex_count() as u32;

            for corner in voxel.start as usize..voxel.end as usize {
                let vertex = decoded.indices[corner] as usize;
                let face_type = FaceType(decoded.face_types[corner / 3]);

                let Dequantized {
                    geographic: [lon, lat, _],
                    local,
                } = cache.get(vertex);
                let normal = raw.normal(vertex);

                if !local.iter().all(|c| c.is_finite()) {
                    return Err(Error::malformed(format!(
                        "vertex {} of layer {} projects to a non-finite position",
                        vertex, layer.id
                    )));
                }

                let uv = if face_type.intersects(FaceType::TOP_GROUND) {
                    uv.ground_uv(lon, lat)
                } else {
                    uv.material_uv(local, normal, voxel.material_id)
                };

                geometry.push_vertex(&VertexRecord {
                    position: local.map(|c| c as f32),
                    normal: normal.map(|c| c as f32),
                    uv,
                    face_type,
                    material_id: voxel.material_id,
                    voxel_index: voxel_index as u32,
                    layer_index: layer_index as u32,
                });
            }

            voxels.push(StratumVoxelData {
                start,
                end: geometry.vertex_count() as u32,
                ..voxel.clone()
            });
        }

        rewritten.push(StratumLayerData {
            voxels,
            ..layer.clone()
        });
    }

    geometry.ensure_index();
    Ok((geometry, rewritten))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use strata_core::{geodetic_to_ecef, RawVertices};

    /// Quantization step giving exact integer coordinates in 0..4
    const STEP: f64 = 16384.0;

    fn header() -> Header {
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

    /// One triangle per voxel; voxel 1 touches the ground
    fn decoded() -> DecodeResult {
        let q = |x: f64| (x * STEP) as u16;
        DecodeResult {
            header: header(),
            vertices: RawVertices {
                u: vec![q(0.0), q(1.0), q(0.0), q(2.0)],
                v: vec![q(0.0), q(0.0), q(1.0), q(1.0)],
                h: vec![q(1.0), q(1.0), q(1.0), q(3.0)],
                normals: vec![0, 0, 127, 0, 0, 127, 0, 0, 127, 0, 0, 127],
            },
            indices: vec![0, 1, 2, 1, 3, 2],
            face_types: vec![FaceType::SIDE.bits(), FaceType::TOP_GROUND.bits()],
            layers: vec![StratumLayerData {
                id: 5,
                kind: LayerKind::Voxel,
                name: "sand".to_string(),
                material_id: 2,
                voxels: vec![
                    StratumVoxelData {
                        start: 3,
                        end: 6,
                        material_id: 2,
                        neighbors: [1, -1, -1],
                    },
                    StratumVoxelData {
                        start: 0,
                        end: 3,
                        material_id: 2,
                        neighbors: [0, -1, -1],
                    },
                ],
            }],
            extensions: TileExtensions::default(),
        }
    }

    fn tile() -> StratumTileData {
        StratumTileData::from_decode(decoded(), Projection::Planar, PipelineConfig::builtin())
            .unwrap()
    }

    #[test]
    fn test_center_adjusted_into_projection() {
        let tile = tile();
        for c in tile.center() {
            assert_abs_diff_eq!(c, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_vertices_duplicated_and_ranges_rewritten() {
        let tile = tile();
        let geometry = tile.geometry();
        assert_eq!(geometry.vertex_count(), 6);
        assert_eq!(geometry.indices, vec![0, 1, 2, 3, 4, 5]);

        let layer = tile.layer(0).unwrap();
        assert_eq!(layer.entries()[0].start, 0);
        assert_eq!(layer.entries()[0].end, 3);
        assert_eq!(layer.entries()[1].start, 3);

        // Voxel 0 was decoded from the original second triangle
        assert_eq!(geometry.vertex_face_type(0), FaceType::TOP_GROUND);
        assert_eq!(&geometry.positions[3..6], &[2.0, 1.0, 3.0]);
        assert_eq!(geometry.voxel_indices, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_ground_uvs_use_geographic_box() {
        let tile = tile();
        let uv = &tile.geometry().uvs;
        // Vertex (2, 1) on a ground face maps to u = 2 / max_lon
        assert_abs_diff_eq!(uv[2], (2.0 / (65535.0 / STEP)) as f32, epsilon = 1e-6);
        // Side faces use the box projection of the local position
        assert_eq!(&uv[6..8], &[0.0, 0.0]);
    }

    #[test]
    fn test_shell_keeps_ground_triangle_only() {
        let tile = tile();
        let shell = tile.build_shell_geometry();
        assert_eq!(shell.triangle_count(), 1);
        assert!(shell.face_types.iter().all(|&f| f == FaceType::TOP_GROUND.bits()));
    }

    #[test]
    fn test_coordinate_round_trip() {
        let tile = tile();
        let local = tile.to_local(1.5, 0.5, 2.0);
        let back = tile.to_geographic(&local);
        assert_abs_diff_eq!(back[0], 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(back[1], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(back[2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ground_height_from_mesh() {
        let tile = tile();
        // Ground triangle (1,0,1) (2,1,3) (0,1,1) lies on z = x + y
        let z = tile.ground_height_at(1.0, 0.5).unwrap();
        assert_abs_diff_eq!(z, 1.5, epsilon = 1e-5);
        assert!(tile.ground_height_at(10.0, 10.0).is_none());
        assert_eq!(tile.surface_height_at(1.0, 0.5), tile.ground_height_at(1.0, 0.5));
    }

    #[test]
    fn test_malformed_decode_is_rejected() {
        let mut bad = decoded();
        bad.indices[0] = 99;
        let result =
            StratumTileData::from_decode(bad, Projection::Planar, PipelineConfig::builtin());
        assert!(matches!(result, Err(Error::CoreError(_))));
    }

    #[test]
    fn test_shared_vertices_dequantized_once() {
        let decoded = decoded();
        let mut cache = DequantizationCache::new(&decoded, Projection::Planar, [0.0, 1.0, 0.0]);
        let first = cache.get(1);
        assert_eq!(cache.slots.iter().filter(|s| s.is_some()).count(), 1);
        let again = cache.get(1);
        assert_eq!(first.local, again.local);
        assert_abs_diff_eq!(first.geographic[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.local[1], -1.0, epsilon = 1e-12);
    }
}
