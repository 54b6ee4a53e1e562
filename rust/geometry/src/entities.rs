// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Auxiliary tile entities
//!
//! Collapse pillars, boreholes, faults and section lines are keyed by a
//! layer id and built on demand from the tile. Each owns its derived
//! geometry; collapse pillars also carry a brush for Boolean subtraction.

use crate::buffer::{TileGeometry, VertexRecord};
use crate::csg::ClippableGeometry;
use crate::error::Result;
use crate::frustum::extrude_prism;
use crate::tile::StratumTileData;
use crate::voxel::BoundingSphere;
use nalgebra::{Point2, Point3, Vector3};
use strata_core::{BoreholeRecord, FaceType, LayerKind, SectionLineRecord};
use tracing::{debug, error};

/// Half width of the column generated for boreholes without voxels
const BOREHOLE_HALF_WIDTH: f64 = 0.5;

/// Karst collapse column cutting through the strata
#[derive(Debug, Clone)]
pub struct CollapsePillar {
    pub layer_id: u32,
    pub name: String,
    clip: ClippableGeometry,
    sphere: Option<BoundingSphere>,
}

impl CollapsePillar {
    fn new(layer_id: u32, name: String, geometry: TileGeometry) -> Self {
        let sphere =
            BoundingSphere::from_points((0..geometry.vertex_count()).map(|i| geometry.position(i)));
        Self {
            layer_id,
            name,
            clip: ClippableGeometry::new(geometry),
            sphere,
        }
    }

    pub fn geometry(&self) -> &TileGeometry {
        self.clip.brush()
    }

    pub fn clip(&self) -> &ClippableGeometry {
        &self.clip
    }

    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.sphere
    }

    pub fn dispose(&mut self) {
        self.clip = ClippableGeometry::default();
        self.sphere = None;
    }
}

/// Drill hole between two heights under a collar
#[derive(Debug, Clone)]
pub struct Borehole {
    pub id: u32,
    pub layer_id: u32,
    pub name: String,
    /// Collar position in the tile frame
    pub collar: Point3<f64>,
    /// Local height of the top
    pub top: f64,
    /// Local height of the bottom
    pub bottom: f64,
    geometry: TileGeometry,
}

impl Borehole {
    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn dispose(&mut self) {
        self.geometry.dispose();
    }
}

#[derive(Debug, Clone)]
pub struct FaultProfile {
    pub id: u32,
    pub layer_id: u32,
    pub name: String,
    /// Dip angle in degrees
    pub dip: f64,
    geometry: TileGeometry,
}

impl FaultProfile {
    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn dispose(&mut self) {
        self.geometry.dispose();
    }
}

/// Vertical ribbon marking a predefined section line
#[derive(Debug, Clone)]
pub struct SectionLine {
    pub id: u32,
    pub name: String,
    /// Line vertices in the tile frame at height zero
    pub points: Vec<Point3<f64>>,
    geometry: TileGeometry,
}

impl SectionLine {
    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn dispose(&mut self) {
        self.geometry.dispose();
    }
}

impl StratumTileData {
    /// Geometry of the layer with `layer_id` and the expected kind.
    /// Missing or mismatched layers are logged and yield `None`.
    fn entity_layer_geometry(&self, layer_id: u32, kind: LayerKind) -> Option<TileGeometry> {
        let Some(layer) = self.layer_by_id(layer_id) else {
            error!(layer = layer_id, ?kind, "entity references a missing layer");
            return None;
        };
        if layer.kind != kind {
            error!(layer = layer_id, expected = ?kind, found = ?layer.kind, "entity layer has the wrong kind");
            return None;
        }
        if layer.is_empty() {
            return None;
        }
        let mut geometry = self.layer_geometry(layer);
        geometry.ensure_index();
        Some(geometry)
    }

    pub fn create_collapse_pillars(&self) -> Vec<CollapsePillar> {
        self.extensions
            .collapse_pillars
            .iter()
            .filter_map(|record| self.create_collapse_pillar(record.layer_id))
            .collect()
    }

    /// Collapse pillar backed by layer `layer_id`
    pub fn create_collapse_pillar(&self, layer_id: u32) -> Option<CollapsePillar> {
        let record = self
            .extensions
            .collapse_pillars
            .iter()
            .find(|r| r.layer_id == layer_id)?;
        let Some(geometry) = self.entity_layer_geometry(layer_id, LayerKind::Collapse) else {
            error!(layer = layer_id, name = %record.name, "collapse pillar has no geometry");
            return None;
        };
        Some(CollapsePillar::new(layer_id, record.name.clone(), geometry))
    }

    pub fn create_boreholes(&self) -> Result<Vec<Borehole>> {
        self.extensions
            .boreholes
            .iter()
            .map(|record| self.create_borehole(record))
            .collect()
    }

    fn create_borehole(&self, record: &BoreholeRecord) -> Result<Borehole> {
        let collar = self.to_local(record.lon, record.lat, record.top);
        let bottom = self.to_local(record.lon, record.lat, record.bottom).z;

        let geometry = match self.entity_layer_geometry(record.layer_id, LayerKind::Borehole) {
            Some(geometry) => geometry,
            None => {
                debug!(borehole = record.id, "generating borehole column");
                self.borehole_column(record, &collar, bottom)?
            }
        };

        Ok(Borehole {
            id: record.id,
            layer_id: record.layer_id,
            name: record.name.clone(),
            collar,
            top: collar.z,
            bottom,
            geometry,
        })
    }

    /// Square column around the collar for boreholes without voxels
    fn borehole_column(
        &self,
        record: &BoreholeRecord,
        collar: &Point3<f64>,
        bottom: f64,
    ) -> Result<TileGeometry> {
        let h = BOREHOLE_HALF_WIDTH;
        let footprint = [(-h, -h), (h, -h), (h, h), (-h, h)]
            .iter()
            .map(|&(dx, dy)| Point2::new(collar.x + dx, collar.y + dy))
            .collect::<Vec<_>>();
        let (low, high) = if bottom < collar.z {
            (bottom, collar.z)
        } else {
            (collar.z, bottom)
        };

        let mut column = extrude_prism(&footprint, low, high, FaceType::SIDE)?;
        let layer = self.layer_by_id(record.layer_id);
        let material_id = layer.map_or(0, |l| l.material_id);
        let layer_index = layer.map_or(0, |l| l.layer_index);
        column.material_ids.fill(material_id);
        column.layer_indices.fill(layer_index);
        Ok(column)
    }

    pub fn create_faults(&self) -> Vec<FaultProfile> {
        self.extensions
            .faults
            .iter()
            .filter_map(|record| {
                let geometry = self.entity_layer_geometry(record.layer_id, LayerKind::Fault)?;
                Some(FaultProfile {
                    id: record.id,
                    layer_id: record.layer_id,
                    name: record.name.clone(),
                    dip: record.dip,
                    geometry,
                })
            })
            .collect()
    }

    pub fn create_section_lines(&self) -> Vec<SectionLine> {
        self.extensions
            .section_lines
            .iter()
            .filter_map(|record| {
                if record.points.len() < 2 {
                    error!(section = record.id, "section line needs at least two points");
                    return None;
                }
                Some(self.create_section_line(record))
            })
            .collect()
    }

    fn create_section_line(&self, record: &SectionLineRecord) -> SectionLine {
        let points: Vec<Point3<f64>> = record
            .points
            .iter()
            .map(|&[lon, lat]| {
                let mut p = self.to_local(lon, lat, 0.0);
                p.z = 0.0;
                p
            })
            .collect();
        let (bottom, top) = self.local_height_range();
        let geometry = section_ribbon(&points, bottom, top);
        SectionLine {
            id: record.id,
            name: record.name.clone(),
            points,
            geometry,
        }
    }

    /// Geometry of every borehole, fault and section line merged together
    pub fn auxiliary_geometry(&self) -> Result<TileGeometry> {
        let mut merged = TileGeometry::new();
        for borehole in self.create_boreholes()? {
            merged.merge(borehole.geometry());
        }
        for fault in self.create_faults() {
            merged.merge(fault.geometry());
        }
        for line in self.create_section_lines() {
            merged.merge(line.geometry());
        }
        merged.ensure_index();
        Ok(merged)
    }
}

/// Double-sided vertical wall through `points` between two heights.
/// U runs along the line, V up the wall.
fn section_ribbon(points: &[Point3<f64>], bottom: f64, top: f64) -> TileGeometry {
    let mut ribbon = TileGeometry::with_capacity(points.len() * 4, points.len() * 12);
    let height = (top - bottom).max(f64::EPSILON);
    let mut along = 0.0;

    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let length = (b - a).norm();
        if length <= f64::EPSILON {
            continue;
        }
        let normal = Vector3::new(b.y - a.y, a.x - b.x, 0.0) / length;

        for side in [1.0, -1.0] {
            let n = normal * side;
            let corner = |p: &Point3<f64>, z: f64, u: f64| VertexRecord {
                position: [p.x as f32, p.y as f32, z as f32],
                normal: [n.x as f32, n.y as f32, 0.0],
                uv: [u as f32, ((z - bottom) / height) as f32],
                face_type: FaceType::SIDE,
                ..Default::default()
            };
            let i0 = ribbon.push_vertex(&corner(&a, bottom, along));
            let i1 = ribbon.push_vertex(&corner(&b, bottom, along + length));
            let i2 = ribbon.push_vertex(&corner(&b, top, along + length));
            let i3 = ribbon.push_vertex(&corner(&a, top, along));
            if side > 0.0 {
                ribbon.add_triangle(i0, i2, i1);
                ribbon.add_triangle(i0, i3, i2);
            } else {
                ribbon.add_triangle(i0, i1, i2);
                ribbon.add_triangle(i0, i2, i3);
            }
        }
        along += length;
    }
    ribbon
}
