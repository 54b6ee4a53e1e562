// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ground-modification clipping
//!
//! [`StratumMeshClipper`] turns ground-modification polygons into prism
//! brushes, sorts voxels by bounding sphere into pass-through and clip
//! buckets, subtracts the brushes from the intersecting voxels and retags
//! the faces touching a clip volume as boundary faces.

use crate::buffer::{count_boundary_edges, merge_geometries, AttributeSet, TileGeometry};
use crate::csg::ClippableGeometry;
use crate::error::{Error, Result};
use crate::frustum::{Containment, FrustumGeoArea, FrustumTester};
use crate::tile::StratumTileData;
use crate::voxel::StratumVoxel;
use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};
use strata_core::FaceType;
use tracing::{debug, warn};

/// Longest miter of a corridor joint, in half widths
const MITER_LIMIT: f64 = 4.0;

/// Footprint of a ground modification in geographic coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModificationShape {
    /// Longitude/latitude box
    GeoBox { min: [f64; 2], max: [f64; 2] },
    /// Closed ring of (lon, lat) points
    Polygon(Vec<[f64; 2]>),
    /// Corridor of `width` tile units centred on a (lon, lat) polyline
    LineString { points: Vec<[f64; 2]>, width: f64 },
}

/// Vertical extent of a ground modification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClipHeight {
    /// Absolute bottom height
    Height(f64),
    /// Depth below the ground surface
    Depth(f64),
}

/// Externally supplied clip region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundModificationPolygon {
    pub shape: ModificationShape,
    pub clip: ClipHeight,
}

impl GroundModificationPolygon {
    pub fn new(shape: ModificationShape, clip: ClipHeight) -> Self {
        Self { shape, clip }
    }

    /// Footprint in the tile's local XY plane
    pub fn local_footprint(&self, tile: &StratumTileData) -> Result<Vec<Point2<f64>>> {
        let local = |[lon, lat]: [f64; 2]| {
            let p = tile.to_local(lon, lat, 0.0);
            Point2::new(p.x, p.y)
        };
        match &self.shape {
            ModificationShape::GeoBox { min, max } => Ok(vec![
                local([min[0], min[1]]),
                local([max[0], min[1]]),
                local([max[0], max[1]]),
                local([min[0], max[1]]),
            ]),
            ModificationShape::Polygon(ring) => Ok(ring.iter().copied().map(local).collect()),
            ModificationShape::LineString { points, width } => {
                let line: Vec<Point2<f64>> = points.iter().copied().map(local).collect();
                corridor(&line, width * 0.5)
            }
        }
    }

    /// Clip volume in the tile frame
    pub fn to_area(&self, tile: &StratumTileData) -> Result<FrustumGeoArea> {
        let footprint = self.local_footprint(tile)?;
        let (_, max_height) = tile.local_height_range();
        let top = max_height + tile.config().depth_clip_margin;

        let bottom = match self.clip {
            ClipHeight::Height(h) => {
                let c = centroid(&footprint);
                let [lon, lat, _] = tile.to_geographic(&Point3::new(c.x, c.y, 0.0));
                tile.to_local(lon, lat, h).z
            }
            ClipHeight::Depth(d) => {
                let c = centroid(&footprint);
                let surface = tile.surface_height_at(c.x, c.y).unwrap_or(max_height);
                surface - d
            }
        };
        FrustumGeoArea::new(footprint, bottom, top)
    }
}

fn centroid(points: &[Point2<f64>]) -> Point2<f64> {
    let n = points.len().max(1) as f64;
    let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords);
    Point2::from(sum / n)
}

/// Offset a polyline by `half_width` on both sides with mitered joints
fn corridor(line: &[Point2<f64>], half_width: f64) -> Result<Vec<Point2<f64>>> {
    let mut points: Vec<Point2<f64>> = Vec::with_capacity(line.len());
    for p in line {
        if points.last().map_or(true, |last| (p - last).norm() > f64::EPSILON) {
            points.push(*p);
        }
    }
    if points.len() < 2 || !(half_width > 0.0) {
        return Err(Error::InvalidPolygon(format!(
            "line string corridor needs two distinct points and a positive width, got {} points",
            points.len()
        )));
    }

    let segment_normal = |a: &Point2<f64>, b: &Point2<f64>| {
        let d = (b - a).normalize();
        Vector2::new(-d.y, d.x)
    };

    let n = points.len();
    let offsets: Vec<Vector2<f64>> = (0..n)
        .map(|i| {
            if i == 0 {
                return segment_normal(&points[0], &points[1]) * half_width;
            }
            if i == n - 1 {
                return segment_normal(&points[n - 2], &points[n - 1]) * half_width;
            }
            let before = segment_normal(&points[i - 1], &points[i]);
            let after = segment_normal(&points[i], &points[i + 1]);
            let bisector = before + after;
            let len = bisector.norm();
            if len < 1e-9 {
                // Doubled back on itself
                return after * half_width;
            }
            let miter = bisector / len;
            let scale = (half_width / miter.dot(&after)).min(half_width * MITER_LIMIT);
            miter * scale
        })
        .collect();

    let left = points.iter().zip(&offsets).map(|(p, o)| p + o);
    let right = points.iter().zip(&offsets).rev().map(|(p, o)| p - o);
    Ok(left.chain(right).collect())
}

/// Options for one clip run
#[derive(Debug, Clone)]
pub struct ClipOptions {
    /// Subtract the modification volumes; otherwise export the shell only
    pub clip_mode: bool,
    /// Regions whose boundary tags are demoted back to plain side faces
    pub filter_polygons: Vec<GroundModificationPolygon>,
    /// Vertex attributes kept in the output
    pub attributes: AttributeSet,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            clip_mode: true,
            filter_polygons: Vec::new(),
            attributes: AttributeSet::EXPORT,
        }
    }
}

/// Result of a clip run
#[derive(Debug, Clone, Default)]
pub struct ClipOutcome {
    /// Merged, retagged tile mesh
    pub geometry: TileGeometry,
    /// Voxels replaced by a Boolean result (including fully removed ones)
    pub clipped_voxels: usize,
    /// Voxels outside every clip volume, copied unchanged
    pub passthrough_voxels: usize,
    /// Voxels whose subtraction failed and were kept unclipped
    pub fallback_voxels: usize,
    /// Collapse pillars touching a clip volume, left out of the mesh
    pub excluded_pillars: usize,
}

/// Boolean clip orchestrator over one tile
pub struct StratumMeshClipper<'t> {
    tile: &'t StratumTileData,
}

impl<'t> StratumMeshClipper<'t> {
    pub fn new(tile: &'t StratumTileData) -> Self {
        Self { tile }
    }

    fn testers(&self, polygons: &[GroundModificationPolygon]) -> Result<Vec<FrustumTester>> {
        let epsilon = self.tile.config().boundary_epsilon;
        polygons
            .iter()
            .map(|p| Ok(FrustumTester::new(p.to_area(self.tile)?, epsilon)))
            .collect()
    }

    /// Build the exported mesh for `polygons`
    pub fn clip(&self, polygons: &[GroundModificationPolygon], options: &ClipOptions) -> Result<ClipOutcome> {
        let tile = self.tile;
        let scale = tile.config().closed_edge_scale;
        let pillars = tile.create_collapse_pillars();
        let auxiliary = tile.auxiliary_geometry()?;

        if !options.clip_mode || polygons.is_empty() {
            let shell = tile.build_shell_geometry();
            let mut parts = vec![&shell];
            parts.extend(pillars.iter().map(|p| p.geometry()));
            parts.push(&auxiliary);
            let mut geometry = merge_geometries(parts);
            geometry.retain_attributes(options.attributes);
            debug!(triangles = geometry.triangle_count(), "exported shell without clipping");
            return Ok(ClipOutcome {
                geometry,
                ..Default::default()
            });
        }

        let mut testers = self.testers(polygons)?;
        let filter_testers = self.testers(&options.filter_polygons)?;
        let brushes = testers
            .iter()
            .map(|t| t.area().to_brush())
            .collect::<Result<Vec<_>>>()?;

        let mut outcome = ClipOutcome::default();
        let mut parts: Vec<TileGeometry> = Vec::new();
        let mut queued: Vec<(StratumVoxel<'_>, Vec<usize>)> = Vec::new();

        for voxel in tile.stratum_voxels() {
            let sphere = voxel.bounding_sphere();
            let mut bounds = None;
            let mut hits = Vec::new();
            let mut swallowed = false;
            for (i, tester) in testers.iter().enumerate() {
                let containment = match tester.intersects_sphere(&sphere.center, sphere.radius) {
                    Containment::Intersects => {
                        let (min, max) = *bounds.get_or_insert_with(|| voxel.bounds());
                        tester.classify_aabb(&min, &max)
                    }
                    other => other,
                };
                match containment {
                    Containment::Outside => {}
                    Containment::Intersects => hits.push(i),
                    Containment::Inside => swallowed = true,
                }
            }

            if swallowed {
                outcome.clipped_voxels += 1;
                continue;
            }
            if hits.is_empty() {
                parts.push(voxel.geometry());
                outcome.passthrough_voxels += 1;
                continue;
            }
            for &i in &hits {
                testers[i].expand_to_sphere(&sphere.center, sphere.radius);
            }
            queued.push((voxel, hits));
        }

        // Every operand is validated before the first subtraction
        for (voxel, _) in &queued {
            let what = || format!("voxel {} of layer {}", voxel.index(), voxel.layer_index());
            if voxel.triangle_count() == 0 {
                return Err(Error::NonManifold {
                    what: what(),
                    boundary_edges: 0,
                });
            }
            ensure_closed(voxel.view().triangles(), scale, what)?;
        }
        for (i, brush) in brushes.iter().enumerate() {
            ensure_closed(brush.triangles(), scale, || format!("clip volume {}", i))?;
        }

        for pillar in &pillars {
            let touched = pillar.bounding_sphere().map_or(false, |s| {
                let (min, max) = pillar.geometry().bounds();
                testers.iter().any(|t| {
                    t.intersects_sphere(&s.center, s.radius) != Containment::Outside
                        && t.classify_aabb(&min, &max) != Containment::Outside
                })
            });
            if !touched {
                parts.push(pillar.geometry().clone());
                continue;
            }
            ensure_closed(pillar.geometry().triangles(), scale, || {
                format!("collapse pillar {}", pillar.layer_id)
            })?;
            outcome.excluded_pillars += 1;
        }

        for (voxel, hits) in queued {
            match self.subtract(&voxel, &hits, &brushes) {
                Ok(clipped) => {
                    parts.push(clipped);
                    outcome.clipped_voxels += 1;
                }
                Err(e) => {
                    warn!(
                        voxel = voxel.index(),
                        layer = voxel.layer_index(),
                        error = %e,
                        "voxel clip failed, keeping unclipped geometry"
                    );
                    parts.push(voxel.geometry());
                    outcome.fallback_voxels += 1;
                }
            }
        }

        parts.push(auxiliary);
        let mut geometry = merge_geometries(&parts);
        mark_boundary_vertices_by_triangle_intersection(&mut geometry, &testers, &filter_testers);
        geometry.retain_attributes(options.attributes);

        debug!(
            clipped = outcome.clipped_voxels,
            passthrough = outcome.passthrough_voxels,
            fallback = outcome.fallback_voxels,
            excluded_pillars = outcome.excluded_pillars,
            triangles = geometry.triangle_count(),
            "clipped tile"
        );
        outcome.geometry = geometry;
        Ok(outcome)
    }

    /// Subtract each intersecting brush in turn. Every intermediate result
    /// must be closed before it is cut again.
    fn subtract(&self, voxel: &StratumVoxel<'_>, hits: &[usize], brushes: &[TileGeometry]) -> Result<TileGeometry> {
        let scale = self.tile.config().closed_edge_scale;
        let mut current = voxel.to_clippable();
        for (step, &i) in hits.iter().enumerate() {
            if current.brush().is_empty() {
                break;
            }
            if step > 0 {
                ensure_closed(current.brush().triangles(), scale, || {
                    format!("voxel {} after {} cuts", voxel.index(), step)
                })?;
            }
            let next = current.clip_against(&brushes[i], AttributeSet::ALL, Some(self.tile.uv_mapper()))?;
            current = ClippableGeometry::new(next);
        }
        Ok(current.into_brush())
    }
}

/// `NonManifold` unless every edge of `triangles` is shared by exactly two
fn ensure_closed<I, F>(triangles: I, scale: f64, what: F) -> Result<()>
where
    I: IntoIterator<Item = [Point3<f64>; 3]>,
    F: FnOnce() -> String,
{
    let boundary_edges = count_boundary_edges(triangles, scale);
    if boundary_edges > 0 {
        return Err(Error::NonManifold {
            what: what(),
            boundary_edges,
        });
    }
    Ok(())
}

/// Retag the vertices of every triangle touching a clip volume as boundary
/// faces, then demote boundary vertices touching a filter volume back to
/// side faces.
///
/// Top-ground vertices are never retagged, and the filter pass leaves every
/// tag other than `BOUNDARY_SIDE` alone. This is the only step that
/// mutates a finished mesh and it must complete before export.
pub fn mark_boundary_vertices_by_triangle_intersection(
    geometry: &mut TileGeometry,
    testers: &[FrustumTester],
    filter_testers: &[FrustumTester],
) {
    if geometry.face_types.len() != geometry.vertex_count() {
        geometry.fill_missing_attributes();
    }
    retag(geometry, testers, FaceType::BOUNDARY_SIDE);
    retag(geometry, filter_testers, FaceType::SIDE);
}

fn retag(geometry: &mut TileGeometry, testers: &[FrustumTester], face_type: FaceType) {
    if testers.is_empty() {
        return;
    }
    let mut marked = vec![false; geometry.vertex_count()];
    for t in 0..geometry.triangle_count() {
        let triangle = geometry.triangle_positions(t);
        if testers.iter().any(|tester| tester.intersects_triangle(&triangle)) {
            for v in geometry.triangle_vertices(t) {
                marked[v] = true;
            }
        }
    }

    let demoting = face_type == FaceType::SIDE;
    for (v, flag) in geometry.face_types.iter_mut().enumerate() {
        let current = FaceType(*flag);
        if !marked[v] || current.intersects(FaceType::TOP_GROUND) {
            continue;
        }
        if demoting && current != FaceType::BOUNDARY_SIDE {
            continue;
        }
        *flag = face_type.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::box_geometry;
    use crate::bool2d::signed_area;
    use approx::assert_relative_eq;

    fn tester(min: [f64; 2], max: [f64; 2], bottom: f64, top: f64) -> FrustumTester {
        let footprint = vec![
            Point2::new(min[0], min[1]),
            Point2::new(max[0], min[1]),
            Point2::new(max[0], max[1]),
            Point2::new(min[0], max[1]),
        ];
        FrustumTester::new(FrustumGeoArea::new(footprint, bottom, top).unwrap(), 1e-4)
    }

    #[test]
    fn test_straight_corridor() {
        let line = [Point2::new(0.0, 0.0), Point2::new(4.0, 0.0)];
        let ring = corridor(&line, 1.0).unwrap();
        assert_eq!(ring.len(), 4);
        assert_relative_eq!(signed_area(&ring).abs(), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_corridor_miter_keeps_width() {
        let line = [Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), Point2::new(2.0, 2.0)];
        let ring = corridor(&line, 0.5).unwrap();
        assert_eq!(ring.len(), 6);
        // Inner corner of the right angle
        assert_relative_eq!(ring[1], Point2::new(1.5, 0.5), epsilon = 1e-9);
        assert_relative_eq!(ring[4], Point2::new(2.5, -0.5), epsilon = 1e-9);
    }

    #[test]
    fn test_corridor_rejects_single_point() {
        let p = Point2::new(1.0, 1.0);
        assert!(corridor(&[p, p], 1.0).is_err());
    }

    #[test]
    fn test_boundary_marking_spares_ground() {
        let mut cube = box_geometry([0.0; 3], [1.0; 3], FaceType::SIDE);
        // +z face is top ground
        for v in 6..12 {
            cube.face_types[v] = FaceType::TOP_GROUND.bits();
        }
        let testers = [tester([-1.0, -1.0], [0.5, 2.0], -1.0, 2.0)];
        mark_boundary_vertices_by_triangle_intersection(&mut cube, &testers, &[]);

        assert!(cube.face_types[6..12].iter().all(|&f| f == FaceType::TOP_GROUND.bits()));
        // The -x wall lies inside the volume
        assert!(cube.face_types[12..18].iter().all(|&f| f == FaceType::BOUNDARY_SIDE.bits()));
    }

    #[test]
    fn test_filter_demotes_after_marking() {
        let mut cube = box_geometry([0.0; 3], [1.0; 3], FaceType::SIDE);
        let region = tester([-1.0, -1.0], [2.0, 2.0], -1.0, 2.0);
        mark_boundary_vertices_by_triangle_intersection(&mut cube, &[region.clone()], &[region]);
        assert!(cube.face_types.iter().all(|&f| f == FaceType::SIDE.bits()));
    }

    #[test]
    fn test_filter_keeps_non_boundary_tags() {
        let mut cube = box_geometry([0.0; 3], [1.0; 3], FaceType::BASE_BEDROCK);
        // -x wall is a boundary face left by an earlier cut
        for v in 12..18 {
            cube.face_types[v] = FaceType::BOUNDARY_SIDE.bits();
        }
        let region = tester([-1.0, -1.0], [2.0, 2.0], -1.0, 2.0);
        mark_boundary_vertices_by_triangle_intersection(&mut cube, &[], &[region]);

        assert!(cube.face_types[12..18].iter().all(|&f| f == FaceType::SIDE.bits()));
        let bedrock = cube
            .face_types
            .iter()
            .filter(|&&f| f == FaceType::BASE_BEDROCK.bits())
            .count();
        assert_eq!(bedrock, cube.vertex_count() - 6);
    }

    #[test]
    fn test_ensure_closed_reports_open_surface() {
        let cube = box_geometry([0.0; 3], [1.0; 3], FaceType::SIDE);
        assert!(ensure_closed(cube.triangles(), 1e6, || "cube".into()).is_ok());

        let open = ensure_closed(cube.triangles().take(10), 1e6, || "open cube".into());
        match open {
            Err(Error::NonManifold { what, boundary_edges }) => {
                assert_eq!(what, "open cube");
                assert_eq!(boundary_edges, 4);
            }
            other => panic!("expected NonManifold, got {:?}", other),
        }
    }

    #[test]
    fn test_far_triangles_untouched() {
        let mut cube = box_geometry([10.0; 3], [11.0; 3], FaceType::TOP);
        let testers = [tester([0.0, 0.0], [1.0, 1.0], 0.0, 1.0)];
        mark_boundary_vertices_by_triangle_intersection(&mut cube, &testers, &[]);
        assert!(cube.face_types.iter().all(|&f| f == FaceType::TOP.bits()));
    }
}
