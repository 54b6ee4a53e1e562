// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-section profiles
//!
//! A cut line and an up direction span vertical cutting planes, one per
//! line segment. Every stratum voxel's top and base surfaces are cut by the
//! plane, the hits are ordered along the line and paired into profile
//! polygons, and those polygons are clipped against the collapse pillar
//! sections before triangulation.

use crate::bool2d::{bounds_overlap, contour_bounds, shape_difference, signed_area, Shape2D};
use crate::buffer::{TileGeometry, VertexRecord};
use crate::entities::CollapsePillar;
use crate::error::{Error, Result};
use crate::intersect::{segment_plane_intersection, Plane};
use crate::tile::StratumTileData;
use crate::triangulation::{triangulate_polygon, triangulate_polygon_with_holes, PlaneBasis};
use crate::voxel::StratumVoxel;
use nalgebra::{Point2, Point3, Vector3};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::ops::Range;
use strata_core::FaceType;
use tracing::{debug, warn};

/// Slack on the segment parameter when keeping plane hits
const PARAM_EPSILON: f64 = 1e-9;

/// A polyline to cut along, in geographic or tile-local coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum CutLine {
    Local(Vec<Point3<f64>>),
    /// (lon, lat, height) vertices
    Geographic(Vec<[f64; 3]>),
}

impl CutLine {
    pub fn local(points: Vec<Point3<f64>>) -> Self {
        Self::Local(points)
    }

    pub fn geographic(points: Vec<[f64; 3]>) -> Self {
        Self::Geographic(points)
    }

    /// Vertices in the tile frame
    pub fn resolve(&self, tile: &StratumTileData) -> Result<Vec<Point3<f64>>> {
        let points: Vec<Point3<f64>> = match self {
            CutLine::Local(points) => points.clone(),
            CutLine::Geographic(points) => points
                .iter()
                .map(|&[lon, lat, h]| tile.to_local(lon, lat, h))
                .collect(),
        };
        if points.len() < 2 {
            return Err(Error::InvalidPolygon(format!(
                "cut line needs at least two points, got {}",
                points.len()
            )));
        }
        Ok(points)
    }
}

/// One straight piece of a cut line and its vertical cutting plane
#[derive(Debug, Clone)]
pub struct CutSegment {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    /// Arc length of the line before this segment
    pub offset: f64,
    pub length: f64,
    pub plane: Plane,
    /// In-plane frame: `u` along the segment, `v` along up
    pub basis: PlaneBasis,
}

impl CutSegment {
    pub fn new(start: Point3<f64>, end: Point3<f64>, offset: f64, up: &Vector3<f64>) -> Result<Self> {
        let direction = end - start;
        let length = direction.norm();
        let normal = direction
            .cross(up)
            .try_normalize(1e-12)
            .ok_or_else(|| Error::InvalidPolygon("cut segment is degenerate or parallel to up".to_string()))?;
        let basis = PlaneBasis::from_axes(start, direction, *up)
            .ok_or_else(|| Error::InvalidPolygon("cut segment is parallel to up".to_string()))?;
        Ok(Self {
            start,
            end,
            offset,
            length,
            plane: Plane::new(start, normal),
            basis,
        })
    }

    /// Position of `p` along the segment, 0 at the start and 1 at the end
    #[inline]
    pub fn param(&self, p: &Point3<f64>) -> f64 {
        self.basis.project(p).x / self.length
    }
}

/// Split a polyline into cutting segments, skipping zero-length pieces
fn cut_segments(points: &[Point3<f64>], up: &Vector3<f64>) -> Result<Vec<CutSegment>> {
    let mut segments = Vec::with_capacity(points.len() - 1);
    let mut offset = 0.0;
    for pair in points.windows(2) {
        if (pair[1] - pair[0]).norm() <= f64::EPSILON {
            continue;
        }
        let segment = CutSegment::new(pair[0], pair[1], offset, up)?;
        offset += segment.length;
        segments.push(segment);
    }
    if segments.is_empty() {
        return Err(Error::InvalidPolygon("cut line has zero length".to_string()));
    }
    Ok(segments)
}

/// Profile of one voxel on one cut segment
#[derive(Debug, Clone)]
pub struct StratumSection {
    pub layer_id: u32,
    pub layer_index: u32,
    pub voxel_index: usize,
    pub material_id: u16,
    /// Index of the cut segment within the line
    pub segment: usize,
    /// Top surface hits ordered along the line
    pub top_points: Vec<Point3<f64>>,
    /// Base surface hits ordered along the line
    pub base_points: Vec<Point3<f64>>,
    /// Polygon per continuous run, top points then reversed base points
    pub polygons: Vec<Vec<Point3<f64>>>,
    pub mesh: TileGeometry,
}

/// Profile of one collapse pillar on one cut segment
#[derive(Debug, Clone)]
pub struct CollapseSection {
    pub layer_id: u32,
    pub name: String,
    pub segment: usize,
    pub polygon: Vec<Point3<f64>>,
    pub mesh: TileGeometry,
}

/// Every section produced by one cut line
#[derive(Debug, Clone, Default)]
pub struct SectionProfile {
    /// Cut line in the tile frame
    pub line: Vec<Point3<f64>>,
    pub strata: Vec<StratumSection>,
    pub collapses: Vec<CollapseSection>,
}

/// Cross-section generator over one tile
pub struct StratumCrossSections<'t> {
    tile: &'t StratumTileData,
}

impl<'t> StratumCrossSections<'t> {
    pub fn new(tile: &'t StratumTileData) -> Self {
        Self { tile }
    }

    pub fn tile(&self) -> &'t StratumTileData {
        self.tile
    }

    /// One profile per cut line
    pub fn generate(&self, lines: &[CutLine], up: Vector3<f64>) -> Result<Vec<SectionProfile>> {
        let up = up
            .try_normalize(1e-12)
            .ok_or_else(|| Error::InvalidPolygon("up direction has zero length".to_string()))?;
        let pillars = self.tile.create_collapse_pillars();

        lines
            .iter()
            .map(|line| {
                let points = line.resolve(self.tile)?;
                self.profile(points, &up, &pillars)
            })
            .collect()
    }

    fn profile(
        &self,
        line: Vec<Point3<f64>>,
        up: &Vector3<f64>,
        pillars: &[CollapsePillar],
    ) -> Result<SectionProfile> {
        let config = self.tile.config();
        let segments = cut_segments(&line, up)?;
        let mut profile = SectionProfile::default();

        for (index, segment) in segments.iter().enumerate() {
            let collapses: Vec<CollapseSection> = pillars
                .iter()
                .filter_map(|pillar| self.collapse_section(pillar, segment, index))
                .collect();

            for voxel in self.tile.stratum_voxels() {
                if let Some(section) = self.stratum_section(&voxel, segment, index, &line, up, &collapses) {
                    profile.strata.push(section);
                }
            }
            profile.collapses.extend(collapses);
        }

        debug!(
            segments = segments.len(),
            strata = profile.strata.len(),
            collapses = profile.collapses.len(),
            decimals = config.section_dedup_decimals,
            "generated cross section"
        );
        profile.line = line;
        Ok(profile)
    }

    fn collapse_section(
        &self,
        pillar: &CollapsePillar,
        segment: &CutSegment,
        index: usize,
    ) -> Option<CollapseSection> {
        let geometry = pillar.geometry();
        let mut hits = Vec::new();
        for t in 0..geometry.triangle_count() {
            let [a, b, c] = geometry.triangle_positions(t);
            for (p, q) in [(a, b), (b, c), (c, a)] {
                if let Some(hit) = segment_plane_intersection(&p, &q, &segment.plane) {
                    hits.push(hit);
                }
            }
        }
        let polygon = collapse_section_polygon(
            hits,
            &segment.basis,
            self.tile.config().section_dedup_decimals,
        );
        if polygon.len() < 3 {
            return None;
        }

        let outline = segment.basis.project_all(&polygon);
        let shape = Shape2D::new(outline);
        let material_id = geometry.material_ids.first().copied().unwrap_or(0);
        let mesh = match section_mesh(&[shape], &segment.basis, material_id, 0, 0, self.tile) {
            Ok(mesh) => mesh,
            Err(e) => {
                warn!(pillar = pillar.layer_id, error = %e, "collapse section triangulation failed");
                return None;
            }
        };
        Some(CollapseSection {
            layer_id: pillar.layer_id,
            name: pillar.name.clone(),
            segment: index,
            polygon,
            mesh,
        })
    }

    fn stratum_section(
        &self,
        voxel: &StratumVoxel<'_>,
        segment: &CutSegment,
        index: usize,
        line: &[Point3<f64>],
        up: &Vector3<f64>,
        collapses: &[CollapseSection],
    ) -> Option<StratumSection> {
        let config = self.tile.config();
        let decimals = config.section_dedup_decimals;

        let top = intersect_face_with_line(
            &voxel.get_triangles_by_face_type(FaceType::TOP_SURFACES),
            segment,
            decimals,
        );
        let base = intersect_face_with_line(
            &voxel.get_triangles_by_face_type(FaceType::BASE_SURFACES),
            segment,
            decimals,
        );
        if top.len() < 2 || base.len() < 2 {
            return None;
        }
        let top = sort_points_along_line(top, line, up, config.sort_up_weight);
        let base = sort_points_along_line(base, line, up, config.sort_up_weight);
        let (top_stations, base_stations) = pair_stations(&top, &base, segment);

        let mut polygons = Vec::new();
        let mut shapes = Vec::new();
        for range in split_continuous_segments(&top_stations, &base_stations, config.pinch_out_threshold) {
            let polygon = run_polygon(&top_stations[range.clone()], &base_stations[range]);
            if polygon.len() < 3 {
                continue;
            }
            shapes.extend(self.clip_against_collapses(&polygon, &segment.basis, collapses));
            polygons.push(polygon);
        }
        if polygons.is_empty() {
            return None;
        }

        let layer = self.tile.layer(voxel.layer_index() as usize)?;
        let mesh = match section_mesh(
            &shapes,
            &segment.basis,
            voxel.material_id(),
            voxel.entry().source_index as u32,
            voxel.layer_index(),
            self.tile,
        ) {
            Ok(mesh) => mesh,
            Err(e) => {
                warn!(
                    layer = layer.id,
                    voxel = voxel.index(),
                    error = %e,
                    "stratum section triangulation failed"
                );
                TileGeometry::new()
            }
        };

        Some(StratumSection {
            layer_id: layer.id,
            layer_index: voxel.layer_index(),
            voxel_index: voxel.index(),
            material_id: voxel.material_id(),
            segment: index,
            top_points: top,
            base_points: base,
            polygons,
            mesh,
        })
    }

    /// Remove every overlapping collapse section from a stratum polygon
    fn clip_against_collapses(
        &self,
        polygon: &[Point3<f64>],
        basis: &PlaneBasis,
        collapses: &[CollapseSection],
    ) -> Vec<Shape2D> {
        let outline = basis.project_all(polygon);
        let mut shapes = vec![Shape2D::new(outline)];
        let bounds = aabb(polygon);

        for collapse in collapses {
            if !aabb_overlap(&bounds, &aabb(&collapse.polygon)) {
                continue;
            }
            let cutter = basis.project_all(&collapse.polygon);
            let Some(cutter_bounds) = contour_bounds(&cutter) else {
                continue;
            };
            shapes = shapes
                .into_iter()
                .flat_map(|shape| {
                    let overlaps = contour_bounds(&shape.outer)
                        .map_or(false, |b| bounds_overlap(&b, &cutter_bounds));
                    if !overlaps {
                        return vec![shape];
                    }
                    shape_difference(&shape, &cutter)
                })
                .collect();
        }
        shapes
    }
}

/// Points where the outline of a face crosses the cutting plane.
///
/// `triangles` is a flat `[x, y, z] x 3` list as produced by
/// [`StratumVoxel::get_triangles_by_face_type`]. Edges shared by two of the
/// triangles are interior to the face and ignored. Hits outside the segment
/// are dropped; the rest are deduplicated at `decimals` places.
pub fn intersect_face_with_line(triangles: &[f32], segment: &CutSegment, decimals: u32) -> Vec<Point3<f64>> {
    let key = |p: &Point3<f64>| round_key(p, decimals);
    let corners: Vec<Point3<f64>> = triangles
        .chunks_exact(3)
        .map(|c| Point3::new(c[0] as f64, c[1] as f64, c[2] as f64))
        .collect();

    let mut edges: FxHashMap<([i64; 3], [i64; 3]), (Point3<f64>, Point3<f64>, u32)> = FxHashMap::default();
    for tri in corners.chunks_exact(3) {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let (ka, kb) = (key(&a), key(&b));
            if ka == kb {
                continue;
            }
            let edge_key = if ka < kb { (ka, kb) } else { (kb, ka) };
            edges.entry(edge_key).or_insert((a, b, 0)).2 += 1;
        }
    }

    let mut seen = FxHashSet::default();
    let mut hits = Vec::new();
    let mut outline: Vec<_> = edges.into_iter().filter(|(_, (_, _, uses))| *uses == 1).collect();
    outline.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, (a, b, _)) in outline {
        let Some(hit) = segment_plane_intersection(&a, &b, &segment.plane) else {
            continue;
        };
        let t = segment.param(&hit);
        if !(-PARAM_EPSILON..=1.0 + PARAM_EPSILON).contains(&t) {
            continue;
        }
        if seen.insert(key(&hit)) {
            hits.push(hit);
        }
    }
    hits
}

fn round_key(p: &Point3<f64>, decimals: u32) -> [i64; 3] {
    let scale = 10f64.powi(decimals as i32);
    [
        (p.x * scale).round() as i64,
        (p.y * scale).round() as i64,
        (p.z * scale).round() as i64,
    ]
}

/// Distance of `p` along the polyline `line`, measured at its closest
/// segment in the plane perpendicular to `up`
fn station(p: &Point3<f64>, line: &[Point3<f64>], up: &Vector3<f64>) -> f64 {
    let flatten = |v: Vector3<f64>| v - up * v.dot(up);
    let mut best = (f64::MAX, 0.0);
    let mut offset = 0.0;
    for pair in line.windows(2) {
        let d = flatten(pair[1] - pair[0]);
        let len = d.norm();
        let rel = flatten(p - pair[0]);
        let t = if len > f64::EPSILON {
            (rel.dot(&d) / (len * len)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let distance = (rel - d * t).norm();
        if distance < best.0 {
            best = (distance, offset + t * len);
        }
        offset += len;
    }
    best.1
}

/// Order points by arc length along `line`, with a small tie-break on
/// their offset along `up`
pub fn sort_points_along_line(
    points: Vec<Point3<f64>>,
    line: &[Point3<f64>],
    up: &Vector3<f64>,
    up_weight: f64,
) -> Vec<Point3<f64>> {
    let Some(start) = line.first().copied() else {
        return points;
    };
    let mut keyed: Vec<(f64, Point3<f64>)> = points
        .into_iter()
        .map(|p| (station(&p, line, up) + up_weight * (p - start).dot(up), p))
        .collect();
    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    keyed.into_iter().map(|(_, p)| p).collect()
}

/// Resample the top and base runs at their combined stations so each top
/// point has a base partner directly below it
fn pair_stations(
    top: &[Point3<f64>],
    base: &[Point3<f64>],
    segment: &CutSegment,
) -> (Vec<Point3<f64>>, Vec<Point3<f64>>) {
    let along = |p: &Point3<f64>| segment.basis.project(p).x;
    let low = along(&top[0]).max(along(&base[0]));
    let high = along(&top[top.len() - 1]).min(along(&base[base.len() - 1]));
    if high < low {
        return (Vec::new(), Vec::new());
    }

    let mut stations: Vec<f64> = top
        .iter()
        .chain(base)
        .map(along)
        .filter(|s| (low - PARAM_EPSILON..=high + PARAM_EPSILON).contains(s))
        .collect();
    stations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    stations.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let sample = |run: &[Point3<f64>], s: f64| -> Point3<f64> {
        for pair in run.windows(2) {
            let (s0, s1) = (along(&pair[0]), along(&pair[1]));
            if s <= s1 + PARAM_EPSILON {
                let t = if (s1 - s0).abs() > f64::EPSILON {
                    ((s - s0) / (s1 - s0)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                return pair[0] + (pair[1] - pair[0]) * t;
            }
        }
        run[run.len() - 1]
    };

    stations
        .into_iter()
        .map(|s| (sample(top, s), sample(base, s)))
        .unzip()
}

/// Split paired top/base stations at pinch-outs.
///
/// A station whose thickness is below `threshold` ends the current run. A
/// pinched station next to a thick one closes that run as a wedge tip, so
/// it may be the last index of one range and the first of the next; no
/// range ever contains a pinched station in its interior.
pub fn split_continuous_segments(
    top: &[Point3<f64>],
    base: &[Point3<f64>],
    threshold: f64,
) -> Vec<Range<usize>> {
    let n = top.len().min(base.len());
    let pinched: Vec<bool> = (0..n).map(|i| (top[i] - base[i]).norm() < threshold).collect();

    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    for i in 0..n {
        match (start, pinched[i]) {
            (None, false) => start = Some(if i > 0 && pinched[i - 1] { i - 1 } else { i }),
            (Some(s), true) => {
                ranges.push(s..i + 1);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push(s..n);
    }
    ranges.retain(|r| r.len() >= 2);
    ranges
}

/// Top points followed by reversed base points, without repeated corners
fn run_polygon(top: &[Point3<f64>], base: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let mut polygon: Vec<Point3<f64>> = Vec::with_capacity(top.len() + base.len());
    for p in top.iter().chain(base.iter().rev()) {
        if polygon.last().map_or(true, |last| (p - last).norm() > 1e-9) {
            polygon.push(*p);
        }
    }
    while polygon.len() > 1 && (polygon[0] - polygon[polygon.len() - 1]).norm() <= 1e-9 {
        polygon.pop();
    }
    polygon
}

/// Deduplicate plane hits of a collapse pillar and order them angularly
/// around their centroid in the cutting plane
pub fn collapse_section_polygon(points: Vec<Point3<f64>>, basis: &PlaneBasis, decimals: u32) -> Vec<Point3<f64>> {
    let mut seen = FxHashSet::default();
    let unique: Vec<Point3<f64>> = points
        .into_iter()
        .filter(|p| seen.insert(round_key(p, decimals)))
        .collect();
    if unique.len() < 3 {
        return unique;
    }

    let flat = basis.project_all(&unique);
    let n = flat.len() as f64;
    let center = Point2::new(
        flat.iter().map(|p| p.x).sum::<f64>() / n,
        flat.iter().map(|p| p.y).sum::<f64>() / n,
    );
    let mut keyed: Vec<(f64, Point3<f64>)> = flat
        .iter()
        .zip(unique)
        .map(|(p, q)| ((p.y - center.y).atan2(p.x - center.x), q))
        .collect();
    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    keyed.into_iter().map(|(_, p)| p).collect()
}

type Aabb = (Point3<f64>, Point3<f64>);

fn aabb(points: &[Point3<f64>]) -> Aabb {
    points.iter().fold(
        (Point3::new(f64::MAX, f64::MAX, f64::MAX), Point3::new(f64::MIN, f64::MIN, f64::MIN)),
        |(min, max), p| (min.inf(p), max.sup(p)),
    )
}

fn aabb_overlap(a: &Aabb, b: &Aabb) -> bool {
    const SLACK: f64 = 1e-9;
    (0..3).all(|i| a.0[i] <= b.1[i] + SLACK && b.0[i] <= a.1[i] + SLACK)
}

/// Triangulate planar shapes and lift them back into the cutting plane
fn section_mesh(
    shapes: &[Shape2D],
    basis: &PlaneBasis,
    material_id: u16,
    voxel_index: u32,
    layer_index: u32,
    tile: &StratumTileData,
) -> Result<TileGeometry> {
    let mut mesh = TileGeometry::new();
    let normal = basis.normal;
    let n = [normal.x, normal.y, normal.z];

    for shape in shapes {
        let mut ring: Vec<Point2<f64>> = shape.outer.clone();
        if signed_area(&ring) < 0.0 {
            ring.reverse();
        }
        let triangles = if shape.holes.is_empty() {
            triangulate_polygon(&ring)?
        } else {
            triangulate_polygon_with_holes(&ring, &shape.holes)?
        };
        let all: Vec<Point2<f64>> = ring
            .iter()
            .chain(shape.holes.iter().filter(|h| h.len() >= 3).flatten())
            .copied()
            .collect();

        for tri in triangles.chunks_exact(3) {
            let [a, b, c] = [all[tri[0]], all[tri[1]], all[tri[2]]];
            let cross = (b - a).perp(&(c - a));
            if cross.abs() < 1e-14 {
                continue;
            }
            let corners = if cross > 0.0 { [a, b, c] } else { [a, c, b] };
            let base = mesh.vertex_count() as u32;
            for p in corners {
                let q = basis.unproject(&p);
                let local = [q.x, q.y, q.z];
                mesh.push_vertex(&VertexRecord {
                    position: local.map(|c| c as f32),
                    normal: n.map(|c| c as f32),
                    uv: tile.uv_mapper().material_uv(local, n, material_id),
                    face_type: FaceType::SIDE,
                    material_id,
                    voxel_index,
                    layer_index,
                });
            }
            mesh.add_triangle(base, base + 1, base + 2);
        }
    }
    Ok(mesh)
}
