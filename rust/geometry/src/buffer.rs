// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tile geometry buffers
//!
//! [`TileGeometry`] is the renderer-independent buffer geometry exported for
//! a tile: flat vertex attribute arrays plus a triangle index. Attributes that
//! were not requested are left empty; readers fall back to defaults.

use nalgebra::Point3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strata_core::FaceType;

/// Bitmask selecting which vertex attributes a geometry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSet(u8);

impl AttributeSet {
    pub const POSITION: AttributeSet = AttributeSet(1);
    pub const NORMAL: AttributeSet = AttributeSet(2);
    pub const UV: AttributeSet = AttributeSet(4);
    pub const FACE_TYPE: AttributeSet = AttributeSet(8);
    pub const MATERIAL_ID: AttributeSet = AttributeSet(16);
    pub const VOXEL_INDEX: AttributeSet = AttributeSet(32);
    pub const LAYER_INDEX: AttributeSet = AttributeSet(64);
    pub const ALL: AttributeSet = AttributeSet(127);
    /// Attributes of the exported tile mesh
    pub const EXPORT: AttributeSet = AttributeSet(1 | 2 | 4 | 8 | 16);

    #[inline]
    pub fn contains(self, other: AttributeSet) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AttributeSet {
    type Output = AttributeSet;

    fn bitor(self, rhs: AttributeSet) -> AttributeSet {
        AttributeSet(self.0 | rhs.0)
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        AttributeSet::ALL
    }
}

/// All attributes of a single vertex
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VertexRecord {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub face_type: FaceType,
    pub material_id: u16,
    pub voxel_index: u32,
    pub layer_index: u32,
}

/// Buffer geometry with per-vertex tile attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileGeometry {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub face_types: Vec<u8>,
    pub material_ids: Vec<u16>,
    pub voxel_indices: Vec<u32>,
    pub layer_indices: Vec<u32>,
    pub indices: Vec<u32>,
}

impl TileGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertex_count: usize, index_count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertex_count * 3),
            normals: Vec::with_capacity(vertex_count * 3),
            uvs: Vec::with_capacity(vertex_count * 2),
            face_types: Vec::with_capacity(vertex_count),
            material_ids: Vec::with_capacity(vertex_count),
            voxel_indices: Vec::with_capacity(vertex_count),
            layer_indices: Vec::with_capacity(vertex_count),
            indices: Vec::with_capacity(index_count),
        }
    }

    /// Append a vertex with every attribute, returning its index
    #[inline]
    pub fn push_vertex(&mut self, v: &VertexRecord) -> u32 {
        let index = self.vertex_count() as u32;
        self.positions.extend_from_slice(&v.position);
        self.normals.extend_from_slice(&v.normal);
        self.uvs.extend_from_slice(&v.uv);
        self.face_types.push(v.face_type.bits());
        self.material_ids.push(v.material_id);
        self.voxel_indices.push(v.voxel_index);
        self.layer_indices.push(v.layer_index);
        index
    }

    #[inline]
    pub fn add_triangle(&mut self, i0: u32, i1: u32, i2: u32) {
        self.indices.extend_from_slice(&[i0, i1, i2]);
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Triangle count; non-indexed geometry counts every three vertices
    #[inline]
    pub fn triangle_count(&self) -> usize {
        if self.indices.is_empty() {
            self.vertex_count() / 3
        } else {
            self.indices.len() / 3
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Synthesize an identity index when the geometry has none
    pub fn ensure_index(&mut self) {
        if self.indices.is_empty() && self.vertex_count() > 0 {
            self.indices = (0..self.vertex_count() as u32).collect();
        }
    }

    #[inline]
    pub fn position(&self, i: usize) -> Point3<f64> {
        Point3::new(
            self.positions[i * 3] as f64,
            self.positions[i * 3 + 1] as f64,
            self.positions[i * 3 + 2] as f64,
        )
    }

    /// Face type of vertex `i` (`NONE` when the attribute is absent)
    #[inline]
    pub fn vertex_face_type(&self, i: usize) -> FaceType {
        self.face_types.get(i).copied().map(FaceType).unwrap_or_default()
    }

    /// Read every attribute of vertex `i`, defaulting missing ones
    pub fn vertex(&self, i: usize) -> VertexRecord {
        let read3 = |buf: &[f32]| -> [f32; 3] {
            buf.get(i * 3..i * 3 + 3)
                .map(|s| [s[0], s[1], s[2]])
                .unwrap_or_default()
        };
        VertexRecord {
            position: read3(&self.positions),
            normal: read3(&self.normals),
            uv: self
                .uvs
                .get(i * 2..i * 2 + 2)
                .map(|s| [s[0], s[1]])
                .unwrap_or_default(),
            face_type: self.vertex_face_type(i),
            material_id: self.material_ids.get(i).copied().unwrap_or_default(),
            voxel_index: self.voxel_indices.get(i).copied().unwrap_or_default(),
            layer_index: self.layer_indices.get(i).copied().unwrap_or_default(),
        }
    }

    /// Vertex indices of triangle `t`
    #[inline]
    pub fn triangle_vertices(&self, t: usize) -> [usize; 3] {
        if self.indices.is_empty() {
            [t * 3, t * 3 + 1, t * 3 + 2]
        } else {
            [
                self.indices[t * 3] as usize,
                self.indices[t * 3 + 1] as usize,
                self.indices[t * 3 + 2] as usize,
            ]
        }
    }

    #[inline]
    pub fn triangle_positions(&self, t: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.triangle_vertices(t);
        [self.position(a), self.position(b), self.position(c)]
    }

    /// Union of the face types of the triangle's three vertices
    #[inline]
    pub fn triangle_face_type(&self, t: usize) -> FaceType {
        let [a, b, c] = self.triangle_vertices(t);
        self.vertex_face_type(a) | self.vertex_face_type(b) | self.vertex_face_type(c)
    }

    /// Iterate over triangle corner positions
    pub fn triangles(&self) -> impl Iterator<Item = [Point3<f64>; 3]> + '_ {
        (0..self.triangle_count()).map(move |t| self.triangle_positions(t))
    }

    /// Borrow an index sub-range as a lightweight view
    pub fn slice_indices(&self, range: std::ops::Range<usize>) -> GeometryView<'_> {
        GeometryView {
            source: self,
            indices: &self.indices[range],
        }
    }

    /// Copy the selected triangles into a compact geometry.
    ///
    /// Vertices are deduplicated through an index remap built while
    /// scanning the triangles once.
    pub fn extract_triangles<I>(&self, triangles: I) -> TileGeometry
    where
        I: IntoIterator<Item = [usize; 3]>,
    {
        let mut out = TileGeometry::new();
        let mut remap: FxHashMap<usize, u32> = FxHashMap::default();

        for tri in triangles {
            let mut mapped = [0u32; 3];
            for (slot, &src) in tri.iter().enumerate() {
                mapped[slot] = *remap
                    .entry(src)
                    .or_insert_with(|| out.push_vertex(&self.vertex(src)));
            }
            out.add_triangle(mapped[0], mapped[1], mapped[2]);
        }

        out.retain_attributes(self.attributes());
        out
    }

    /// Attributes that are actually populated
    pub fn attributes(&self) -> AttributeSet {
        let n = self.vertex_count();
        let mut set = AttributeSet::POSITION;
        if n == 0 {
            return AttributeSet::ALL;
        }
        if self.normals.len() == n * 3 {
            set = set | AttributeSet::NORMAL;
        }
        if self.uvs.len() == n * 2 {
            set = set | AttributeSet::UV;
        }
        if self.face_types.len() == n {
            set = set | AttributeSet::FACE_TYPE;
        }
        if self.material_ids.len() == n {
            set = set | AttributeSet::MATERIAL_ID;
        }
        if self.voxel_indices.len() == n {
            set = set | AttributeSet::VOXEL_INDEX;
        }
        if self.layer_indices.len() == n {
            set = set | AttributeSet::LAYER_INDEX;
        }
        set
    }

    /// Copy of the geometry carrying only the attributes in `set`
    pub fn select(&self, set: AttributeSet) -> TileGeometry {
        let mut out = self.clone();
        out.retain_attributes(set);
        out
    }

    /// Drop every attribute not in `keep` (positions are always kept)
    pub fn retain_attributes(&mut self, keep: AttributeSet) {
        if !keep.contains(AttributeSet::NORMAL) {
            self.normals.clear();
        }
        if !keep.contains(AttributeSet::UV) {
            self.uvs.clear();
        }
        if !keep.contains(AttributeSet::FACE_TYPE) {
            self.face_types.clear();
        }
        if !keep.contains(AttributeSet::MATERIAL_ID) {
            self.material_ids.clear();
        }
        if !keep.contains(AttributeSet::VOXEL_INDEX) {
            self.voxel_indices.clear();
        }
        if !keep.contains(AttributeSet::LAYER_INDEX) {
            self.layer_indices.clear();
        }
    }

    /// Pad absent attributes with defaults so every array matches the vertex count
    pub fn fill_missing_attributes(&mut self) {
        let n = self.vertex_count();
        self.normals.resize(n * 3, 0.0);
        self.uvs.resize(n * 2, 0.0);
        self.face_types.resize(n, 0);
        self.material_ids.resize(n, 0);
        self.voxel_indices.resize(n, 0);
        self.layer_indices.resize(n, 0);
    }

    /// Append another geometry, offsetting its indices
    pub fn merge(&mut self, other: &TileGeometry) {
        if other.is_empty() {
            return;
        }
        let keep = if self.is_empty() {
            other.attributes()
        } else {
            self.attributes()
        };

        self.ensure_index();
        self.fill_missing_attributes();
        let offset = self.vertex_count() as u32;

        let mut other = other.clone();
        other.ensure_index();
        other.fill_missing_attributes();

        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.uvs.extend_from_slice(&other.uvs);
        self.face_types.extend_from_slice(&other.face_types);
        self.material_ids.extend_from_slice(&other.material_ids);
        self.voxel_indices.extend_from_slice(&other.voxel_indices);
        self.layer_indices.extend_from_slice(&other.layer_indices);
        self.indices.extend(other.indices.iter().map(|&i| i + offset));

        self.retain_attributes(keep);
    }

    /// Axis-aligned bounds (min, max)
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        if self.is_empty() {
            return (Point3::origin(), Point3::origin());
        }
        let mut min = Point3::new(f64::MAX, f64::MAX, f64::MAX);
        let mut max = Point3::new(f64::MIN, f64::MIN, f64::MIN);
        for i in 0..self.vertex_count() {
            let p = self.position(i);
            min = min.inf(&p);
            max = max.sup(&p);
        }
        (min, max)
    }

    /// Release every buffer
    pub fn dispose(&mut self) {
        *self = TileGeometry::default();
    }
}

/// Concatenate geometries into one buffer
pub fn merge_geometries<'a, I>(geometries: I) -> TileGeometry
where
    I: IntoIterator<Item = &'a TileGeometry>,
{
    let mut merged = TileGeometry::new();
    for geometry in geometries {
        merged.merge(geometry);
    }
    merged.ensure_index();
    merged
}

/// A borrowed index range over a shared attribute buffer
#[derive(Debug, Clone, Copy)]
pub struct GeometryView<'a> {
    pub source: &'a TileGeometry,
    pub indices: &'a [u32],
}

impl<'a> GeometryView<'a> {
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn triangle_vertices(&self, t: usize) -> [usize; 3] {
        [
            self.indices[t * 3] as usize,
            self.indices[t * 3 + 1] as usize,
            self.indices[t * 3 + 2] as usize,
        ]
    }

    #[inline]
    pub fn triangle_positions(&self, t: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.triangle_vertices(t);
        [
            self.source.position(a),
            self.source.position(b),
            self.source.position(c),
        ]
    }

    #[inline]
    pub fn triangle_face_type(&self, t: usize) -> FaceType {
        let [a, b, c] = self.triangle_vertices(t);
        self.source.vertex_face_type(a)
            | self.source.vertex_face_type(b)
            | self.source.vertex_face_type(c)
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Point3<f64>; 3]> + 'a {
        let view = *self;
        (0..view.triangle_count()).map(move |t| view.triangle_positions(t))
    }

    /// Vertex indices referenced by the view, in buffer order
    pub fn vertex_indices(&self) -> impl Iterator<Item = usize> + Clone + 'a {
        self.indices.iter().map(|&i| i as usize)
    }

    /// Materialize the view as an owned, compact geometry
    pub fn to_geometry(&self) -> TileGeometry {
        let view = *self;
        self.source
            .extract_triangles((0..view.triangle_count()).map(move |t| view.triangle_vertices(t)))
    }
}

type EdgeKey = ((i64, i64, i64), (i64, i64, i64));

/// Count edges not shared by exactly two triangles.
///
/// Vertices are matched by quantized position, so non-indexed geometry with
/// duplicated corners is handled the same as indexed geometry.
pub fn count_boundary_edges<I>(triangles: I, scale: f64) -> usize
where
    I: IntoIterator<Item = [Point3<f64>; 3]>,
{
    let quantize = |p: &Point3<f64>| {
        (
            (p.x * scale).round() as i64,
            (p.y * scale).round() as i64,
            (p.z * scale).round() as i64,
        )
    };

    let mut edge_count: FxHashMap<EdgeKey, u32> = FxHashMap::default();
    for tri in triangles {
        let q = [quantize(&tri[0]), quantize(&tri[1]), quantize(&tri[2])];
        if q[0] == q[1] || q[1] == q[2] || q[2] == q[0] {
            continue;
        }
        for (a, b) in [(q[0], q[1]), (q[1], q[2]), (q[2], q[0])] {
            let key = if a < b { (a, b) } else { (b, a) };
            *edge_count.entry(key).or_insert(0) += 1;
        }
    }

    edge_count.values().filter(|&&count| count != 2).count()
}

/// True when every edge is shared by exactly two triangles
pub fn is_geometry_closed(geometry: &TileGeometry, scale: f64) -> bool {
    geometry.triangle_count() > 0 && count_boundary_edges(geometry.triangles(), scale) == 0
}
