// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary tile decoder using nom
//!
//! Little-endian layout: preamble, header, quantized vertex arrays, triangle
//! indices with per-triangle face types, the layer table and a list of tagged
//! extension blocks. [`encode_tile`] writes the same layout.

use nom::{
    bytes::complete::{tag, take},
    combinator::map_res,
    multi::{count, length_data},
    number::complete::{le_f32, le_f64, le_i32, le_i8, le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{
    BoreholeRecord, CollapsePillarRecord, DecodeResult, DemGrid, FaultRecord, Header, LayerKind,
    MaterialRecord, RawVertices, SectionLineRecord, StratumLayerData, StratumVoxelData,
    TileExtensions,
};

/// Magic bytes opening every tile
pub const MAGIC: &[u8; 4] = b"STRT";
/// Current format version
pub const FORMAT_VERSION: u16 = 1;

/// Extension block tags
pub mod ext_tag {
    pub const COLLAPSE_PILLARS: u8 = 1;
    pub const BOREHOLES: u8 = 2;
    pub const FAULTS: u8 = 3;
    pub const SECTION_LINES: u8 = 4;
    pub const MATERIALS: u8 = 5;
    pub const DEM: u8 = 6;
}

type Input<'a> = &'a [u8];

/// Layer as read from the wire, before the kind byte is validated
struct RawLayer {
    id: u32,
    kind: u8,
    name: String,
    material_id: u16,
    voxels: Vec<StratumVoxelData>,
}

fn preamble(input: Input) -> IResult<Input, (u16, u16)> {
    let (input, _) = tag(&MAGIC[..])(input)?;
    tuple((le_u16, le_u16))(input)
}

fn string(input: Input) -> IResult<Input, String> {
    map_res(length_data(le_u16), |bytes: &[u8]| {
        std::str::from_utf8(bytes).map(|s| s.to_string())
    })(input)
}

fn header(input: Input) -> IResult<Input, Header> {
    let (input, (min_lon, min_lat, max_lon, max_lat, min_height, max_height)) =
        tuple((le_f64, le_f64, le_f64, le_f64, le_f64, le_f64))(input)?;
    let (input, (cx, cy, cz)) = tuple((le_f64, le_f64, le_f64))(input)?;
    Ok((
        input,
        Header {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            min_height,
            max_height,
            center: [cx, cy, cz],
        },
    ))
}

fn vertices(input: Input) -> IResult<Input, RawVertices> {
    let (input, n) = le_u32(input)?;
    let n = n as usize;
    let (input, u) = count(le_u16, n)(input)?;
    let (input, v) = count(le_u16, n)(input)?;
    let (input, h) = count(le_u16, n)(input)?;
    let (input, normals) = count(le_i8, n * 3)(input)?;
    Ok((input, RawVertices { u, v, h, normals }))
}

fn triangles(input: Input) -> IResult<Input, (Vec<u32>, Vec<u8>)> {
    let (input, index_count) = le_u32(input)?;
    let (input, indices) = count(le_u32, index_count as usize)(input)?;
    let (input, face_types) = count(le_u8, index_count as usize / 3)(input)?;
    Ok((input, (indices, face_types)))
}

fn voxel(input: Input) -> IResult<Input, StratumVoxelData> {
    let (input, (start, end, material_id, n0, n1, n2)) =
        tuple((le_u32, le_u32, le_u16, le_i32, le_i32, le_i32))(input)?;
    Ok((
        input,
        StratumVoxelData {
            start,
            end,
            material_id,
            neighbors: [n0, n1, n2],
        },
    ))
}

fn layer(input: Input) -> IResult<Input, RawLayer> {
    let (input, (id, kind)) = tuple((le_u32, le_u8))(input)?;
    let (input, name) = string(input)?;
    let (input, (material_id, voxel_count)) = tuple((le_u16, le_u32))(input)?;
    let (input, voxels) = count(voxel, voxel_count as usize)(input)?;
    Ok((
        input,
        RawLayer {
            id,
            kind,
            name,
            material_id,
            voxels,
        },
    ))
}

fn layers(input: Input) -> IResult<Input, Vec<RawLayer>> {
    let (input, n) = le_u32(input)?;
    count(layer, n as usize)(input)
}

fn collapse_pillar(input: Input) -> IResult<Input, CollapsePillarRecord> {
    let (input, layer_id) = le_u32(input)?;
    let (input, name) = string(input)?;
    Ok((input, CollapsePillarRecord { layer_id, name }))
}

fn borehole(input: Input) -> IResult<Input, BoreholeRecord> {
    let (input, (id, layer_id)) = tuple((le_u32, le_u32))(input)?;
    let (input, name) = string(input)?;
    let (input, (lon, lat, top, bottom)) = tuple((le_f64, le_f64, le_f64, le_f64))(input)?;
    Ok((
        input,
        BoreholeRecord {
            id,
            layer_id,
            name,
            lon,
            lat,
            top,
            bottom,
        },
    ))
}

fn fault(input: Input) -> IResult<Input, FaultRecord> {
    let (input, (id, layer_id)) = tuple((le_u32, le_u32))(input)?;
    let (input, name) = string(input)?;
    let (input, dip) = le_f64(input)?;
    Ok((
        input,
        FaultRecord {
            id,
            layer_id,
            name,
            dip,
        },
    ))
}

fn lon_lat(input: Input) -> IResult<Input, [f64; 2]> {
    let (input, (lon, lat)) = tuple((le_f64, le_f64))(input)?;
    Ok((input, [lon, lat]))
}

fn section_line(input: Input) -> IResult<Input, SectionLineRecord> {
    let (input, id) = le_u32(input)?;
    let (input, name) = string(input)?;
    let (input, point_count) = le_u16(input)?;
    let (input, points) = count(lon_lat, point_count as usize)(input)?;
    Ok((input, SectionLineRecord { id, name, points }))
}

fn material(input: Input) -> IResult<Input, MaterialRecord> {
    let (input, id) = le_u16(input)?;
    let (input, name) = string(input)?;
    let (input, (su, sv, ou, ov)) = tuple((le_f32, le_f32, le_f32, le_f32))(input)?;
    Ok((
        input,
        MaterialRecord {
            id,
            name,
            uv_scale: [su, sv],
            uv_offset: [ou, ov],
        },
    ))
}

/// Parse a `u32`-counted list of records
fn records<'a, O>(
    record: fn(Input<'a>) -> IResult<Input<'a>, O>,
) -> impl FnMut(Input<'a>) -> IResult<Input<'a>, Vec<O>> {
    move |input: Input<'a>| {
        let (input, n) = le_u32(input)?;
        count(record, n as usize)(input)
    }
}

fn dem(input: Input) -> IResult<Input, DemGrid> {
    let (input, (cols, rows)) = tuple((le_u16, le_u16))(input)?;
    let (input, heights) = count(le_f32, cols as usize * rows as usize)(input)?;
    Ok((input, DemGrid { cols, rows, heights }))
}

fn extension_block(input: Input) -> IResult<Input, (u8, &[u8])> {
    let (input, (block_tag, len)) = tuple((le_u8, le_u32))(input)?;
    let (input, payload) = take(len)(input)?;
    Ok((input, (block_tag, payload)))
}

fn extension_blocks(input: Input) -> IResult<Input, Vec<(u8, &[u8])>> {
    let (input, n) = le_u16(input)?;
    count(extension_block, n as usize)(input)
}

/// Convert a nom failure into a positioned decode error
fn nom_error(whole: &[u8], what: &str, err: nom::Err<nom::error::Error<&[u8]>>) -> Error {
    match err {
        nom::Err::Incomplete(_) => Error::decode(whole.len(), format!("truncated {}", what)),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            // Payload parsers run on sub-slices of `whole`
            let offset = (e.input.as_ptr() as usize).saturating_sub(whole.as_ptr() as usize);
            Error::decode(offset, format!("invalid {} ({:?})", what, e.code))
        }
    }
}

fn decode_extensions(whole: &[u8], blocks: Vec<(u8, &[u8])>) -> Result<TileExtensions> {
    let mut extensions = TileExtensions::default();

    for (block_tag, payload) in blocks {
        match block_tag {
            ext_tag::COLLAPSE_PILLARS => {
                let (_, parsed) = records(collapse_pillar)(payload)
                    .map_err(|e| nom_error(whole, "collapse pillar extension", e))?;
                extensions.collapse_pillars = parsed;
            }
            ext_tag::BOREHOLES => {
                let (_, parsed) =
                    records(borehole)(payload).map_err(|e| nom_error(whole, "borehole extension", e))?;
                extensions.boreholes = parsed;
            }
            ext_tag::FAULTS => {
                let (_, parsed) =
                    records(fault)(payload).map_err(|e| nom_error(whole, "fault extension", e))?;
                extensions.faults = parsed;
            }
            ext_tag::SECTION_LINES => {
                let (_, parsed) = records(section_line)(payload)
                    .map_err(|e| nom_error(whole, "section line extension", e))?;
                extensions.section_lines = parsed;
            }
            ext_tag::MATERIALS => {
                let (_, parsed) =
                    records(material)(payload).map_err(|e| nom_error(whole, "material extension", e))?;
                extensions.materials = parsed;
            }
            ext_tag::DEM => {
                let (_, grid) = dem(payload).map_err(|e| nom_error(whole, "DEM extension", e))?;
                extensions.dem = Some(grid);
            }
            other => {
                warn!(tag = other, len = payload.len(), "skipping unknown tile extension");
            }
        }
    }

    Ok(extensions)
}

/// Decode a binary stratum tile
pub fn decode_tile(bytes: &[u8]) -> Result<DecodeResult> {
    let (input, (version, _flags)) =
        preamble(bytes).map_err(|e| nom_error(bytes, "tile preamble", e))?;
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let (input, header) = header(input).map_err(|e| nom_error(bytes, "tile header", e))?;
    let (input, vertices) =
        vertices(input).map_err(|e| nom_error(bytes, "vertex arrays", e))?;
    let (input, (indices, face_types)) =
        triangles(input).map_err(|e| nom_error(bytes, "triangle buffer", e))?;
    let (input, raw_layers) = layers(input).map_err(|e| nom_error(bytes, "layer table", e))?;
    let (input, blocks) =
        extension_blocks(input).map_err(|e| nom_error(bytes, "extension table", e))?;

    if !input.is_empty() {
        warn!(trailing = input.len(), "trailing bytes after tile payload");
    }

    let layers = raw_layers
        .into_iter()
        .map(|raw| {
            Ok(StratumLayerData {
                id: raw.id,
                kind: LayerKind::try_from(raw.kind)?,
                name: raw.name,
                material_id: raw.material_id,
                voxels: raw.voxels,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let extensions = decode_extensions(bytes, blocks)?;

    let result = DecodeResult {
        header,
        vertices,
        indices,
        face_types,
        layers,
        extensions,
    };
    result.validate()?;

    debug!(
        vertices = result.vertices.len(),
        triangles = result.triangle_count(),
        layers = result.layers.len(),
        "decoded stratum tile"
    );

    Ok(result)
}

// ============================================================================
// Encoder
// ============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn string(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }
    fn block(&mut self, tag: u8, body: Writer) {
        self.u8(tag);
        self.u32(body.buf.len() as u32);
        self.buf.extend_from_slice(&body.buf);
    }
    fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

/// Encode a decoded tile back into the binary layout
pub fn encode_tile(tile: &DecodeResult) -> Vec<u8> {
    let mut w = Writer::new();
    w.buf.extend_from_slice(MAGIC);
    w.u16(FORMAT_VERSION);
    w.u16(0);

    let h = &tile.header;
    for v in [
        h.min_lon,
        h.min_lat,
        h.max_lon,
        h.max_lat,
        h.min_height,
        h.max_height,
        h.center[0],
        h.center[1],
        h.center[2],
    ] {
        w.f64(v);
    }

    let raw = &tile.vertices;
    w.u32(raw.len() as u32);
    raw.u.iter().for_each(|&x| w.u16(x));
    raw.v.iter().for_each(|&x| w.u16(x));
    raw.h.iter().for_each(|&x| w.u16(x));
    raw.normals.iter().for_each(|&x| w.u8(x as u8));

    w.u32(tile.indices.len() as u32);
    tile.indices.iter().for_each(|&i| w.u32(i));
    tile.face_types.iter().for_each(|&f| w.u8(f));

    w.u32(tile.layers.len() as u32);
    for layer in &tile.layers {
        w.u32(layer.id);
        w.u8(layer.kind as u8);
        w.string(&layer.name);
        w.u16(layer.material_id);
        w.u32(layer.voxels.len() as u32);
        for voxel in &layer.voxels {
            w.u32(voxel.start);
            w.u32(voxel.end);
            w.u16(voxel.material_id);
            voxel.neighbors.iter().for_each(|&n| w.i32(n));
        }
    }

    let ext = &tile.extensions;
    let mut blocks: Vec<(u8, Writer)> = Vec::new();

    if !ext.collapse_pillars.is_empty() {
        let mut b = Writer::new();
        b.u32(ext.collapse_pillars.len() as u32);
        for p in &ext.collapse_pillars {
            b.u32(p.layer_id);
            b.string(&p.name);
        }
        blocks.push((ext_tag::COLLAPSE_PILLARS, b));
    }
    if !ext.boreholes.is_empty() {
        let mut b = Writer::new();
        b.u32(ext.boreholes.len() as u32);
        for r in &ext.boreholes {
            b.u32(r.id);
            b.u32(r.layer_id);
            b.string(&r.name);
            b.f64(r.lon);
            b.f64(r.lat);
            b.f64(r.top);
            b.f64(r.bottom);
        }
        blocks.push((ext_tag::BOREHOLES, b));
    }
    if !ext.faults.is_empty() {
        let mut b = Writer::new();
        b.u32(ext.faults.len() as u32);
        for f in &ext.faults {
            b.u32(f.id);
            b.u32(f.layer_id);
            b.string(&f.name);
            b.f64(f.dip);
        }
        blocks.push((ext_tag::FAULTS, b));
    }
    if !ext.section_lines.is_empty() {
        let mut b = Writer::new();
        b.u32(ext.section_lines.len() as u32);
        for s in &ext.section_lines {
            b.u32(s.id);
            b.string(&s.name);
            b.u16(s.points.len() as u16);
            for p in &s.points {
                b.f64(p[0]);
                b.f64(p[1]);
            }
        }
        blocks.push((ext_tag::SECTION_LINES, b));
    }
    if !ext.materials.is_empty() {
        let mut b = Writer::new();
        b.u32(ext.materials.len() as u32);
        for m in &ext.materials {
            b.u16(m.id);
            b.string(&m.name);
            b.f32(m.uv_scale[0]);
            b.f32(m.uv_scale[1]);
            b.f32(m.uv_offset[0]);
            b.f32(m.uv_offset[1]);
        }
        blocks.push((ext_tag::MATERIALS, b));
    }
    if let Some(dem) = &ext.dem {
        let mut b = Writer::new();
        b.u16(dem.cols);
        b.u16(dem.rows);
        dem.heights.iter().for_each(|&z| b.f32(z));
        blocks.push((ext_tag::DEM, b));
    }

    w.u16(blocks.len() as u16);
    for (block_tag, body) in blocks {
        w.block(block_tag, body);
    }

    w.buf
}
