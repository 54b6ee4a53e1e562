// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Strata Core
//!
//! Binary stratum tile decoding built with [nom](https://docs.rs/nom), plus
//! the plain data model the geometry crate consumes.
//!
//! ## Overview
//!
//! - **Tile Decoding**: header, quantized vertices, triangle indices with
//!   per-triangle face types, the layer/voxel table and tagged extensions
//!   (collapse pillars, boreholes, faults, section lines, materials, DEM)
//! - **Face Types**: the [`FaceType`] bitmask that drives shell extraction,
//!   boundary marking and cross-section surface selection
//! - **Projection**: WGS84 ellipsoid helpers and the map projections used to
//!   build a tile-local frame
//! - **Configuration**: numeric tolerances loaded from the environment
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_core::decode_tile;
//!
//! let decoded = decode_tile(&bytes)?;
//! println!("{} layers", decoded.layers.len());
//! ```

pub mod config;
pub mod error;
pub mod face;
pub mod format;
pub mod model;
pub mod projection;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use face::FaceType;
pub use format::{decode_tile, encode_tile, FORMAT_VERSION};
pub use model::{
    dequantize_normalized, BoreholeRecord, CollapsePillarRecord, DecodeResult, DemGrid,
    FaultRecord, Header, LayerKind, MaterialRecord, QuantizedRange, RawVertices,
    SectionLineRecord, StratumLayerData, StratumVoxelData, TileExtensions,
};
pub use projection::{ecef_to_geodetic, geodetic_to_ecef, mercator_y, Projection};
