// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during tile geometry processing
#[derive(Error, Debug)]
pub enum Error {
    #[error("Triangulation failed: {0}")]
    TriangulationError(String),

    #[error("Invalid polygon: {0}")]
    InvalidPolygon(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Geometry is not closed: {boundary_edges} boundary edges in {what}")]
    NonManifold { what: String, boundary_edges: usize },

    #[error("CSG operation failed: {0}")]
    Csg(String),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Tile decode error: {0}")]
    CoreError(#[from] strata_core::Error),
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn csg(message: impl Into<String>) -> Self {
        Self::Csg(message.into())
    }
}
