// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for tile decoding
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or validating a stratum tile
#[derive(Error, Debug)]
pub enum Error {
    #[error("Decode error at byte {offset}: {message}")]
    Decode { offset: usize, message: String },

    #[error("Unsupported tile format version {0}")]
    UnsupportedVersion(u16),

    #[error("Malformed tile: {0}")]
    MalformedInput(String),

    #[error("Unsupported layer kind {0}")]
    UnsupportedLayerKind(u8),
}

impl Error {
    pub fn decode(offset: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }
}
