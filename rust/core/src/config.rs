// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline tolerances loaded from environment variables.

/// Numeric tolerances shared by clipping and cross-section generation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stratum thickness below which a section is treated as pinched out.
    pub pinch_out_threshold: f64,
    /// Decimal places used to deduplicate section intersection points.
    pub section_dedup_decimals: u32,
    /// Weight of the up-direction offset when ordering points along a cut line.
    pub sort_up_weight: f64,
    /// Quantization scale for geographic vertex hashing of ground faces.
    pub ground_hash_scale: f64,
    /// Quantization scale for edge keys in the closedness check.
    pub closed_edge_scale: f64,
    /// Distance tolerance for triangle/clip-volume intersection tests.
    pub boundary_epsilon: f64,
    /// Metres added above the tile when a modification only gives a depth.
    pub depth_clip_margin: f64,
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source. Missing or unparsable
    /// values keep their built-in default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::builtin();
        Self {
            pinch_out_threshold: parse_or(&lookup, "STRATA_PINCH_OUT_THRESHOLD", defaults.pinch_out_threshold),
            section_dedup_decimals: parse_or(&lookup, "STRATA_SECTION_DEDUP_DECIMALS", defaults.section_dedup_decimals),
            sort_up_weight: parse_or(&lookup, "STRATA_SORT_UP_WEIGHT", defaults.sort_up_weight),
            ground_hash_scale: parse_or(&lookup, "STRATA_GROUND_HASH_SCALE", defaults.ground_hash_scale),
            closed_edge_scale: parse_or(&lookup, "STRATA_CLOSED_EDGE_SCALE", defaults.closed_edge_scale),
            boundary_epsilon: parse_or(&lookup, "STRATA_BOUNDARY_EPSILON", defaults.boundary_epsilon),
            depth_clip_margin: parse_or(&lookup, "STRATA_DEPTH_CLIP_MARGIN", defaults.depth_clip_margin),
        }
    }

    /// Built-in defaults, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            pinch_out_threshold: 1e-5,
            section_dedup_decimals: 5,
            sort_up_weight: 0.001,
            ground_hash_scale: 1000.0,
            closed_edge_scale: 1e6,
            boundary_epsilon: 1e-4,
            depth_clip_margin: 1.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
