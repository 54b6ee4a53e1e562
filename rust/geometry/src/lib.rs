// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Strata Geometry
//!
//! Stratum tile mesh construction: per-voxel geometry from decoded tiles,
//! Boolean clipping against ground modifications using csgrs, and vertical
//! cross-section profiles triangulated with earcutr. Math is nalgebra.

pub mod bool2d;
pub mod buffer;
pub mod clipper;
pub mod csg;
pub mod entities;
pub mod error;
pub mod frustum;
pub mod ground;
pub mod intersect;
pub mod layer;
pub mod sections;
pub mod snapshot;
pub mod tile;
pub mod triangulation;
pub mod uv;
pub mod voxel;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point2, Point3, Vector2, Vector3};

pub use buffer::{is_geometry_closed, merge_geometries, AttributeSet, GeometryView, TileGeometry, VertexRecord};
pub use clipper::{
    mark_boundary_vertices_by_triangle_intersection, ClipHeight, ClipOptions, ClipOutcome,
    GroundModificationPolygon, ModificationShape, StratumMeshClipper,
};
pub use csg::ClippableGeometry;
pub use entities::{Borehole, CollapsePillar, FaultProfile, SectionLine};
pub use error::{Error, Result};
pub use frustum::{Containment, FrustumGeoArea, FrustumTester};
pub use ground::GroundSurface;
pub use layer::{LinkedVoxels, StratumLayer, VoxelArena, VoxelEntry};
pub use sections::{
    sort_points_along_line, split_continuous_segments, CollapseSection, CutLine, CutSegment,
    SectionProfile, StratumCrossSections, StratumSection,
};
pub use snapshot::DecodedStratumTileData;
pub use tile::{adjust_header_center, StratumTileData};
pub use triangulation::{triangulate_polygon, PlaneBasis};
pub use voxel::{BoundingSphere, StratumVoxel};
