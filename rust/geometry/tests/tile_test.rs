// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use approx::assert_relative_eq;
use common::{init_tracing, BoxFaces, TileBuilder};
use strata_core::{
    BoreholeRecord, CollapsePillarRecord, DemGrid, FaceType, FaultRecord, LayerKind,
    SectionLineRecord,
};
use strata_geometry::{AttributeSet, Point3, StratumTileData};

/// Two layers stacked in z. The upper one has a ground top, the lower one a
/// bedrock base; both expose boundary sides on the west.
fn stacked_tile() -> StratumTileData {
    let mut builder = TileBuilder::new();
    let upper = builder.layer(10, LayerKind::Voxel, "clay", 1);
    let lower = builder.layer(11, LayerKind::Voxel, "sandstone", 2);
    builder.add_box(
        upper,
        [1.0, 1.0, 2.0],
        [2.0, 2.0, 3.0],
        BoxFaces {
            top: FaceType::TOP_GROUND,
            ..Default::default()
        },
    );
    builder.add_box(upper, [2.0, 1.0, 2.0], [3.0, 2.0, 3.0], BoxFaces::default());
    builder.link(upper, 0, 0, 1);
    builder.link(upper, 1, 0, 0);
    builder.add_box(
        lower,
        [1.0, 1.0, 1.0],
        [2.0, 2.0, 2.0],
        BoxFaces {
            base: FaceType::BASE_BEDROCK,
            side: FaceType::BOUNDARY_SIDE,
            ..Default::default()
        },
    );
    builder.extensions.dem = Some(DemGrid {
        cols: 2,
        rows: 2,
        heights: vec![3.0, 3.0, 3.0, 3.0],
    });
    builder.tile()
}

#[test]
fn test_layers_and_neighbor_links() {
    let tile = stacked_tile();
    assert_eq!(tile.layers().len(), 2);
    assert_eq!(tile.voxel_count(), 3);

    let upper = tile.layer_by_id(10).unwrap();
    assert_eq!(upper.name, "clay");
    assert_eq!(upper.voxel_count(), 2);
    let first = tile.voxel(0, 0).unwrap();
    assert_eq!(first.neighbor(0), Some(1));
    assert_eq!(first.neighbor(1), None);
    assert_eq!(tile.voxel(0, 1).unwrap().neighbor(0), Some(0));
    assert!(tile.voxel(0, 2).is_none());

    for voxel in tile.stratum_voxels() {
        assert_eq!(voxel.triangle_count(), 12);
        assert!(voxel.is_closed(1e6));
    }
}

#[test]
fn test_voxel_geometry_and_attribute_selection() {
    let tile = stacked_tile();
    let view = tile.create_voxel_geometry(1, 0).unwrap();
    assert_eq!(view.triangle_count(), 12);
    assert!(tile.create_voxel_geometry(1, 1).is_none());

    let voxel = view.to_geometry();
    assert!(voxel.material_ids.iter().all(|&m| m == 2));
    let exported = voxel.select(AttributeSet::EXPORT);
    assert_eq!(exported.positions, voxel.positions);
    assert!(exported.voxel_indices.is_empty());
    assert!(exported.layer_indices.is_empty());
    assert_eq!(exported.attributes(), AttributeSet::EXPORT);
}

#[test]
fn test_shell_keeps_any_shell_vertex() {
    let tile = stacked_tile();
    let shell = tile.build_shell_geometry();
    // Two ground triangles, two bedrock triangles, eight boundary sides
    assert_eq!(shell.triangle_count(), 12);
    for t in 0..shell.triangle_count() {
        assert!(shell.triangle_face_type(t).intersects(FaceType::SHELL));
    }
}

#[test]
fn test_ground_height_prefers_dem() {
    let tile = stacked_tile();
    assert_relative_eq!(tile.surface_height_at(1.5, 1.5).unwrap(), 3.0, epsilon = 1e-6);
    assert_relative_eq!(tile.ground_height_at(1.5, 1.5).unwrap(), 3.0, epsilon = 1e-6);
    assert!(tile.ground_height_at(2.5, 1.5).is_none());
}

#[test]
fn test_snapshot_round_trip() {
    init_tracing();
    let mut builder = TileBuilder::new();
    let layer = builder.layer(3, LayerKind::Voxel, "shale", 4);
    builder.add_box(layer, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], BoxFaces::default());
    builder.extensions.section_lines.push(SectionLineRecord {
        id: 1,
        name: "A-A'".to_string(),
        points: vec![[0.5, 0.5], [3.5, 0.5]],
    });
    builder.extensions.dem = Some(DemGrid {
        cols: 2,
        rows: 2,
        heights: vec![1.0, 1.5, 2.0, 2.5],
    });
    let tile = builder.tile();

    let snapshot = tile.to_decoded().unwrap();
    assert_eq!(snapshot.positions.len(), tile.geometry().positions.len());
    let restored = StratumTileData::from_decoded(snapshot).unwrap();

    assert_eq!(restored.geometry(), tile.geometry());
    assert_eq!(restored.layers(), tile.layers());
    assert_eq!(restored.extensions(), tile.extensions());
    assert_eq!(restored.projection(), tile.projection());
    let (a, b) = (restored.header(), tile.header());
    assert_relative_eq!(a.max_lon, b.max_lon);
    assert_relative_eq!(a.max_height, b.max_height);
    assert_relative_eq!(restored.center()[2], tile.center()[2]);
    assert_eq!(restored.stratum_voxels().count(), 1);
}

#[test]
fn test_snapshot_rejects_truncated_face_types() {
    let mut builder = TileBuilder::new();
    let layer = builder.layer(3, LayerKind::Voxel, "shale", 4);
    builder.add_box(layer, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], BoxFaces::default());
    let tile = builder.tile();

    let mut snapshot = tile.to_decoded().unwrap();
    snapshot.face_types.pop();
    assert!(StratumTileData::from_decoded(snapshot).is_err());

    let mut snapshot = tile.to_decoded().unwrap();
    snapshot.metadata = "{".to_string();
    assert!(StratumTileData::from_decoded(snapshot).is_err());
}

#[test]
fn test_entity_factories() {
    init_tracing();
    let mut builder = TileBuilder::new();
    let stratum = builder.layer(1, LayerKind::Voxel, "coal", 1);
    builder.add_box(stratum, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], BoxFaces::default());
    let pillar = builder.layer(2, LayerKind::Collapse, "pillar", 9);
    builder.add_box(pillar, [2.5, 2.5, 0.5], [3.0, 3.0, 2.5], BoxFaces::default());
    let fault = builder.layer(3, LayerKind::Fault, "F1", 5);
    builder.add_box(fault, [0.5, 0.5, 0.5], [0.75, 3.5, 3.0], BoxFaces::default());
    builder.layer(4, LayerKind::Borehole, "ZK1", 6);

    builder.extensions.collapse_pillars.push(CollapsePillarRecord {
        layer_id: 2,
        name: "pillar".to_string(),
    });
    // References a layer of the wrong kind and is skipped
    builder.extensions.collapse_pillars.push(CollapsePillarRecord {
        layer_id: 1,
        name: "stray".to_string(),
    });
    builder.extensions.faults.push(FaultRecord {
        id: 1,
        layer_id: 3,
        name: "F1".to_string(),
        dip: 70.0,
    });
    builder.extensions.boreholes.push(BoreholeRecord {
        id: 7,
        layer_id: 4,
        name: "ZK1".to_string(),
        lon: 1.5,
        lat: 1.5,
        top: 3.0,
        bottom: 0.5,
    });
    builder.extensions.section_lines.push(SectionLineRecord {
        id: 1,
        name: "A-A'".to_string(),
        points: vec![[0.5, 0.5], [3.5, 0.5], [3.5, 3.5]],
    });
    builder.extensions.section_lines.push(SectionLineRecord {
        id: 2,
        name: "short".to_string(),
        points: vec![[0.5, 0.5]],
    });
    let tile = builder.tile();

    let pillars = tile.create_collapse_pillars();
    assert_eq!(pillars.len(), 1);
    assert_eq!(pillars[0].name, "pillar");
    let sphere = pillars[0].bounding_sphere().unwrap();
    assert_relative_eq!(sphere.center, Point3::new(2.75, 2.75, 1.5), epsilon = 1e-6);
    assert!(tile.create_collapse_pillar(1).is_none());

    let faults = tile.create_faults();
    assert_eq!(faults.len(), 1);
    assert_relative_eq!(faults[0].dip, 70.0);
    assert_eq!(faults[0].geometry().triangle_count(), 12);

    let boreholes = tile.create_boreholes().unwrap();
    assert_eq!(boreholes.len(), 1);
    let borehole = &boreholes[0];
    assert_relative_eq!(borehole.top, 3.0, epsilon = 1e-9);
    assert_relative_eq!(borehole.bottom, 0.5, epsilon = 1e-9);
    // Empty layer: a generated column with two caps and four walls
    assert_eq!(borehole.geometry().triangle_count(), 12);
    assert!(borehole.geometry().material_ids.iter().all(|&m| m == 6));
    let (min, max) = borehole.geometry().bounds();
    assert_relative_eq!(min, Point3::new(1.0, 1.0, 0.5), epsilon = 1e-6);
    assert_relative_eq!(max, Point3::new(2.0, 2.0, 3.0), epsilon = 1e-6);

    let lines = tile.create_section_lines();
    assert_eq!(lines.len(), 1);
    // Two segments, double sided
    assert_eq!(lines[0].geometry().triangle_count(), 8);

    let aux = tile.auxiliary_geometry().unwrap();
    assert_eq!(aux.triangle_count(), 12 + 12 + 8);
}
