// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use approx::assert_relative_eq;
use common::{mesh_area, BoxFaces, TileBuilder};
use strata_core::{CollapsePillarRecord, FaceType, LayerKind};
use strata_geometry::{CutLine, Point3, StratumCrossSections, StratumTileData, Vector3};

fn cube_tile(with_pillar: bool) -> StratumTileData {
    let mut builder = TileBuilder::new();
    let layer = builder.layer(4, LayerKind::Voxel, "limestone", 2);
    builder.add_box(layer, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], BoxFaces::default());
    if with_pillar {
        let pillar = builder.layer(8, LayerKind::Collapse, "sinkhole", 6);
        builder.add_box(pillar, [1.25, 1.0, 0.5], [1.75, 2.0, 2.5], BoxFaces::default());
        builder.extensions.collapse_pillars.push(CollapsePillarRecord {
            layer_id: 8,
            name: "sinkhole".to_string(),
        });
    }
    builder.tile()
}

fn horizontal_line() -> CutLine {
    CutLine::local(vec![Point3::new(0.5, 1.5, 1.5), Point3::new(2.5, 1.5, 1.5)])
}

#[test]
fn test_horizontal_cut_through_cube() {
    let tile = cube_tile(false);
    let profiles = StratumCrossSections::new(&tile)
        .generate(&[horizontal_line()], Vector3::z())
        .unwrap();
    assert_eq!(profiles.len(), 1);
    let profile = &profiles[0];
    assert_eq!(profile.strata.len(), 1);
    assert!(profile.collapses.is_empty());

    let section = &profile.strata[0];
    assert_eq!(section.layer_id, 4);
    assert_eq!(section.material_id, 2);
    assert_eq!(section.top_points.len(), 2);
    assert_eq!(section.base_points.len(), 2);

    // Ordered by distance from the start of the line
    let start = Point3::new(0.5, 1.5, 1.5);
    for run in [&section.top_points, &section.base_points] {
        assert!((run[0] - start).norm() < (run[1] - start).norm());
    }
    assert_relative_eq!(section.top_points[0], Point3::new(1.0, 1.5, 2.0), epsilon = 1e-6);
    assert_relative_eq!(section.base_points[1], Point3::new(2.0, 1.5, 1.0), epsilon = 1e-6);

    assert_eq!(section.polygons.len(), 1);
    assert_eq!(section.polygons[0].len(), 4);
    assert_relative_eq!(mesh_area(&section.mesh), 1.0, epsilon = 1e-6);
    assert!(section
        .mesh
        .face_types
        .iter()
        .all(|&f| f == FaceType::SIDE.bits()));
}

#[test]
fn test_geographic_line_matches_local() {
    let tile = cube_tile(false);
    let sections = StratumCrossSections::new(&tile);
    let local = sections.generate(&[horizontal_line()], Vector3::z()).unwrap();
    let geographic = sections
        .generate(
            &[CutLine::geographic(vec![[0.5, 1.5, 1.5], [2.5, 1.5, 1.5]])],
            Vector3::z(),
        )
        .unwrap();
    assert_eq!(
        local[0].strata[0].top_points.len(),
        geographic[0].strata[0].top_points.len()
    );
    assert_relative_eq!(
        local[0].strata[0].top_points[0],
        geographic[0].strata[0].top_points[0],
        epsilon = 1e-6
    );
}

#[test]
fn test_line_missing_the_voxel_yields_nothing() {
    let tile = cube_tile(false);
    let line = CutLine::local(vec![Point3::new(0.5, 3.0, 1.5), Point3::new(2.5, 3.0, 1.5)]);
    let profiles = StratumCrossSections::new(&tile)
        .generate(&[line], Vector3::z())
        .unwrap();
    assert!(profiles[0].strata.is_empty());
}

#[test]
fn test_pillar_is_cut_out_of_the_section() {
    let tile = cube_tile(true);
    let profiles = StratumCrossSections::new(&tile)
        .generate(&[horizontal_line()], Vector3::z())
        .unwrap();
    let profile = &profiles[0];

    assert_eq!(profile.collapses.len(), 1);
    let collapse = &profile.collapses[0];
    assert_eq!(collapse.layer_id, 8);
    assert_relative_eq!(mesh_area(&collapse.mesh), 1.0, epsilon = 1e-6);

    let section = &profile.strata[0];
    // Uncut polygon is kept; the mesh loses the pillar's strip
    assert_eq!(section.polygons.len(), 1);
    assert_relative_eq!(mesh_area(&section.mesh), 0.5, epsilon = 1e-6);
    assert!(section.mesh.triangles().all(|tri| {
        let cx = (tri[0].x + tri[1].x + tri[2].x) / 3.0;
        !(1.25 + 1e-9..1.75 - 1e-9).contains(&cx)
    }));
}

#[test]
fn test_pillar_strip_cuts_section_with_hole() {
    let mut builder = TileBuilder::new();
    let layer = builder.layer(4, LayerKind::Voxel, "limestone", 2);
    builder.add_box(layer, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], BoxFaces::default());
    // Enclosed by the voxel in the section plane, leaving a hole
    let pocket = builder.layer(8, LayerKind::Collapse, "pocket", 6);
    builder.add_box(pocket, [1.1, 1.0, 1.25], [1.3, 2.0, 1.75], BoxFaces::default());
    // Runs through the voxel top to bottom
    let shaft = builder.layer(9, LayerKind::Collapse, "shaft", 7);
    builder.add_box(shaft, [1.6, 1.0, 0.5], [1.8, 2.0, 2.5], BoxFaces::default());
    for (layer_id, name) in [(8, "pocket"), (9, "shaft")] {
        builder.extensions.collapse_pillars.push(CollapsePillarRecord {
            layer_id,
            name: name.to_string(),
        });
    }
    let tile = builder.tile();

    let profiles = StratumCrossSections::new(&tile)
        .generate(&[horizontal_line()], Vector3::z())
        .unwrap();
    let profile = &profiles[0];
    assert_eq!(profile.collapses.len(), 2);

    let section = &profile.strata[0];
    assert_relative_eq!(mesh_area(&section.mesh), 1.0 - 0.1 - 0.2, epsilon = 1e-6);
    assert!(section.mesh.triangles().all(|tri| {
        let cx = (tri[0].x + tri[1].x + tri[2].x) / 3.0;
        !(1.6 + 1e-9..1.8 - 1e-9).contains(&cx)
    }));
}

#[test]
fn test_degenerate_cut_line_is_an_error() {
    let tile = cube_tile(false);
    let sections = StratumCrossSections::new(&tile);
    let single = CutLine::local(vec![Point3::new(0.5, 1.5, 1.5)]);
    assert!(sections.generate(&[single], Vector3::z()).is_err());

    let vertical = CutLine::local(vec![Point3::new(1.5, 1.5, 0.0), Point3::new(1.5, 1.5, 3.0)]);
    assert!(sections.generate(&[vertical], Vector3::z()).is_err());
}

#[test]
fn test_ground_faces_merge_across_voxels() {
    let mut builder = TileBuilder::new();
    let layer = builder.layer(1, LayerKind::Voxel, "soil", 1);
    let faces = BoxFaces {
        top: FaceType::TOP_GROUND,
        ..Default::default()
    };
    builder.add_box(layer, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], faces);
    builder.add_box(layer, [2.0, 1.0, 1.0], [3.0, 2.0, 2.0], faces);
    let tile = builder.tile();

    let ground = StratumCrossSections::new(&tile).extract_ground_faces();
    assert_eq!(ground.geometry.triangle_count(), 4);
    // Two squares sharing an edge: 6 distinct corners
    assert_eq!(ground.geometry.vertex_count(), 6);
    let e = ground.extents;
    assert_relative_eq!(e[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(e[1], 1.0, epsilon = 1e-6);
    assert_relative_eq!(e[2], 2.0, epsilon = 1e-6);
    assert_relative_eq!(e[3], 3.0, epsilon = 1e-6);
    assert_relative_eq!(e[4], 2.0, epsilon = 1e-6);
    assert_relative_eq!(e[5], 2.0, epsilon = 1e-6);
}
