//! Integration tests for saving, baking and exporting grooms
//!
//! These tests verify that strands survive every trip out of the live stack:
//! - Groom descriptions reproduce the same strands after a reload
//! - Remembered roots travel with the description
//! - Collapsed (baked) stacks serve the live result, embedded or from a file
//! - Strand archives export and import ids and positions

use std::sync::Arc;

use glam::{Affine3A, Quat, Vec3};
use tempfile::TempDir;

use strand_stack::bake::BakeTarget;
use strand_stack::core::types::{NodeId, Space, StrandKind};
use strand_stack::mesh::Mesh;
use strand_stack::operators::{
    FrizzParams, GuidesFromMeshParams, HairFromGuidesParams, OperatorParams,
};
use strand_stack::roots::{DistributionMethod, RootSettings};
use strand_stack::serialize::{export_store, ExportOptions, GroomDescription, StrandArchive};
use strand_stack::strands::StrandStore;
use strand_stack::{EngineContext, Groom};

fn plane() -> Arc<Mesh> {
    Arc::new(Mesh::plane(2.0, 4))
}

fn guides(seed: u64) -> OperatorParams {
    OperatorParams::GuidesFromMesh(GuidesFromMeshParams {
        roots: RootSettings {
            method: DistributionMethod::RandomArea,
            count: 24,
            seed,
            ..RootSettings::default()
        },
        ..GuidesFromMeshParams::default()
    })
}

/// guides -> hair -> frizz on a plane; returns the three node handles
fn hair_groom(engine: &Arc<EngineContext>) -> (Groom, [NodeId; 3]) {
    let mut groom = Groom::new(Arc::clone(engine), "persist").unwrap();
    groom.set_mesh("distribution", plane());
    let root = groom.add_operator("guides", guides(1), None).unwrap();
    let hair = groom
        .add_operator(
            "hair",
            OperatorParams::HairFromGuides(HairFromGuidesParams {
                roots: RootSettings {
                    count: 400,
                    seed: 9,
                    ..RootSettings::default()
                },
                ..HairFromGuidesParams::default()
            }),
            None,
        )
        .unwrap();
    let frizz = groom
        .add_operator(
            "frizz",
            OperatorParams::Frizz(FrizzParams {
                amount: 0.05,
                ..FrizzParams::default()
            }),
            None,
        )
        .unwrap();
    (groom, [root, hair, frizz])
}

fn assert_same_strands(a: &StrandStore, b: &StrandStore) {
    assert_eq!(a.strand_ids(), b.strand_ids());
    assert_eq!(a.vertex_count(), b.vertex_count());
    for (p, q) in a.points().iter().zip(b.points()) {
        assert!((*p - *q).length() < 1e-5, "{:?} != {:?}", p, q);
    }
}

// ============================================================================
// Groom Descriptions
// ============================================================================

/// A saved and reloaded groom produces the same strands
#[test]
fn test_groom_save_load_reproduces_strands() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hair.groom.json");
    let engine = EngineContext::with_defaults();
    let (groom, _) = hair_groom(&engine);
    let original = groom.evaluate().unwrap();
    groom.save(&path).unwrap();

    let mut loaded = Groom::load(Arc::clone(&engine), &path).unwrap();
    loaded.set_mesh("distribution", plane());
    assert_eq!(loaded.name(), "persist");
    assert_eq!(loaded.graph().len(), 3);
    assert_same_strands(&original, &loaded.evaluate().unwrap());
}

/// Remembered roots are stored with the description and survive a seed edit
/// after reload
#[test]
fn test_remembered_roots_survive_reload() {
    let engine = EngineContext::with_defaults();
    let (groom, _) = hair_groom(&engine);
    let original = groom.evaluate().unwrap();
    let json = groom.describe().unwrap().to_json().unwrap();

    let description = GroomDescription::from_json(&json).unwrap();
    assert!(description.nodes[0].root_cache.is_some());
    let mut loaded = Groom::from_description(Arc::clone(&engine), &description).unwrap();
    loaded.set_mesh("distribution", plane());

    let root = loaded.graph().root().unwrap();
    loaded.set_params(root, guides(77)).unwrap();
    assert_same_strands(&original, &loaded.evaluate().unwrap());
}

/// LOD settings travel with the description
#[test]
fn test_lod_settings_persist() {
    let engine = EngineContext::with_defaults();
    let (mut groom, _) = hair_groom(&engine);
    groom.set_viewport_fraction(0.25);
    let shown = groom.strand_ids().unwrap();
    assert_eq!(shown.len(), 100);

    let description = groom.describe().unwrap();
    let mut loaded = Groom::from_description(Arc::clone(&engine), &description).unwrap();
    loaded.set_mesh("distribution", plane());
    assert_eq!(loaded.strand_ids().unwrap(), shown);
}

// ============================================================================
// Collapse
// ============================================================================

/// Collapsing the whole stack keeps the displayed strands and their LOD
#[test]
fn test_collapse_embedded_matches_live() {
    let engine = EngineContext::with_defaults();
    let (mut groom, [root, _, frizz]) = hair_groom(&engine);
    let live = groom.evaluate().unwrap();
    groom.set_viewport_fraction(0.1);
    let live_viewport = groom.strand_ids().unwrap();

    let collapsed = groom
        .collapse_stack(root, frizz, &BakeTarget::Embedded)
        .unwrap();
    assert_eq!(collapsed.removed.len(), 3);
    assert_eq!(collapsed.strand_count, 400);
    assert_eq!(groom.graph().len(), 1);
    assert_eq!(groom.graph().root(), Some(collapsed.node));

    // The baked node holds the full set; the viewport subset is unchanged.
    assert_eq!(groom.strand_ids().unwrap(), live_viewport);
    groom.set_viewport_fraction(1.0);
    assert_same_strands(&live, &groom.evaluate().unwrap());

    // Baked strands no longer need the distribution mesh.
    groom.remove_mesh("distribution");
    assert_eq!(groom.strand_count().unwrap(), 400);
}

/// Collapsing part of the stack keeps downstream operators live
#[test]
fn test_partial_collapse_keeps_downstream() {
    let engine = EngineContext::with_defaults();
    let (mut groom, [root, hair, frizz]) = hair_groom(&engine);
    let live = groom.evaluate().unwrap();

    let collapsed = groom.collapse_stack(root, hair, &BakeTarget::Embedded).unwrap();
    assert_eq!(groom.graph().chain(frizz).unwrap(), vec![collapsed.node, frizz]);
    assert_eq!(
        groom.graph().node(collapsed.node).unwrap().params.type_name(),
        "cache"
    );
    assert_same_strands(&live, &groom.evaluate().unwrap());
}

/// A file backed collapse is read back by a reloaded groom
#[test]
fn test_collapse_to_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let baked = dir.path().join("hair.baked.json");
    let groom_path = dir.path().join("hair.groom.json");
    let engine = EngineContext::with_defaults();
    let (mut groom, [root, _, frizz]) = hair_groom(&engine);
    let live = groom.evaluate().unwrap();

    groom
        .collapse_stack(root, frizz, &BakeTarget::File(baked.clone()))
        .unwrap();
    assert!(baked.exists());
    groom.save(&groom_path).unwrap();

    let loaded = Groom::load(Arc::clone(&engine), &groom_path).unwrap();
    let reread = loaded.evaluate().unwrap();
    assert_eq!(reread.kind(), StrandKind::Hair);
    assert_same_strands(&live, &reread);
}

/// A missing baked file serves nothing until the cache is reloaded
#[test]
fn test_missing_baked_file_recovers_on_reload() {
    let dir = TempDir::new().unwrap();
    let baked = dir.path().join("late.baked.json");
    let engine = EngineContext::with_defaults();
    let (mut groom, [root, _, frizz]) = hair_groom(&engine);

    groom
        .collapse_stack(root, frizz, &BakeTarget::File(baked.clone()))
        .unwrap();
    let contents = std::fs::read(&baked).unwrap();
    let description = groom.describe().unwrap();
    std::fs::remove_file(&baked).unwrap();

    let mut loaded = Groom::from_description(Arc::clone(&engine), &description).unwrap();
    assert_eq!(loaded.strand_count().unwrap(), 0);

    std::fs::write(&baked, contents).unwrap();
    // Still served empty: the failed load is remembered.
    assert_eq!(loaded.strand_count().unwrap(), 0);
    let node = loaded.graph().root().unwrap();
    assert_eq!(loaded.graph().node(node).unwrap().name, "baked frizz");
    loaded.reload_cache(node).unwrap();
    assert_eq!(loaded.strand_count().unwrap(), 400);
}

// ============================================================================
// Strand Archives
// ============================================================================

/// World space export imports back to object space within tolerance
#[test]
fn test_archive_world_export_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hair.strands.json");
    let engine = EngineContext::with_defaults();
    let (mut groom, _) = hair_groom(&engine);
    let transform = Affine3A::from_scale_rotation_translation(
        Vec3::splat(2.0),
        Quat::from_rotation_y(0.7),
        Vec3::new(1.0, -2.0, 3.0),
    );
    let mesh = Arc::new(Mesh::plane(2.0, 4).with_transform(transform));
    groom.set_mesh("distribution", mesh.clone());
    let store = groom.evaluate().unwrap();

    let archive = export_store(
        &store,
        ExportOptions {
            space: Space::World,
            root_uvs: true,
            ..ExportOptions::default()
        },
        Some(mesh.as_ref()),
    );
    archive.save(&path).unwrap();
    let loaded = StrandArchive::load(&path).unwrap();
    let frame = &loaded.frames[0];
    assert_eq!(frame.strand_count(), 400);
    assert_eq!(
        frame.positions[0],
        store.strand_point(0, 0, Space::World).unwrap()
    );
    let uvs = frame.root_uvs.as_ref().unwrap();
    assert!(uvs.iter().all(|uv| (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y)));

    let imported = loaded.import_frame(0).unwrap();
    assert_eq!(imported.kind(), StrandKind::Hair);
    assert_eq!(imported.strand_ids(), store.strand_ids());
    for (p, q) in imported.points().iter().zip(store.points()) {
        assert!((*p - *q).length() < 0.01);
    }
}
