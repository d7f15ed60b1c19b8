//! Integration tests for the command layer
//!
//! A host edits a groom only through commands. These tests run mixed edit
//! sequences and check that undo walks every step back to the original
//! strands and that redo replays them.

use std::collections::BTreeSet;
use std::sync::Arc;

use strand_stack::bake::BakeTarget;
use strand_stack::command::{CommandExecutor, GroomCommand};
use strand_stack::core::types::{NodeId, StrandId};
use strand_stack::mesh::Mesh;
use strand_stack::operators::{
    FrizzParams, GuidesFromMeshParams, HairFromGuidesParams, LengthParams, OperatorParams,
};
use strand_stack::roots::RootSettings;
use strand_stack::strands::{GroupPattern, GroupTag, StrandSelector, StrandStore};
use strand_stack::{EngineContext, Groom, StackError};

fn add(name: &str, params: OperatorParams, after: Option<NodeId>) -> GroomCommand {
    GroomCommand::AddOperator {
        name: name.into(),
        params,
        after,
    }
}

fn snapshot(groom: &Groom) -> (Vec<StrandId>, Vec<glam::Vec3>) {
    let store: Arc<StrandStore> = groom.evaluate().unwrap();
    (store.strand_ids().to_vec(), store.points().to_vec())
}

fn setup() -> (Arc<EngineContext>, Groom, CommandExecutor, NodeId) {
    let engine = EngineContext::with_defaults();
    let mut groom = Groom::new(Arc::clone(&engine), "commands").unwrap();
    groom.set_mesh("distribution", Arc::new(Mesh::plane(2.0, 4)));
    let mut executor = CommandExecutor::new();
    let root = executor
        .execute(
            &mut groom,
            add(
                "guides",
                OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default()),
                None,
            ),
        )
        .unwrap()
        .node
        .unwrap();
    (engine, groom, executor, root)
}

// ============================================================================
// Undo / Redo
// ============================================================================

/// Every step of a mixed edit sequence can be undone and redone
#[test]
fn test_undo_redo_full_sequence() {
    let (_engine, mut groom, mut executor, root) = setup();
    let initial = snapshot(&groom);

    let hair = executor
        .execute(
            &mut groom,
            add(
                "hair",
                OperatorParams::HairFromGuides(HairFromGuidesParams {
                    roots: RootSettings {
                        count: 150,
                        ..RootSettings::default()
                    },
                    ..HairFromGuidesParams::default()
                }),
                None,
            ),
        )
        .unwrap()
        .node
        .unwrap();
    let length = executor
        .execute(
            &mut groom,
            add("length", OperatorParams::Length(LengthParams::default()), None),
        )
        .unwrap()
        .node
        .unwrap();
    executor
        .execute(
            &mut groom,
            GroomCommand::SetParams {
                node: length,
                params: OperatorParams::Length(LengthParams {
                    scale: 1.5,
                    ..LengthParams::default()
                }),
            },
        )
        .unwrap();
    let frizz = executor
        .execute(
            &mut groom,
            add("frizz", OperatorParams::Frizz(FrizzParams::default()), None),
        )
        .unwrap()
        .node
        .unwrap();
    executor
        .execute(
            &mut groom,
            GroomCommand::ReorderStack {
                from: length,
                order: vec![frizz, length],
            },
        )
        .unwrap();
    executor
        .execute(
            &mut groom,
            GroomCommand::EnableOperator {
                node: frizz,
                enabled: false,
            },
        )
        .unwrap();
    executor
        .execute(
            &mut groom,
            GroomCommand::CollapseStack {
                from: root,
                to: hair,
                target: BakeTarget::Embedded,
            },
        )
        .unwrap();
    let last = snapshot(&groom);
    assert_eq!(executor.applied_len(), 8);

    let mut undone = 0;
    while executor.undo(&mut groom).unwrap() {
        undone += 1;
    }
    assert_eq!(undone, 8);
    assert!(groom.graph().is_empty());
    assert_eq!(groom.strand_count().unwrap(), 0);

    // Redo the very first command: the original guides come back.
    assert!(executor.redo(&mut groom).unwrap());
    assert_eq!(snapshot(&groom), initial);

    while executor.redo(&mut groom).unwrap() {}
    let replayed = snapshot(&groom);
    assert_eq!(replayed.0, last.0);
    for (p, q) in replayed.1.iter().zip(&last.1) {
        assert!((*p - *q).length() < 1e-5);
    }
}

/// A rejected command changes neither the groom nor the history
#[test]
fn test_rejected_commands() {
    let (engine, mut groom, mut executor, root) = setup();
    let before = snapshot(&groom);

    let err = executor
        .execute(
            &mut groom,
            add(
                "guides again",
                OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default()),
                Some(root),
            ),
        )
        .unwrap_err();
    assert!(matches!(err, StackError::InvalidInsertion(_)));

    let err = executor
        .execute(
            &mut groom,
            GroomCommand::ReorderStack {
                from: root,
                order: vec![root, root],
            },
        )
        .unwrap_err();
    assert!(matches!(err, StackError::InvalidRange(_)));

    assert_eq!(executor.applied_len(), 1);
    assert_eq!(groom.graph().len(), 1);
    assert_eq!(snapshot(&groom), before);
    assert_eq!(engine.assert_count(), 0);
}

// ============================================================================
// Selection and Groups
// ============================================================================

/// Group assignment is undoable and selection reads the result
#[test]
fn test_assign_group_select_and_undo() {
    let (_engine, mut groom, mut executor, _root) = setup();
    let ids: BTreeSet<StrandId> = [StrandId(1), StrandId(3)].into_iter().collect();
    executor
        .execute(
            &mut groom,
            GroomCommand::AssignStrandGroup {
                ids: ids.clone(),
                group: GroupTag::Name("front".into()),
            },
        )
        .unwrap();

    let select = GroomCommand::SelectStrands {
        selector: StrandSelector::Groups {
            pattern: GroupPattern::parse("front").unwrap(),
        },
    };
    let selected = executor.execute(&mut groom, select.clone()).unwrap().selected;
    assert_eq!(selected, ids.iter().copied().collect::<Vec<_>>());
    assert_eq!(executor.applied_len(), 2);

    executor.undo(&mut groom).unwrap();
    assert_eq!(groom.graph().len(), 1);
    assert!(executor
        .execute(&mut groom, select)
        .unwrap()
        .selected
        .is_empty());
}
