//! Property tests for the stack invariants that must hold for any input
//!
//! - LOD subsets are nested and sized `round(n * f)`
//! - Root generation is a pure function of its settings
//! - Group scoped operators leave non-member strands untouched
//! - Random edit sequences keep the stack graph consistent

use std::collections::BTreeSet;

use glam::Vec3;
use proptest::prelude::*;

use strand_stack::core::types::{NodeId, StrandId, StrandKind};
use strand_stack::lod::{subset_count, LodResolver, LodState};
use strand_stack::mesh::Mesh;
use strand_stack::operators::{
    EvalContext, FrizzParams, GuidesFromMeshParams, LengthParams, OperatorParams, SourceSet,
};
use strand_stack::roots::{generate_roots, DistributionMethod, RootSettings, RootSource};
use strand_stack::stack::StackGraph;
use strand_stack::strands::{GroupPattern, GroupTag, NewStrand, StrandStore};
use strand_stack::EngineConfig;

fn store(count: usize) -> StrandStore {
    let mut s = StrandStore::new(StrandKind::Hair);
    s.append_strands(
        (1..=count as u64)
            .map(|id| NewStrand::new(StrandId(id), vec![Vec3::ZERO, Vec3::Y]))
            .collect(),
    );
    s
}

fn method() -> impl Strategy<Value = DistributionMethod> {
    prop_oneof![
        Just(DistributionMethod::Uniform),
        Just(DistributionMethod::RandomUv),
        Just(DistributionMethod::RandomArea),
        Just(DistributionMethod::RandomFace),
        Just(DistributionMethod::Even),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // ========================================================================
    // Level of Detail
    // ========================================================================

    #[test]
    fn test_viewport_subsets_are_nested(
        count in 0usize..400,
        a in 0.0f32..=1.0,
        b in 0.0f32..=1.0,
        seed in any::<u64>(),
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let s = store(count);
        let resolver = LodResolver::new(seed);
        let small: BTreeSet<StrandId> = resolver
            .resolve_ids(&s, &LodState::Viewport { fraction: low })
            .into_iter()
            .collect();
        let large: BTreeSet<StrandId> = resolver
            .resolve_ids(&s, &LodState::Viewport { fraction: high })
            .into_iter()
            .collect();
        prop_assert_eq!(small.len(), subset_count(count, low));
        prop_assert_eq!(large.len(), subset_count(count, high));
        prop_assert!(small.is_subset(&large));
        prop_assert_eq!(resolver.resolve_ids(&s, &LodState::Render).len(), count);
    }

    #[test]
    fn test_isolation_never_leaves_chosen_set(
        count in 1usize..200,
        picks in prop::collection::btree_set(1u64..200, 0..40),
        rate in 0.0f32..=1.0,
    ) {
        let s = store(count);
        let ids: BTreeSet<StrandId> = picks.into_iter().map(StrandId).collect();
        let state = LodState::Isolated { ids: ids.clone(), visibility_rate: rate, culled_rate: 0.0 };
        let shown = LodResolver::new(7).resolve_ids(&s, &state);
        prop_assert!(shown.iter().all(|id| ids.contains(id)));
    }

    // ========================================================================
    // Roots
    // ========================================================================

    #[test]
    fn test_root_generation_is_pure(
        method in method(),
        count in 0usize..300,
        seed in any::<u64>(),
        segments in 1u32..6,
    ) {
        let mesh = Mesh::plane(2.0, segments);
        let source = RootSource { mesh: Some(&mesh), guides: None };
        let settings = RootSettings { method, count, seed, ..RootSettings::default() };
        let config = EngineConfig::default();

        let first = generate_roots(&settings, &source, &config);
        let second = generate_roots(&settings, &source, &config);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), count);

        let ids: BTreeSet<StrandId> = first.iter().map(|r| r.id).collect();
        prop_assert_eq!(ids.len(), first.len());
        for root in &first {
            let b = root.surface.barycentric;
            prop_assert!(b.min_element() >= -1e-5);
            prop_assert!((b.x + b.y + b.z - 1.0).abs() < 1e-4);
            prop_assert!((root.surface.face as usize) < segments as usize * segments as usize * 2);
        }
    }

    // ========================================================================
    // Groups
    // ========================================================================

    #[test]
    fn test_group_scoped_edits_leave_non_members(
        tags in prop::collection::vec(prop::option::of(0u32..4), 1..60),
        group in 0u32..4,
        scale in 0.0f32..4.0,
        amount in 0.0f32..1.0,
    ) {
        let mut s = StrandStore::new(StrandKind::Guides);
        s.append_strands(
            (0..tags.len())
                .map(|i| {
                    let base = Vec3::new(i as f32, 0.0, 0.0);
                    NewStrand::new(StrandId(i as u64 + 1), vec![base, base + Vec3::Y, base + Vec3::Y * 2.0])
                })
                .collect(),
        );
        for (i, tag) in tags.iter().enumerate() {
            if let Some(tag) = tag {
                s.groups_mut()[i].insert(GroupTag::Index(*tag));
            }
        }
        let pattern = GroupPattern::parse(&group.to_string()).unwrap();
        let sources = SourceSet::new();
        let config = EngineConfig::default();
        let ctx = EvalContext::new(&sources, &config);

        let stretched = LengthParams { scale, group: pattern.clone(), ..LengthParams::default() }
            .sanitized()
            .evaluate(&s, &ctx)
            .unwrap();
        let frizzed = FrizzParams { amount, group: pattern, ..FrizzParams::default() }
            .evaluate(&stretched, &ctx)
            .unwrap();
        for (i, tag) in tags.iter().enumerate() {
            if *tag != Some(group) {
                prop_assert_eq!(frizzed.strand_points(i), s.strand_points(i));
            }
        }
    }

    // ========================================================================
    // Stack Graph
    // ========================================================================

    #[test]
    fn test_edit_sequences_keep_graph_consistent(
        edits in prop::collection::vec((0u8..3, any::<prop::sample::Index>()), 1..24),
    ) {
        let config = EngineConfig::default();
        let mut graph = StackGraph::new();
        let root = graph
            .add_root("guides", OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default()), &config)
            .unwrap();
        let mut live: Vec<NodeId> = vec![root];

        for (op, pick) in edits {
            let target = live[pick.index(live.len())];
            match op {
                0 => {
                    let id = graph
                        .insert("length", OperatorParams::Length(LengthParams::default()), target, &config)
                        .unwrap();
                    live.push(id);
                }
                1 => {
                    let id = graph
                        .insert("frizz", OperatorParams::Frizz(FrizzParams::default()), target, &config)
                        .unwrap();
                    live.push(id);
                }
                _ if target == root => {
                    prop_assert!(graph.delete(target).is_err());
                }
                _ => {
                    graph.delete(target).unwrap();
                    live.retain(|&id| id != target);
                }
            }
            prop_assert!(graph.validate().is_ok());
            prop_assert_eq!(graph.len(), live.len());
            prop_assert_eq!(graph.root(), Some(root));
        }

        // The shape still reads the end of a chain that holds every node.
        let (_, shape) = graph.outputs().next().unwrap();
        let chain = graph.chain(shape.source).unwrap();
        prop_assert_eq!(chain.len(), live.len());
        prop_assert_eq!(graph.topological_order().len(), live.len());
    }
}
