//! Pull evaluation over the stack graph
//!
//! Every node caches its last published output together with a stamp derived
//! from its upstream stamp, its own version and the source set stamp. A pull
//! walks the chain from the root and recomputes only nodes whose stamp moved.
//! Published stores are shared through `Arc` and never mutated afterwards.

use std::sync::Arc;

use super::graph::StackGraph;
use super::node::CachedOutput;
use crate::core::error::Result;
use crate::core::types::{mix_pair, NodeId, OutputId};
use crate::operators::EvalContext;
use crate::strands::StrandStore;

/// Outcome counters of one pull
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub computed: usize,
    pub reused: usize,
}

impl StackGraph {
    /// Output of `node`, computing stale nodes on its chain
    pub fn evaluate(&self, node: NodeId, ctx: &EvalContext<'_>) -> Result<Arc<StrandStore>> {
        self.evaluate_with_stats(node, ctx).map(|(store, _)| store)
    }

    pub fn evaluate_output(&self, output: OutputId, ctx: &EvalContext<'_>) -> Result<Arc<StrandStore>> {
        let source = self.output(output)?.source;
        self.evaluate(source, ctx)
    }

    pub fn evaluate_with_stats(
        &self,
        target: NodeId,
        ctx: &EvalContext<'_>,
    ) -> Result<(Arc<StrandStore>, EvalStats)> {
        let mut stats = EvalStats::default();
        let mut input: Option<Arc<StrandStore>> = None;
        let mut stamp = 0u64;

        for id in self.chain(target)? {
            let node = self.node(id)?;
            stamp = mix_pair(mix_pair(stamp, node.version), ctx.sources.stamp());

            // The write lock is held across the rebuild so readers never see
            // a half-built store.
            let mut slot = node.output.write();
            if let Some(cached) = slot.as_ref().filter(|c| c.stamp == stamp) {
                stats.reused += 1;
                input = Some(Arc::clone(&cached.store));
                continue;
            }

            let output = match (&input, node.enabled) {
                (Some(upstream), false) if !node.params.is_generator() => Arc::clone(upstream),
                (_, false) => Arc::new(node.params.bypass(input.as_deref())),
                (_, true) => Arc::new(node.params.evaluate(input.as_deref(), ctx, &node.state)?),
            };
            if let Err(err) = output.validate() {
                tracing::error!(node = %id, operator = node.params.type_name(), %err, "operator produced an inconsistent store");
                return Err(err);
            }
            tracing::debug!(
                node = %id,
                operator = node.params.type_name(),
                strands = output.strand_count(),
                "node evaluated"
            );
            stats.computed += 1;
            *slot = Some(CachedOutput {
                stamp,
                store: Arc::clone(&output),
            });
            input = Some(output);
        }

        let store = input.unwrap_or_else(|| Arc::new(StrandStore::default()));
        Ok((store, stats))
    }

    /// Drop every cached node output; operator caches are kept
    pub fn invalidate_outputs(&self) {
        for id in self.topological_order() {
            if let Ok(node) = self.node(id) {
                node.invalidate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::mesh::Mesh;
    use crate::operators::{
        FrizzParams, GuidesFromMeshParams, LengthParams, OperatorParams, SourceSet,
    };

    fn sources() -> SourceSet {
        let mut sources = SourceSet::new();
        sources.set_mesh("distribution", Arc::new(Mesh::plane(2.0, 4)));
        sources
    }

    fn build(config: &EngineConfig) -> (StackGraph, NodeId, NodeId) {
        let mut g = StackGraph::new();
        let root = g
            .add_root(
                "guides",
                OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default()),
                config,
            )
            .unwrap();
        let length = g
            .insert(
                "length",
                OperatorParams::Length(LengthParams {
                    scale: 2.0,
                    ..LengthParams::default()
                }),
                root,
                config,
            )
            .unwrap();
        (g, root, length)
    }

    #[test]
    fn test_second_pull_reuses_everything() {
        let config = EngineConfig::default();
        let sources = sources();
        let ctx = EvalContext::new(&sources, &config);
        let (g, _, length) = build(&config);

        let (first, stats) = g.evaluate_with_stats(length, &ctx).unwrap();
        assert_eq!(stats.computed, 2);
        assert_eq!(first.strand_count(), 100);
        let (second, stats) = g.evaluate_with_stats(length, &ctx).unwrap();
        assert_eq!(stats, EvalStats { computed: 0, reused: 2 });
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_param_change_recomputes_downstream_only() {
        let config = EngineConfig::default();
        let sources = sources();
        let ctx = EvalContext::new(&sources, &config);
        let (mut g, root, length) = build(&config);
        g.evaluate(length, &ctx).unwrap();
        let upstream = g.node(root).unwrap().cached_output().unwrap();

        g.set_params(
            length,
            OperatorParams::Length(LengthParams {
                scale: 3.0,
                ..LengthParams::default()
            }),
            &config,
        )
        .unwrap();
        let (out, stats) = g.evaluate_with_stats(length, &ctx).unwrap();
        assert_eq!(stats, EvalStats { computed: 1, reused: 1 });

        // Upstream cached points are untouched by the downstream mutation.
        let again = g.node(root).unwrap().cached_output().unwrap();
        assert!(Arc::ptr_eq(&upstream, &again));
        let tip = |s: &StrandStore| s.strand_points(0).last().copied().unwrap();
        let root_tip = tip(&upstream);
        assert!((tip(&out).y - root_tip.y * 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_disabled_node_shares_input() {
        let config = EngineConfig::default();
        let sources = sources();
        let ctx = EvalContext::new(&sources, &config);
        let (mut g, root, length) = build(&config);
        g.set_enabled(length, false).unwrap();
        let out = g.evaluate(length, &ctx).unwrap();
        let upstream = g.node(root).unwrap().cached_output().unwrap();
        assert!(Arc::ptr_eq(&out, &upstream));
    }

    #[test]
    fn test_source_change_invalidates() {
        let config = EngineConfig::default();
        let mut sources = sources();
        let (g, _, length) = build(&config);
        g.evaluate(length, &EvalContext::new(&sources, &config)).unwrap();
        sources.set_mesh("distribution", Arc::new(Mesh::plane(4.0, 4)));
        let (_, stats) = g
            .evaluate_with_stats(length, &EvalContext::new(&sources, &config))
            .unwrap();
        assert_eq!(stats.computed, 2);
    }

    #[test]
    fn test_missing_mesh_yields_empty_stack() {
        let config = EngineConfig::default();
        let sources = SourceSet::new();
        let ctx = EvalContext::new(&sources, &config);
        let (mut g, _, length) = build(&config);
        g.insert(
            "frizz",
            OperatorParams::Frizz(FrizzParams::default()),
            length,
            &config,
        )
        .unwrap();
        let out = g.evaluate_output(OutputId(0), &ctx).unwrap();
        assert!(out.is_empty());
    }
}
