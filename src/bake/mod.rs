//! Collapse of a stack range into a static cache node
//!
//! The cache node stores the full (render) output of the range, so the
//! groom's LOD resolver keeps serving viewport subsets from it after the
//! live operators are gone.

use std::path::{Path, PathBuf};

use crate::core::error::Result;
use crate::core::types::NodeId;
use crate::operators::{save_baked, CacheParams, EvalContext, OperatorParams};
use crate::stack::StackGraph;

/// Where collapsed strands are kept
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BakeTarget {
    /// Inside the groom description
    #[default]
    Embedded,
    /// In a baked cache file next to the groom
    File(PathBuf),
}

/// Result of a collapse
#[derive(Debug, Clone)]
pub struct Collapsed {
    pub node: NodeId,
    /// Nodes removed from the graph, root first
    pub removed: Vec<NodeId>,
    pub strand_count: usize,
}

/// Replace `from..=to` with a cache node holding `to`'s current output
///
/// The graph is left untouched when evaluation or the range check fails.
pub fn collapse(
    graph: &mut StackGraph,
    from: NodeId,
    to: NodeId,
    target: &BakeTarget,
    ctx: &EvalContext<'_>,
) -> Result<Collapsed> {
    // Checked before anything is written to disk
    let removed = graph.replaceable_range(from, to)?;

    let store = graph.evaluate(to, ctx)?;
    let strand_count = store.strand_count();
    let params = match target {
        BakeTarget::Embedded => CacheParams::embedded(store.as_ref().clone()),
        BakeTarget::File(path) => {
            save_baked(&store, path)?;
            CacheParams::file(store.kind(), path)
        }
    };

    let name = format!("baked {}", graph.node(to)?.name);
    let node = graph.replace_range(from, to, name, OperatorParams::Cache(params))?;
    tracing::info!(
        node = %node,
        operators = removed.len(),
        strands = strand_count,
        "stack range collapsed"
    );
    Ok(Collapsed {
        node,
        removed,
        strand_count,
    })
}

/// Collapse into a cache file at `path`
pub fn collapse_to_file(
    graph: &mut StackGraph,
    from: NodeId,
    to: NodeId,
    path: &Path,
    ctx: &EvalContext<'_>,
) -> Result<Collapsed> {
    collapse(graph, from, to, &BakeTarget::File(path.to_path_buf()), ctx)
}
