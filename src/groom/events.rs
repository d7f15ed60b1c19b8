//! Change notifications delivered to groom observers

use crate::core::types::{NodeId, OutputId, StrandKind};

/// Something that changes which strands (or how many) a groom produces
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyChange {
    /// Operators were added, removed, re-ordered or collapsed
    StackEdited { command: &'static str },
    /// An output now displays a different strand kind
    ShapeSwitched { output: OutputId, kind: StrandKind },
    /// A source mesh changed connectivity; surface bindings were invalidated
    SourceTopology { source: String, version: u64 },
    /// A source mesh moved its vertices without changing connectivity
    SourceDeformed { source: String },
    /// A source mesh only changed its transform
    SourceTransformed { source: String },
    /// A source was added, replaced or removed
    SourceReplaced { source: String },
    /// A cache node re-read its baked file
    CacheReloaded { node: NodeId },
}

/// Synchronous subscriber to groom changes
///
/// Callbacks run on the thread that triggered the change, after the change
/// has been committed.
pub trait GroomObserver: Send + Sync {
    fn on_topology_changed(&self, _change: &TopologyChange) {}

    /// `parameter` names what changed: `"params"` or `"enabled"`
    fn on_parameter_changed(&self, _node: NodeId, _parameter: &str) {}
}
