//! Stack nodes and output bindings

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::types::{NodeId, StrandKind};
use crate::operators::{OperatorParams, OperatorState};
use crate::strands::StrandStore;

/// Last published output of a node and the stamp it was computed for
#[derive(Debug, Clone)]
pub(crate) struct CachedOutput {
    pub stamp: u64,
    pub store: Arc<StrandStore>,
}

/// One operator in a stack
#[derive(Debug)]
pub struct StackNode {
    pub name: String,
    pub params: OperatorParams,
    pub enabled: bool,
    /// Upstream producer; `None` only for the stack root
    pub input: Option<NodeId>,
    /// First node of a branch: reads its input alongside the main chain and
    /// is not moved by insertions on the main chain
    pub branch: bool,
    pub(crate) version: u64,
    pub(crate) state: OperatorState,
    pub(crate) output: RwLock<Option<CachedOutput>>,
}

impl Clone for StackNode {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            enabled: self.enabled,
            input: self.input,
            branch: self.branch,
            version: self.version,
            state: self.state.clone(),
            output: RwLock::new(self.output.read().clone()),
        }
    }
}

impl StackNode {
    pub(crate) fn new(name: String, params: OperatorParams, input: Option<NodeId>, version: u64) -> Self {
        Self {
            name,
            params,
            enabled: true,
            input,
            branch: false,
            version,
            state: OperatorState::default(),
            output: RwLock::new(None),
        }
    }

    pub fn state(&self) -> &OperatorState {
        &self.state
    }

    /// Cached output, if the node has been evaluated
    pub fn cached_output(&self) -> Option<Arc<StrandStore>> {
        self.output.read().as_ref().map(|c| Arc::clone(&c.store))
    }

    pub(crate) fn invalidate(&self) {
        *self.output.write() = None;
    }
}

/// A display shape consuming a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub name: String,
    pub source: NodeId,
    /// Kind of strands the shape currently displays
    pub kind: StrandKind,
    /// Moves to a node inserted right after its source
    pub follows_chain: bool,
}
