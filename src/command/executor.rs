//! Command execution with undo/redo history

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::bake::BakeTarget;
use crate::core::error::Result;
use crate::core::types::{NodeId, StrandId};
use crate::groom::Groom;
use crate::operators::OperatorParams;
use crate::stack::StackGraph;
use crate::strands::{GroupTag, StrandSelector};

/// A stack edit issued by a host
#[derive(Debug, Clone, PartialEq)]
pub enum GroomCommand {
    AddOperator {
        name: String,
        params: OperatorParams,
        /// `None` appends to the primary output (or starts the stack)
        after: Option<NodeId>,
    },
    DeleteOperator { node: NodeId },
    EnableOperator { node: NodeId, enabled: bool },
    SetParams { node: NodeId, params: OperatorParams },
    ReorderStack { from: NodeId, order: Vec<NodeId> },
    CollapseStack {
        from: NodeId,
        to: NodeId,
        target: BakeTarget,
    },
    SelectStrands { selector: StrandSelector },
    AssignStrandGroup {
        ids: BTreeSet<StrandId>,
        group: GroupTag,
    },
    ReloadCache { node: NodeId },
}

impl GroomCommand {
    pub fn label(&self) -> &'static str {
        match self {
            GroomCommand::AddOperator { .. } => "add_operator",
            GroomCommand::DeleteOperator { .. } => "delete_operator",
            GroomCommand::EnableOperator { .. } => "enable_operator",
            GroomCommand::SetParams { .. } => "set_params",
            GroomCommand::ReorderStack { .. } => "reorder_stack",
            GroomCommand::CollapseStack { .. } => "collapse_stack",
            GroomCommand::SelectStrands { .. } => "select_strands",
            GroomCommand::AssignStrandGroup { .. } => "assign_strand_group",
            GroomCommand::ReloadCache { .. } => "reload_cache",
        }
    }
}

/// Result of executing a command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Node created by the command
    pub node: Option<NodeId>,
    /// Strands picked by a selection
    pub selected: Vec<StrandId>,
    /// Nodes removed by a collapse
    pub removed: Vec<NodeId>,
}

/// How to take a command back
#[derive(Debug, Clone)]
enum Inverse {
    Command(GroomCommand),
    Snapshot(StackGraph),
    /// Reads and reloads leave nothing to revert
    Nothing,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    command: GroomCommand,
    inverse: Inverse,
}

/// Applies commands to a groom and records their inverses
///
/// Undo applies the recorded inverse; redo re-runs the original command.
/// Executing a new command after an undo drops the redo entries.
#[derive(Debug, Default)]
pub struct CommandExecutor {
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Number of currently applied entries
    pub fn applied_len(&self) -> usize {
        self.cursor
    }

    pub fn execute(&mut self, groom: &mut Groom, command: GroomCommand) -> Result<ExecutionResult> {
        let (result, inverse) = match apply(groom, &command) {
            Ok(applied) => applied,
            Err(err) => {
                tracing::warn!(command = command.label(), %err, "command rejected");
                return Err(err);
            }
        };
        if !matches!(inverse, Inverse::Nothing) {
            self.entries.truncate(self.cursor);
            self.entries.push(HistoryEntry { command, inverse });
            self.cursor = self.entries.len();
        }
        Ok(result)
    }

    /// Revert the last applied command; `false` when there is none
    pub fn undo(&mut self, groom: &mut Groom) -> Result<bool> {
        if self.cursor == 0 {
            return Ok(false);
        }
        let entry = &self.entries[self.cursor - 1];
        match &entry.inverse {
            Inverse::Command(inverse) => {
                apply(groom, inverse)?;
            }
            Inverse::Snapshot(graph) => groom.replace_graph(graph.clone()),
            Inverse::Nothing => {}
        }
        tracing::debug!(command = entry.command.label(), "command undone");
        self.cursor -= 1;
        Ok(true)
    }

    /// Re-apply the last undone command; `false` when there is none
    pub fn redo(&mut self, groom: &mut Groom) -> Result<bool> {
        if self.cursor >= self.entries.len() {
            return Ok(false);
        }
        let command = self.entries[self.cursor].command.clone();
        let (_, inverse) = apply(groom, &command)?;
        self.entries[self.cursor].inverse = inverse;
        tracing::debug!(command = command.label(), "command redone");
        self.cursor += 1;
        Ok(true)
    }
}

fn snapshot(groom: &Groom) -> Inverse {
    Inverse::Snapshot(groom.graph().clone())
}

/// Run `command` against `groom`, returning its result and inverse
fn apply(groom: &mut Groom, command: &GroomCommand) -> Result<(ExecutionResult, Inverse)> {
    match command {
        GroomCommand::AddOperator {
            name,
            params,
            after,
        } => {
            let before = snapshot(groom);
            let node = groom.add_operator(name.clone(), params.clone(), *after)?;
            Ok((
                ExecutionResult {
                    node: Some(node),
                    ..ExecutionResult::default()
                },
                before,
            ))
        }
        GroomCommand::DeleteOperator { node } => {
            let before = snapshot(groom);
            groom.delete_operator(*node)?;
            Ok((ExecutionResult::default(), before))
        }
        GroomCommand::EnableOperator { node, enabled } => {
            let previous = groom.enable_operator(*node, *enabled)?;
            Ok((
                ExecutionResult::default(),
                Inverse::Command(GroomCommand::EnableOperator {
                    node: *node,
                    enabled: previous,
                }),
            ))
        }
        GroomCommand::SetParams { node, params } => {
            let previous = groom.set_params(*node, params.clone())?;
            Ok((
                ExecutionResult::default(),
                Inverse::Command(GroomCommand::SetParams {
                    node: *node,
                    params: previous,
                }),
            ))
        }
        GroomCommand::ReorderStack { from, order } => {
            let before = snapshot(groom);
            groom.reorder_stack(*from, order)?;
            Ok((ExecutionResult::default(), before))
        }
        GroomCommand::CollapseStack { from, to, target } => {
            let before = snapshot(groom);
            let collapsed = groom.collapse_stack(*from, *to, target)?;
            Ok((
                ExecutionResult {
                    node: Some(collapsed.node),
                    removed: collapsed.removed,
                    ..ExecutionResult::default()
                },
                before,
            ))
        }
        GroomCommand::SelectStrands { selector } => Ok((
            ExecutionResult {
                selected: groom.select_strands(selector)?,
                ..ExecutionResult::default()
            },
            Inverse::Nothing,
        )),
        GroomCommand::AssignStrandGroup { ids, group } => {
            let before = snapshot(groom);
            let node = groom.assign_strand_group(ids.clone(), group.clone())?;
            Ok((
                ExecutionResult {
                    node: Some(node),
                    ..ExecutionResult::default()
                },
                before,
            ))
        }
        GroomCommand::ReloadCache { node } => {
            groom.reload_cache(*node)?;
            Ok((ExecutionResult::default(), Inverse::Nothing))
        }
    }
}
