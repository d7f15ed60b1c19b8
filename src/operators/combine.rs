//! Operators that add data to a store: merged strand sets, channels, groups

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::context::EvalContext;
use crate::core::error::Result;
use crate::core::types::StrandId;
use crate::identity::IdAllocator;
use crate::strands::{ChannelData, ChannelScope, ChannelValue, GroupPattern, GroupTag, StrandStore};

// === MERGE ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeParams {
    /// External strand set source name
    pub strands: String,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            strands: "external".into(),
        }
    }
}

impl MergeParams {
    /// Input plus the external set, whose ids are shifted past the input's
    pub fn evaluate(&self, input: &StrandStore, ctx: &EvalContext<'_>) -> Result<StrandStore> {
        let Some(external) = ctx.sources.strands(&self.strands) else {
            tracing::warn!(source = %self.strands, "merge source missing; passing input through");
            return Ok(input.clone());
        };
        if external.kind() != input.kind() {
            tracing::warn!(
                input = input.kind().label(),
                merged = external.kind().label(),
                "merge source has a different strand kind; passing input through"
            );
            return Ok(input.clone());
        }
        let base = IdAllocator::after(input).peek();
        let mut output = input.clone();
        output.append_store(external, |id| StrandId(base + id.0));
        Ok(output)
    }
}

// === WRITE CHANNEL ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteChannelParams {
    pub name: String,
    pub scope: ChannelScope,
    pub value: ChannelValue,
    pub group: GroupPattern,
    /// Write into an existing channel of that name instead of adding a new one
    pub overwrite: bool,
}

impl Default for WriteChannelParams {
    fn default() -> Self {
        Self {
            name: "channel".into(),
            scope: ChannelScope::Strand,
            value: ChannelValue::Float(1.0),
            group: GroupPattern::all(),
            overwrite: false,
        }
    }
}

impl WriteChannelParams {
    pub fn sanitized(mut self) -> Self {
        let trimmed = self.name.trim();
        self.name = if trimmed.is_empty() {
            "channel".into()
        } else {
            trimmed.to_string()
        };
        self
    }

    pub fn evaluate(&self, input: &StrandStore) -> Result<StrandStore> {
        let mut output = input.clone();
        let mask = input.group_mask(&self.group);

        let targets: Vec<usize> = match self.scope {
            ChannelScope::Strand => (0..mask.len()).filter(|&i| mask[i]).collect(),
            ChannelScope::Vertex => (0..mask.len())
                .filter(|&i| mask[i])
                .flat_map(|i| input.vertex_range(i))
                .collect(),
        };

        let writable = self.overwrite
            && output
                .channels()
                .get(&self.name)
                .is_some_and(|c| c.scope == self.scope && c.data.accepts(&self.value));
        let name = if writable {
            self.name.clone()
        } else {
            let len = match self.scope {
                ChannelScope::Strand => input.strand_count(),
                ChannelScope::Vertex => input.vertex_count(),
            };
            output.channels_mut().add(
                &self.name,
                self.scope,
                ChannelData::defaults_like(&self.value, len),
            )
        };

        if let Some(channel) = output.channels_mut().get_mut(&name) {
            let data = channel.data_mut();
            for i in targets {
                data.set(i, &self.value);
            }
        }
        Ok(output)
    }
}

// === STRAND GROUPS ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAssignment {
    pub ids: BTreeSet<StrandId>,
    pub group: GroupTag,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandGroupsParams {
    pub assignments: Vec<GroupAssignment>,
    /// Drop upstream group tags first
    pub clear_existing: bool,
}

impl StrandGroupsParams {
    pub fn assign(&mut self, ids: BTreeSet<StrandId>, group: GroupTag) {
        self.assignments.push(GroupAssignment { ids, group });
    }

    pub fn evaluate(&self, input: &StrandStore) -> Result<StrandStore> {
        let mut output = input.clone();
        if self.assignments.is_empty() && !self.clear_existing {
            return Ok(output);
        }
        let ids = input.strand_ids().to_vec();
        let groups = output.groups_mut();
        for (i, id) in ids.iter().enumerate() {
            if self.clear_existing {
                groups[i].clear();
            }
            for assignment in &self.assignments {
                if assignment.ids.contains(id) {
                    groups[i].insert(assignment.group.clone());
                }
            }
        }
        Ok(output)
    }
}
