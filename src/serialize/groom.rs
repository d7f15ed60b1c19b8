//! Groom description: the serialized form of a stack
//!
//! Operator records are written parents first, each naming its input by
//! record index. Root and grounding caches travel with their operator so a
//! reloaded groom reproduces the same strands without regenerating roots.

use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::EngineConfig;
use crate::core::error::{Result, StackError};
use crate::core::types::{NodeId, StrandKind};
use crate::grounding::GroundingCache;
use crate::lod::LodSettings;
use crate::operators::OperatorParams;
use crate::roots::RootCache;
use crate::stack::{OutputBinding, StackGraph, StackNode};

pub const GROOM_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub enabled: bool,
    pub input: Option<usize>,
    #[serde(default)]
    pub branch: bool,
    pub params: OperatorParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cache: Option<RootCache>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingCache>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub name: String,
    pub source: usize,
    pub kind: StrandKind,
    #[serde(default = "default_follows_chain")]
    pub follows_chain: bool,
}

fn default_follows_chain() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroomDescription {
    pub version: u32,
    pub name: String,
    pub nodes: Vec<NodeRecord>,
    pub outputs: Vec<OutputRecord>,
    #[serde(default)]
    pub lod: LodSettings,
}

impl GroomDescription {
    /// Capture `graph` together with its operator caches
    pub fn capture(name: &str, graph: &StackGraph, lod: &LodSettings) -> Result<Self> {
        let order = graph.topological_order();
        let index: AHashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let lookup = |id: NodeId| {
            index.get(&id).copied().ok_or_else(|| {
                StackError::Consistency(format!("{} is not reachable from the stack root", id))
            })
        };

        let mut nodes = Vec::with_capacity(order.len());
        for &id in &order {
            let node = graph.node(id)?;
            let grounding = node.state.grounding.snapshot();
            nodes.push(NodeRecord {
                name: node.name.clone(),
                enabled: node.enabled,
                input: node.input.map(lookup).transpose()?,
                branch: node.branch,
                params: node.params.clone(),
                root_cache: node.state.roots.snapshot(),
                grounding: grounding.is_grounded().then_some(grounding),
            });
        }
        let outputs = graph
            .outputs()
            .map(|(_, o)| {
                Ok(OutputRecord {
                    name: o.name.clone(),
                    source: lookup(o.source)?,
                    kind: o.kind,
                    follows_chain: o.follows_chain,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version: GROOM_VERSION,
            name: name.to_string(),
            nodes,
            outputs,
            lod: lod.clone(),
        })
    }

    /// Rebuild the stack graph, restoring operator caches
    pub fn build(&self, config: &EngineConfig) -> Result<StackGraph> {
        let mut graph = StackGraph::new();
        let mut ids: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        for (i, record) in self.nodes.iter().enumerate() {
            let input = match record.input {
                Some(parent) if parent < i => Some(ids[parent]),
                Some(parent) => {
                    return Err(StackError::Consistency(format!(
                        "operator {} reads record {} which does not precede it",
                        i, parent
                    )))
                }
                None => None,
            };
            let mut node = StackNode::new(
                record.name.clone(),
                record.params.clone().sanitized(config),
                input,
                0,
            );
            node.enabled = record.enabled;
            node.branch = record.branch;
            node.state.roots.restore(record.root_cache.clone());
            if let Some(grounding) = &record.grounding {
                node.state.grounding.restore(grounding.clone());
            }
            ids.push(graph.push_raw(node));
        }
        for output in &self.outputs {
            let source = ids.get(output.source).copied().ok_or_else(|| {
                StackError::Consistency(format!("output {} bound to missing record", output.name))
            })?;
            graph.push_output_raw(OutputBinding {
                name: output.name.clone(),
                source,
                kind: output.kind,
                follows_chain: output.follows_chain,
            });
        }
        graph.validate()?;
        graph.refresh_outputs();
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse any supported version, migrating older layouts
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;
        let value = match version {
            1 => migrate_v1(value),
            GROOM_VERSION => value,
            other => return Err(StackError::UnsupportedVersion(other)),
        };
        Ok(serde_json::from_value(value)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), operators = self.nodes.len(), "groom saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let description = Self::from_json(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), operators = description.nodes.len(), "groom loaded");
        Ok(description)
    }
}

/// Version 1 had no enable flags, no branches and a single implicit output
/// on the last operator
fn migrate_v1(mut value: Value) -> Value {
    let mut last = 0usize;
    if let Some(nodes) = value.get_mut("nodes").and_then(Value::as_array_mut) {
        last = nodes.len().saturating_sub(1);
        for node in nodes.iter_mut() {
            if let Some(record) = node.as_object_mut() {
                record.entry("enabled").or_insert(Value::Bool(true));
            }
        }
    }
    if let Some(root) = value.as_object_mut() {
        root.insert("version".into(), Value::from(GROOM_VERSION));
        root.entry("name").or_insert(Value::from("groom"));
        root.entry("outputs").or_insert_with(|| {
            serde_json::json!([{
                "name": "shape",
                "source": last,
                "kind": "guides",
                "follows_chain": true,
            }])
        });
    }
    tracing::debug!("groom description migrated from version 1");
    value
}
