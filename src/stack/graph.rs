//! Stack graph storage and mutation
//!
//! Nodes live in generational slots; deleted slots are recycled and their
//! handles go stale. Each node names its single upstream producer, so every
//! consumer always resolves to exactly one producer. Mutations either succeed
//! completely or leave the graph as it was.

use ahash::AHashMap;

use super::node::{OutputBinding, StackNode};
use crate::core::config::EngineConfig;
use crate::core::error::{Result, StackError};
use crate::core::types::{NodeId, OutputId, StrandKind};
use crate::operators::OperatorParams;

/// Rewiring record saved before a structural edit
#[derive(Debug, Clone)]
struct Wiring {
    inputs: Vec<(NodeId, Option<NodeId>, bool)>,
    outputs: Vec<Option<OutputBinding>>,
    root: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    slots: Vec<Option<StackNode>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    outputs: Vec<Option<OutputBinding>>,
    root: Option<NodeId>,
    /// Deleted node -> its producer at deletion time
    tombstones: AHashMap<NodeId, Option<NodeId>>,
    next_version: u64,
}

impl StackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // === LOOKUP ===

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    fn get(&self, id: NodeId) -> Option<&StackNode> {
        if self.generations.get(id.index as usize) != Some(&id.generation) {
            return None;
        }
        self.slots.get(id.index as usize)?.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut StackNode> {
        if self.generations.get(id.index as usize) != Some(&id.generation) {
            return None;
        }
        self.slots.get_mut(id.index as usize)?.as_mut()
    }

    pub fn node(&self, id: NodeId) -> Result<&StackNode> {
        self.get(id).ok_or(StackError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut StackNode> {
        self.get_mut(id).ok_or(StackError::NodeNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Live node ids, parents before children
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            let mut consumers = self.consumers(id);
            consumers.reverse();
            stack.extend(consumers);
        }
        order
    }

    /// Nodes reading `id`'s output, by slot index
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.live_ids()
            .into_iter()
            .filter(|n| self.get(*n).and_then(|node| node.input) == Some(id))
            .collect()
    }

    fn live_ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| NodeId::new(i as u32, self.generations[i]))
            .collect()
    }

    /// Nodes from the root down to `to`, inclusive
    pub fn chain(&self, to: NodeId) -> Result<Vec<NodeId>> {
        let mut chain = vec![to];
        let mut current = self.node(to)?.input;
        while let Some(id) = current {
            if chain.len() > self.slots.len() {
                return Err(StackError::Consistency("cycle in stack graph".into()));
            }
            chain.push(id);
            current = self.node(id)?.input;
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn output(&self, id: OutputId) -> Result<&OutputBinding> {
        self.outputs
            .get(id.0 as usize)
            .and_then(|o| o.as_ref())
            .ok_or(StackError::OutputNotFound(id))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (OutputId, &OutputBinding)> {
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|o| (OutputId(i as u32), o)))
    }

    /// Kind of the store `id` produces, given what is currently enabled
    pub fn output_kind(&self, id: NodeId) -> Result<StrandKind> {
        let mut kind = None;
        for n in self.chain(id)? {
            let node = self.node(n)?;
            // Disabled non-generators pass their input kind through.
            kind = Some(match kind {
                Some(input) if !node.enabled && !node.params.is_generator() => input,
                _ => node.params.output_kind(kind),
            });
        }
        Ok(kind.unwrap_or_default())
    }

    fn input_kind(&self, input: Option<NodeId>) -> Result<Option<StrandKind>> {
        input.map(|id| self.output_kind(id)).transpose()
    }

    // === ALLOCATION ===

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn allocate(&mut self, node: StackNode) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            let i = index as usize;
            self.generations[i] += 1;
            self.slots[i] = Some(node);
            NodeId::new(index, self.generations[i])
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(node));
            self.generations.push(0);
            NodeId::new(index, 0)
        }
    }

    fn release(&mut self, id: NodeId) -> Option<StackNode> {
        let node = self.slots.get_mut(id.index as usize)?.take()?;
        self.free_list.push(id.index);
        self.tombstones.insert(id, node.input);
        Some(node)
    }

    fn reject(&self, reason: String) -> StackError {
        tracing::warn!(%reason, "stack edit rejected");
        StackError::InvalidInsertion(reason)
    }

    // === MUTATION ===

    /// Start the stack with `params` and bind the primary output to it
    pub fn add_root(
        &mut self,
        name: impl Into<String>,
        params: OperatorParams,
        config: &EngineConfig,
    ) -> Result<NodeId> {
        if self.root.is_some() {
            return Err(self.reject("stack already has a root".into()));
        }
        if !params.accepts_input(None) {
            return Err(self.reject(format!(
                "{} needs an input and cannot start a stack",
                params.type_name()
            )));
        }
        let version = self.bump_version();
        let params = params.sanitized(config);
        let kind = params.output_kind(None);
        let id = self.allocate(StackNode::new(name.into(), params, None, version));
        self.root = Some(id);
        self.outputs.push(Some(OutputBinding {
            name: "shape".into(),
            source: id,
            kind,
            follows_chain: true,
        }));
        Ok(id)
    }

    /// Insert `params` right after `after`, taking over its main consumers
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        params: OperatorParams,
        after: NodeId,
        config: &EngineConfig,
    ) -> Result<NodeId> {
        if !self.contains(after) {
            return Err(self.reject(format!("{} is not a node of this stack", after)));
        }
        let input_kind = self.output_kind(after)?;
        if !params.accepts_input(Some(input_kind)) {
            return Err(self.reject(format!(
                "{} cannot take {} input",
                params.type_name(),
                input_kind.label()
            )));
        }

        let before = self.wiring();
        let version = self.bump_version();
        let id = self.allocate(StackNode::new(
            name.into(),
            params.sanitized(config),
            Some(after),
            version,
        ));
        for consumer in self.consumers(after) {
            if consumer == id {
                continue;
            }
            let bumped = self.bump_version();
            let node = self.node_mut(consumer)?;
            if !node.branch {
                node.input = Some(id);
                node.version = bumped;
            }
        }
        for output in self.outputs.iter_mut().flatten() {
            if output.source == after && output.follows_chain {
                output.source = id;
            }
        }

        if let Err(err) = self.check_types() {
            self.release(id);
            self.tombstones.remove(&id);
            self.restore_wiring(before);
            return Err(self.reject(err.to_string()));
        }
        Ok(id)
    }

    /// Remove `id`, connecting its consumers to its producer
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if Some(id) == self.root {
            tracing::warn!(node = %id, "refusing to delete the stack root");
            return Err(StackError::RootDeletion(id));
        }
        let producer = node.input;
        let was_branch = node.branch;

        for consumer in self.consumers(id) {
            let bumped = self.bump_version();
            let node = self.node_mut(consumer)?;
            node.input = producer;
            node.branch |= was_branch;
            node.version = bumped;
        }
        for output in self.outputs.iter_mut().flatten() {
            if output.source == id {
                if let Some(p) = producer {
                    output.source = p;
                }
            }
        }
        self.release(id);
        Ok(())
    }

    /// Re-order the linear run of nodes starting at `from`
    ///
    /// `order` must be a permutation of the `order.len()` nodes found by
    /// walking down the main chain from `from`. The new order is type checked
    /// and rolled back on failure.
    pub fn reorder(&mut self, from: NodeId, order: &[NodeId]) -> Result<()> {
        let segment = self.linear_run(from, order.len())?;
        let mut sorted_segment = segment.clone();
        sorted_segment.sort();
        let mut sorted_order = order.to_vec();
        sorted_order.sort();
        if sorted_segment != sorted_order {
            return Err(StackError::InvalidRange(
                "reorder list is not a permutation of the stack run".into(),
            ));
        }
        if segment == order {
            return Ok(());
        }

        let before = self.wiring();
        let head_input = self.node(segment[0])?.input;
        let head_branch = self.node(segment[0])?.branch;
        let tail = segment[segment.len() - 1];
        let tail_consumers = self.consumers(tail);

        let mut previous = head_input;
        for (k, &id) in order.iter().enumerate() {
            let bumped = self.bump_version();
            let node = self.node_mut(id)?;
            node.input = previous;
            node.branch = k == 0 && head_branch;
            node.version = bumped;
            previous = Some(id);
        }
        let new_tail = order[order.len() - 1];
        for consumer in tail_consumers {
            self.node_mut(consumer)?.input = Some(new_tail);
        }
        for output in self.outputs.iter_mut().flatten() {
            if output.source == tail {
                output.source = new_tail;
            }
        }
        if self.root == Some(segment[0]) {
            self.root = Some(order[0]);
        }

        if let Err(err) = self.check_types() {
            self.restore_wiring(before);
            return Err(self.reject(format!("reorder produces an invalid stack: {}", err)));
        }
        Ok(())
    }

    /// `len` nodes from `from` down the main chain, each with a single
    /// consumer and no output bound inside the run
    fn linear_run(&self, from: NodeId, len: usize) -> Result<Vec<NodeId>> {
        if len == 0 {
            return Err(StackError::InvalidRange("empty reorder list".into()));
        }
        let mut run = vec![from];
        self.node(from)?;
        while run.len() < len {
            let last = run[run.len() - 1];
            let consumers = self.consumers(last);
            let bound = self.outputs().any(|(_, o)| o.source == last);
            match consumers.as_slice() {
                [next] if !bound => run.push(*next),
                _ => {
                    return Err(StackError::InvalidRange(format!(
                        "{} does not continue a linear run",
                        last
                    )))
                }
            }
        }
        Ok(run)
    }

    /// Add a second output reading `node`, leaving existing consumers alone
    pub fn branch(&mut self, node: NodeId, name: impl Into<String>) -> Result<OutputId> {
        let kind = self.output_kind(node)?;
        let id = OutputId(self.outputs.len() as u32);
        self.outputs.push(Some(OutputBinding {
            name: name.into(),
            source: node,
            kind,
            follows_chain: false,
        }));
        Ok(id)
    }

    /// Append an operator at the end of an output's stack
    ///
    /// On a branch output the new node becomes a branch node, so the main
    /// chain keeps reading the shared producer.
    pub fn append_to_output(
        &mut self,
        output: OutputId,
        name: impl Into<String>,
        params: OperatorParams,
        config: &EngineConfig,
    ) -> Result<NodeId> {
        let binding = self.output(output)?.clone();
        if binding.follows_chain {
            return self.insert(name, params, binding.source, config);
        }
        let input_kind = self.output_kind(binding.source)?;
        if !params.accepts_input(Some(input_kind)) {
            return Err(self.reject(format!(
                "{} cannot take {} input",
                params.type_name(),
                input_kind.label()
            )));
        }
        let version = self.bump_version();
        let mut node = StackNode::new(name.into(), params.sanitized(config), Some(binding.source), version);
        // A branch output sitting on the main chain starts a new branch.
        node.branch = !self.is_branch_member(binding.source)
            || self.consumers(binding.source).iter().any(|c| {
                self.get(*c).is_some_and(|n| !n.branch)
            });
        let id = self.allocate(node);
        if let Some(Some(b)) = self.outputs.get_mut(output.0 as usize) {
            b.source = id;
            b.follows_chain = true;
        }
        Ok(id)
    }

    /// Whether `id` lies on a branch rather than the main chain
    fn is_branch_member(&self, id: NodeId) -> bool {
        self.chain(id)
            .map(|c| c.iter().any(|n| self.get(*n).is_some_and(|node| node.branch)))
            .unwrap_or(false)
    }

    pub fn remove_output(&mut self, output: OutputId) -> Result<OutputBinding> {
        self.outputs
            .get_mut(output.0 as usize)
            .and_then(|o| o.take())
            .ok_or(StackError::OutputNotFound(output))
    }

    /// Enable or disable a node; returns the previous flag
    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<bool> {
        let version = self.bump_version();
        let node = self.node_mut(id)?;
        let previous = node.enabled;
        if previous != enabled {
            node.enabled = enabled;
            node.version = version;
        }
        Ok(previous)
    }

    /// Replace a node's parameters; returns the previous ones
    pub fn set_params(
        &mut self,
        id: NodeId,
        params: OperatorParams,
        config: &EngineConfig,
    ) -> Result<OperatorParams> {
        let input = self.node(id)?.input;
        let input_kind = self.input_kind(input)?;
        if !params.accepts_input(input_kind) {
            return Err(self.reject(format!(
                "{} cannot replace a node fed by {}",
                params.type_name(),
                input_kind.map_or("nothing", |k| k.label())
            )));
        }
        let version = self.bump_version();
        let node = self.node_mut(id)?;
        let previous = std::mem::replace(&mut node.params, params.sanitized(config));
        node.version = version;
        Ok(previous)
    }

    /// Force `id` and everything downstream to recompute on the next pull
    pub fn touch(&mut self, id: NodeId) -> Result<()> {
        let version = self.bump_version();
        self.node_mut(id)?.version = version;
        Ok(())
    }

    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    /// The chain run `from..=to`, root first, if it can be replaced by one node
    ///
    /// Interior nodes may not feed anything outside the run.
    pub fn replaceable_range(&self, from: NodeId, to: NodeId) -> Result<Vec<NodeId>> {
        let chain = self.chain(to)?;
        let start = chain
            .iter()
            .position(|&n| n == from)
            .ok_or_else(|| StackError::InvalidRange(format!("{} is not upstream of {}", from, to)))?;
        let range = chain[start..].to_vec();
        for &interior in &range[..range.len() - 1] {
            let outside = self
                .consumers(interior)
                .into_iter()
                .any(|c| !range.contains(&c));
            let bound = self.outputs().any(|(_, o)| o.source == interior);
            if outside || bound {
                return Err(StackError::InvalidRange(format!(
                    "{} feeds nodes outside the collapsed range",
                    interior
                )));
            }
        }
        Ok(range)
    }

    /// Replace the chain run `from..=to` with a single node
    ///
    /// The run must pass [`Self::replaceable_range`]. The new node keeps
    /// `from`'s input edge and takes over `to`'s consumers and outputs.
    pub fn replace_range(
        &mut self,
        from: NodeId,
        to: NodeId,
        name: impl Into<String>,
        params: OperatorParams,
    ) -> Result<NodeId> {
        let range = self.replaceable_range(from, to)?;

        let head = self.node(from)?;
        let input = head.input;
        let branch = head.branch;
        let consumers = self.consumers(to);
        let version = self.bump_version();
        let mut node = StackNode::new(name.into(), params, input, version);
        node.branch = branch;
        let id = self.allocate(node);

        for consumer in consumers {
            let bumped = self.bump_version();
            let node = self.node_mut(consumer)?;
            node.input = Some(id);
            node.version = bumped;
        }
        for output in self.outputs.iter_mut().flatten() {
            if output.source == to {
                output.source = id;
            }
        }
        if self.root == Some(from) {
            self.root = Some(id);
        }
        for &old in &range {
            self.release(old);
            self.tombstones.insert(old, Some(id));
        }
        Ok(id)
    }

    // === CONSISTENCY ===

    /// Nearest live node for a possibly stale handle
    pub fn resolve(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(n) = current {
            if self.contains(n) {
                return Some(n);
            }
            steps += 1;
            if steps > self.tombstones.len() {
                return None;
            }
            current = *self.tombstones.get(&n)?;
        }
        None
    }

    /// Re-attach dangling inputs and outputs to the nearest live upstream node
    pub fn repair(&mut self) -> usize {
        let mut repaired = 0;
        for id in self.live_ids() {
            let Some(input) = self.get(id).and_then(|n| n.input) else {
                continue;
            };
            if self.contains(input) {
                continue;
            }
            let target = self.resolve(input);
            if let Some(node) = self.get_mut(id) {
                node.input = target;
                repaired += 1;
            }
        }
        let sources: Vec<(usize, NodeId)> = self
            .outputs
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|o| (i, o.source)))
            .filter(|(_, s)| !self.contains(*s))
            .collect();
        for (i, source) in sources {
            let target = self.resolve(source).or(self.root);
            if let (Some(t), Some(Some(binding))) = (target, self.outputs.get_mut(i)) {
                binding.source = t;
                repaired += 1;
            }
        }
        if repaired > 0 {
            tracing::debug!(repaired, "stack references repaired");
        }
        repaired
    }

    /// Update every output's displayed kind; returns the outputs that switched
    pub fn refresh_outputs(&mut self) -> Vec<(OutputId, StrandKind)> {
        let mut switched = Vec::new();
        let kinds: Vec<Option<StrandKind>> = self
            .outputs
            .iter()
            .map(|o| o.as_ref().and_then(|o| self.output_kind(o.source).ok()))
            .collect();
        for (i, (binding, kind)) in self.outputs.iter_mut().zip(kinds).enumerate() {
            if let (Some(binding), Some(kind)) = (binding.as_mut(), kind) {
                if binding.kind != kind {
                    binding.kind = kind;
                    switched.push((OutputId(i as u32), kind));
                }
            }
        }
        switched
    }

    /// Every operator accepts the kind its producer emits
    fn check_types(&self) -> Result<()> {
        for id in self.live_ids() {
            let node = self.node(id)?;
            let input_kind = self.input_kind(node.input)?;
            if !node.params.accepts_input(input_kind) {
                return Err(StackError::InvalidInsertion(format!(
                    "{} ({}) cannot take {} input",
                    node.name,
                    node.params.type_name(),
                    input_kind.map_or("no", |k| k.label())
                )));
            }
        }
        Ok(())
    }

    /// Structural invariants: one root, live references, no cycles
    pub fn validate(&self) -> Result<()> {
        let live = self.live_ids();
        let roots: Vec<NodeId> = live
            .iter()
            .copied()
            .filter(|n| self.get(*n).is_some_and(|node| node.input.is_none()))
            .collect();
        match (self.root, roots.as_slice()) {
            (None, []) => {}
            (Some(root), [only]) if root == *only => {}
            _ => {
                return Err(StackError::Consistency(format!(
                    "expected a single root, found {:?}",
                    roots
                )))
            }
        }
        for &id in &live {
            if let Some(input) = self.node(id)?.input {
                if !self.contains(input) {
                    return Err(StackError::Consistency(format!(
                        "{} reads deleted node {}",
                        id, input
                    )));
                }
            }
            self.chain(id)?;
        }
        for (output, binding) in self.outputs() {
            if !self.contains(binding.source) {
                return Err(StackError::Consistency(format!(
                    "{} bound to deleted node {}",
                    output, binding.source
                )));
            }
        }
        Ok(())
    }

    fn wiring(&self) -> Wiring {
        Wiring {
            inputs: self
                .live_ids()
                .into_iter()
                .filter_map(|id| self.get(id).map(|n| (id, n.input, n.branch)))
                .collect(),
            outputs: self.outputs.clone(),
            root: self.root,
        }
    }

    fn restore_wiring(&mut self, wiring: Wiring) {
        for (id, input, branch) in wiring.inputs {
            if let Some(node) = self.get_mut(id) {
                node.input = input;
                node.branch = branch;
            }
        }
        self.outputs = wiring.outputs;
        self.root = wiring.root;
    }

    // === RAW CONSTRUCTION (deserialization) ===

    pub(crate) fn push_raw(&mut self, mut node: StackNode) -> NodeId {
        node.version = self.bump_version();
        let is_root = node.input.is_none();
        let id = self.allocate(node);
        if is_root && self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    pub(crate) fn push_output_raw(&mut self, binding: OutputBinding) -> OutputId {
        self.outputs.push(Some(binding));
        OutputId(self.outputs.len() as u32 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{
        FrizzParams, GuidesFromMeshParams, HairFromGuidesParams, LengthParams,
    };

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn guides() -> OperatorParams {
        OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default())
    }

    fn hair() -> OperatorParams {
        OperatorParams::HairFromGuides(HairFromGuidesParams::default())
    }

    fn length() -> OperatorParams {
        OperatorParams::Length(LengthParams::default())
    }

    fn frizz() -> OperatorParams {
        OperatorParams::Frizz(FrizzParams::default())
    }

    #[test]
    fn test_insert_rewires_consumer_and_output() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let h = g.insert("hair", hair(), root, &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        assert_eq!(g.node(h).unwrap().input, Some(l));
        assert_eq!(g.node(l).unwrap().input, Some(root));
        assert_eq!(g.output(OutputId(0)).unwrap().source, h);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_incompatible_insertion_leaves_graph_unchanged() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let h = g.insert("hair", hair(), root, &config()).unwrap();
        let err = g.insert("hair2", hair(), h, &config()).unwrap_err();
        assert!(matches!(err, StackError::InvalidInsertion(_)));
        assert_eq!(g.len(), 2);
        assert_eq!(g.output(OutputId(0)).unwrap().source, h);
        // Generators cannot be placed mid-stack either.
        assert!(g.insert("g2", guides(), h, &config()).is_err());
    }

    #[test]
    fn test_insert_that_breaks_downstream_is_rolled_back() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let h = g.insert("hair", hair(), root, &config()).unwrap();
        // A second hair node after the root would feed hair into `h`.
        assert!(g.insert("hair2", hair(), root, &config()).is_err());
        assert_eq!(g.node(h).unwrap().input, Some(root));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_delete_bypasses() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        let f = g.insert("frizz", frizz(), l, &config()).unwrap();
        g.delete(l).unwrap();
        assert_eq!(g.node(f).unwrap().input, Some(root));
        assert!(g.node(l).is_err());
        assert_eq!(g.resolve(l), Some(root));

        g.delete(f).unwrap();
        assert_eq!(g.output(OutputId(0)).unwrap().source, root);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_root_deletion_rejected() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        assert!(matches!(g.delete(root), Err(StackError::RootDeletion(_))));
        assert!(g.contains(root));
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        g.delete(l).unwrap();
        let f = g.insert("frizz", frizz(), root, &config()).unwrap();
        assert_eq!(f.index, l.index);
        assert_ne!(f, l);
        assert!(g.node(l).is_err());
    }

    #[test]
    fn test_reorder_and_rollback() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        let f = g.insert("frizz", frizz(), l, &config()).unwrap();
        g.reorder(l, &[f, l]).unwrap();
        assert_eq!(g.chain(l).unwrap(), vec![root, f, l]);
        assert_eq!(g.output(OutputId(0)).unwrap().source, l);

        let h = g.insert("hair", hair(), l, &config()).unwrap();
        // Hair before frizz/length is fine; hair before the generator is not.
        let err = g.reorder(root, &[f, root, l, h]).unwrap_err();
        assert!(matches!(err, StackError::InvalidInsertion(_)));
        assert_eq!(g.chain(h).unwrap(), vec![root, f, l, h]);
        assert_eq!(g.root(), Some(root));
    }

    #[test]
    fn test_reorder_requires_permutation() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        assert!(matches!(
            g.reorder(l, &[root]),
            Err(StackError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_branch_keeps_main_chain() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let out = g.branch(root, "preview").unwrap();
        let b = g.append_to_output(out, "frizz", frizz(), &config()).unwrap();
        assert!(g.node(b).unwrap().branch);

        // Main chain insertion does not steal the branch.
        let l = g.insert("length", length(), root, &config()).unwrap();
        assert_eq!(g.node(b).unwrap().input, Some(root));
        assert_eq!(g.output(OutputId(0)).unwrap().source, l);
        assert_eq!(g.output(out).unwrap().source, b);
        assert_eq!(g.consumers(root).len(), 2);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_shape_switching_on_disable() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let h = g.insert("hair", hair(), root, &config()).unwrap();
        assert_eq!(g.refresh_outputs(), vec![(OutputId(0), StrandKind::Hair)]);
        g.set_enabled(h, false).unwrap();
        assert_eq!(g.refresh_outputs(), vec![(OutputId(0), StrandKind::Guides)]);
        assert!(g.refresh_outputs().is_empty());
    }

    #[test]
    fn test_replace_range() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        let f = g.insert("frizz", frizz(), l, &config()).unwrap();
        let c = g.replace_range(root, l, "baked", frizz()).unwrap();
        assert_eq!(g.root(), Some(c));
        assert_eq!(g.node(f).unwrap().input, Some(c));
        assert_eq!(g.len(), 2);
        assert_eq!(g.resolve(l), Some(c));
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_repair_reattaches_dangling_input() {
        let mut g = StackGraph::new();
        let root = g.add_root("guides", guides(), &config()).unwrap();
        let l = g.insert("length", length(), root, &config()).unwrap();
        let f = g.insert("frizz", frizz(), l, &config()).unwrap();
        // Simulate a stale reference left behind by a raw edit.
        g.release(l);
        assert!(g.validate().is_err());
        assert_eq!(g.repair(), 1);
        assert_eq!(g.node(f).unwrap().input, Some(root));
        assert!(g.validate().is_ok());
    }
}
