//! The hair object: a stack graph with its sources, LOD settings and observers
//!
//! A `Groom` registers itself with the engine context on creation and leaves
//! it when dropped. All stack edits go through it so outputs are repaired,
//! shape kinds refreshed and observers notified in one place.

pub mod events;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use glam::{Affine3A, Vec3};

use crate::bake::{collapse, BakeTarget, Collapsed};
use crate::core::context::EngineContext;
use crate::core::error::{Result, StackError};
use crate::core::types::{GroomId, NodeId, OutputId, Space, StrandId};
use crate::lod::{LodSettings, LodState};
use crate::mesh::{CurveSet, MeshProvider, SurfaceDependency};
use crate::operators::{EvalContext, OperatorParams, SourceSet, StrandGroupsParams};
use crate::serialize::GroomDescription;
use crate::stack::StackGraph;
use crate::strands::{Channel, GroupSet, GroupTag, StrandSelector, StrandStore};

pub use events::{GroomObserver, TopologyChange};

/// Versions of a source mesh seen at the last update
#[derive(Debug, Clone, Copy, PartialEq)]
struct MeshStamp {
    topology: u64,
    content: u64,
    transform: Affine3A,
}

impl MeshStamp {
    fn of(mesh: &dyn MeshProvider) -> Self {
        Self {
            topology: mesh.topology_version(),
            content: mesh.content_version(),
            transform: mesh.transform(),
        }
    }
}

pub struct Groom {
    id: GroomId,
    name: String,
    engine: Arc<EngineContext>,
    graph: StackGraph,
    sources: SourceSet,
    lod: LodSettings,
    mesh_stamps: AHashMap<String, MeshStamp>,
    observers: Vec<Arc<dyn GroomObserver>>,
}

impl std::fmt::Debug for Groom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Groom")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("operators", &self.graph.len())
            .field("sources", &self.sources)
            .field("lod", &self.lod)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Drop for Groom {
    fn drop(&mut self) {
        self.engine.unregister_hair_object();
    }
}

impl Groom {
    pub fn new(engine: Arc<EngineContext>, name: impl Into<String>) -> Result<Self> {
        Self::with_graph(engine, name.into(), StackGraph::new(), None)
    }

    fn with_graph(
        engine: Arc<EngineContext>,
        name: String,
        graph: StackGraph,
        lod: Option<LodSettings>,
    ) -> Result<Self> {
        engine.register_hair_object()?;
        let lod = lod.unwrap_or_else(|| {
            LodSettings::new(
                engine.config().default_viewport_fraction,
                engine.config().lod_seed,
            )
        });
        Ok(Self {
            id: GroomId::new(),
            name,
            engine,
            graph,
            sources: SourceSet::new(),
            lod,
            mesh_stamps: AHashMap::new(),
            observers: Vec::new(),
        })
    }

    pub fn id(&self) -> GroomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    pub fn graph(&self) -> &StackGraph {
        &self.graph
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn lod(&self) -> &LodSettings {
        &self.lod
    }

    pub fn add_observer(&mut self, observer: Arc<dyn GroomObserver>) {
        self.observers.push(observer);
    }

    fn notify_topology(&self, change: TopologyChange) {
        tracing::debug!(groom = %self.name, ?change, "topology changed");
        for observer in &self.observers {
            observer.on_topology_changed(&change);
        }
    }

    fn notify_parameter(&self, node: NodeId, parameter: &str) {
        for observer in &self.observers {
            observer.on_parameter_changed(node, parameter);
        }
    }

    /// Count internal failures against the engine before handing them back
    fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_internal() {
                self.engine.record_assert(&err.to_string());
            }
        }
        result
    }

    // === SOURCES ===

    /// Set or replace a named source mesh, classifying the change
    pub fn set_mesh(&mut self, name: impl Into<String>, mesh: Arc<dyn MeshProvider>) {
        let name = name.into();
        let stamp = MeshStamp::of(mesh.as_ref());
        let change = match self.mesh_stamps.insert(name.clone(), stamp) {
            None => Some(TopologyChange::SourceReplaced {
                source: name.clone(),
            }),
            Some(old) if old.topology != stamp.topology => Some(TopologyChange::SourceTopology {
                source: name.clone(),
                version: stamp.topology,
            }),
            Some(old) if old.transform != stamp.transform => {
                Some(TopologyChange::SourceTransformed {
                    source: name.clone(),
                })
            }
            Some(old) if old.content != stamp.content => Some(TopologyChange::SourceDeformed {
                source: name.clone(),
            }),
            Some(_) => None,
        };
        self.sources.set_mesh(name, mesh);
        if let Some(change) = change {
            self.notify_topology(change);
        }
    }

    pub fn remove_mesh(&mut self, name: &str) {
        self.mesh_stamps.remove(name);
        if self.sources.remove_mesh(name).is_some() {
            self.notify_topology(TopologyChange::SourceReplaced {
                source: name.to_string(),
            });
        }
    }

    pub fn set_curves(&mut self, name: impl Into<String>, curves: CurveSet) {
        let name = name.into();
        self.sources.set_curves(name.clone(), curves);
        self.notify_topology(TopologyChange::SourceReplaced { source: name });
    }

    pub fn set_strands(&mut self, name: impl Into<String>, strands: StrandStore) {
        let name = name.into();
        self.sources.set_strands(name.clone(), strands);
        self.notify_topology(TopologyChange::SourceReplaced { source: name });
    }

    // === LOD ===

    pub fn set_rendering(&mut self, rendering: bool) {
        self.lod.set_rendering(rendering);
    }

    pub fn set_viewport_fraction(&mut self, fraction: f32) {
        self.lod.set_viewport_fraction(fraction);
    }

    pub fn isolate(&mut self, ids: BTreeSet<StrandId>, visibility_rate: f32, culled_rate: f32) {
        self.lod.isolate(ids, visibility_rate, culled_rate);
    }

    pub fn clear_isolation(&mut self) {
        self.lod.clear_isolation();
    }

    pub fn lod_state(&self) -> LodState {
        self.lod.state()
    }

    // === EVALUATION ===

    fn primary_output(&self) -> Option<OutputId> {
        self.graph.outputs().next().map(|(id, _)| id)
    }

    /// Full (render) output of `output`, before LOD
    pub fn evaluate_full(&self, output: OutputId) -> Result<Arc<StrandStore>> {
        let ctx = EvalContext::new(&self.sources, self.engine.config());
        self.checked(self.graph.evaluate_output(output, &ctx))
    }

    /// Displayed strands of `output` under the current LOD state
    pub fn evaluate_output(&self, output: OutputId) -> Result<Arc<StrandStore>> {
        let full = self.evaluate_full(output)?;
        Ok(self.lod.resolver().apply(&full, &self.lod.state()))
    }

    /// Displayed strands of the primary output; empty for an empty stack
    pub fn evaluate(&self) -> Result<Arc<StrandStore>> {
        match self.primary_output() {
            Some(output) => self.evaluate_output(output),
            None => Ok(Arc::new(StrandStore::default())),
        }
    }

    // === ACCESSORS ===

    pub fn strand_count(&self) -> Result<usize> {
        Ok(self.evaluate()?.strand_count())
    }

    pub fn vertex_count(&self) -> Result<usize> {
        Ok(self.evaluate()?.vertex_count())
    }

    pub fn strand_ids(&self) -> Result<Vec<StrandId>> {
        Ok(self.evaluate()?.strand_ids().to_vec())
    }

    pub fn strand_point(&self, strand: usize, point: usize, space: Space) -> Result<Option<Vec3>> {
        Ok(self.evaluate()?.strand_point(strand, point, space))
    }

    pub fn vertex_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.evaluate()?.vertex_channels().cloned().collect())
    }

    pub fn root_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.evaluate()?.root_channels().cloned().collect())
    }

    pub fn surface_dependency(&self, strand: usize) -> Result<Option<SurfaceDependency>> {
        Ok(self.evaluate()?.surface_dependency(strand).copied())
    }

    pub fn strand_groups(&self, strand: usize) -> Result<GroupSet> {
        let store = self.evaluate()?;
        if strand >= store.strand_count() {
            return Err(StackError::InvalidRange(format!(
                "strand {} of {}",
                strand,
                store.strand_count()
            )));
        }
        Ok(store.strand_groups(strand).clone())
    }

    /// Ids of displayed strands matching `selector`
    pub fn select_strands(&self, selector: &StrandSelector) -> Result<Vec<StrandId>> {
        let store = self.evaluate()?;
        Ok(selector.select(&store))
    }

    // === STACK EDITS ===

    /// Repair references, refresh shape kinds and tell observers
    fn after_edit(&mut self, command: &'static str) {
        self.graph.repair();
        self.notify_topology(TopologyChange::StackEdited { command });
        self.refresh_shapes();
    }

    /// Recompute output kinds and announce every output that switched shape
    fn refresh_shapes(&mut self) {
        for (output, kind) in self.graph.refresh_outputs() {
            tracing::info!(groom = %self.name, %output, kind = kind.label(), "output switched shape");
            self.notify_topology(TopologyChange::ShapeSwitched { output, kind });
        }
    }

    /// Add an operator after `after`, or at the end of the primary output
    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        params: OperatorParams,
        after: Option<NodeId>,
    ) -> Result<NodeId> {
        let config = self.engine.config().clone();
        let after = after.or_else(|| {
            self.primary_output()
                .and_then(|o| self.graph.output(o).ok())
                .map(|o| o.source)
        });
        let id = match after {
            Some(after) => self.graph.insert(name, params, after, &config)?,
            None => self.graph.add_root(name, params, &config)?,
        };
        self.after_edit("add_operator");
        Ok(id)
    }

    pub fn delete_operator(&mut self, node: NodeId) -> Result<()> {
        self.graph.delete(node)?;
        self.after_edit("delete_operator");
        Ok(())
    }

    /// Returns the previous flag
    pub fn enable_operator(&mut self, node: NodeId, enabled: bool) -> Result<bool> {
        let previous = self.graph.set_enabled(node, enabled)?;
        if previous != enabled {
            self.notify_parameter(node, "enabled");
            self.refresh_shapes();
        }
        Ok(previous)
    }

    /// Returns the previous parameters
    pub fn set_params(&mut self, node: NodeId, params: OperatorParams) -> Result<OperatorParams> {
        let config = self.engine.config().clone();
        let previous = self.graph.set_params(node, params, &config)?;
        self.notify_parameter(node, "params");
        self.refresh_shapes();
        Ok(previous)
    }

    pub fn reorder_stack(&mut self, from: NodeId, order: &[NodeId]) -> Result<()> {
        self.graph.reorder(from, order)?;
        self.after_edit("reorder_stack");
        Ok(())
    }

    pub fn collapse_stack(&mut self, from: NodeId, to: NodeId, target: &BakeTarget) -> Result<Collapsed> {
        let ctx = EvalContext::new(&self.sources, self.engine.config());
        let collapsed = collapse(&mut self.graph, from, to, target, &ctx);
        let collapsed = self.checked(collapsed)?;
        self.after_edit("collapse_stack");
        Ok(collapsed)
    }

    /// Tag `ids` with `group` on the primary output
    ///
    /// Extends a trailing strand-groups operator when there is one, otherwise
    /// appends a new one.
    pub fn assign_strand_group(&mut self, ids: BTreeSet<StrandId>, group: GroupTag) -> Result<NodeId> {
        let output = self
            .primary_output()
            .ok_or_else(|| StackError::InvalidInsertion("groom has no stack".into()))?;
        let source = self.graph.output(output)?.source;
        if let OperatorParams::StrandGroups(existing) = &self.graph.node(source)?.params {
            let mut params = existing.clone();
            params.assign(ids, group);
            self.set_params(source, OperatorParams::StrandGroups(params))?;
            return Ok(source);
        }
        let mut params = StrandGroupsParams::default();
        params.assign(ids, group);
        self.add_operator("strand groups", OperatorParams::StrandGroups(params), Some(source))
    }

    /// Re-read a cache node's baked file on the next evaluation
    pub fn reload_cache(&mut self, node: NodeId) -> Result<()> {
        self.graph.node(node)?.state.baked.reload();
        self.graph.touch(node)?;
        self.notify_topology(TopologyChange::CacheReloaded { node });
        Ok(())
    }

    /// Add a second output reading `node`
    pub fn branch(&mut self, node: NodeId, name: impl Into<String>) -> Result<OutputId> {
        let output = self.graph.branch(node, name)?;
        self.after_edit("branch");
        Ok(output)
    }

    pub fn append_to_output(
        &mut self,
        output: OutputId,
        name: impl Into<String>,
        params: OperatorParams,
    ) -> Result<NodeId> {
        let config = self.engine.config().clone();
        let id = self.graph.append_to_output(output, name, params, &config)?;
        self.after_edit("append_to_output");
        Ok(id)
    }

    pub(crate) fn replace_graph(&mut self, graph: StackGraph) {
        self.graph = graph;
        self.after_edit("restore");
    }

    // === PERSISTENCE ===

    pub fn describe(&self) -> Result<GroomDescription> {
        GroomDescription::capture(&self.name, &self.graph, &self.lod)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.describe()?.save(path)
    }

    /// Rebuild a groom from a description; sources must be set again
    pub fn from_description(engine: Arc<EngineContext>, description: &GroomDescription) -> Result<Self> {
        let graph = description.build(engine.config())?;
        Self::with_graph(
            engine,
            description.name.clone(),
            graph,
            Some(description.lod.clone()),
        )
    }

    pub fn load(engine: Arc<EngineContext>, path: &Path) -> Result<Self> {
        let description = GroomDescription::load(path)?;
        Self::from_description(engine, &description)
    }
}
