//! Evaluation inputs shared by every operator in a pass

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::core::config::EngineConfig;
use crate::mesh::{CurveSet, MeshProvider};
use crate::strands::StrandStore;

/// Host supplied auxiliary inputs, looked up by name
///
/// Every change bumps [`stamp`](Self::stamp), which invalidates the per-node
/// evaluation caches of the stacks reading from this set.
#[derive(Clone, Default)]
pub struct SourceSet {
    meshes: AHashMap<String, Arc<dyn MeshProvider>>,
    curves: AHashMap<String, Arc<CurveSet>>,
    strands: AHashMap<String, Arc<StrandStore>>,
    stamp: u64,
}

impl fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut meshes: Vec<&String> = self.meshes.keys().collect();
        meshes.sort();
        let mut curves: Vec<&String> = self.curves.keys().collect();
        curves.sort();
        let mut strands: Vec<&String> = self.strands.keys().collect();
        strands.sort();
        f.debug_struct("SourceSet")
            .field("meshes", &meshes)
            .field("curves", &curves)
            .field("strands", &strands)
            .field("stamp", &self.stamp)
            .finish()
    }
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn set_mesh(&mut self, name: impl Into<String>, mesh: Arc<dyn MeshProvider>) {
        self.meshes.insert(name.into(), mesh);
        self.stamp += 1;
    }

    pub fn remove_mesh(&mut self, name: &str) -> Option<Arc<dyn MeshProvider>> {
        self.stamp += 1;
        self.meshes.remove(name)
    }

    pub fn mesh(&self, name: &str) -> Option<&dyn MeshProvider> {
        self.meshes.get(name).map(|m| m.as_ref())
    }

    pub fn set_curves(&mut self, name: impl Into<String>, curves: CurveSet) {
        self.curves.insert(name.into(), Arc::new(curves));
        self.stamp += 1;
    }

    pub fn curves(&self, name: &str) -> Option<&CurveSet> {
        self.curves.get(name).map(|c| c.as_ref())
    }

    pub fn set_strands(&mut self, name: impl Into<String>, strands: StrandStore) {
        self.strands.insert(name.into(), Arc::new(strands));
        self.stamp += 1;
    }

    pub fn strands(&self, name: &str) -> Option<&StrandStore> {
        self.strands.get(name).map(|s| s.as_ref())
    }
}

/// Everything an operator may read besides its input store
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub sources: &'a SourceSet,
    pub config: &'a EngineConfig,
}

impl<'a> EvalContext<'a> {
    pub fn new(sources: &'a SourceSet, config: &'a EngineConfig) -> Self {
        Self { sources, config }
    }

    /// Named mesh; a missing mesh is logged once per lookup
    pub fn mesh(&self, name: &str) -> Option<&'a dyn MeshProvider> {
        let mesh = self.sources.mesh(name);
        if mesh.is_none() {
            tracing::debug!(mesh = name, "distribution source not found");
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;

    #[test]
    fn test_stamp_bumps_on_every_change() {
        let mut sources = SourceSet::new();
        assert_eq!(sources.stamp(), 0);
        sources.set_mesh("body", Arc::new(Mesh::plane(1.0, 1)));
        sources.set_curves("curves", CurveSet::new(vec![]));
        assert_eq!(sources.stamp(), 2);
        assert!(sources.mesh("body").is_some());
        assert!(sources.remove_mesh("body").is_some());
        assert!(sources.mesh("body").is_none());
        assert_eq!(sources.stamp(), 3);
    }
}
