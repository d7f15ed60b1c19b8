//! Root generation: deterministic initial strand roots on a distribution surface
//!
//! Given a source, a method, a count and a seed the generated set of
//! `(StrandId, SurfaceDependency)` pairs is reproducible bit for bit. With
//! "remember root positions" the set survives non-structural parameter edits
//! and save/reload through [`RootCacheSlot`].

pub mod cache;
pub mod distribution;

use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::config::EngineConfig;
use crate::core::types::{mix_pair, StrandId};
use crate::mesh::{topology_fingerprint, MeshProvider, SurfaceDependency};
use crate::strands::StrandStore;

pub use cache::{RootCache, RootCacheSlot, RootKey};
pub use distribution::{spacing_deviation, DistributionMethod};

/// One generated root
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRoot {
    pub id: StrandId,
    pub surface: SurfaceDependency,
}

impl GeneratedRoot {
    /// Root position in mesh local space
    pub fn local_position(&self, mesh: &dyn MeshProvider) -> Option<Vec3> {
        self.surface.local_position(mesh)
    }
}

/// Where roots come from
#[derive(Clone, Copy, Default)]
pub struct RootSource<'a> {
    pub mesh: Option<&'a dyn MeshProvider>,
    /// Guide strands, read by the guide based methods
    pub guides: Option<&'a StrandStore>,
}

/// Root generation parameters shared by the generator operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootSettings {
    pub method: DistributionMethod,
    pub count: usize,
    pub seed: u64,
    /// Restrict roots to these faces (`inputFaceIndices`)
    pub face_indices: Option<Vec<u32>>,
    pub remember_root_positions: bool,
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            method: DistributionMethod::RandomArea,
            count: 100,
            seed: 1,
            face_indices: None,
            remember_root_positions: true,
        }
    }
}

impl RootSettings {
    /// Clamp the count into the engine limits
    pub fn sanitized(mut self, config: &EngineConfig) -> Self {
        self.count = self.count.min(config.max_strand_count);
        self
    }

    /// Cache key for these settings against `source`
    pub fn key(&self, source: &RootSource<'_>) -> RootKey {
        let faces = source
            .mesh
            .map(|m| distribution::selected_faces(m, self.face_indices.as_deref()))
            .unwrap_or_default();
        let resolved_count = distribution::resolved_count(self.method, self.count, source, &faces);
        RootKey {
            method: self.method,
            resolved_count,
            seed: self.seed,
            source_fingerprint: source_fingerprint(self.method, source),
            faces,
        }
    }
}

/// Generate roots without consulting any cache
pub fn generate_roots(
    settings: &RootSettings,
    source: &RootSource<'_>,
    config: &EngineConfig,
) -> Vec<GeneratedRoot> {
    let key = settings.key(source);
    distribution::distribute(
        settings.method,
        key.resolved_count,
        settings.seed,
        source,
        &key.faces,
        config.even_candidates,
    )
}

/// Roots for `settings`, served from `slot` when its cache still applies
pub fn resolve_roots(
    settings: &RootSettings,
    source: &RootSource<'_>,
    config: &EngineConfig,
    slot: &RootCacheSlot,
) -> Arc<Vec<GeneratedRoot>> {
    let key = settings.key(source);
    if key.resolved_count == 0 {
        return Arc::new(Vec::new());
    }
    let version = source.mesh.map_or(0, |m| m.topology_version());
    slot.get_or_build(&key, settings.remember_root_positions, version, || {
        distribution::distribute(
            settings.method,
            key.resolved_count,
            settings.seed,
            source,
            &key.faces,
            config.even_candidates,
        )
    })
}

fn source_fingerprint(method: DistributionMethod, source: &RootSource<'_>) -> u64 {
    let mut hash = source.mesh.map_or(0, topology_fingerprint);
    if method.needs_guides() {
        if let Some(guides) = source.guides {
            for i in 0..guides.strand_count() {
                hash = mix_pair(hash, guides.strand_ids()[i].0);
                if let Some(dep) = guides.surface_dependency(i) {
                    hash = mix_pair(hash, dep.face as u64);
                }
            }
        }
    }
    hash
}
