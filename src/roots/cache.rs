//! Root position cache ("remember root positions")

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::distribution::DistributionMethod;
use super::GeneratedRoot;

/// Everything a root set was generated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootKey {
    pub method: DistributionMethod,
    pub resolved_count: usize,
    pub seed: u64,
    /// Fingerprint of the source connectivity (mesh, plus guides where read)
    pub source_fingerprint: u64,
    pub faces: Vec<u32>,
}

impl RootKey {
    /// Same method, count, connectivity and face selection
    pub fn same_structure(&self, other: &RootKey) -> bool {
        self.method == other.method
            && self.resolved_count == other.resolved_count
            && self.source_fingerprint == other.source_fingerprint
            && self.faces == other.faces
    }

    /// Whether a cache built for `self` may serve `wanted`
    pub fn serves(&self, wanted: &RootKey, remember_positions: bool) -> bool {
        self.same_structure(wanted) && (remember_positions || self.seed == wanted.seed)
    }
}

/// A generated root set together with its key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCache {
    pub key: RootKey,
    pub roots: Arc<Vec<GeneratedRoot>>,
}

/// Shared slot holding an operator's root cache
///
/// Rebuilds happen under the write lock; readers only ever see a complete
/// root set.
#[derive(Debug, Default)]
pub struct RootCacheSlot {
    cache: RwLock<Option<RootCache>>,
    builds: AtomicU64,
}

impl Clone for RootCacheSlot {
    fn clone(&self) -> Self {
        Self {
            cache: RwLock::new(self.cache.read().clone()),
            builds: AtomicU64::new(self.builds.load(Ordering::Relaxed)),
        }
    }
}

impl RootCacheSlot {
    pub fn new(cache: Option<RootCache>) -> Self {
        Self {
            cache: RwLock::new(cache),
            builds: AtomicU64::new(0),
        }
    }

    /// Cached roots if they serve `wanted`, else roots from `build`
    pub fn get_or_build(
        &self,
        wanted: &RootKey,
        remember_positions: bool,
        topology_version: u64,
        build: impl FnOnce() -> Vec<GeneratedRoot>,
    ) -> Arc<Vec<GeneratedRoot>> {
        {
            let cache = self.cache.read();
            if let Some(hit) = cache.as_ref().filter(|c| c.key.serves(wanted, remember_positions)) {
                if stamped_with(&hit.roots, topology_version) {
                    tracing::debug!(count = hit.roots.len(), "root cache hit");
                    return Arc::clone(&hit.roots);
                }
            }
        }

        let mut cache = self.cache.write();
        // Another evaluation may have rebuilt while we waited for the lock.
        if let Some(hit) = cache
            .as_mut()
            .filter(|c| c.key.serves(wanted, remember_positions))
        {
            if !stamped_with(&hit.roots, topology_version) {
                // Same connectivity under a new version counter (e.g. after reload).
                let restamped = hit
                    .roots
                    .iter()
                    .map(|r| GeneratedRoot {
                        id: r.id,
                        surface: r.surface.restamped(topology_version),
                    })
                    .collect();
                hit.roots = Arc::new(restamped);
            }
            return Arc::clone(&hit.roots);
        }

        let roots = Arc::new(build());
        self.builds.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            method = ?wanted.method,
            count = roots.len(),
            "root cache rebuilt"
        );
        *cache = Some(RootCache {
            key: wanted.clone(),
            roots: Arc::clone(&roots),
        });
        roots
    }

    /// Number of times roots were generated from scratch
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Option<RootCache> {
        self.cache.read().clone()
    }

    pub fn restore(&self, cache: Option<RootCache>) {
        *self.cache.write() = cache;
    }

    pub fn clear(&self) {
        *self.cache.write() = None;
    }
}

fn stamped_with(roots: &[GeneratedRoot], topology_version: u64) -> bool {
    roots
        .first()
        .map_or(true, |r| r.surface.topology_version == topology_version)
}
