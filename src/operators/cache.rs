//! Cache operator: serves baked strand data in place of live operators

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, StackError};
use crate::core::types::StrandKind;
use crate::strands::StrandStore;

/// Where the baked strands live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CacheSource {
    /// Stored inside the groom description
    Embedded { data: Arc<StrandStore> },
    /// Baked cache file written by [`save_baked`]
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheParams {
    pub kind: StrandKind,
    pub source: CacheSource,
}

impl CacheParams {
    pub fn embedded(data: StrandStore) -> Self {
        Self {
            kind: data.kind(),
            source: CacheSource::Embedded {
                data: Arc::new(data),
            },
        }
    }

    pub fn file(kind: StrandKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: CacheSource::File { path: path.into() },
        }
    }

    pub fn evaluate(&self, slot: &BakedSlot) -> Result<StrandStore> {
        match &self.source {
            CacheSource::Embedded { data } => Ok(data.as_ref().clone()),
            CacheSource::File { path } => Ok(slot
                .load(path, self.kind)
                .as_ref()
                .clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
enum BakedData {
    #[default]
    Unloaded,
    Loaded(Arc<StrandStore>),
    /// Load failed; stays empty until an explicit reload
    Missing,
}

/// Loaded contents of a file-backed cache node
#[derive(Debug, Default)]
pub struct BakedSlot {
    data: RwLock<BakedData>,
}

impl Clone for BakedSlot {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
        }
    }
}

impl BakedSlot {
    /// Contents of `path`, loading it on first use
    pub fn load(&self, path: &Path, kind: StrandKind) -> Arc<StrandStore> {
        if let BakedData::Loaded(store) = &*self.data.read() {
            return Arc::clone(store);
        }
        let mut data = self.data.write();
        match &*data {
            BakedData::Loaded(store) => return Arc::clone(store),
            BakedData::Missing => return Arc::new(StrandStore::new(kind)),
            BakedData::Unloaded => {}
        }
        match load_baked(path) {
            Ok(store) => {
                tracing::info!(path = %path.display(), strands = store.strand_count(), "baked cache loaded");
                let store = Arc::new(store);
                *data = BakedData::Loaded(Arc::clone(&store));
                store
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "baked cache unavailable; serving no strands");
                *data = BakedData::Missing;
                Arc::new(StrandStore::new(kind))
            }
        }
    }

    /// Forget loaded data so the next evaluation reads the file again
    pub fn reload(&self) {
        *self.data.write() = BakedData::Unloaded;
    }

    pub fn is_missing(&self) -> bool {
        matches!(*self.data.read(), BakedData::Missing)
    }
}

/// Write a baked strand cache file
pub fn save_baked(store: &StrandStore, path: &Path) -> Result<()> {
    let json = serde_json::to_string(store)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a baked strand cache file
pub fn load_baked(path: &Path) -> Result<StrandStore> {
    if !path.exists() {
        return Err(StackError::MissingCache(path.to_path_buf()));
    }
    let json = std::fs::read_to_string(path)?;
    let store: StrandStore = serde_json::from_str(&json)?;
    store.validate()?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StrandId;
    use crate::strands::NewStrand;
    use glam::Vec3;
    use tempfile::TempDir;

    fn sample() -> StrandStore {
        let mut s = StrandStore::new(StrandKind::Hair);
        s.push_strand(NewStrand::new(StrandId(3), vec![Vec3::ZERO, Vec3::ONE]));
        s
    }

    #[test]
    fn test_missing_file_serves_nothing_until_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baked.json");
        let params = CacheParams::file(StrandKind::Hair, &path);
        let slot = BakedSlot::default();

        assert!(params.evaluate(&slot).unwrap().is_empty());
        assert!(slot.is_missing());

        save_baked(&sample(), &path).unwrap();
        assert!(params.evaluate(&slot).unwrap().is_empty());

        slot.reload();
        assert_eq!(params.evaluate(&slot).unwrap(), sample());
    }

    #[test]
    fn test_embedded_cache() {
        let params = CacheParams::embedded(sample());
        assert_eq!(params.kind, StrandKind::Hair);
        assert_eq!(params.evaluate(&BakedSlot::default()).unwrap(), sample());
    }
}
