//! Strand archive: per-frame strand interchange
//!
//! Frames carry strand ids, per-strand vertex counts and positions in object
//! or world space, plus optional velocities and root texture coordinates.
//! World space archives store the object transform of every frame so import
//! can return to object space.

use std::path::Path;

use ahash::AHashMap;
use glam::{Affine3A, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, StackError};
use crate::core::types::{Space, StrandId, StrandKind};
use crate::mesh::MeshProvider;
use crate::strands::{NewStrand, StrandStore};

pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub space: Space,
    pub velocities: bool,
    pub root_uvs: bool,
    /// Frames per second used to scale velocities
    pub frame_rate: f32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            space: Space::Object,
            velocities: false,
            root_uvs: false,
            frame_rate: 24.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFrame {
    pub frame: i32,
    pub ids: Vec<StrandId>,
    pub vertex_counts: Vec<u32>,
    pub positions: Vec<Vec3>,
    /// Object to world transform at this frame
    pub transform: Affine3A,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocities: Option<Vec<Vec3>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_uvs: Option<Vec<Vec2>>,
}

impl ArchiveFrame {
    pub fn strand_count(&self) -> usize {
        self.ids.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrandArchive {
    pub version: u32,
    pub kind: StrandKind,
    pub space: Space,
    pub frames: Vec<ArchiveFrame>,
}

impl StrandArchive {
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        tracing::info!(path = %path.display(), frames = self.frames.len(), "strand archive written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let archive: StrandArchive = serde_json::from_str(&json)?;
        if archive.version > ARCHIVE_VERSION {
            return Err(StackError::UnsupportedVersion(archive.version));
        }
        Ok(archive)
    }

    /// Rebuild an object space store from `frame_index`
    pub fn import_frame(&self, frame_index: usize) -> Result<StrandStore> {
        let frame = self.frames.get(frame_index).ok_or_else(|| {
            StackError::InvalidRange(format!(
                "frame {} of {}",
                frame_index,
                self.frames.len()
            ))
        })?;
        let total: usize = frame.vertex_counts.iter().map(|&c| c as usize).sum();
        if frame.ids.len() != frame.vertex_counts.len() || total != frame.positions.len() {
            return Err(StackError::InvalidArchive(format!(
                "frame {} has {} ids, {} counts and {} positions",
                frame.frame,
                frame.ids.len(),
                frame.vertex_counts.len(),
                frame.positions.len()
            )));
        }

        let to_object = match self.space {
            Space::Object => Affine3A::IDENTITY,
            Space::World => frame.transform.inverse(),
        };
        let mut store = StrandStore::new(self.kind);
        let mut start = 0;
        let strands = frame
            .ids
            .iter()
            .zip(&frame.vertex_counts)
            .map(|(&id, &count)| {
                let end = start + count as usize;
                let points = frame.positions[start..end]
                    .iter()
                    .map(|p| to_object.transform_point3(*p))
                    .collect();
                start = end;
                NewStrand::new(id, points)
            })
            .collect();
        store.append_strands(strands);
        store.set_transform(frame.transform);
        store
            .validate()
            .map_err(|e| StackError::InvalidArchive(format!("frame {}: {}", frame.frame, e)))?;
        Ok(store)
    }
}

/// Accumulates frames of one export
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    options: ExportOptions,
    kind: Option<StrandKind>,
    frames: Vec<ArchiveFrame>,
}

impl ArchiveWriter {
    pub fn new(options: ExportOptions) -> Self {
        Self {
            options,
            kind: None,
            frames: Vec::new(),
        }
    }

    /// Append `store` as `frame`; `mesh` supplies root UVs when requested
    pub fn add_frame(&mut self, frame: i32, store: &StrandStore, mesh: Option<&dyn MeshProvider>) {
        self.kind.get_or_insert(store.kind());
        let transform = store.transform();
        let positions: Vec<Vec3> = match self.options.space {
            Space::Object => store.points().to_vec(),
            Space::World => store
                .points()
                .iter()
                .map(|p| transform.transform_point3(*p))
                .collect(),
        };
        let vertex_counts = (0..store.strand_count())
            .map(|i| store.point_count(i) as u32)
            .collect();

        let velocities = self
            .options
            .velocities
            .then(|| self.velocities(frame, store, &positions));
        let root_uvs = self.options.root_uvs.then(|| {
            store
                .surface_dependencies()
                .iter()
                .map(|dep| {
                    dep.as_ref()
                        .zip(mesh)
                        .and_then(|(d, m)| d.uv(m))
                        .unwrap_or(Vec2::ZERO)
                })
                .collect()
        });

        self.frames.push(ArchiveFrame {
            frame,
            ids: store.strand_ids().to_vec(),
            vertex_counts,
            positions,
            transform,
            velocities,
            root_uvs,
        });
    }

    /// Finite differences against the previous frame, matched by strand id
    fn velocities(&self, frame: i32, store: &StrandStore, positions: &[Vec3]) -> Vec<Vec3> {
        let mut velocities = vec![Vec3::ZERO; positions.len()];
        let Some(previous) = self.frames.last() else {
            return velocities;
        };
        let dt = (frame - previous.frame) as f32 / self.options.frame_rate.max(1e-3);
        if dt <= 0.0 {
            return velocities;
        }
        let mut previous_ranges = AHashMap::with_capacity(previous.ids.len());
        let mut start = 0usize;
        for (&id, &count) in previous.ids.iter().zip(&previous.vertex_counts) {
            previous_ranges.insert(id, start..start + count as usize);
            start += count as usize;
        }
        for i in 0..store.strand_count() {
            let range = store.vertex_range(i);
            let Some(before) = store.id(i).and_then(|id| previous_ranges.get(&id)) else {
                continue;
            };
            if before.len() != range.len() {
                continue;
            }
            for (v, p) in range.zip(before.clone()) {
                velocities[v] = (positions[v] - previous.positions[p]) / dt;
            }
        }
        velocities
    }

    pub fn finish(self) -> StrandArchive {
        StrandArchive {
            version: ARCHIVE_VERSION,
            kind: self.kind.unwrap_or_default(),
            space: self.options.space,
            frames: self.frames,
        }
    }
}

/// Single frame export
pub fn export_store(store: &StrandStore, options: ExportOptions, mesh: Option<&dyn MeshProvider>) -> StrandArchive {
    let mut writer = ArchiveWriter::new(options);
    writer.add_frame(0, store, mesh);
    writer.finish()
}
