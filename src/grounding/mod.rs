//! Grounding: binding strands to a target mesh
//!
//! A grounded strand stores the surface dependency of its root (or of every
//! point) and the surface frame at that dependency when it was bound. Each
//! evaluation reads the current input points, expresses them in the bound
//! frames and places them on the current mesh, so upstream edits pass
//! through and the strands follow both rigid transforms and deformation.
//! Only a topology change forces a new closest-point search.
//!
//! State machine:
//! `Ungrounded -> Grounding -> Grounded <-> Detached`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Affine3A, Mat3, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::StrandId;
use crate::identity::combine_by_id;
use crate::mesh::{closest_point, topology_fingerprint, MeshProvider, SurfaceDependency, SurfaceFrame};
use crate::strands::StrandStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingState {
    #[default]
    Ungrounded,
    /// Surface dependencies are being computed
    Grounding,
    Grounded,
    /// Bypassed; output is the ungrounded input
    Detached,
}

/// Which points are bound to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundMode {
    /// Root bound, remaining points carried rigidly in the root frame
    #[default]
    RootOnly,
    /// Every point bound to its own closest surface location
    AllPoints,
}

/// Surface location a point is bound to, with its frame at bind time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub dependency: SurfaceDependency,
    pub rest: SurfaceFrame,
}

/// Binding of one strand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundEntry {
    pub root: Anchor,
    /// Per-point anchors; empty in root-only mode
    pub anchors: Vec<Anchor>,
}

impl GroundEntry {
    /// Whether the binding can place a strand of `point_count` points
    fn fits(&self, point_count: usize, mode: GroundMode) -> bool {
        match mode {
            GroundMode::RootOnly => point_count > 0,
            GroundMode::AllPoints => point_count > 0 && self.anchors.len() == point_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingCache {
    pub state: GroundingState,
    pub mode: GroundMode,
    /// Connectivity fingerprint of the mesh the entries were computed on
    pub fingerprint: u64,
    /// Version counter of that mesh; unknown after a reload
    #[serde(skip)]
    pub topology_version: Option<u64>,
    pub entries: BTreeMap<StrandId, GroundEntry>,
}

impl GroundingCache {
    pub fn is_grounded(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Whether the entries still describe `mesh`'s connectivity
    fn valid_for(&self, mesh: &dyn MeshProvider, fingerprint: u64, mode: GroundMode) -> bool {
        self.mode == mode
            && self.fingerprint == fingerprint
            && self
                .topology_version
                .map_or(true, |v| v == mesh.topology_version())
    }
}

/// Grounding cache shared between evaluations of one operator
#[derive(Debug, Default)]
pub struct GroundingSlot {
    cache: RwLock<GroundingCache>,
    searches: AtomicU64,
}

impl Clone for GroundingSlot {
    fn clone(&self) -> Self {
        Self {
            cache: RwLock::new(self.cache.read().clone()),
            searches: AtomicU64::new(self.searches.load(Ordering::Relaxed)),
        }
    }
}

impl GroundingSlot {
    pub fn new(cache: GroundingCache) -> Self {
        Self {
            cache: RwLock::new(cache),
            searches: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> GroundingState {
        self.cache.read().state
    }

    /// Number of closest-point searches run so far
    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> GroundingCache {
        self.cache.read().clone()
    }

    pub fn restore(&self, cache: GroundingCache) {
        *self.cache.write() = cache;
    }

    pub fn reset(&self) {
        *self.cache.write() = GroundingCache::default();
    }
}

/// Ground `input` onto `mesh`
///
/// With `detach` the input passes through untouched and the cache is kept,
/// so re-attaching restores the exact grounded result.
pub fn ground(
    input: &StrandStore,
    mesh: Option<&dyn MeshProvider>,
    mode: GroundMode,
    detach: bool,
    slot: &GroundingSlot,
    parallel_threshold: usize,
) -> Result<StrandStore> {
    if detach {
        let mut cache = slot.cache.write();
        if cache.state != GroundingState::Ungrounded {
            cache.state = GroundingState::Detached;
        }
        return Ok(input.clone());
    }
    let Some(mesh) = mesh else {
        tracing::warn!("ground mesh missing; strands left ungrounded");
        return Ok(input.clone());
    };

    let fingerprint = topology_fingerprint(mesh);
    let to_mesh = mesh.transform().inverse() * input.transform();
    let to_object = input.transform().inverse();
    let ids = input.strand_ids();

    // Which strands need a fresh search
    let missing: Vec<usize> = {
        let mut cache = slot.cache.write();
        if !cache.valid_for(mesh, fingerprint, mode) {
            if cache.is_grounded() {
                tracing::debug!("ground mesh topology changed; re-grounding");
            }
            *cache = GroundingCache {
                mode,
                fingerprint,
                ..GroundingCache::default()
            };
        }
        cache.topology_version = Some(mesh.topology_version());
        let version = mesh.topology_version();
        for entry in cache.entries.values_mut() {
            entry.root.dependency = entry.root.dependency.restamped(version);
            for anchor in entry.anchors.iter_mut() {
                anchor.dependency = anchor.dependency.restamped(version);
            }
        }
        let missing: Vec<usize> = (0..ids.len())
            .filter(|&i| {
                input.point_count(i) > 0
                    && !cache
                        .entries
                        .get(&ids[i])
                        .is_some_and(|e| e.fits(input.point_count(i), mode))
            })
            .collect();
        if !missing.is_empty() {
            cache.state = GroundingState::Grounding;
        }
        missing
    };

    if !missing.is_empty() {
        let missing_ids: Vec<StrandId> = missing.iter().map(|&i| ids[i]).collect();
        let computed = combine_by_id(&missing_ids, parallel_threshold, |k, _| {
            bind_strand(input.strand_points(missing[k]), to_mesh, mesh, mode)
        })?;
        slot.searches
            .fetch_add(missing.len() as u64, Ordering::Relaxed);

        let mut cache = slot.cache.write();
        for (id, entry) in missing_ids.into_iter().zip(computed) {
            if let Some(entry) = entry {
                cache.entries.insert(id, entry);
            }
        }
    }

    let mut cache = slot.cache.write();
    let live: ahash::AHashSet<StrandId> = ids.iter().copied().collect();
    cache.entries.retain(|id, _| live.contains(id));
    cache.state = GroundingState::Grounded;

    let to_world = input.transform();
    let mut output = input.clone();
    for (i, id) in ids.iter().enumerate() {
        let Some(entry) = cache.entries.get(id) else {
            continue;
        };
        if !entry.fits(input.point_count(i), mode) {
            continue;
        }
        let current: Vec<Vec3> = input
            .strand_points(i)
            .iter()
            .map(|p| to_world.transform_point3(*p))
            .collect();
        let Some(world) = place_points(entry, &current, mesh) else {
            continue;
        };
        for (dst, p) in output.strand_points_mut(i).iter_mut().zip(world) {
            *dst = to_object.transform_point3(p);
        }
        output.set_surface_dependency(i, Some(entry.root.dependency));
    }
    Ok(output)
}

/// Surface frame at `dep`, or an axis aligned frame for degenerate faces
fn frame_at(dep: &SurfaceDependency, mesh: &dyn MeshProvider) -> Option<SurfaceFrame> {
    let origin = dep.world_position(mesh)?;
    Some(dep.world_frame(mesh).unwrap_or(SurfaceFrame {
        origin,
        basis: Mat3::IDENTITY,
    }))
}

fn anchor_at(dependency: SurfaceDependency, mesh: &dyn MeshProvider) -> Option<Anchor> {
    Some(Anchor {
        dependency,
        rest: frame_at(&dependency, mesh)?,
    })
}

fn bind_strand(
    points: &[Vec3],
    to_mesh: Affine3A,
    mesh: &dyn MeshProvider,
    mode: GroundMode,
) -> Option<GroundEntry> {
    let first = *points.first()?;
    let root = anchor_at(closest_point(mesh, to_mesh.transform_point3(first))?, mesh)?;
    let anchors = match mode {
        GroundMode::RootOnly => Vec::new(),
        GroundMode::AllPoints => std::iter::once(Some(root))
            .chain(points[1..].iter().map(|p| {
                closest_point(mesh, to_mesh.transform_point3(*p)).and_then(|d| anchor_at(d, mesh))
            }))
            .collect::<Option<Vec<_>>>()?,
    };
    Some(GroundEntry { root, anchors })
}

/// World positions of a grounded strand on the current mesh
///
/// `current` holds the strand's input points in world space. Each point keeps
/// its offset from the input root (root-only) or from its anchor's rest
/// position (all points), measured in the rest frame and re-applied in the
/// current frame. Roots sit on the surface.
fn place_points(entry: &GroundEntry, current: &[Vec3], mesh: &dyn MeshProvider) -> Option<Vec<Vec3>> {
    let root = *current.first()?;
    if entry.anchors.is_empty() {
        let frame = frame_at(&entry.root.dependency, mesh)?;
        return Some(
            current
                .iter()
                .map(|p| frame.origin + frame.to_world(entry.root.rest.to_local(*p - root)))
                .collect(),
        );
    }
    entry
        .anchors
        .iter()
        .zip(current)
        .enumerate()
        .map(|(j, (anchor, p))| {
            let frame = frame_at(&anchor.dependency, mesh)?;
            if j == 0 {
                return Some(frame.origin);
            }
            let local = anchor.rest.to_local(*p - anchor.rest.origin);
            Some(frame.origin + frame.to_world(local))
        })
        .collect()
}
