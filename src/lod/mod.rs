//! Level of detail: which strands of an evaluated store are shown
//!
//! Each strand gets a rank from a stable hash of its id. A subset of fraction
//! `f` is the `round(n * f)` lowest ranked strands, so a smaller fraction is
//! always a subset of a larger one, the viewport set is a subset of the render
//! set, and raising a visibility rate only ever adds strands.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::core::types::{mix_pair, StrandId};
use crate::strands::StrandStore;

/// Resolved display state
#[derive(Debug, Clone, PartialEq)]
pub enum LodState {
    Viewport { fraction: f32 },
    Render,
    /// Only `ids`, thinned to `visibility_rate`; other strands at `culled_rate`
    Isolated {
        ids: BTreeSet<StrandId>,
        visibility_rate: f32,
        culled_rate: f32,
    },
    /// Every strand thinned to `visibility_rate`
    Culled { visibility_rate: f32 },
}

/// Isolation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isolation {
    pub ids: BTreeSet<StrandId>,
    pub visibility_rate: f32,
    pub culled_visibility_rate: f32,
}

/// Per-groom LOD parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodSettings {
    pub viewport_fraction: f32,
    pub is_rendering: bool,
    pub isolation: Option<Isolation>,
    pub seed: u64,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self {
            viewport_fraction: 1.0,
            is_rendering: false,
            isolation: None,
            seed: 0x5EED,
        }
    }
}

impl LodSettings {
    pub fn new(viewport_fraction: f32, seed: u64) -> Self {
        Self {
            viewport_fraction: clamp_rate(viewport_fraction),
            seed,
            ..Self::default()
        }
    }

    pub fn set_viewport_fraction(&mut self, fraction: f32) {
        self.viewport_fraction = clamp_rate(fraction);
    }

    pub fn set_rendering(&mut self, rendering: bool) {
        self.is_rendering = rendering;
    }

    /// Show only `ids`, at `visibility_rate`; the rest at `culled_rate`
    pub fn isolate(&mut self, ids: BTreeSet<StrandId>, visibility_rate: f32, culled_rate: f32) {
        self.isolation = Some(Isolation {
            ids,
            visibility_rate: clamp_rate(visibility_rate),
            culled_visibility_rate: clamp_rate(culled_rate),
        });
    }

    /// Drop isolation; the viewport/render state comes back unchanged
    pub fn clear_isolation(&mut self) {
        self.isolation = None;
    }

    pub fn state(&self) -> LodState {
        match &self.isolation {
            Some(iso) if iso.ids.is_empty() => LodState::Culled {
                visibility_rate: iso.culled_visibility_rate,
            },
            Some(iso) => LodState::Isolated {
                ids: iso.ids.clone(),
                visibility_rate: iso.visibility_rate,
                culled_rate: iso.culled_visibility_rate,
            },
            None if self.is_rendering => LodState::Render,
            None => LodState::Viewport {
                fraction: self.viewport_fraction,
            },
        }
    }

    pub fn resolver(&self) -> LodResolver {
        LodResolver::new(self.seed)
    }
}

fn clamp_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        1.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Number of strands kept out of `total` at `fraction`
pub fn subset_count(total: usize, fraction: f32) -> usize {
    ((total as f64 * clamp_rate(fraction) as f64).round() as usize).min(total)
}

/// Picks LOD subsets by stable id rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodResolver {
    seed: u64,
}

impl LodResolver {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn rank(&self, id: StrandId) -> u64 {
        mix_pair(id.0, self.seed)
    }

    /// Lowest ranked `round(len * fraction)` of `candidates` (array positions)
    fn thin(&self, store: &StrandStore, candidates: &[usize], fraction: f32) -> Vec<usize> {
        let keep = subset_count(candidates.len(), fraction);
        if keep == candidates.len() {
            return candidates.to_vec();
        }
        let ids = store.strand_ids();
        let mut ranked: Vec<(u64, StrandId, usize)> = candidates
            .iter()
            .map(|&i| (self.rank(ids[i]), ids[i], i))
            .collect();
        ranked.sort_unstable();
        ranked.truncate(keep);
        ranked.into_iter().map(|(_, _, i)| i).collect()
    }

    /// Array positions visible in `state`, in store order
    pub fn resolve_indices(&self, store: &StrandStore, state: &LodState) -> Vec<usize> {
        let all: Vec<usize> = (0..store.strand_count()).collect();
        let mut visible = match state {
            LodState::Render => return all,
            LodState::Viewport { fraction } => self.thin(store, &all, *fraction),
            LodState::Culled { visibility_rate } => self.thin(store, &all, *visibility_rate),
            LodState::Isolated {
                ids,
                visibility_rate,
                culled_rate,
            } => {
                let (inside, outside): (Vec<usize>, Vec<usize>) = all
                    .iter()
                    .partition(|&&i| ids.contains(&store.strand_ids()[i]));
                let mut v = self.thin(store, &inside, *visibility_rate);
                v.extend(self.thin(store, &outside, *culled_rate));
                v
            }
        };
        visible.sort_unstable();
        visible
    }

    /// Visible ids in store order
    pub fn resolve_ids(&self, store: &StrandStore, state: &LodState) -> Vec<StrandId> {
        self.resolve_indices(store, state)
            .into_iter()
            .map(|i| store.strand_ids()[i])
            .collect()
    }

    /// The visible part of `store`; shares the input when nothing is dropped
    pub fn apply(&self, store: &Arc<StrandStore>, state: &LodState) -> Arc<StrandStore> {
        let indices = self.resolve_indices(store, state);
        if indices.len() == store.strand_count() {
            return Arc::clone(store);
        }
        Arc::new(store.select(&indices))
    }
}

/// Set view of visible ids, for subset checks
pub fn id_set(ids: &[StrandId]) -> AHashSet<StrandId> {
    ids.iter().copied().collect()
}
