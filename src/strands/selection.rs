//! Strand selection criteria (`SelectStrands`)

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::group::GroupPattern;
use super::store::StrandStore;
use crate::core::types::{Space, StrandId};

/// Criteria for picking strands out of a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum StrandSelector {
    All,
    Ids { ids: BTreeSet<StrandId> },
    Groups { pattern: GroupPattern },
    /// Strands whose numeric per-strand channel value lies in `[min, max]`
    Channel { name: String, min: f32, max: f32 },
    /// Strands whose world space root lies inside the box
    RootBounds { min: Vec3, max: Vec3 },
    And { all: Vec<StrandSelector> },
}

impl StrandSelector {
    /// Whether the strand at `index` satisfies the criteria
    pub fn matches(&self, store: &StrandStore, index: usize) -> bool {
        match self {
            StrandSelector::All => true,
            StrandSelector::Ids { ids } => store.id(index).is_some_and(|id| ids.contains(&id)),
            StrandSelector::Groups { pattern } => pattern.matches(store.strand_groups(index)),
            StrandSelector::Channel { name, min, max } => store
                .root_channels()
                .find(|c| &c.name == name)
                .and_then(|c| c.data.get_f32(index))
                .is_some_and(|v| v >= *min && v <= *max),
            StrandSelector::RootBounds { min, max } => store
                .strand_point(index, 0, Space::World)
                .is_some_and(|p| p.cmpge(*min).all() && p.cmple(*max).all()),
            StrandSelector::And { all } => all.iter().all(|s| s.matches(store, index)),
        }
    }

    /// Array positions of matching strands, in store order
    pub fn select_indices(&self, store: &StrandStore) -> Vec<usize> {
        (0..store.strand_count())
            .filter(|&i| self.matches(store, i))
            .collect()
    }

    /// Ids of matching strands, in store order
    pub fn select(&self, store: &StrandStore) -> Vec<StrandId> {
        self.select_indices(store)
            .into_iter()
            .map(|i| store.strand_ids()[i])
            .collect()
    }
}
