//! Per-node caches that survive between evaluation passes

use crate::grounding::GroundingSlot;
use crate::roots::RootCacheSlot;

use super::cache::BakedSlot;

/// Cached state owned by one stack node
///
/// Root and grounding caches are serialized with the groom; the baked slot
/// is reloaded from disk.
#[derive(Debug, Clone, Default)]
pub struct OperatorState {
    pub roots: RootCacheSlot,
    pub grounding: GroundingSlot,
    pub baked: BakedSlot,
}

impl OperatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cache, forcing a full rebuild on the next pass
    pub fn clear(&self) {
        self.roots.clear();
        self.grounding.reset();
        self.baked.reload();
    }
}
