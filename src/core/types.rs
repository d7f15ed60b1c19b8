//! Core type definitions used throughout the codebase

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable strand identifier
///
/// Ids survive re-evaluation and re-ordering of the strand arrays. They are
/// never interpreted as an array index.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[display(fmt = "strand#{}", _0)]
pub struct StrandId(pub u64);

impl StrandId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Handle to an operator node in a stack graph
///
/// Slots are recycled after deletion, so the generation counter makes stale
/// handles detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl NodeId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

/// Handle to an output binding (a display shape consuming a stack)
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(fmt = "output#{}", _0)]
pub struct OutputId(pub u32);

/// Unique identifier for hair objects registered with an engine context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroomId(pub Uuid);

impl GroomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroomId {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinate space for point queries and exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    /// Strand object space (authoritative)
    #[default]
    Object,
    /// Object space transformed by the owning transform
    World,
}

/// What a strand store represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrandKind {
    /// Sparse, editable control curves
    #[default]
    Guides,
    /// Final interpolated strands
    Hair,
}

impl StrandKind {
    pub fn label(&self) -> &'static str {
        match self {
            StrandKind::Guides => "guides",
            StrandKind::Hair => "hair",
        }
    }
}

/// SplitMix64 finalizer used wherever a stable, platform independent mix is
/// required (per-strand seeds, LOD ranks, fingerprints).
#[inline]
pub fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Combine two values into one stable hash
#[inline]
pub fn mix_pair(a: u64, b: u64) -> u64 {
    mix64(a ^ mix64(b).rotate_left(17))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strand_id_ordering() {
        assert!(StrandId(1) < StrandId(2));
        assert_eq!(StrandId::new(7), StrandId(7));
    }

    #[test]
    fn test_strand_id_display() {
        assert_eq!(StrandId(42).to_string(), "strand#42");
        assert_eq!(OutputId(3).to_string(), "output#3");
    }

    #[test]
    fn test_node_id_generation_distinguishes_handles() {
        let a = NodeId::new(0, 0);
        let b = NodeId::new(0, 1);
        assert_ne!(a, b);
        assert_eq!(b.to_string(), "node#0v1");
    }

    #[test]
    fn test_mix_is_stable() {
        assert_eq!(mix64(0), mix64(0));
        assert_ne!(mix64(1), mix64(2));
        assert_ne!(mix_pair(1, 2), mix_pair(2, 1));
    }

    #[test]
    fn test_groom_ids_unique() {
        assert_ne!(GroomId::new(), GroomId::new());
    }
}
