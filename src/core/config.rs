//! Engine configuration with documented constants
//!
//! Every tunable the evaluation engine relies on lives here, together with the
//! reasoning behind its default. The config is owned by an
//! [`EngineContext`](crate::core::context::EngineContext) and injected into
//! each groom rather than read from ambient global state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, StackError};

/// Configuration for the strand evaluation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === PARALLELIZATION ===
    /// Minimum strand count before per-strand work is spread across threads
    ///
    /// Below this threshold the rayon fork/join overhead exceeds the work
    /// itself. Results are combined by strand id either way, so the value only
    /// affects speed, never output.
    pub parallel_threshold: usize,

    // === LEVEL OF DETAIL ===
    /// Fraction of render strands shown in the viewport for new grooms
    ///
    /// At 0.1 a 1000 strand render groom shows ~100 strands interactively.
    pub default_viewport_fraction: f32,

    /// Seed mixed into every strand's LOD rank
    ///
    /// Changing it reshuffles which strands survive viewport thinning but the
    /// viewport set always stays a subset of the render set.
    pub lod_seed: u64,

    // === LIMITS ===
    /// Upper bound for any requested strand count (larger values are clamped)
    pub max_strand_count: usize,

    /// Upper bound for points per generated strand
    pub max_points_per_strand: usize,

    // === DISTRIBUTION ===
    /// Candidates drawn per root by the Even (best-candidate) distribution
    ///
    /// More candidates = more uniform spacing, linear cost increase.
    /// 8 gives a clearly lower nearest-neighbour deviation than random area
    /// sampling at moderate cost.
    pub even_candidates: usize,

    // === INTERPOLATION ===
    /// Number of nearest guides blended into each hair strand
    pub guide_neighbors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 256,
            default_viewport_fraction: 1.0,
            lod_seed: 0x5EED,
            max_strand_count: 5_000_000,
            max_points_per_strand: 256,
            even_candidates: 8,
            guide_neighbors: 3,
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML, missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate().map_err(StackError::Config)?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(0.0..=1.0).contains(&self.default_viewport_fraction) {
            return Err(format!(
                "default_viewport_fraction ({}) must be within [0, 1]",
                self.default_viewport_fraction
            ));
        }

        if self.max_points_per_strand < 2 {
            return Err(format!(
                "max_points_per_strand ({}) must allow at least a root and a tip",
                self.max_points_per_strand
            ));
        }

        if self.even_candidates == 0 || self.guide_neighbors == 0 {
            return Err("even_candidates and guide_neighbors must be positive".into());
        }

        if self.max_strand_count == 0 {
            return Err("max_strand_count must be positive".into());
        }

        Ok(())
    }
}
