//! GroundStrands operator

use serde::{Deserialize, Serialize};

use super::context::EvalContext;
use super::state::OperatorState;
use crate::core::error::Result;
use crate::grounding::{ground, GroundMode};
use crate::strands::StrandStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundStrandsParams {
    /// Ground target mesh source name
    pub mesh: String,
    /// Temporarily bypass grounding, keeping the computed bindings
    pub detach: bool,
    pub mode: GroundMode,
}

impl Default for GroundStrandsParams {
    fn default() -> Self {
        Self {
            mesh: "distribution".into(),
            detach: false,
            mode: GroundMode::RootOnly,
        }
    }
}

impl GroundStrandsParams {
    pub fn evaluate(
        &self,
        input: &StrandStore,
        ctx: &EvalContext<'_>,
        state: &OperatorState,
    ) -> Result<StrandStore> {
        let mesh = if self.detach { None } else { ctx.mesh(&self.mesh) };
        ground(
            input,
            mesh,
            self.mode,
            self.detach,
            &state.grounding,
            ctx.config.parallel_threshold,
        )
    }
}
