//! Stack operators
//!
//! Each operator is a strongly typed, serde tagged parameter struct.
//! Parameters are sanitized on construction: out of range values are clamped,
//! never rejected. Evaluation is a pure function of the input store, the
//! evaluation context and the node's caches.

pub mod cache;
pub mod combine;
pub mod context;
pub mod generate;
pub mod ground;
pub mod modify;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::types::StrandKind;
use crate::strands::StrandStore;

pub use cache::{load_baked, save_baked, BakedSlot, CacheParams, CacheSource};
pub use combine::{GroupAssignment, MergeParams, StrandGroupsParams, WriteChannelParams};
pub use context::{EvalContext, SourceSet};
pub use generate::{GuideBlend, GuidesFromCurvesParams, GuidesFromMeshParams, HairFromGuidesParams};
pub use ground::GroundStrandsParams;
pub use modify::{FrizzParams, LengthParams, MultiplierParams, PropagationParams};
pub use state::OperatorState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorParams {
    GuidesFromMesh(GuidesFromMeshParams),
    GuidesFromCurves(GuidesFromCurvesParams),
    HairFromGuides(HairFromGuidesParams),
    Length(LengthParams),
    Frizz(FrizzParams),
    Propagation(PropagationParams),
    Multiplier(MultiplierParams),
    Merge(MergeParams),
    GroundStrands(GroundStrandsParams),
    WriteChannel(WriteChannelParams),
    StrandGroups(StrandGroupsParams),
    Cache(CacheParams),
}

impl OperatorParams {
    pub fn type_name(&self) -> &'static str {
        match self {
            OperatorParams::GuidesFromMesh(_) => "guides_from_mesh",
            OperatorParams::GuidesFromCurves(_) => "guides_from_curves",
            OperatorParams::HairFromGuides(_) => "hair_from_guides",
            OperatorParams::Length(_) => "length",
            OperatorParams::Frizz(_) => "frizz",
            OperatorParams::Propagation(_) => "propagation",
            OperatorParams::Multiplier(_) => "multiplier",
            OperatorParams::Merge(_) => "merge",
            OperatorParams::GroundStrands(_) => "ground_strands",
            OperatorParams::WriteChannel(_) => "write_channel",
            OperatorParams::StrandGroups(_) => "strand_groups",
            OperatorParams::Cache(_) => "cache",
        }
    }

    /// Clamp every parameter into its valid domain
    pub fn sanitized(self, config: &EngineConfig) -> Self {
        match self {
            OperatorParams::GuidesFromMesh(p) => OperatorParams::GuidesFromMesh(p.sanitized(config)),
            OperatorParams::GuidesFromCurves(p) => {
                OperatorParams::GuidesFromCurves(p.sanitized(config))
            }
            OperatorParams::HairFromGuides(p) => OperatorParams::HairFromGuides(p.sanitized(config)),
            OperatorParams::Length(p) => OperatorParams::Length(p.sanitized()),
            OperatorParams::Frizz(p) => OperatorParams::Frizz(p.sanitized()),
            OperatorParams::Propagation(p) => OperatorParams::Propagation(p.sanitized()),
            OperatorParams::Multiplier(p) => OperatorParams::Multiplier(p.sanitized()),
            OperatorParams::WriteChannel(p) => OperatorParams::WriteChannel(p.sanitized()),
            other @ (OperatorParams::Merge(_)
            | OperatorParams::GroundStrands(_)
            | OperatorParams::StrandGroups(_)
            | OperatorParams::Cache(_)) => other,
        }
    }

    /// Generators start a stack and take no strand input
    pub fn is_generator(&self) -> bool {
        matches!(
            self,
            OperatorParams::GuidesFromMesh(_) | OperatorParams::GuidesFromCurves(_)
        )
    }

    /// Whether the operator can consume a store of `input` kind (`None`: no input)
    pub fn accepts_input(&self, input: Option<StrandKind>) -> bool {
        match self {
            OperatorParams::GuidesFromMesh(_) | OperatorParams::GuidesFromCurves(_) => {
                input.is_none()
            }
            OperatorParams::HairFromGuides(_) => input == Some(StrandKind::Guides),
            OperatorParams::Cache(_) => true,
            _ => input.is_some(),
        }
    }

    /// Kind of store produced for an input of `input` kind
    pub fn output_kind(&self, input: Option<StrandKind>) -> StrandKind {
        match self {
            OperatorParams::GuidesFromMesh(_) | OperatorParams::GuidesFromCurves(_) => {
                StrandKind::Guides
            }
            OperatorParams::HairFromGuides(_) => StrandKind::Hair,
            OperatorParams::Cache(p) => p.kind,
            _ => input.unwrap_or_default(),
        }
    }

    /// Output when the node is disabled: input passes through unchanged (kind
    /// included), generators produce nothing
    pub fn bypass(&self, input: Option<&StrandStore>) -> StrandStore {
        match input {
            Some(store) if !self.is_generator() => store.clone(),
            _ => StrandStore::new(self.output_kind(input.map(|s| s.kind()))),
        }
    }

    pub fn evaluate(
        &self,
        input: Option<&StrandStore>,
        ctx: &EvalContext<'_>,
        state: &OperatorState,
    ) -> Result<StrandStore> {
        let empty;
        let input_store = match input {
            Some(store) => store,
            None => {
                empty = StrandStore::new(StrandKind::Guides);
                &empty
            }
        };
        match self {
            OperatorParams::GuidesFromMesh(p) => p.evaluate(ctx, state),
            OperatorParams::GuidesFromCurves(p) => p.evaluate(ctx),
            OperatorParams::HairFromGuides(p) => p.evaluate(input_store, ctx, state),
            OperatorParams::Length(p) => p.evaluate(input_store, ctx),
            OperatorParams::Frizz(p) => p.evaluate(input_store, ctx),
            OperatorParams::Propagation(p) => p.evaluate(input_store, ctx),
            OperatorParams::Multiplier(p) => p.evaluate(input_store, ctx),
            OperatorParams::Merge(p) => p.evaluate(input_store, ctx),
            OperatorParams::GroundStrands(p) => p.evaluate(input_store, ctx, state),
            OperatorParams::WriteChannel(p) => p.evaluate(input_store),
            OperatorParams::StrandGroups(p) => p.evaluate(input_store),
            OperatorParams::Cache(p) => p.evaluate(&state.baked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_compatibility() {
        let hair = OperatorParams::HairFromGuides(HairFromGuidesParams::default());
        assert!(hair.accepts_input(Some(StrandKind::Guides)));
        assert!(!hair.accepts_input(Some(StrandKind::Hair)));
        assert!(!hair.accepts_input(None));

        let generator = OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default());
        assert!(generator.accepts_input(None));
        assert!(!generator.accepts_input(Some(StrandKind::Guides)));

        let length = OperatorParams::Length(LengthParams::default());
        assert_eq!(length.output_kind(Some(StrandKind::Hair)), StrandKind::Hair);
    }

    #[test]
    fn test_params_serde_tagged() {
        let op = OperatorParams::Length(LengthParams {
            scale: 2.0,
            ..LengthParams::default()
        });
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "length");
        assert_eq!(json["scale"], 2.0);
        let back: OperatorParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let op: OperatorParams = serde_json::from_str(r#"{"type":"frizz","amount":0.2}"#).unwrap();
        match op {
            OperatorParams::Frizz(p) => {
                assert_eq!(p.amount, 0.2);
                assert_eq!(p.seed, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_disabled_generator_is_empty() {
        let generator = OperatorParams::GuidesFromMesh(GuidesFromMeshParams::default());
        let out = generator.bypass(None);
        assert!(out.is_empty());
        assert_eq!(out.kind(), StrandKind::Guides);
    }
}
