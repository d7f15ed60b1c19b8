//! Shape modifiers and strand multiplying operators
//!
//! Group-scoped operators touch member strands only; every other strand keeps
//! its exact points.

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::context::EvalContext;
use crate::core::error::{Result, StackError};
use crate::core::types::StrandId;
use crate::identity::{combine_by_id, strand_rng, strand_unit, DerivedIds};
use crate::mesh::curves::{resample_polyline, sample_polyline};
use crate::strands::{GroupPattern, NewStrand, StrandStore};

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Member strand positions with their ids
///
/// Strands without points have no shape to modify and are never members.
fn members(store: &StrandStore, group: &GroupPattern) -> (Vec<usize>, Vec<StrandId>) {
    store
        .group_mask(group)
        .into_iter()
        .enumerate()
        .filter(|&(i, m)| m && store.point_count(i) > 0)
        .map(|(i, _)| (i, store.strand_ids()[i]))
        .unzip()
}

/// Flatten per-source children, failing if any child id overflowed
fn gather_children(children: Vec<Option<Vec<NewStrand>>>, operator: &str) -> Result<Vec<NewStrand>> {
    children
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .map(|all| all.into_iter().flatten().collect())
        .ok_or_else(|| StackError::IdOverflow(format!("{} children", operator)))
}

/// Replace member strands' points with per-strand results computed in parallel
fn reshape(
    input: &StrandStore,
    group: &GroupPattern,
    ctx: &EvalContext<'_>,
    shape: impl Fn(StrandId, &[Vec3]) -> Vec<Vec3> + Sync + Send,
) -> Result<StrandStore> {
    let (indices, ids) = members(input, group);
    let reshaped = combine_by_id(&ids, ctx.config.parallel_threshold, |k, id| {
        shape(id, input.strand_points(indices[k]))
    })?;
    let mut output = input.clone();
    for (&i, points) in indices.iter().zip(reshaped) {
        output.strand_points_mut(i).copy_from_slice(&points);
    }
    Ok(output)
}

/// Random unit vector
fn random_direction(rng: &mut impl Rng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        let len = v.length();
        if len > 1e-3 && len <= 1.0 {
            return v / len;
        }
    }
}

// === LENGTH ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthParams {
    /// Length multiplier
    pub scale: f32,
    /// Fraction by which each strand may randomly fall short, `[0, 1]`
    pub randomness: f32,
    pub seed: u64,
    pub group: GroupPattern,
}

impl Default for LengthParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            randomness: 0.0,
            seed: 1,
            group: GroupPattern::all(),
        }
    }
}

impl LengthParams {
    pub fn sanitized(mut self) -> Self {
        self.scale = finite_or(self.scale, 1.0).max(0.0);
        self.randomness = finite_or(self.randomness, 0.0).clamp(0.0, 1.0);
        self
    }

    pub fn evaluate(&self, input: &StrandStore, ctx: &EvalContext<'_>) -> Result<StrandStore> {
        reshape(input, &self.group, ctx, |id, points| {
            let factor = self.scale * (1.0 - self.randomness * strand_unit(self.seed, id, 0));
            let root = points[0];
            points.iter().map(|p| root + (*p - root) * factor).collect()
        })
    }
}

// === FRIZZ ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrizzParams {
    /// Displacement at the tip, in object units
    pub amount: f32,
    pub seed: u64,
    pub group: GroupPattern,
}

impl Default for FrizzParams {
    fn default() -> Self {
        Self {
            amount: 0.05,
            seed: 1,
            group: GroupPattern::all(),
        }
    }
}

impl FrizzParams {
    pub fn sanitized(mut self) -> Self {
        self.amount = finite_or(self.amount, 0.0).max(0.0);
        self
    }

    pub fn evaluate(&self, input: &StrandStore, ctx: &EvalContext<'_>) -> Result<StrandStore> {
        reshape(input, &self.group, ctx, |id, points| {
            let mut rng = strand_rng(self.seed, id);
            let last = points.len().saturating_sub(1).max(1) as f32;
            points
                .iter()
                .enumerate()
                .map(|(j, p)| {
                    let jitter = Vec3::new(
                        rng.gen_range(-1.0..=1.0),
                        rng.gen_range(-1.0..=1.0),
                        rng.gen_range(-1.0..=1.0),
                    );
                    // Roots stay put; displacement grows toward the tip.
                    *p + jitter * self.amount * (j as f32 / last)
                })
                .collect()
        })
    }
}

// === PROPAGATION ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationParams {
    /// Side strands grown from each member strand
    pub count_per_strand: usize,
    /// Side strand length relative to the source strand
    pub length_fraction: f32,
    pub seed: u64,
    pub group: GroupPattern,
}

impl Default for PropagationParams {
    fn default() -> Self {
        Self {
            count_per_strand: 3,
            length_fraction: 0.3,
            seed: 1,
            group: GroupPattern::all(),
        }
    }
}

const MAX_PROPAGATED: usize = 64;

impl PropagationParams {
    pub fn sanitized(mut self) -> Self {
        self.count_per_strand = self.count_per_strand.min(MAX_PROPAGATED);
        self.length_fraction = finite_or(self.length_fraction, 0.3).clamp(0.0, 1.0);
        self
    }

    pub fn evaluate(&self, input: &StrandStore, ctx: &EvalContext<'_>) -> Result<StrandStore> {
        let count = self.count_per_strand;
        let derived = DerivedIds::for_store(input, count);
        let (indices, ids) = members(input, &self.group);

        let children = combine_by_id(&ids, ctx.config.parallel_threshold, |k, id| {
            let source = indices[k];
            let points = input.strand_points(source);
            let length = input.strand_length(source) * self.length_fraction;
            let segments = points.len().max(2);
            let mut rng = strand_rng(self.seed, id);
            let mut side_strands = Vec::with_capacity(count);
            for c in 0..count {
                let t = (c + 1) as f32 / (count + 1) as f32;
                let Some(start) = sample_polyline(points, t) else {
                    continue;
                };
                let dir = random_direction(&mut rng);
                let side = resample_polyline(&[start, start + dir * length], segments);
                side_strands.push(NewStrand {
                    groups: input.strand_groups(source).clone(),
                    parent: Some(source),
                    ..NewStrand::new(derived.id(id, c)?, side)
                });
            }
            Some(side_strands)
        })?;

        let mut output = input.clone();
        output.append_strands(gather_children(children, "propagation")?);
        Ok(output)
    }
}

// === MULTIPLIER ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplierParams {
    /// Extra copies per member strand
    pub copies: usize,
    /// Maximum root offset of a copy
    pub spread: f32,
    pub seed: u64,
    pub group: GroupPattern,
}

impl Default for MultiplierParams {
    fn default() -> Self {
        Self {
            copies: 2,
            spread: 0.05,
            seed: 1,
            group: GroupPattern::all(),
        }
    }
}

const MAX_COPIES: usize = 32;

impl MultiplierParams {
    pub fn sanitized(mut self) -> Self {
        self.copies = self.copies.min(MAX_COPIES);
        self.spread = finite_or(self.spread, 0.0).max(0.0);
        self
    }

    pub fn evaluate(&self, input: &StrandStore, ctx: &EvalContext<'_>) -> Result<StrandStore> {
        let derived = DerivedIds::for_store(input, self.copies);
        let (indices, ids) = members(input, &self.group);

        let copies = combine_by_id(&ids, ctx.config.parallel_threshold, |k, id| {
            let source = indices[k];
            let mut rng = strand_rng(self.seed, id);
            (0..self.copies)
                .map(|c| {
                    let offset = random_direction(&mut rng) * self.spread * rng.gen::<f32>();
                    let points = input
                        .strand_points(source)
                        .iter()
                        .map(|p| *p + offset)
                        .collect();
                    Some(NewStrand {
                        surface: input.surface_dependency(source).copied(),
                        groups: input.strand_groups(source).clone(),
                        parent: Some(source),
                        ..NewStrand::new(derived.id(id, c)?, points)
                    })
                })
                .collect::<Option<Vec<_>>>()
        })?;

        let mut output = input.clone();
        output.append_strands(gather_children(copies, "multiplier")?);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::core::types::StrandKind;
    use crate::operators::context::SourceSet;
    use crate::strands::GroupTag;
    use ahash::AHashSet;
    use std::collections::BTreeMap;

    fn store() -> StrandStore {
        let mut s = StrandStore::new(StrandKind::Hair);
        for i in 0..6u64 {
            let x = i as f32;
            let mut strand = NewStrand::new(
                StrandId(i + 1),
                vec![Vec3::new(x, 0.0, 0.0), Vec3::new(x, 1.0, 0.0), Vec3::new(x, 2.0, 0.0)],
            );
            if i % 2 == 0 {
                strand.groups.insert(GroupTag::Index(1));
            }
            s.push_strand(strand);
        }
        s
    }

    fn with_ctx<T>(f: impl FnOnce(&EvalContext<'_>) -> T) -> T {
        let sources = SourceSet::new();
        let config = EngineConfig::default();
        f(&EvalContext::new(&sources, &config))
    }

    #[test]
    fn test_length_scales_from_root() {
        let out = with_ctx(|ctx| {
            LengthParams {
                scale: 0.5,
                ..LengthParams::default()
            }
            .evaluate(&store(), ctx)
            .unwrap()
        });
        assert_eq!(out.strand_points(2)[2], Vec3::new(2.0, 1.0, 0.0));
        assert!((out.strand_length(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_group_scope_leaves_non_members_identical() {
        let input = store();
        let out = with_ctx(|ctx| {
            FrizzParams {
                amount: 0.5,
                group: GroupPattern::parse("1").unwrap(),
                ..FrizzParams::default()
            }
            .evaluate(&input, ctx)
            .unwrap()
        });
        for i in 0..input.strand_count() {
            if i % 2 == 1 {
                assert_eq!(out.strand_points(i), input.strand_points(i));
            } else {
                assert_eq!(out.strand_points(i)[0], input.strand_points(i)[0]);
                assert_ne!(out.strand_points(i)[2], input.strand_points(i)[2]);
            }
        }
    }

    #[test]
    fn test_propagation_ids_disjoint_and_stable() {
        let input = store();
        let params = PropagationParams::default();
        let a = with_ctx(|ctx| params.evaluate(&input, ctx).unwrap());
        let b = with_ctx(|ctx| params.evaluate(&input, ctx).unwrap());
        assert_eq!(a, b);
        assert_eq!(a.strand_count(), 6 + 6 * 3);

        let sources: AHashSet<StrandId> = input.strand_ids().iter().copied().collect();
        let new_ids: Vec<StrandId> = a.strand_ids()[6..].to_vec();
        assert!(new_ids.iter().all(|id| !sources.contains(id)));
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_multiplier_respects_group() {
        let input = store();
        let out = with_ctx(|ctx| {
            MultiplierParams {
                copies: 4,
                group: GroupPattern::parse("1").unwrap(),
                ..MultiplierParams::default()
            }
            .evaluate(&input, ctx)
            .unwrap()
        });
        assert_eq!(out.strand_count(), 6 + 3 * 4);
        assert!(out.strand_groups(6).contains(&GroupTag::Index(1)));
        assert!(out.validate().is_ok());
    }

    #[test]
    fn test_child_ids_follow_parent_not_position() {
        let input = store();
        let reversed = input.select(&[5, 4, 3, 2, 1, 0]);
        let children = |out: &StrandStore| -> BTreeMap<StrandId, Vec<Vec3>> {
            (6..out.strand_count())
                .map(|i| (out.strand_ids()[i], out.strand_points(i).to_vec()))
                .collect()
        };
        with_ctx(|ctx| {
            let multiplier = MultiplierParams::default();
            let a = multiplier.evaluate(&input, ctx).unwrap();
            let b = multiplier.evaluate(&reversed, ctx).unwrap();
            assert_eq!(children(&a), children(&b));

            let propagation = PropagationParams::default();
            let a = propagation.evaluate(&input, ctx).unwrap();
            let b = propagation.evaluate(&reversed, ctx).unwrap();
            assert_eq!(children(&a), children(&b));
        });
    }

    #[test]
    fn test_empty_strands_are_skipped() {
        let mut input = store();
        input.push_strand(NewStrand::new(StrandId(99), Vec::new()));
        with_ctx(|ctx| {
            let stretched = LengthParams {
                scale: 2.0,
                ..LengthParams::default()
            }
            .evaluate(&input, ctx)
            .unwrap();
            let frizzed = FrizzParams::default().evaluate(&stretched, ctx).unwrap();
            let propagated = PropagationParams::default().evaluate(&frizzed, ctx).unwrap();
            let multiplied = MultiplierParams::default().evaluate(&propagated, ctx).unwrap();

            assert_eq!(propagated.strand_count(), 7 + 6 * 3);
            assert_eq!(multiplied.strand_count(), 25 + 24 * 2);
            assert_eq!(multiplied.point_count(6), 0);
            assert_eq!(multiplied.strand_ids()[6], StrandId(99));
            assert!(multiplied.validate().is_ok());
        });
    }

    #[test]
    fn test_out_of_range_parameters_clamped() {
        let p = LengthParams {
            scale: -2.0,
            randomness: 7.0,
            ..LengthParams::default()
        }
        .sanitized();
        assert_eq!(p.scale, 0.0);
        assert_eq!(p.randomness, 1.0);
        assert_eq!(
            MultiplierParams {
                copies: 1000,
                ..MultiplierParams::default()
            }
            .sanitized()
            .copies,
            MAX_COPIES
        );
    }

    #[test]
    fn test_empty_store_is_fine() {
        let empty = StrandStore::new(StrandKind::Hair);
        with_ctx(|ctx| {
            assert!(LengthParams::default().evaluate(&empty, ctx).unwrap().is_empty());
            assert!(PropagationParams::default().evaluate(&empty, ctx).unwrap().is_empty());
            assert!(MultiplierParams::default().evaluate(&empty, ctx).unwrap().is_empty());
        });
    }
}
