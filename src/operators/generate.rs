//! Strand generating operators: guides from a mesh or curves, hair from guides

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::context::EvalContext;
use super::state::OperatorState;
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::types::{StrandId, StrandKind};
use crate::identity::combine_by_id;
use crate::mesh::curves::resample_polyline;
use crate::mesh::{closest_point, surface_area, triangle_normal, MeshProvider};
use crate::roots::{resolve_roots, DistributionMethod, RootSettings, RootSource};
use crate::spatial::SparseHashGrid;
use crate::strands::{ChannelData, ChannelScope, GroupSet, NewStrand, StrandStore};

fn clamp_points(points: usize, config: &EngineConfig) -> usize {
    points.clamp(2, config.max_points_per_strand.max(2))
}

fn clamp_length(length: f32) -> f32 {
    if length.is_finite() {
        length.max(0.0)
    } else {
        1.0
    }
}

// === GUIDES FROM MESH ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidesFromMeshParams {
    /// Distribution mesh source name
    pub mesh: String,
    pub roots: RootSettings,
    pub length: f32,
    pub points_per_strand: usize,
}

impl Default for GuidesFromMeshParams {
    fn default() -> Self {
        Self {
            mesh: "distribution".into(),
            roots: RootSettings::default(),
            length: 1.0,
            points_per_strand: 5,
        }
    }
}

impl GuidesFromMeshParams {
    pub fn sanitized(mut self, config: &EngineConfig) -> Self {
        self.roots = self.roots.sanitized(config);
        self.length = clamp_length(self.length);
        self.points_per_strand = clamp_points(self.points_per_strand, config);
        self
    }

    /// Straight guides grown along the surface normal, in mesh local space
    pub fn evaluate(&self, ctx: &EvalContext<'_>, state: &OperatorState) -> Result<StrandStore> {
        let mut store = StrandStore::new(StrandKind::Guides);
        let Some(mesh) = ctx.mesh(&self.mesh) else {
            return Ok(store);
        };
        let source = RootSource {
            mesh: Some(mesh),
            guides: None,
        };
        let roots = resolve_roots(&self.roots, &source, ctx.config, &state.roots);
        let ids: Vec<StrandId> = roots.iter().map(|r| r.id).collect();
        let segments = (self.points_per_strand - 1) as f32;

        let strands = combine_by_id(&ids, ctx.config.parallel_threshold, |i, id| {
            let root = &roots[i];
            let origin = root.local_position(mesh).unwrap_or(Vec3::ZERO);
            let normal = triangle_normal(mesh, root.surface.face as usize);
            let points = (0..self.points_per_strand)
                .map(|j| origin + normal * self.length * (j as f32 / segments))
                .collect();
            NewStrand {
                surface: Some(root.surface),
                ..NewStrand::new(id, points)
            }
        })?;

        store.append_strands(strands);
        store.set_transform(mesh.transform());
        Ok(store)
    }
}

// === GUIDES FROM CURVES ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidesFromCurvesParams {
    pub curves: String,
    /// Resample to this many points; 0 keeps the curve's own points
    pub points_per_strand: usize,
    /// Bind roots to the closest point of this mesh
    pub surface: Option<String>,
}

impl Default for GuidesFromCurvesParams {
    fn default() -> Self {
        Self {
            curves: "curves".into(),
            points_per_strand: 0,
            surface: None,
        }
    }
}

impl GuidesFromCurvesParams {
    pub fn sanitized(mut self, config: &EngineConfig) -> Self {
        if self.points_per_strand != 0 {
            self.points_per_strand = clamp_points(self.points_per_strand, config);
        }
        self
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<StrandStore> {
        let mut store = StrandStore::new(StrandKind::Guides);
        let Some(curves) = ctx.sources.curves(&self.curves) else {
            tracing::debug!(curves = %self.curves, "curve source not found");
            return Ok(store);
        };
        let mesh = self.surface.as_deref().and_then(|name| ctx.mesh(name));
        let to_mesh = mesh.map(|m| m.transform().inverse() * curves.transform);

        let strands = curves
            .curves
            .iter()
            .filter(|c| !c.is_empty())
            .enumerate()
            .map(|(i, curve)| {
                let points = if self.points_per_strand == 0 {
                    curve.clone()
                } else {
                    resample_polyline(curve, self.points_per_strand)
                };
                let surface = match (mesh, to_mesh) {
                    (Some(m), Some(xf)) => closest_point(m, xf.transform_point3(points[0])),
                    _ => None,
                };
                NewStrand {
                    surface,
                    ..NewStrand::new(StrandId(i as u64 + 1), points)
                }
            })
            .collect();

        store.append_strands(strands);
        store.set_transform(curves.transform);
        Ok(store)
    }
}

// === HAIR FROM GUIDES ===

/// How hair strands take their shape from nearby guides
///
/// Weights are computed in 3D from root positions in mesh local space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideBlend {
    /// Inverse squared distance over the nearest guides
    #[default]
    InverseDistance,
    /// Shape of the single nearest guide
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HairFromGuidesParams {
    pub mesh: String,
    pub roots: RootSettings,
    pub blend: GuideBlend,
    pub points_per_strand: usize,
}

impl Default for HairFromGuidesParams {
    fn default() -> Self {
        Self {
            mesh: "distribution".into(),
            roots: RootSettings {
                count: 1000,
                ..RootSettings::default()
            },
            blend: GuideBlend::InverseDistance,
            points_per_strand: 5,
        }
    }
}

/// Guide shape data prepared once per evaluation
///
/// Guides without points are left out; `guides` maps each field entry back to
/// its strand in the guide store.
struct GuideField {
    guides: Vec<usize>,
    roots: Vec<Vec3>,
    /// Resampled points relative to the root
    shapes: Vec<Vec<Vec3>>,
    grid: SparseHashGrid,
}

impl GuideField {
    fn build(guides: &StrandStore, mesh: &dyn MeshProvider, points: usize) -> Self {
        let to_mesh = mesh.transform().inverse() * guides.transform();
        let mut indices = Vec::with_capacity(guides.strand_count());
        let mut roots = Vec::with_capacity(guides.strand_count());
        let mut shapes = Vec::with_capacity(guides.strand_count());
        for i in 0..guides.strand_count() {
            let local: Vec<Vec3> = guides
                .strand_points(i)
                .iter()
                .map(|p| to_mesh.transform_point3(*p))
                .collect();
            let resampled = resample_polyline(&local, points);
            let Some(&root) = resampled.first() else {
                continue;
            };
            indices.push(i);
            roots.push(root);
            shapes.push(resampled.iter().map(|p| *p - root).collect());
        }
        let spacing = (surface_area(mesh) / roots.len().max(1) as f32).sqrt();
        let grid = SparseHashGrid::from_points(spacing, &roots);
        Self {
            guides: indices,
            roots,
            shapes,
            grid,
        }
    }

    fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// `(guide index, weight)` pairs summing to one, nearest first
    fn weights(&self, at: Vec3, blend: GuideBlend, neighbors: usize) -> Vec<(usize, f32)> {
        let k = match blend {
            GuideBlend::Nearest => 1,
            GuideBlend::InverseDistance => neighbors.max(1),
        };
        let nearest = self.grid.k_nearest(at, &self.roots, k, None);
        if let Some(&(i, d)) = nearest.first() {
            if d <= 1e-6 || nearest.len() == 1 {
                return vec![(i, 1.0)];
            }
        }
        let raw: Vec<(usize, f32)> = nearest
            .iter()
            .map(|&(i, d)| (i, 1.0 / (d * d).max(1e-12)))
            .collect();
        let total: f32 = raw.iter().map(|(_, w)| w).sum();
        raw.into_iter().map(|(i, w)| (i, w / total)).collect()
    }
}

impl HairFromGuidesParams {
    pub fn sanitized(mut self, config: &EngineConfig) -> Self {
        self.roots = self.roots.sanitized(config);
        self.points_per_strand = clamp_points(self.points_per_strand, config);
        self
    }

    pub fn evaluate(
        &self,
        guides: &StrandStore,
        ctx: &EvalContext<'_>,
        state: &OperatorState,
    ) -> Result<StrandStore> {
        if self.roots.method == DistributionMethod::GuidesAsHair {
            let mut hair = guides.clone();
            hair.set_kind(StrandKind::Hair);
            return Ok(hair);
        }

        let mut hair = StrandStore::new(StrandKind::Hair);
        let Some(mesh) = ctx.mesh(&self.mesh) else {
            return Ok(hair);
        };
        if guides.is_empty() {
            tracing::debug!("no guides to interpolate; hair is empty");
            return Ok(hair);
        }

        let source = RootSource {
            mesh: Some(mesh),
            guides: Some(guides),
        };
        let roots = resolve_roots(&self.roots, &source, ctx.config, &state.roots);
        let field = GuideField::build(guides, mesh, self.points_per_strand);
        if field.is_empty() {
            tracing::debug!("guides have no points; hair is empty");
            return Ok(hair);
        }
        let ids: Vec<StrandId> = roots.iter().map(|r| r.id).collect();
        let neighbors = ctx.config.guide_neighbors;

        let blended = combine_by_id(&ids, ctx.config.parallel_threshold, |i, id| {
            let root = &roots[i];
            let origin = root.local_position(mesh).unwrap_or(Vec3::ZERO);
            let weights = field.weights(origin, self.blend, neighbors);
            let points: Vec<Vec3> = (0..self.points_per_strand)
                .map(|j| {
                    origin
                        + weights
                            .iter()
                            .map(|&(g, w)| field.shapes[g][j] * w)
                            .sum::<Vec3>()
                })
                .collect();
            let weights: Vec<(usize, f32)> = weights
                .into_iter()
                .map(|(g, w)| (field.guides[g], w))
                .collect();
            (
                NewStrand {
                    surface: Some(root.surface),
                    groups: weights
                        .first()
                        .map(|&(g, _)| guides.strand_groups(g).clone())
                        .unwrap_or_else(GroupSet::new),
                    ..NewStrand::new(id, points)
                },
                weights,
            )
        })?;

        let (strands, weights): (Vec<NewStrand>, Vec<Vec<(usize, f32)>>) =
            blended.into_iter().unzip();
        hair.append_strands(strands);
        inherit_root_channels(&mut hair, guides, &weights);
        hair.set_transform(mesh.transform());
        Ok(hair)
    }
}

/// Carry per-strand guide channels onto hair: floats are blended with the
/// interpolation weights, other types copy the nearest guide's value
fn inherit_root_channels(hair: &mut StrandStore, guides: &StrandStore, weights: &[Vec<(usize, f32)>]) {
    for channel in guides.root_channels() {
        let data = match channel.data.as_ref() {
            ChannelData::Float(values) => ChannelData::Float(
                weights
                    .iter()
                    .map(|w| w.iter().map(|&(g, wt)| values[g] * wt).sum())
                    .collect(),
            ),
            other => {
                let nearest: Vec<usize> = weights
                    .iter()
                    .map(|w| w.first().map_or(0, |&(g, _)| g))
                    .collect();
                other.gather(&nearest)
            }
        };
        hair.channels_mut().add(&channel.name, ChannelScope::Strand, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::EngineContext;
    use crate::mesh::Mesh;
    use crate::operators::context::SourceSet;
    use crate::strands::GroupTag;
    use std::sync::Arc;

    fn sources() -> SourceSet {
        let mut s = SourceSet::new();
        s.set_mesh("distribution", Arc::new(Mesh::plane(2.0, 4)));
        s
    }

    fn guides(ctx: &EvalContext<'_>) -> StrandStore {
        let params = GuidesFromMeshParams {
            roots: RootSettings {
                method: DistributionMethod::PerVertex,
                ..RootSettings::default()
            },
            ..GuidesFromMeshParams::default()
        };
        params.evaluate(ctx, &OperatorState::default()).unwrap()
    }

    #[test]
    fn test_guides_grow_along_normal() {
        let engine = EngineContext::with_defaults();
        let sources = sources();
        let ctx = EvalContext::new(&sources, engine.config());
        let store = guides(&ctx);
        assert_eq!(store.strand_count(), 25);
        assert_eq!(store.vertex_count(), 125);
        let tip = store.strand_points(0)[4];
        let root = store.root(0).unwrap();
        assert!((tip - root - Vec3::Y).length() < 1e-5);
        assert!(store.validate().is_ok());
    }

    #[test]
    fn test_missing_mesh_gives_empty_guides() {
        let engine = EngineContext::with_defaults();
        let sources = SourceSet::new();
        let ctx = EvalContext::new(&sources, engine.config());
        let store = GuidesFromMeshParams::default()
            .evaluate(&ctx, &OperatorState::default())
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_hair_matches_identical_guides() {
        let engine = EngineContext::with_defaults();
        let sources = sources();
        let ctx = EvalContext::new(&sources, engine.config());
        let guides = guides(&ctx);
        let hair = HairFromGuidesParams::default()
            .evaluate(&guides, &ctx, &OperatorState::default())
            .unwrap();
        assert_eq!(hair.kind(), StrandKind::Hair);
        assert_eq!(hair.strand_count(), 1000);
        // Every guide is a unit strand along +Y, so every hair is too.
        for i in 0..hair.strand_count() {
            let pts = hair.strand_points(i);
            assert!((pts[4] - pts[0] - Vec3::Y).length() < 1e-4);
            assert!(pts[0].y.abs() < 1e-5);
        }
    }

    #[test]
    fn test_hair_inherits_groups_and_channels() {
        let engine = EngineContext::with_defaults();
        let sources = sources();
        let ctx = EvalContext::new(&sources, engine.config());
        let mut guides = guides(&ctx);
        let n = guides.strand_count();
        for g in guides.groups_mut() {
            g.insert(GroupTag::Index(3));
        }
        guides
            .channels_mut()
            .add("width", ChannelScope::Strand, ChannelData::Float(vec![2.0; n]));
        let hair = HairFromGuidesParams::default()
            .evaluate(&guides, &ctx, &OperatorState::default())
            .unwrap();
        assert!(hair.strand_groups(0).contains(&GroupTag::Index(3)));
        let width = hair.channels().get("width").unwrap();
        assert!((width.data.get_f32(7).unwrap() - 2.0).abs() < 1e-4);
        assert!(hair.validate().is_ok());
    }

    #[test]
    fn test_guides_as_hair_copies_guides() {
        let engine = EngineContext::with_defaults();
        let sources = sources();
        let ctx = EvalContext::new(&sources, engine.config());
        let guides = guides(&ctx);
        let params = HairFromGuidesParams {
            roots: RootSettings {
                method: DistributionMethod::GuidesAsHair,
                ..RootSettings::default()
            },
            ..HairFromGuidesParams::default()
        };
        let hair = params
            .evaluate(&guides, &ctx, &OperatorState::default())
            .unwrap();
        assert_eq!(hair.strand_ids(), guides.strand_ids());
        assert_eq!(hair.points(), guides.points());
    }

    #[test]
    fn test_curves_become_guides() {
        let engine = EngineContext::with_defaults();
        let mut sources = sources();
        sources.set_curves(
            "curves",
            crate::mesh::CurveSet::new(vec![
                vec![Vec3::new(0.5, 0.2, 0.5), Vec3::new(0.5, 2.2, 0.5)],
                vec![],
            ]),
        );
        let ctx = EvalContext::new(&sources, engine.config());
        let params = GuidesFromCurvesParams {
            points_per_strand: 3,
            surface: Some("distribution".into()),
            ..GuidesFromCurvesParams::default()
        };
        let store = params.evaluate(&ctx).unwrap();
        assert_eq!(store.strand_count(), 1);
        assert_eq!(store.point_count(0), 3);
        assert!(store.surface_dependency(0).is_some());
    }
}
