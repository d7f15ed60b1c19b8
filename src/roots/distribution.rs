//! Root distribution methods
//!
//! Every method is a pure function of (mesh topology, face selection, count,
//! seed). Random methods draw from a per-root ChaCha stream keyed by the root's
//! strand id, never from a shared generator.

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{GeneratedRoot, RootSource};
use crate::core::types::StrandId;
use crate::identity::strand_rng;
use crate::mesh::{triangle_area, triangle_corners, triangle_uv_area, MeshProvider, SurfaceDependency};
use crate::spatial::SparseHashGrid;

/// How roots are placed on the distribution surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMethod {
    /// Area-stratified low-discrepancy placement
    Uniform,
    /// Random, weighted by UV area
    RandomUv,
    /// Random, weighted by surface area
    #[default]
    RandomArea,
    /// Random face, then random point on it
    RandomFace,
    /// One root per mesh vertex
    PerVertex,
    /// One root per face center
    FaceCenter,
    /// Hair roots taken from the guides' roots
    GuidesAsHair,
    /// Best-candidate placement with even spacing
    Even,
    /// Random area placement restricted to faces holding guide roots
    GuideFaces,
}

impl DistributionMethod {
    /// Methods whose root count comes from the source rather than the count parameter
    pub fn derives_count(&self) -> bool {
        matches!(
            self,
            DistributionMethod::PerVertex
                | DistributionMethod::FaceCenter
                | DistributionMethod::GuidesAsHair
        )
    }

    /// Methods that read the guide strand set
    pub fn needs_guides(&self) -> bool {
        matches!(
            self,
            DistributionMethod::GuidesAsHair | DistributionMethod::GuideFaces
        )
    }
}

// R2 low-discrepancy sequence constants (plastic number)
const R2_A1: f32 = 0.754_877_7;
const R2_A2: f32 = 0.569_840_3;

const SALT_FACE: u64 = 0xFACE;

/// Faces roots may be placed on: all faces, or the valid requested subset
pub fn selected_faces(mesh: &dyn MeshProvider, face_indices: Option<&[u32]>) -> Vec<u32> {
    let face_count = mesh.triangles().len() as u32;
    match face_indices {
        None => (0..face_count).collect(),
        Some(requested) => {
            let mut faces: Vec<u32> = requested
                .iter()
                .copied()
                .filter(|&f| f < face_count)
                .collect();
            faces.sort_unstable();
            faces.dedup();
            faces
        }
    }
}

/// Number of roots a method will produce for this source
pub fn resolved_count(
    method: DistributionMethod,
    requested: usize,
    source: &RootSource<'_>,
    faces: &[u32],
) -> usize {
    let Some(mesh) = source.mesh else {
        return match method {
            DistributionMethod::GuidesAsHair => guide_roots(source).len(),
            _ => 0,
        };
    };
    match method {
        DistributionMethod::PerVertex => face_vertices(mesh, faces).len(),
        DistributionMethod::FaceCenter => faces.len(),
        DistributionMethod::GuidesAsHair => guide_roots(source).len(),
        _ if faces.is_empty() => 0,
        _ => requested,
    }
}

/// Place `count` roots with ids `1..=count` (guide ids for GuidesAsHair)
pub fn distribute(
    method: DistributionMethod,
    count: usize,
    seed: u64,
    source: &RootSource<'_>,
    faces: &[u32],
    even_candidates: usize,
) -> Vec<GeneratedRoot> {
    if method == DistributionMethod::GuidesAsHair {
        return guide_roots(source);
    }
    let Some(mesh) = source.mesh else {
        return Vec::new();
    };
    if faces.is_empty() || count == 0 {
        return Vec::new();
    }
    let version = mesh.topology_version();

    match method {
        DistributionMethod::PerVertex => per_vertex(mesh, faces, version),
        DistributionMethod::FaceCenter => faces
            .iter()
            .enumerate()
            .map(|(i, &face)| GeneratedRoot {
                id: root_id(i),
                surface: SurfaceDependency::new(face, Vec3::splat(1.0 / 3.0), version),
            })
            .collect(),
        DistributionMethod::Uniform => uniform(mesh, faces, count, seed, version),
        DistributionMethod::RandomArea => {
            let cdf = WeightedFaces::by_area(mesh, faces);
            random_weighted(&cdf, count, seed, version)
        }
        DistributionMethod::RandomUv => {
            let cdf = WeightedFaces::by_uv_area(mesh, faces);
            if cdf.total <= f32::EPSILON {
                tracing::warn!("distribution mesh has no UV area; falling back to random area");
                let cdf = WeightedFaces::by_area(mesh, faces);
                random_weighted(&cdf, count, seed, version)
            } else {
                random_weighted(&cdf, count, seed, version)
            }
        }
        DistributionMethod::RandomFace => {
            let cdf = WeightedFaces::uniform(faces);
            random_weighted(&cdf, count, seed, version)
        }
        DistributionMethod::GuideFaces => {
            let guide_faces: Vec<u32> = {
                let mut f: Vec<u32> = guide_roots(source)
                    .iter()
                    .map(|r| r.surface.face)
                    .filter(|f| faces.binary_search(f).is_ok())
                    .collect();
                f.sort_unstable();
                f.dedup();
                f
            };
            let cdf = WeightedFaces::by_area(mesh, &guide_faces);
            random_weighted(&cdf, count, seed, version)
        }
        DistributionMethod::Even => even(mesh, faces, count, seed, version, even_candidates),
        DistributionMethod::GuidesAsHair => Vec::new(),
    }
}

fn root_id(index: usize) -> StrandId {
    StrandId(index as u64 + 1)
}

/// Roots of the guide strands that carry a surface binding
fn guide_roots(source: &RootSource<'_>) -> Vec<GeneratedRoot> {
    let Some(guides) = source.guides else {
        return Vec::new();
    };
    (0..guides.strand_count())
        .filter_map(|i| {
            let dep = guides.surface_dependency(i)?;
            Some(GeneratedRoot {
                id: guides.strand_ids()[i],
                surface: *dep,
            })
        })
        .collect()
}

fn face_vertices(mesh: &dyn MeshProvider, faces: &[u32]) -> Vec<u32> {
    let tris = mesh.triangles();
    let mut verts: Vec<u32> = faces
        .iter()
        .filter_map(|&f| tris.get(f as usize))
        .flat_map(|t| t.iter().copied())
        .collect();
    verts.sort_unstable();
    verts.dedup();
    verts
}

fn per_vertex(mesh: &dyn MeshProvider, faces: &[u32], version: u64) -> Vec<GeneratedRoot> {
    let tris = mesh.triangles();
    face_vertices(mesh, faces)
        .into_iter()
        .enumerate()
        .filter_map(|(i, vertex)| {
            // First selected face touching the vertex.
            faces.iter().find_map(|&face| {
                let tri = tris.get(face as usize)?;
                let corner = tri.iter().position(|&v| v == vertex)?;
                let mut bary = Vec3::ZERO;
                bary[corner] = 1.0;
                Some(GeneratedRoot {
                    id: root_id(i),
                    surface: SurfaceDependency::new(face, bary, version),
                })
            })
        })
        .collect()
}

/// Cumulative face weights for weighted face picking
struct WeightedFaces {
    faces: Vec<u32>,
    cumulative: Vec<f32>,
    total: f32,
}

impl WeightedFaces {
    fn from_weights(faces: &[u32], weight: impl Fn(u32) -> f32) -> Self {
        let mut cumulative = Vec::with_capacity(faces.len());
        let mut total = 0.0f32;
        for &f in faces {
            total += weight(f).max(0.0);
            cumulative.push(total);
        }
        Self {
            faces: faces.to_vec(),
            cumulative,
            total,
        }
    }

    fn by_area(mesh: &dyn MeshProvider, faces: &[u32]) -> Self {
        Self::from_weights(faces, |f| triangle_area(mesh, f as usize))
    }

    fn by_uv_area(mesh: &dyn MeshProvider, faces: &[u32]) -> Self {
        Self::from_weights(faces, |f| triangle_uv_area(mesh, f as usize))
    }

    fn uniform(faces: &[u32]) -> Self {
        Self::from_weights(faces, |_| 1.0)
    }

    /// Face at normalized position `t` in `[0, 1)` of the weight mass
    fn pick(&self, t: f32) -> Option<u32> {
        if self.faces.is_empty() || self.total <= 0.0 {
            return None;
        }
        let target = t.clamp(0.0, 1.0) * self.total;
        let i = self.cumulative.partition_point(|&c| c <= target);
        Some(self.faces[i.min(self.faces.len() - 1)])
    }
}

/// Fold a unit square sample onto the triangle
fn fold_barycentric(u: f32, v: f32) -> Vec3 {
    let (u, v) = if u + v > 1.0 { (1.0 - u, 1.0 - v) } else { (u, v) };
    Vec3::new(1.0 - u - v, u, v)
}

fn random_weighted(cdf: &WeightedFaces, count: usize, seed: u64, version: u64) -> Vec<GeneratedRoot> {
    (0..count)
        .filter_map(|i| {
            let id = root_id(i);
            let mut rng = strand_rng(seed, id);
            let face = cdf.pick(rng.gen::<f32>())?;
            let bary = fold_barycentric(rng.gen(), rng.gen());
            Some(GeneratedRoot {
                id,
                surface: SurfaceDependency::new(face, bary, version),
            })
        })
        .collect()
}

fn uniform(
    mesh: &dyn MeshProvider,
    faces: &[u32],
    count: usize,
    seed: u64,
    version: u64,
) -> Vec<GeneratedRoot> {
    let cdf = WeightedFaces::by_area(mesh, faces);
    let offset = strand_rng(seed, StrandId(SALT_FACE)).gen::<f32>();
    (0..count)
        .filter_map(|i| {
            let t = (i as f32 + offset) / count as f32;
            let face = cdf.pick(t)?;
            let n = i as f32 + 1.0;
            let bary = fold_barycentric((0.5 + R2_A1 * n).fract(), (0.5 + R2_A2 * n).fract());
            Some(GeneratedRoot {
                id: root_id(i),
                surface: SurfaceDependency::new(face, bary, version),
            })
        })
        .collect()
}

/// Best-candidate sampling: each root keeps the candidate farthest from
/// every root placed before it
fn even(
    mesh: &dyn MeshProvider,
    faces: &[u32],
    count: usize,
    seed: u64,
    version: u64,
    candidates: usize,
) -> Vec<GeneratedRoot> {
    let cdf = WeightedFaces::by_area(mesh, faces);
    let spacing = (cdf.total / count as f32).sqrt();
    let mut grid = SparseHashGrid::new(spacing);
    let mut placed: Vec<Vec3> = Vec::with_capacity(count);
    let mut roots = Vec::with_capacity(count);

    for i in 0..count {
        let id = root_id(i);
        let mut rng = strand_rng(seed, id);
        let mut best: Option<(f32, u32, Vec3, Vec3)> = None;
        for _ in 0..candidates.max(1) {
            let Some(face) = cdf.pick(rng.gen::<f32>()) else {
                continue;
            };
            let bary = fold_barycentric(rng.gen(), rng.gen());
            let Some([a, b, c]) = triangle_corners(mesh, face as usize) else {
                continue;
            };
            let pos = a * bary.x + b * bary.y + c * bary.z;
            let distance = grid.nearest_distance(pos, &placed).unwrap_or(f32::MAX);
            if best.as_ref().map_or(true, |(d, ..)| distance > *d) {
                best = Some((distance, face, bary, pos));
            }
        }
        if let Some((_, face, bary, pos)) = best {
            grid.insert(placed.len(), pos);
            placed.push(pos);
            roots.push(GeneratedRoot {
                id,
                surface: SurfaceDependency::new(face, bary, version),
            });
        }
    }
    roots
}

/// Standard deviation of nearest-neighbour distances; lower means more even
pub fn spacing_deviation(points: &[Vec3]) -> f32 {
    if points.len() < 2 {
        return 0.0;
    }
    let extent = points
        .iter()
        .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(lo, hi), p| {
            (lo.min(*p), hi.max(*p))
        });
    let diag = (extent.1 - extent.0).length().max(1e-3);
    let grid = SparseHashGrid::from_points(diag / (points.len() as f32).sqrt(), points);
    let distances: Vec<f32> = points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| grid.k_nearest(*p, points, 1, Some(i)).first().map(|&(_, d)| d))
        .collect();
    let n = distances.len() as f32;
    let mean = distances.iter().sum::<f32>() / n;
    (distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n).sqrt()
}
