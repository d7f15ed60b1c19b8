//! Host-owned distribution and grounding surfaces
//!
//! The engine reads meshes through [`MeshProvider`] and never mutates them.
//! [`Mesh`] is the in-process implementation used by the CLI and tests; hosts
//! wrap their own geometry behind the same trait.

pub mod curves;
pub mod surface;

use glam::{Affine3A, Vec2, Vec3};

use crate::core::types::mix_pair;

pub use curves::CurveSet;
pub use surface::{closest_point, SurfaceDependency, SurfaceFrame};

/// Read-only view of a triangle mesh supplied by the host
pub trait MeshProvider: Send + Sync {
    /// Vertex positions in mesh local space
    fn positions(&self) -> &[Vec3];

    /// Triangle vertex indices
    fn triangles(&self) -> &[[u32; 3]];

    /// Per-triangle corner UVs, parallel to [`triangles`](Self::triangles)
    fn face_uvs(&self) -> Option<&[[Vec2; 3]]>;

    /// Monotonic counter bumped whenever connectivity changes
    fn topology_version(&self) -> u64;

    /// Monotonic counter bumped on any edit (positions, topology, transform)
    fn content_version(&self) -> u64;

    /// Mesh local to world transform
    fn transform(&self) -> Affine3A;
}

/// Corner positions of a triangle in mesh local space
pub fn triangle_corners(mesh: &dyn MeshProvider, face: usize) -> Option<[Vec3; 3]> {
    let tri = mesh.triangles().get(face)?;
    let positions = mesh.positions();
    Some([
        *positions.get(tri[0] as usize)?,
        *positions.get(tri[1] as usize)?,
        *positions.get(tri[2] as usize)?,
    ])
}

/// Area of one triangle in mesh local space
pub fn triangle_area(mesh: &dyn MeshProvider, face: usize) -> f32 {
    triangle_corners(mesh, face)
        .map(|[a, b, c]| (b - a).cross(c - a).length() * 0.5)
        .unwrap_or(0.0)
}

/// Area of one triangle in UV space (zero when the mesh has no UVs)
pub fn triangle_uv_area(mesh: &dyn MeshProvider, face: usize) -> f32 {
    mesh.face_uvs()
        .and_then(|uvs| uvs.get(face))
        .map(|[a, b, c]| ((*b - *a).perp_dot(*c - *a)).abs() * 0.5)
        .unwrap_or(0.0)
}

/// Unit face normal in mesh local space
pub fn triangle_normal(mesh: &dyn MeshProvider, face: usize) -> Vec3 {
    triangle_corners(mesh, face)
        .map(|[a, b, c]| (b - a).cross(c - a).normalize_or_zero())
        .filter(|n| *n != Vec3::ZERO)
        .unwrap_or(Vec3::Y)
}

/// Total surface area in mesh local space
pub fn surface_area(mesh: &dyn MeshProvider) -> f32 {
    (0..mesh.triangles().len())
        .map(|f| triangle_area(mesh, f))
        .sum()
}

/// Stable hash of the mesh connectivity
///
/// Unlike [`MeshProvider::topology_version`] this survives a save/reload
/// cycle, so persisted root and grounding caches key on it.
pub fn topology_fingerprint(mesh: &dyn MeshProvider) -> u64 {
    let mut hash = mix_pair(mesh.positions().len() as u64, mesh.triangles().len() as u64);
    for tri in mesh.triangles() {
        hash = mix_pair(hash, tri[0] as u64);
        hash = mix_pair(hash, tri[1] as u64);
        hash = mix_pair(hash, tri[2] as u64);
    }
    hash
}

/// Simple owned triangle mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    face_uvs: Option<Vec<[Vec2; 3]>>,
    transform: Affine3A,
    topology_version: u64,
    content_version: u64,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            triangles,
            face_uvs: None,
            transform: Affine3A::IDENTITY,
            topology_version: 1,
            content_version: 1,
        }
    }

    /// Flat grid in the XZ plane at y = 0, normals facing +Y, with UVs
    ///
    /// `segments` quads per side, two triangles each.
    pub fn plane(size: f32, segments: u32) -> Self {
        let segments = segments.max(1);
        let step = size / segments as f32;
        let half = size * 0.5;
        let row = segments + 1;

        let mut positions = Vec::with_capacity((row * row) as usize);
        let mut uvs = Vec::with_capacity((row * row) as usize);
        for z in 0..row {
            for x in 0..row {
                positions.push(Vec3::new(
                    -half + x as f32 * step,
                    0.0,
                    -half + z as f32 * step,
                ));
                uvs.push(Vec2::new(
                    x as f32 / segments as f32,
                    z as f32 / segments as f32,
                ));
            }
        }

        let mut triangles = Vec::with_capacity((segments * segments * 2) as usize);
        let mut face_uvs = Vec::with_capacity(triangles.capacity());
        for z in 0..segments {
            for x in 0..segments {
                let i0 = z * row + x;
                let i1 = i0 + 1;
                let i2 = i0 + row;
                let i3 = i2 + 1;
                // Winding chosen so (b - a) x (c - a) points along +Y.
                for tri in [[i0, i2, i1], [i1, i2, i3]] {
                    face_uvs.push([
                        uvs[tri[0] as usize],
                        uvs[tri[1] as usize],
                        uvs[tri[2] as usize],
                    ]);
                    triangles.push(tri);
                }
            }
        }

        let mut mesh = Self::new(positions, triangles);
        mesh.face_uvs = Some(face_uvs);
        mesh
    }

    pub fn with_face_uvs(mut self, uvs: Vec<[Vec2; 3]>) -> Self {
        self.face_uvs = Some(uvs);
        self.content_version += 1;
        self
    }

    /// Copy with a new transform (topology preserved)
    pub fn with_transform(&self, transform: Affine3A) -> Self {
        let mut next = self.clone();
        next.transform = transform;
        next.content_version += 1;
        next
    }

    /// Copy with deformed vertex positions (topology preserved)
    ///
    /// Returns `None` if the vertex count differs, since that would be a
    /// topology change.
    pub fn with_positions(&self, positions: Vec<Vec3>) -> Option<Self> {
        if positions.len() != self.positions.len() {
            return None;
        }
        let mut next = self.clone();
        next.positions = positions;
        next.content_version += 1;
        Some(next)
    }

    /// Copy with new connectivity, bumping the topology version
    pub fn with_topology(&self, positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            triangles,
            face_uvs: None,
            transform: self.transform,
            topology_version: self.topology_version + 1,
            content_version: self.content_version + 1,
        }
    }
}

impl MeshProvider for Mesh {
    fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    fn face_uvs(&self) -> Option<&[[Vec2; 3]]> {
        self.face_uvs.as_deref()
    }

    fn topology_version(&self) -> u64 {
        self.topology_version
    }

    fn content_version(&self) -> u64 {
        self.content_version
    }

    fn transform(&self) -> Affine3A {
        self.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_layout() {
        let mesh = Mesh::plane(2.0, 2);
        assert_eq!(mesh.positions().len(), 9);
        assert_eq!(mesh.triangles().len(), 8);
        assert!((surface_area(&mesh) - 4.0).abs() < 1e-5);
        assert_eq!(triangle_normal(&mesh, 0), Vec3::Y);
    }

    #[test]
    fn test_plane_uv_area_sums_to_one() {
        let mesh = Mesh::plane(3.0, 4);
        let total: f32 = (0..mesh.triangles().len())
            .map(|f| triangle_uv_area(&mesh, f))
            .sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deform_keeps_topology_version() {
        let mesh = Mesh::plane(1.0, 1);
        let moved: Vec<Vec3> = mesh.positions().iter().map(|p| *p + Vec3::Y).collect();
        let deformed = mesh.with_positions(moved).unwrap();
        assert_eq!(deformed.topology_version(), mesh.topology_version());
        assert!(deformed.content_version() > mesh.content_version());
        assert_eq!(topology_fingerprint(&deformed), topology_fingerprint(&mesh));
    }

    #[test]
    fn test_topology_change_bumps_version() {
        let mesh = Mesh::plane(1.0, 1);
        let changed = mesh.with_topology(mesh.positions().to_vec(), vec![[0, 2, 1]]);
        assert_eq!(changed.topology_version(), mesh.topology_version() + 1);
        assert_ne!(topology_fingerprint(&changed), topology_fingerprint(&mesh));
    }

    #[test]
    fn test_vertex_count_change_is_not_a_deform() {
        let mesh = Mesh::plane(1.0, 1);
        assert!(mesh.with_positions(vec![Vec3::ZERO]).is_none());
    }
}
