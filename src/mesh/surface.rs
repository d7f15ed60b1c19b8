//! Surface dependencies: binding points to mesh faces
//!
//! A [`SurfaceDependency`] stores a face index and barycentric weights. The
//! bound point is recomputed from the current vertex positions, so it follows
//! deformation and transforms without searching the mesh again. A topology
//! change invalidates it.

use glam::{Mat3, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::{triangle_corners, MeshProvider};

/// Binding of a point to a mesh face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceDependency {
    pub face: u32,
    pub barycentric: Vec3,
    pub topology_version: u64,
}

impl SurfaceDependency {
    pub fn new(face: u32, barycentric: Vec3, topology_version: u64) -> Self {
        Self {
            face,
            barycentric,
            topology_version,
        }
    }

    /// Whether this binding still refers to the mesh's current topology
    pub fn is_valid_for(&self, mesh: &dyn MeshProvider) -> bool {
        self.topology_version == mesh.topology_version()
            && (self.face as usize) < mesh.triangles().len()
    }

    /// Same face and weights stamped with a new topology version
    pub fn restamped(&self, topology_version: u64) -> Self {
        Self {
            topology_version,
            ..*self
        }
    }

    /// Bound position in mesh local space
    pub fn local_position(&self, mesh: &dyn MeshProvider) -> Option<Vec3> {
        let [a, b, c] = triangle_corners(mesh, self.face as usize)?;
        Some(a * self.barycentric.x + b * self.barycentric.y + c * self.barycentric.z)
    }

    /// Bound position in world space
    pub fn world_position(&self, mesh: &dyn MeshProvider) -> Option<Vec3> {
        self.local_position(mesh)
            .map(|p| mesh.transform().transform_point3(p))
    }

    /// Interpolated UV at the bound position
    pub fn uv(&self, mesh: &dyn MeshProvider) -> Option<Vec2> {
        let [a, b, c] = mesh.face_uvs()?.get(self.face as usize)?;
        Some(*a * self.barycentric.x + *b * self.barycentric.y + *c * self.barycentric.z)
    }

    /// Orthonormal frame at the bound position, in world space
    pub fn world_frame(&self, mesh: &dyn MeshProvider) -> Option<SurfaceFrame> {
        let [a, b, c] = triangle_corners(mesh, self.face as usize)?;
        let xf = mesh.transform();
        let (a, b, c) = (
            xf.transform_point3(a),
            xf.transform_point3(b),
            xf.transform_point3(c),
        );
        let origin = a * self.barycentric.x + b * self.barycentric.y + c * self.barycentric.z;
        SurfaceFrame::from_triangle(origin, a, b, c)
    }
}

/// Tangent frame on a surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceFrame {
    pub origin: Vec3,
    /// Columns: tangent, normal, bitangent
    pub basis: Mat3,
}

impl SurfaceFrame {
    pub fn from_triangle(origin: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<Self> {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        let tangent = (b - a).normalize_or_zero();
        if normal == Vec3::ZERO || tangent == Vec3::ZERO {
            return None;
        }
        let bitangent = tangent.cross(normal);
        Some(Self {
            origin,
            basis: Mat3::from_cols(tangent, normal, bitangent),
        })
    }

    pub fn normal(&self) -> Vec3 {
        self.basis.y_axis
    }

    /// World space offset expressed in this frame
    pub fn to_local(&self, offset: Vec3) -> Vec3 {
        self.basis.transpose() * offset
    }

    /// Frame-local offset expressed in world space
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.basis * local
    }
}

/// Closest point on triangle `abc` to `p`, as barycentric weights
///
/// Region based solution from Ericson, "Real-Time Collision Detection" 5.1.5.
pub fn closest_barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return Vec3::X;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return Vec3::Y;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return Vec3::new(1.0 - v, v, 0.0);
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return Vec3::Z;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return Vec3::new(1.0 - w, 0.0, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return Vec3::new(0.0, 1.0 - w, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    Vec3::new(1.0 - v - w, v, w)
}

/// Closest surface binding for a point given in mesh local space
///
/// Linear scan over faces; ties resolve to the lowest face index.
pub fn closest_point(mesh: &dyn MeshProvider, p: Vec3) -> Option<SurfaceDependency> {
    let mut best: Option<(f32, SurfaceDependency)> = None;
    for face in 0..mesh.triangles().len() {
        let Some([a, b, c]) = triangle_corners(mesh, face) else {
            continue;
        };
        let bary = closest_barycentric(p, a, b, c);
        let q = a * bary.x + b * bary.y + c * bary.z;
        let dist = q.distance_squared(p);
        if best.as_ref().map_or(true, |(d, _)| dist < *d) {
            best = Some((
                dist,
                SurfaceDependency::new(face as u32, bary, mesh.topology_version()),
            ));
        }
    }
    best.map(|(_, dep)| dep)
}
