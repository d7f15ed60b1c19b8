//! Host-owned curve sets used as guide sources

use glam::{Affine3A, Vec3};

/// Polylines in their own local space
#[derive(Debug, Clone)]
pub struct CurveSet {
    pub curves: Vec<Vec<Vec3>>,
    pub transform: Affine3A,
}

impl CurveSet {
    pub fn new(curves: Vec<Vec<Vec3>>) -> Self {
        Self {
            curves,
            transform: Affine3A::IDENTITY,
        }
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

/// Resample a polyline to `count` points evenly spaced by arc length
///
/// Degenerate inputs (fewer than two points, zero length) repeat the first
/// point.
pub fn resample_polyline(points: &[Vec3], count: usize) -> Vec<Vec3> {
    let count = count.max(2);
    let Some(&first) = points.first() else {
        return Vec::new();
    };

    let mut cumulative = Vec::with_capacity(points.len());
    let mut total = 0.0f32;
    cumulative.push(0.0);
    for pair in points.windows(2) {
        total += pair[0].distance(pair[1]);
        cumulative.push(total);
    }

    if points.len() < 2 || total <= f32::EPSILON {
        return vec![first; count];
    }

    let mut out = Vec::with_capacity(count);
    let mut seg = 0usize;
    for i in 0..count {
        let target = total * i as f32 / (count - 1) as f32;
        while seg + 2 < cumulative.len() && cumulative[seg + 1] < target {
            seg += 1;
        }
        let span = cumulative[seg + 1] - cumulative[seg];
        let t = if span > f32::EPSILON {
            ((target - cumulative[seg]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(points[seg].lerp(points[seg + 1], t));
    }
    out
}

/// Point at normalized arc length `t` along a polyline
pub fn sample_polyline(points: &[Vec3], t: f32) -> Option<Vec3> {
    match points.len() {
        0 => None,
        1 => Some(points[0]),
        _ => {
            let resampled = resample_polyline(points, 65);
            let f = t.clamp(0.0, 1.0) * 64.0;
            let i = (f.floor() as usize).min(63);
            Some(resampled[i].lerp(resampled[i + 1], f - i as f32))
        }
    }
}

/// Total arc length of a polyline
pub fn polyline_length(points: &[Vec3]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}
