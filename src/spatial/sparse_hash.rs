//! Sparse hash grid for efficient 3D neighbour queries

use ahash::AHashMap;
use glam::Vec3;
use ordered_float::OrderedFloat;

type Cell = (i32, i32, i32);

/// Rings walked before falling back to a linear scan
const MAX_RING_SEARCH: i32 = 6;

/// Sparse hash grid over point indices
///
/// Stores indices into a caller-owned position slice; the slice passed to
/// queries must be the one the grid was built from.
#[derive(Debug, Clone)]
pub struct SparseHashGrid {
    cell_size: f32,
    cells: AHashMap<Cell, Vec<usize>>,
    min_cell: Cell,
    max_cell: Cell,
    len: usize,
}

impl SparseHashGrid {
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 1e-6 {
            cell_size
        } else {
            1.0
        };
        Self {
            cell_size,
            cells: AHashMap::new(),
            min_cell: (i32::MAX, i32::MAX, i32::MAX),
            max_cell: (i32::MIN, i32::MIN, i32::MIN),
            len: 0,
        }
    }

    /// Build a grid holding every position
    pub fn from_points(cell_size: f32, positions: &[Vec3]) -> Self {
        let mut grid = Self::new(cell_size);
        for (i, &pos) in positions.iter().enumerate() {
            grid.insert(i, pos);
        }
        grid
    }

    #[inline]
    fn cell_coord(&self, pos: Vec3) -> Cell {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        )
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
        self.min_cell = (i32::MAX, i32::MAX, i32::MAX);
        self.max_cell = (i32::MIN, i32::MIN, i32::MIN);
    }

    pub fn insert(&mut self, index: usize, pos: Vec3) {
        let coord = self.cell_coord(pos);
        self.min_cell = (
            self.min_cell.0.min(coord.0),
            self.min_cell.1.min(coord.1),
            self.min_cell.2.min(coord.2),
        );
        self.max_cell = (
            self.max_cell.0.max(coord.0),
            self.max_cell.1.max(coord.1),
            self.max_cell.2.max(coord.2),
        );
        self.cells.entry(coord).or_default().push(index);
        self.len += 1;
    }

    /// Query all indices in the 3x3x3 neighbourhood of `pos`
    pub fn query_neighbors(&self, pos: Vec3) -> impl Iterator<Item = usize> + '_ {
        let (cx, cy, cz) = self.cell_coord(pos);

        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).flat_map(move |dz| {
                    self.cells
                        .get(&(cx + dx, cy + dy, cz + dz))
                        .into_iter()
                        .flatten()
                        .copied()
                })
            })
        })
    }

    /// Distance to the closest stored point, if any
    pub fn nearest_distance(&self, pos: Vec3, positions: &[Vec3]) -> Option<f32> {
        self.k_nearest(pos, positions, 1, None).first().map(|&(_, d)| d)
    }

    /// The `k` closest stored points as `(index, distance)`, nearest first
    ///
    /// Rings of cells are searched outward until no unvisited cell can hold a
    /// closer point. Ties resolve by index so results are deterministic.
    pub fn k_nearest(
        &self,
        pos: Vec3,
        positions: &[Vec3],
        k: usize,
        exclude: Option<usize>,
    ) -> Vec<(usize, f32)> {
        if k == 0 || self.len == 0 {
            return Vec::new();
        }

        let (cx, cy, cz) = self.cell_coord(pos);
        let max_ring = [
            (cx - self.min_cell.0).abs(),
            (self.max_cell.0 - cx).abs(),
            (cy - self.min_cell.1).abs(),
            (self.max_cell.1 - cy).abs(),
            (cz - self.min_cell.2).abs(),
            (self.max_cell.2 - cz).abs(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        let mut best: Vec<(usize, f32)> = Vec::new();
        for ring in 0..=max_ring.min(MAX_RING_SEARCH) {
            for dx in -ring..=ring {
                for dy in -ring..=ring {
                    for dz in -ring..=ring {
                        if dx.abs().max(dy.abs()).max(dz.abs()) != ring {
                            continue;
                        }
                        let Some(cell) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                            continue;
                        };
                        for &i in cell {
                            if Some(i) == exclude {
                                continue;
                            }
                            if let Some(p) = positions.get(i) {
                                best.push((i, pos.distance(*p)));
                            }
                        }
                    }
                }
            }

            best.sort_by_key(|&(i, d)| (OrderedFloat(d), i));
            best.truncate(k);

            // Anything beyond this ring is farther than ring * cell_size.
            if best.len() == k && best[k - 1].1 <= ring as f32 * self.cell_size {
                return best;
            }
        }

        if max_ring <= MAX_RING_SEARCH {
            return best;
        }

        // Sparse data far from the query: a linear scan beats walking rings.
        let mut all: Vec<(usize, f32)> = self
            .cells
            .values()
            .flatten()
            .copied()
            .filter(|&i| Some(i) != exclude)
            .filter_map(|i| positions.get(i).map(|p| (i, pos.distance(*p))))
            .collect();
        all.sort_by_key(|&(i, d)| (OrderedFloat(d), i));
        all.truncate(k);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_k_nearest_matches_brute_force() {
        let positions: Vec<Vec3> = (0..200)
            .map(|i| {
                let f = i as f32;
                Vec3::new((f * 1.37).sin() * 10.0, (f * 0.71).cos() * 10.0, (f * 0.13).sin())
            })
            .collect();
        let grid = SparseHashGrid::from_points(1.5, &positions);
        let query = Vec3::new(0.3, -2.0, 0.1);

        let found = grid.k_nearest(query, &positions, 5, None);

        let mut brute: Vec<(usize, f32)> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| (i, query.distance(*p)))
            .collect();
        brute.sort_by_key(|&(i, d)| (OrderedFloat(d), i));
        brute.truncate(5);

        assert_eq!(found, brute);
    }

    #[test]
    fn test_exclude_skips_self() {
        let positions = line(10);
        let grid = SparseHashGrid::from_points(1.0, &positions);
        let found = grid.k_nearest(positions[4], &positions, 1, Some(4));
        assert_eq!(found.len(), 1);
        assert!((found[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_far_query_still_finds_points() {
        let positions = line(3);
        let grid = SparseHashGrid::from_points(0.5, &positions);
        let found = grid.k_nearest(Vec3::new(100.0, 0.0, 0.0), &positions, 1, None);
        assert_eq!(found[0].0, 2);
    }

    #[test]
    fn test_empty_grid() {
        let grid = SparseHashGrid::new(1.0);
        assert!(grid.is_empty());
        assert!(grid.nearest_distance(Vec3::ZERO, &[]).is_none());
    }

    #[test]
    fn test_neighbors_cover_adjacent_cells() {
        let positions = line(5);
        let grid = SparseHashGrid::from_points(1.0, &positions);
        let mut near: Vec<usize> = grid.query_neighbors(Vec3::new(2.0, 0.0, 0.0)).collect();
        near.sort_unstable();
        assert_eq!(near, vec![1, 2, 3]);
    }
}
