//! Strand identity: id allocation, per-strand randomness, id-keyed combination
//!
//! Per-strand work may run on any number of rayon workers. Results are always
//! merged through a map keyed by [`StrandId`], and random streams are seeded
//! from `(seed, id)`, so scheduling order never reaches the output.

use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::core::error::{Result, StackError};
use crate::core::types::{mix_pair, StrandId};
use crate::strands::StrandStore;

/// Hands out fresh ids above everything already in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Allocator whose ids are disjoint from every id in `store`
    pub fn after(store: &StrandStore) -> Self {
        Self::starting_at(store.max_id().map_or(1, |id| id.0 + 1))
    }

    pub fn allocate(&mut self) -> StrandId {
        let id = StrandId(self.next);
        self.next += 1;
        id
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// Ids for strands spawned from source strands
///
/// The `k`-th child of the source strand `parent` always gets
/// `base + parent * stride + k`. Children are keyed by their parent's id, so
/// reordering the sources never hands a child id to another parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedIds {
    base: u64,
    stride: u64,
}

impl DerivedIds {
    pub fn for_store(store: &StrandStore, per_source: usize) -> Self {
        Self {
            base: IdAllocator::after(store).peek(),
            stride: per_source.max(1) as u64,
        }
    }

    /// `None` once the id would leave the `u64` range
    pub fn id(&self, parent: StrandId, k: usize) -> Option<StrandId> {
        parent
            .0
            .checked_mul(self.stride)
            .and_then(|offset| offset.checked_add(self.base))
            .and_then(|id| id.checked_add(k as u64))
            .map(StrandId)
    }
}

/// Deterministic random stream for one strand
pub fn strand_rng(seed: u64, id: StrandId) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(mix_pair(seed, id.0))
}

/// Deterministic value in `[0, 1)` for one strand and purpose
pub fn strand_unit(seed: u64, id: StrandId, salt: u64) -> f32 {
    strand_rng(mix_pair(seed, salt), id).gen::<f32>()
}

/// Run `work` for every strand and return the results in `ids` order
///
/// Above `parallel_threshold` the work is spread with rayon; partial results
/// are gathered into a map keyed by id before being laid out, never by the
/// position a worker happened to produce them at.
pub fn combine_by_id<T, F>(ids: &[StrandId], parallel_threshold: usize, work: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, StrandId) -> T + Sync + Send,
{
    if ids.len() < parallel_threshold.max(1) {
        return Ok(ids.iter().enumerate().map(|(i, &id)| work(i, id)).collect());
    }

    // PARALLEL: strands are independent
    let results: Vec<(StrandId, T)> = ids
        .par_iter()
        .enumerate()
        .map(|(i, &id)| (id, work(i, id)))
        .collect();
    let mut by_id: AHashMap<StrandId, T> = results.into_iter().collect();

    ids.iter()
        .map(|id| {
            by_id
                .remove(id)
                .ok_or_else(|| StackError::Consistency(format!("{} produced no result", id)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StrandKind;
    use crate::strands::NewStrand;
    use glam::Vec3;

    #[test]
    fn test_allocator_skips_existing_ids() {
        let mut store = StrandStore::new(StrandKind::Hair);
        store.push_strand(NewStrand::new(StrandId(41), vec![Vec3::ZERO]));
        store.push_strand(NewStrand::new(StrandId(7), vec![Vec3::ZERO]));
        let mut alloc = IdAllocator::after(&store);
        assert_eq!(alloc.allocate(), StrandId(42));
        assert_eq!(alloc.allocate(), StrandId(43));
        assert_eq!(IdAllocator::after(&StrandStore::default()).peek(), 1);
    }

    #[test]
    fn test_derived_ids_are_disjoint_and_stable() {
        let mut store = StrandStore::new(StrandKind::Hair);
        store.push_strand(NewStrand::new(StrandId(10), vec![Vec3::ZERO]));
        let derived = DerivedIds::for_store(&store, 3);
        assert_eq!(derived.id(StrandId(0), 0), Some(StrandId(11)));
        assert_eq!(derived.id(StrandId(10), 2), Some(StrandId(43)));
        assert_eq!(derived, DerivedIds::for_store(&store.clone(), 3));
        assert_eq!(derived.id(StrandId(u64::MAX / 2), 0), None);
    }

    #[test]
    fn test_strand_rng_depends_on_id_only() {
        let a: u64 = strand_rng(5, StrandId(1)).gen();
        let b: u64 = strand_rng(5, StrandId(1)).gen();
        let c: u64 = strand_rng(5, StrandId(2)).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let u = strand_unit(5, StrandId(3), 9);
        assert!((0.0..1.0).contains(&u));
    }

    #[test]
    fn test_parallel_and_serial_combination_agree() {
        let ids: Vec<StrandId> = (0..2000).rev().map(StrandId).collect();
        let work = |_: usize, id: StrandId| strand_unit(1, id, 0);
        let serial = combine_by_id(&ids, usize::MAX, work).unwrap();
        let parallel = combine_by_id(&ids, 1, work).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_duplicate_ids_are_a_consistency_error() {
        let ids = vec![StrandId(1), StrandId(1)];
        let result = combine_by_id(&ids, 1, |i, _| i);
        assert!(matches!(result, Err(StackError::Consistency(_))));
    }
}
