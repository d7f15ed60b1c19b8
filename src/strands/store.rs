//! Strand Store: the data flowing between stack operators
//!
//! Strands are stored struct-of-arrays: one id, surface binding and group set
//! per strand, a flat point array addressed through per-strand offsets, and a
//! [`ChannelSet`]. Every array sits behind an `Arc`, so cloning a store is
//! cheap and writes copy only the array being written.

use std::ops::Range;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use glam::{Affine3A, Vec3};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, ChannelData, ChannelScope, ChannelSet};
use super::group::{GroupPattern, GroupSet};
use crate::core::error::{Result, StackError};
use crate::core::types::{Space, StrandId, StrandKind};
use crate::mesh::SurfaceDependency;

/// A strand to be appended to a store
#[derive(Debug, Clone)]
pub struct NewStrand {
    pub id: StrandId,
    pub points: Vec<Vec3>,
    pub surface: Option<SurfaceDependency>,
    pub groups: GroupSet,
    /// Strand whose per-strand channel values are copied, if any
    pub parent: Option<usize>,
}

impl NewStrand {
    pub fn new(id: StrandId, points: Vec<Vec3>) -> Self {
        Self {
            id,
            points,
            surface: None,
            groups: GroupSet::new(),
            parent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrandStore {
    kind: StrandKind,
    ids: Arc<Vec<StrandId>>,
    /// `strand_count + 1` prefix offsets into `points`
    offsets: Arc<Vec<u32>>,
    points: Arc<Vec<Vec3>>,
    surface: Arc<Vec<Option<SurfaceDependency>>>,
    groups: Arc<Vec<GroupSet>>,
    channels: ChannelSet,
    transform: Affine3A,
}

impl Default for StrandStore {
    fn default() -> Self {
        Self::new(StrandKind::Guides)
    }
}

impl StrandStore {
    pub fn new(kind: StrandKind) -> Self {
        Self {
            kind,
            ids: Arc::new(Vec::new()),
            offsets: Arc::new(vec![0]),
            points: Arc::new(Vec::new()),
            surface: Arc::new(Vec::new()),
            groups: Arc::new(Vec::new()),
            channels: ChannelSet::new(),
            transform: Affine3A::IDENTITY,
        }
    }

    // === ACCESSORS ===

    pub fn kind(&self) -> StrandKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: StrandKind) {
        self.kind = kind;
    }

    pub fn strand_count(&self) -> usize {
        self.ids.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn strand_ids(&self) -> &[StrandId] {
        &self.ids
    }

    pub fn id(&self, strand: usize) -> Option<StrandId> {
        self.ids.get(strand).copied()
    }

    /// Map from id to current array position
    pub fn index_map(&self) -> AHashMap<StrandId, usize> {
        self.ids.iter().enumerate().map(|(i, &id)| (id, i)).collect()
    }

    pub fn index_of(&self, id: StrandId) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    pub fn max_id(&self) -> Option<StrandId> {
        self.ids.iter().max().copied()
    }

    pub fn vertex_range(&self, strand: usize) -> Range<usize> {
        self.offsets[strand] as usize..self.offsets[strand + 1] as usize
    }

    pub fn point_count(&self, strand: usize) -> usize {
        self.vertex_range(strand).len()
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn strand_points(&self, strand: usize) -> &[Vec3] {
        &self.points[self.vertex_range(strand)]
    }

    /// Writable points of one strand (copies the shared point array once)
    pub fn strand_points_mut(&mut self, strand: usize) -> &mut [Vec3] {
        let range = self.vertex_range(strand);
        &mut Arc::make_mut(&mut self.points)[range]
    }

    pub fn points_mut(&mut self) -> &mut Vec<Vec3> {
        Arc::make_mut(&mut self.points)
    }

    /// One point of one strand in the requested space
    pub fn strand_point(&self, strand: usize, point: usize, space: Space) -> Option<Vec3> {
        if strand >= self.strand_count() {
            return None;
        }
        let p = *self.strand_points(strand).get(point)?;
        Some(match space {
            Space::Object => p,
            Space::World => self.transform.transform_point3(p),
        })
    }

    pub fn root(&self, strand: usize) -> Option<Vec3> {
        self.strand_point(strand, 0, Space::Object)
    }

    /// Polyline length of one strand
    pub fn strand_length(&self, strand: usize) -> f32 {
        self.strand_points(strand)
            .windows(2)
            .map(|w| w[0].distance(w[1]))
            .sum()
    }

    pub fn surface_dependency(&self, strand: usize) -> Option<&SurfaceDependency> {
        self.surface.get(strand).and_then(|d| d.as_ref())
    }

    pub fn surface_dependencies(&self) -> &[Option<SurfaceDependency>] {
        &self.surface
    }

    pub fn set_surface_dependency(&mut self, strand: usize, dep: Option<SurfaceDependency>) {
        if let Some(slot) = Arc::make_mut(&mut self.surface).get_mut(strand) {
            *slot = dep;
        }
    }

    pub fn strand_groups(&self, strand: usize) -> &GroupSet {
        &self.groups[strand]
    }

    pub fn groups_mut(&mut self) -> &mut Vec<GroupSet> {
        Arc::make_mut(&mut self.groups)
    }

    /// Per-strand flags: does the strand fall under `pattern`
    pub fn group_mask(&self, pattern: &GroupPattern) -> Vec<bool> {
        self.groups.iter().map(|g| pattern.matches(g)).collect()
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelSet {
        &mut self.channels
    }

    pub fn root_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.of_scope(ChannelScope::Strand)
    }

    pub fn vertex_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.of_scope(ChannelScope::Vertex)
    }

    pub fn transform(&self) -> Affine3A {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Affine3A) {
        self.transform = transform;
    }

    /// Whether two stores share the same point allocation
    pub fn shares_points_with(&self, other: &StrandStore) -> bool {
        Arc::ptr_eq(&self.points, &other.points)
    }

    // === CONSTRUCTION ===

    /// Append one strand, padding every channel with zero values
    pub fn push_strand(&mut self, strand: NewStrand) {
        self.append_strands(vec![strand]);
    }

    /// Append strands; per-strand channels copy the parent's value when a
    /// parent is given, everything else is zero filled
    pub fn append_strands(&mut self, strands: Vec<NewStrand>) {
        if strands.is_empty() {
            return;
        }
        for channel in self.channels.iter_mut() {
            let scope = channel.scope;
            let data = channel.data_mut();
            match scope {
                ChannelScope::Strand => {
                    for s in &strands {
                        match s.parent {
                            Some(parent) if parent < data.len() => data.push_copy_of(parent),
                            _ => data.extend_default(1),
                        }
                    }
                }
                ChannelScope::Vertex => {
                    let added: usize = strands.iter().map(|s| s.points.len()).sum();
                    data.extend_default(added);
                }
            }
        }

        let ids = Arc::make_mut(&mut self.ids);
        let offsets = Arc::make_mut(&mut self.offsets);
        let points = Arc::make_mut(&mut self.points);
        let surface = Arc::make_mut(&mut self.surface);
        let groups = Arc::make_mut(&mut self.groups);
        for s in strands {
            ids.push(s.id);
            points.extend_from_slice(&s.points);
            offsets.push(points.len() as u32);
            surface.push(s.surface);
            groups.push(s.groups);
        }
    }

    /// New store holding the strands at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> StrandStore {
        let mut vertex_indices = Vec::new();
        let mut offsets = Vec::with_capacity(indices.len() + 1);
        offsets.push(0u32);
        for &i in indices {
            vertex_indices.extend(self.vertex_range(i));
            offsets.push(vertex_indices.len() as u32);
        }

        let mut channels = ChannelSet::new();
        for channel in self.channels.iter() {
            let gathered = match channel.scope {
                ChannelScope::Strand => channel.data.gather(indices),
                ChannelScope::Vertex => channel.data.gather(&vertex_indices),
            };
            channels.push_raw(Channel::new(channel.name.clone(), channel.scope, gathered));
        }

        StrandStore {
            kind: self.kind,
            ids: Arc::new(indices.iter().map(|&i| self.ids[i]).collect()),
            offsets: Arc::new(offsets),
            points: Arc::new(vertex_indices.iter().map(|&v| self.points[v]).collect()),
            surface: Arc::new(indices.iter().map(|&i| self.surface[i]).collect()),
            groups: Arc::new(indices.iter().map(|&i| self.groups[i].clone()).collect()),
            channels,
            transform: self.transform,
        }
    }

    /// Subset of strands whose id is in `ids`, keeping store order
    pub fn retain_ids(&self, ids: &AHashSet<StrandId>) -> StrandStore {
        let indices: Vec<usize> = self
            .ids
            .iter()
            .enumerate()
            .filter(|(_, id)| ids.contains(id))
            .map(|(i, _)| i)
            .collect();
        self.select(&indices)
    }

    /// Append every strand of `other`, renaming ids through `remap`
    ///
    /// Channels are matched by name and scope; values missing on either side
    /// are zero filled so lengths stay consistent.
    pub fn append_store(&mut self, other: &StrandStore, remap: impl Fn(StrandId) -> StrandId) {
        let own_strands = self.strand_count();
        let own_vertices = self.vertex_count();

        for channel in self.channels.iter_mut() {
            let count = match channel.scope {
                ChannelScope::Strand => other.strand_count(),
                ChannelScope::Vertex => other.vertex_count(),
            };
            let incoming = other
                .channels
                .get(&channel.name)
                .filter(|c| c.scope == channel.scope)
                .map(|c| c.data.as_ref());
            channel.data_mut().append_or_default(incoming, count);
        }
        for channel in other.channels.iter() {
            if self.channels.contains(&channel.name) {
                continue;
            }
            let mut data = channel.data.empty_like();
            data.extend_default(match channel.scope {
                ChannelScope::Strand => own_strands,
                ChannelScope::Vertex => own_vertices,
            });
            data.append_or_default(Some(channel.data.as_ref()), channel.data.len());
            self.channels
                .push_raw(Channel::new(channel.name.clone(), channel.scope, data));
        }

        // Incoming points are re-expressed in this store's object space.
        let to_self = self.transform.inverse() * other.transform;
        let ids = Arc::make_mut(&mut self.ids);
        let offsets = Arc::make_mut(&mut self.offsets);
        let points = Arc::make_mut(&mut self.points);
        let surface = Arc::make_mut(&mut self.surface);
        let groups = Arc::make_mut(&mut self.groups);
        for i in 0..other.strand_count() {
            ids.push(remap(other.ids[i]));
            points.extend(
                other
                    .strand_points(i)
                    .iter()
                    .map(|p| to_self.transform_point3(*p)),
            );
            offsets.push(points.len() as u32);
            surface.push(other.surface[i]);
            groups.push(other.groups[i].clone());
        }
    }

    // === INVARIANTS ===

    /// Check every array length; a failure is an operator bug
    pub fn validate(&self) -> Result<()> {
        let n = self.strand_count();
        if self.offsets.len() != n + 1 {
            return Err(StackError::Consistency(format!(
                "{} offsets for {} strands",
                self.offsets.len(),
                n
            )));
        }
        if self.offsets.windows(2).any(|w| w[0] > w[1])
            || self.offsets.last().copied().unwrap_or(0) as usize != self.points.len()
        {
            return Err(StackError::Consistency(
                "strand offsets do not describe the point array".into(),
            ));
        }
        if self.surface.len() != n || self.groups.len() != n {
            return Err(StackError::Consistency(format!(
                "surface ({}) / group ({}) arrays do not match {} strands",
                self.surface.len(),
                self.groups.len(),
                n
            )));
        }
        let unique: AHashSet<StrandId> = self.ids.iter().copied().collect();
        if unique.len() != n {
            return Err(StackError::Consistency("duplicate strand ids".into()));
        }
        self.channels.validate(n, self.vertex_count())
    }
}
