//! Typed per-strand and per-vertex data channels
//!
//! Channel arrays are shared between stack nodes through `Arc` and copied
//! only when an operator writes to them, so a downstream write never changes
//! an upstream node's cached array.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, StackError};

/// Whether a channel holds one value per strand or one per vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelScope {
    /// One value per strand ("root channel")
    Strand,
    /// One value per vertex
    Vertex,
}

/// Piecewise linear 1D curve, knots sorted by x
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spline {
    pub knots: Vec<(f32, f32)>,
}

impl Spline {
    pub fn new(mut knots: Vec<(f32, f32)>) -> Self {
        knots.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { knots }
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        match self.knots.as_slice() {
            [] => 0.0,
            [only] => only.1,
            knots => {
                if x <= knots[0].0 {
                    return knots[0].1;
                }
                for pair in knots.windows(2) {
                    let (x0, y0) = pair[0];
                    let (x1, y1) = pair[1];
                    if x <= x1 {
                        let span = x1 - x0;
                        if span <= f32::EPSILON {
                            return y1;
                        }
                        return y0 + (y1 - y0) * (x - x0) / span;
                    }
                }
                knots[knots.len() - 1].1
            }
        }
    }
}

/// Nested named values (sub-container channel element)
pub type ChannelRecord = BTreeMap<String, f32>;

/// A single value written into a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ChannelValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vector(Vec3),
    String(String),
    Spline(Spline),
    Container(ChannelRecord),
}

/// Channel storage, one vector per type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum ChannelData {
    Bool(Vec<bool>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Vector(Vec<Vec3>),
    String(Vec<String>),
    Spline(Vec<Spline>),
    Container(Vec<ChannelRecord>),
}

impl ChannelData {
    /// `len` copies of the type's zero value, typed like `value`
    pub fn defaults_like(value: &ChannelValue, len: usize) -> Self {
        match value {
            ChannelValue::Bool(_) => ChannelData::Bool(vec![false; len]),
            ChannelValue::Int(_) => ChannelData::Int(vec![0; len]),
            ChannelValue::Float(_) => ChannelData::Float(vec![0.0; len]),
            ChannelValue::Vector(_) => ChannelData::Vector(vec![Vec3::ZERO; len]),
            ChannelValue::String(_) => ChannelData::String(vec![String::new(); len]),
            ChannelValue::Spline(_) => ChannelData::Spline(vec![Spline::default(); len]),
            ChannelValue::Container(_) => ChannelData::Container(vec![ChannelRecord::new(); len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChannelData::Bool(v) => v.len(),
            ChannelData::Int(v) => v.len(),
            ChannelData::Float(v) => v.len(),
            ChannelData::Vector(v) => v.len(),
            ChannelData::String(v) => v.len(),
            ChannelData::Spline(v) => v.len(),
            ChannelData::Container(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelData::Bool(_) => "bool",
            ChannelData::Int(_) => "int",
            ChannelData::Float(_) => "float",
            ChannelData::Vector(_) => "vector",
            ChannelData::String(_) => "string",
            ChannelData::Spline(_) => "spline",
            ChannelData::Container(_) => "container",
        }
    }

    /// Whether `value` can be stored in this channel
    pub fn accepts(&self, value: &ChannelValue) -> bool {
        matches!(
            (self, value),
            (ChannelData::Bool(_), ChannelValue::Bool(_))
                | (ChannelData::Int(_), ChannelValue::Int(_))
                | (ChannelData::Float(_), ChannelValue::Float(_))
                | (ChannelData::Vector(_), ChannelValue::Vector(_))
                | (ChannelData::String(_), ChannelValue::String(_))
                | (ChannelData::Spline(_), ChannelValue::Spline(_))
                | (ChannelData::Container(_), ChannelValue::Container(_))
        )
    }

    pub fn get(&self, index: usize) -> Option<ChannelValue> {
        Some(match self {
            ChannelData::Bool(v) => ChannelValue::Bool(*v.get(index)?),
            ChannelData::Int(v) => ChannelValue::Int(*v.get(index)?),
            ChannelData::Float(v) => ChannelValue::Float(*v.get(index)?),
            ChannelData::Vector(v) => ChannelValue::Vector(*v.get(index)?),
            ChannelData::String(v) => ChannelValue::String(v.get(index)?.clone()),
            ChannelData::Spline(v) => ChannelValue::Spline(v.get(index)?.clone()),
            ChannelData::Container(v) => ChannelValue::Container(v.get(index)?.clone()),
        })
    }

    /// Numeric view used by selections and blending
    pub fn get_f32(&self, index: usize) -> Option<f32> {
        match self {
            ChannelData::Bool(v) => v.get(index).map(|b| if *b { 1.0 } else { 0.0 }),
            ChannelData::Int(v) => v.get(index).map(|i| *i as f32),
            ChannelData::Float(v) => v.get(index).copied(),
            _ => None,
        }
    }

    /// Overwrite one element; returns false on a type mismatch or bad index
    pub fn set(&mut self, index: usize, value: &ChannelValue) -> bool {
        if index >= self.len() {
            return false;
        }
        match (self, value) {
            (ChannelData::Bool(v), ChannelValue::Bool(x)) => v[index] = *x,
            (ChannelData::Int(v), ChannelValue::Int(x)) => v[index] = *x,
            (ChannelData::Float(v), ChannelValue::Float(x)) => v[index] = *x,
            (ChannelData::Vector(v), ChannelValue::Vector(x)) => v[index] = *x,
            (ChannelData::String(v), ChannelValue::String(x)) => v[index] = x.clone(),
            (ChannelData::Spline(v), ChannelValue::Spline(x)) => v[index] = x.clone(),
            (ChannelData::Container(v), ChannelValue::Container(x)) => v[index] = x.clone(),
            _ => return false,
        }
        true
    }

    /// New array holding the elements at `indices`, in order
    pub fn gather(&self, indices: &[usize]) -> Self {
        fn pick<T: Clone>(v: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| v[i].clone()).collect()
        }
        match self {
            ChannelData::Bool(v) => ChannelData::Bool(pick(v, indices)),
            ChannelData::Int(v) => ChannelData::Int(pick(v, indices)),
            ChannelData::Float(v) => ChannelData::Float(pick(v, indices)),
            ChannelData::Vector(v) => ChannelData::Vector(pick(v, indices)),
            ChannelData::String(v) => ChannelData::String(pick(v, indices)),
            ChannelData::Spline(v) => ChannelData::Spline(pick(v, indices)),
            ChannelData::Container(v) => ChannelData::Container(pick(v, indices)),
        }
    }

    /// Append `count` zero values
    pub fn extend_default(&mut self, count: usize) {
        match self {
            ChannelData::Bool(v) => v.resize(v.len() + count, false),
            ChannelData::Int(v) => v.resize(v.len() + count, 0),
            ChannelData::Float(v) => v.resize(v.len() + count, 0.0),
            ChannelData::Vector(v) => v.resize(v.len() + count, Vec3::ZERO),
            ChannelData::String(v) => v.resize(v.len() + count, String::new()),
            ChannelData::Spline(v) => v.resize(v.len() + count, Spline::default()),
            ChannelData::Container(v) => v.resize(v.len() + count, ChannelRecord::new()),
        }
    }

    /// Append a copy of the element at `index`
    pub fn push_copy_of(&mut self, index: usize) {
        match self {
            ChannelData::Bool(v) => v.push(v[index]),
            ChannelData::Int(v) => v.push(v[index]),
            ChannelData::Float(v) => v.push(v[index]),
            ChannelData::Vector(v) => v.push(v[index]),
            ChannelData::String(v) => v.push(v[index].clone()),
            ChannelData::Spline(v) => v.push(v[index].clone()),
            ChannelData::Container(v) => v.push(v[index].clone()),
        }
    }

    /// Append `other`'s elements when the types agree, zero values otherwise
    pub fn append_or_default(&mut self, other: Option<&ChannelData>, count: usize) {
        match (self, other) {
            (ChannelData::Bool(v), Some(ChannelData::Bool(o))) => v.extend_from_slice(o),
            (ChannelData::Int(v), Some(ChannelData::Int(o))) => v.extend_from_slice(o),
            (ChannelData::Float(v), Some(ChannelData::Float(o))) => v.extend_from_slice(o),
            (ChannelData::Vector(v), Some(ChannelData::Vector(o))) => v.extend_from_slice(o),
            (ChannelData::String(v), Some(ChannelData::String(o))) => v.extend_from_slice(o),
            (ChannelData::Spline(v), Some(ChannelData::Spline(o))) => v.extend_from_slice(o),
            (ChannelData::Container(v), Some(ChannelData::Container(o))) => {
                v.extend_from_slice(o)
            }
            (data, _) => data.extend_default(count),
        }
    }

    /// Empty array of the same type
    pub fn empty_like(&self) -> Self {
        self.gather(&[])
    }
}

/// A named channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub scope: ChannelScope,
    pub data: Arc<ChannelData>,
}

impl Channel {
    pub fn new(name: impl Into<String>, scope: ChannelScope, data: ChannelData) -> Self {
        Self {
            name: name.into(),
            scope,
            data: Arc::new(data),
        }
    }

    /// Writable access, copying the array first if it is shared
    pub fn data_mut(&mut self) -> &mut ChannelData {
        Arc::make_mut(&mut self.data)
    }
}

/// Ordered collection of uniquely named channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    pub fn of_scope(&self, scope: ChannelScope) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(move |c| c.scope == scope)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.name == name)
    }

    /// `base` if free, else the first free `base_1`, `base_2`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Add a channel under a unique name derived from `name`; returns that name
    pub fn add(&mut self, name: &str, scope: ChannelScope, data: ChannelData) -> String {
        let unique = self.unique_name(name);
        self.channels.push(Channel::new(unique.clone(), scope, data));
        unique
    }

    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        let pos = self.channels.iter().position(|c| c.name == name)?;
        Some(self.channels.remove(pos))
    }

    /// Check every array length against the owning store's counts
    pub fn validate(&self, strand_count: usize, vertex_count: usize) -> Result<()> {
        for channel in &self.channels {
            let expected = match channel.scope {
                ChannelScope::Strand => strand_count,
                ChannelScope::Vertex => vertex_count,
            };
            if channel.data.len() != expected {
                return Err(StackError::ChannelLength {
                    name: channel.name.clone(),
                    expected,
                    got: channel.data.len(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn push_raw(&mut self, channel: Channel) {
        self.channels.push(channel);
    }
}
