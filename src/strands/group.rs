//! Strand groups and group patterns
//!
//! Every strand carries a (possibly empty) set of group tags. Operators take a
//! [`GroupPattern`] such as `"1,2"`, `"3-5"` or `"left,7"`; an empty pattern
//! means every strand regardless of its groups.

use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res};
use nom::multi::separated_list1;
use nom::sequence::{delimited, separated_pair};
use nom::{IResult, Parser};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::{Result, StackError};

/// A group tag: numeric index or name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupTag {
    Index(u32),
    Name(String),
}

impl fmt::Display for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupTag::Index(i) => write!(f, "{}", i),
            GroupTag::Name(n) => write!(f, "{}", n),
        }
    }
}

impl From<u32> for GroupTag {
    fn from(index: u32) -> Self {
        GroupTag::Index(index)
    }
}

impl From<&str> for GroupTag {
    fn from(name: &str) -> Self {
        GroupTag::Name(name.to_string())
    }
}

/// Sorted, de-duplicated set of tags for one strand
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupSet(Vec<GroupTag>);

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: GroupTag) -> Self {
        Self(vec![tag])
    }

    pub fn insert(&mut self, tag: GroupTag) {
        if let Err(pos) = self.0.binary_search(&tag) {
            self.0.insert(pos, tag);
        }
    }

    pub fn contains(&self, tag: &GroupTag) -> bool {
        self.0.binary_search(tag).is_ok()
    }

    pub fn tags(&self) -> &[GroupTag] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// One comma separated element of a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternEntry {
    Index(u32),
    /// Inclusive range of indices
    Range(u32, u32),
    Name(String),
}

impl PatternEntry {
    fn matches(&self, tag: &GroupTag) -> bool {
        match (self, tag) {
            (PatternEntry::Index(i), GroupTag::Index(t)) => i == t,
            (PatternEntry::Range(lo, hi), GroupTag::Index(t)) => lo <= t && t <= hi,
            (PatternEntry::Name(n), GroupTag::Name(t)) => n == t,
            _ => false,
        }
    }
}

impl fmt::Display for PatternEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternEntry::Index(i) => write!(f, "{}", i),
            PatternEntry::Range(lo, hi) => write!(f, "{}-{}", lo, hi),
            PatternEntry::Name(n) => write!(f, "{}", n),
        }
    }
}

/// Parsed group pattern; empty matches every strand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPattern {
    entries: Vec<PatternEntry>,
}

impl GroupPattern {
    /// Pattern matching every strand
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Ok(Self::all());
        }
        let (_, entries) = pattern_entries(pattern).map_err(|e| StackError::GroupPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { entries })
    }

    pub fn is_all(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    pub fn matches(&self, groups: &GroupSet) -> bool {
        self.is_all()
            || groups
                .tags()
                .iter()
                .any(|tag| self.entries.iter().any(|e| e.matches(tag)))
    }
}

impl fmt::Display for GroupPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl Serialize for GroupPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GroupPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        GroupPattern::parse(&text).map_err(serde::de::Error::custom)
    }
}

fn index(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse::<u32>).parse(input)
}

fn entry(input: &str) -> IResult<&str, PatternEntry> {
    alt((
        map(
            separated_pair(index, delimited(multispace0, char('-'), multispace0), index),
            |(a, b)| PatternEntry::Range(a.min(b), a.max(b)),
        ),
        map(index, PatternEntry::Index),
        map(
            take_while1(|c: char| c.is_alphanumeric() || c == '_'),
            |name: &str| PatternEntry::Name(name.to_string()),
        ),
    ))
    .parse(input)
}

fn pattern_entries(input: &str) -> IResult<&str, Vec<PatternEntry>> {
    all_consuming(delimited(
        multispace0,
        separated_list1(delimited(multispace0, char(','), multispace0), entry),
        multispace0,
    ))
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(tags: &[GroupTag]) -> GroupSet {
        let mut set = GroupSet::new();
        for t in tags {
            set.insert(t.clone());
        }
        set
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let pattern = GroupPattern::parse("  ").unwrap();
        assert!(pattern.is_all());
        assert!(pattern.matches(&GroupSet::new()));
        assert!(pattern.matches(&groups(&[GroupTag::Index(4)])));
    }

    #[test]
    fn test_index_list() {
        let pattern = GroupPattern::parse("1,2").unwrap();
        assert!(pattern.matches(&groups(&[GroupTag::Index(2)])));
        assert!(!pattern.matches(&groups(&[GroupTag::Index(3)])));
        assert!(!pattern.matches(&GroupSet::new()));
    }

    #[test]
    fn test_ranges_and_names() {
        let pattern = GroupPattern::parse("3 - 5, left").unwrap();
        assert_eq!(
            pattern.entries(),
            &[PatternEntry::Range(3, 5), PatternEntry::Name("left".into())]
        );
        assert!(pattern.matches(&groups(&[GroupTag::Index(4)])));
        assert!(pattern.matches(&groups(&[GroupTag::Name("left".into())])));
        assert!(!pattern.matches(&groups(&[GroupTag::Index(6)])));
    }

    #[test]
    fn test_reversed_range_normalized() {
        let pattern = GroupPattern::parse("9-7").unwrap();
        assert_eq!(pattern.entries(), &[PatternEntry::Range(7, 9)]);
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        assert!(matches!(
            GroupPattern::parse("1,,2"),
            Err(StackError::GroupPattern { .. })
        ));
        assert!(GroupPattern::parse("1;2").is_err());
    }

    #[test]
    fn test_pattern_serde_roundtrip() {
        let pattern = GroupPattern::parse("1,4-6,top").unwrap();
        let json = serde_json::to_string(&pattern).unwrap();
        assert_eq!(json, "\"1,4-6,top\"");
        let back: GroupPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pattern);
    }

    #[test]
    fn test_group_set_dedup() {
        let mut set = GroupSet::new();
        set.insert(GroupTag::Index(2));
        set.insert(GroupTag::Index(1));
        set.insert(GroupTag::Index(2));
        assert_eq!(set.tags(), &[GroupTag::Index(1), GroupTag::Index(2)]);
    }
}
