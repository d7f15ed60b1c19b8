//! Strand data model: stores, channels, groups and selection

pub mod channel;
pub mod group;
pub mod selection;
pub mod store;

pub use channel::{Channel, ChannelData, ChannelScope, ChannelSet, ChannelValue, Spline};
pub use group::{GroupPattern, GroupSet, GroupTag};
pub use selection::StrandSelector;
pub use store::{NewStrand, StrandStore};
