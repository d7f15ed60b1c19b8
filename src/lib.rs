//! Strand Stack - procedural hair strand stack evaluation engine

pub mod bake;
pub mod command;
pub mod core;
pub mod groom;
pub mod grounding;
pub mod identity;
pub mod lod;
pub mod mesh;
pub mod operators;
pub mod roots;
pub mod serialize;
pub mod spatial;
pub mod stack;
pub mod strands;

pub use crate::core::{EngineConfig, EngineContext, Result, StackError};
pub use crate::groom::Groom;
