//! Operator stacks: graph structure, rewiring and pull evaluation

pub mod eval;
pub mod graph;
pub mod node;

pub use eval::EvalStats;
pub use graph::StackGraph;
pub use node::{OutputBinding, StackNode};
