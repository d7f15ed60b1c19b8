//! Command pipeline for stack edits
//!
//! GroomCommand -> CommandExecutor -> Groom, with every applied command's
//! inverse kept for undo/redo.

pub mod executor;

pub use executor::{CommandExecutor, ExecutionResult, GroomCommand};
