use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::{NodeId, OutputId};

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Operator not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Output not found: {0}")]
    OutputNotFound(OutputId),

    #[error("Cannot delete {0}: it is the root of its stack")]
    RootDeletion(NodeId),

    #[error("Invalid insertion: {0}")]
    InvalidInsertion(String),

    #[error("Invalid stack range: {0}")]
    InvalidRange(String),

    #[error("Strand ids exhausted: {0}")]
    IdOverflow(String),

    #[error("Internal consistency failure: {0}")]
    Consistency(String),

    #[error("Channel '{name}' has {got} values, expected {expected}")]
    ChannelLength {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid group pattern '{pattern}': {reason}")]
    GroupPattern { pattern: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Engine context has been shut down")]
    EngineShutdown,

    #[error("Unsupported groom format version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid strand archive: {0}")]
    InvalidArchive(String),

    #[error("Cache source missing: {0}")]
    MissingCache(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, StackError>;

impl StackError {
    /// Programming-bug class failures counted by the engine context
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            StackError::Consistency(_) | StackError::ChannelLength { .. }
        )
    }
}
