pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::{Result, StackError};
pub use types::{GroomId, NodeId, OutputId, Space, StrandId, StrandKind};
