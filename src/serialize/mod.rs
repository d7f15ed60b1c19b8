//! Persistent forms: groom descriptions and strand archives

pub mod archive;
pub mod groom;

pub use archive::{export_store, ArchiveFrame, ArchiveWriter, ExportOptions, StrandArchive};
pub use groom::{GroomDescription, NodeRecord, OutputRecord, GROOM_VERSION};
