//! # Infrastructure Adapters
//!
//! Local implementations of the progress backend and record collaborators
//! for development, single-node deployments and testing.

pub mod filesystem_progress;
pub mod memory_progress;
pub mod record_catalog;

pub use filesystem_progress::FilesystemProgressBackend;
pub use memory_progress::InMemoryProgressBackend;
pub use record_catalog::{CatalogRecord, InMemoryRecordCatalog};
