//! Transport provider implementations.

pub mod memory;

pub use memory::{InMemoryPublisher, InMemoryWorkQueue, PublishedMessage};
