//! Provider types and the transport limits each backend imposes.

use serde::{Deserialize, Serialize};

/// Supported transport providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Pub/sub topic fanning out into a visibility-timeout work queue
    Aws,
    InMemory,
}

impl ProviderType {
    /// Limits the provider enforces on every publish call
    pub fn limits(&self) -> TransportLimits {
        match self {
            Self::Aws => TransportLimits::AWS,
            Self::InMemory => TransportLimits::IN_MEMORY,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::InMemory => write!(f, "in_memory"),
        }
    }
}

/// Per-call limits of a transport backend.
///
/// Control flow never hard-codes these numbers; a new backend supplies its
/// own constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    /// Maximum number of message attributes per message
    pub max_attributes: usize,
    /// Attribute values longer than this are truncated
    pub max_attribute_value_bytes: usize,
    /// Maximum encoded body size
    pub max_message_size: usize,
    /// Maximum messages per native batch call
    pub max_batch_size: usize,
}

impl TransportLimits {
    pub const AWS: TransportLimits = TransportLimits {
        max_attributes: 10,
        max_attribute_value_bytes: 1024,
        max_message_size: 256 * 1024,
        max_batch_size: 10,
    };

    /// Mirrors the attribute limits of [`TransportLimits::AWS`] so local runs
    /// exercise the same capping behaviour.
    pub const IN_MEMORY: TransportLimits = TransportLimits {
        max_attributes: 10,
        max_attribute_value_bytes: 1024,
        max_message_size: 10 * 1024 * 1024,
        max_batch_size: 100,
    };
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self::IN_MEMORY
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
