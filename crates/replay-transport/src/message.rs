//! Message types for transport operations including destination names.

use crate::error::ValidationError;
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Destination Names
// ============================================================================

fn validate_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 256 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: "must be 1-256 characters".to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
        });
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "no leading or trailing hyphens".to_string(),
        });
    }

    Ok(())
}

macro_rules! destination_name {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
                let name = name.into();
                validate_name($field, &name)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }
    };
}

destination_name!(
    /// Validated publish/subscribe topic name
    TopicName,
    "topic_name"
);

destination_name!(
    /// Validated work-queue name
    QueueName,
    "queue_name"
);

/// Unique identifier for messages within the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Timestamp shifted forward by `duration`
    pub fn add(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }

    /// Milliseconds elapsed from `earlier` to `self`, floored at zero
    pub fn millis_since(&self, earlier: &Timestamp) -> u64 {
        (self.0 - earlier.0).num_milliseconds().max(0) as u64
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be published or enqueued.
///
/// `attributes` holds the caller's headers as supplied. Publishers reduce
/// them to the forwarded set with [`crate::AttributePolicy`] before the
/// message leaves the process; `operation` is always forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub operation: Option<String>,
    pub correlation_id: Option<String>,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            attributes: HashMap::new(),
            operation: None,
            correlation_id: None,
        }
    }

    /// Serialize `value` as the JSON body of a new message
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, crate::SerializationError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(Bytes::from(body)))
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: &HashMap<String, String>) -> Self {
        self.attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A message received from a work queue with delivery metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub correlation_id: Option<String>,
    pub receipt_handle: ReceiptHandle,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u32,
    pub first_delivered_at: Timestamp,
    pub delivered_at: Timestamp,
}

impl ReceivedMessage {
    /// Check if message has reached the maximum delivery count
    pub fn has_reached_max_delivery_count(&self, max_count: u32) -> bool {
        self.delivery_count >= max_count
    }
}

/// Opaque token for acknowledging or rescheduling received messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    expires_at: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    pub fn new(handle: String, expires_at: Timestamp, provider_type: ProviderType) -> Self {
        Self {
            handle,
            expires_at,
            provider_type,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Check if the visibility lock behind this handle has lapsed
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
