//! # Message Attributes
//!
//! Reduces caller headers to the attribute set a transport will accept.
//!
//! Transports bound the number of attributes per message, so only an
//! allow-listed set of header names is forwarded (matched
//! case-insensitively) together with a single operation attribute. Every
//! other header is dropped and over-long values are truncated.

use crate::provider::TransportLimits;
use std::collections::HashMap;
use tracing::debug;

pub const PARTITION_ID_HEADER: &str = "data-partition-id";
pub const USER_HEADER: &str = "user";
pub const CORRELATION_ID_HEADER: &str = "correlation-id";
pub const AUTHORIZATION_HEADER: &str = "authorization";
/// Carried in work-item headers only; never forwarded as an attribute
pub const COLLABORATION_HEADER: &str = "x-collaboration";

/// Attribute carrying the replay operation on every published message
pub const OPERATION_ATTRIBUTE: &str = "operation";

/// Rules for turning headers into message attributes
#[derive(Debug, Clone)]
pub struct AttributePolicy {
    allowed_headers: Vec<String>,
    operation_attribute: String,
    limits: TransportLimits,
}

impl AttributePolicy {
    /// Policy forwarding the standard tenant headers under `limits`
    pub fn new(limits: TransportLimits) -> Self {
        Self {
            allowed_headers: vec![
                PARTITION_ID_HEADER.to_string(),
                USER_HEADER.to_string(),
                CORRELATION_ID_HEADER.to_string(),
                AUTHORIZATION_HEADER.to_string(),
            ],
            operation_attribute: OPERATION_ATTRIBUTE.to_string(),
            limits,
        }
    }

    /// Replace the allow-list. Names are stored lower-cased.
    pub fn with_allowed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_headers = headers
            .into_iter()
            .map(|h| h.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    /// Build the outgoing attribute map.
    ///
    /// Allow-listed headers are emitted under their canonical lower-case
    /// name, in allow-list order, leaving one slot for the operation
    /// attribute. When the caller supplies the same header under several
    /// casings, the lexicographically first key wins.
    pub fn apply(
        &self,
        headers: &HashMap<String, String>,
        operation: Option<&str>,
    ) -> HashMap<String, String> {
        let header_slots = self.limits.max_attributes.saturating_sub(1);
        let mut attributes = HashMap::new();

        for allowed in &self.allowed_headers {
            if attributes.len() >= header_slots {
                break;
            }

            let value = headers
                .iter()
                .filter(|(name, _)| name.eq_ignore_ascii_case(allowed))
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(_, value)| value);

            if let Some(value) = value {
                attributes.insert(allowed.clone(), self.truncate(allowed, value));
            }
        }

        let dropped = headers.len().saturating_sub(attributes.len());

        if let Some(operation) = operation {
            if self.limits.max_attributes > 0 {
                attributes.insert(
                    self.operation_attribute.clone(),
                    self.truncate(&self.operation_attribute, operation),
                );
            }
        }

        if dropped > 0 {
            debug!(
                forwarded = attributes.len(),
                dropped, "Dropped headers not eligible as message attributes"
            );
        }

        attributes
    }

    fn truncate(&self, name: &str, value: &str) -> String {
        let max = self.limits.max_attribute_value_bytes;
        if value.len() <= max {
            return value.to_string();
        }

        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }

        debug!(
            attribute = %name,
            original_len = value.len(),
            truncated_len = end,
            "Truncated message attribute value"
        );
        value[..end].to_string()
    }
}

impl Default for AttributePolicy {
    fn default() -> Self {
        Self::new(TransportLimits::default())
    }
}

#[cfg(test)]
#[path = "attributes_tests.rs"]
mod tests;
