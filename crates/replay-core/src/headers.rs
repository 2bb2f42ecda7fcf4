//! # Request Headers
//!
//! Tenant and tracing context of a replay request.
//!
//! Background dispatch tasks and queue workers do not share the request's
//! execution context, so the headers travel explicitly: from the coordinator
//! into the dispatch task, inside every work item, and onto every published
//! message.

use crate::ValidationError;
use replay_transport::{
    AUTHORIZATION_HEADER, COLLABORATION_HEADER, CORRELATION_ID_HEADER, PARTITION_ID_HEADER,
    USER_HEADER,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// Maximum characters of the caller's correlation id kept in derived ids
const MAX_CORRELATION_PREFIX: usize = 64;

/// Case-insensitive header map; names are stored lower-cased
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, String>", into = "HashMap<String, String>")]
pub struct RequestHeaders(HashMap<String, String>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn partition_id(&self) -> Option<&str> {
        self.get(PARTITION_ID_HEADER)
    }

    pub fn user(&self) -> Option<&str> {
        self.get(USER_HEADER)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID_HEADER)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.get(AUTHORIZATION_HEADER)
    }

    /// Generate a correlation id when none was supplied; returns the id in use
    pub fn ensure_correlation_id(&mut self) -> String {
        match self.correlation_id() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => {
                let id = Uuid::new_v4().to_string();
                self.insert(CORRELATION_ID_HEADER, id.clone());
                id
            }
        }
    }

    /// Parsed collaboration context; malformed values are logged and ignored
    pub fn collaboration_context(&self) -> Option<CollaborationContext> {
        let raw = self.get(COLLABORATION_HEADER)?;
        match raw.parse() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!(header = COLLABORATION_HEADER, error = %e, "Ignoring malformed collaboration header");
                None
            }
        }
    }

    /// Merge transport attributes with the headers carried in a message
    /// body. Body headers win; a correlation id is generated when neither
    /// side carries one.
    pub fn merged(attributes: &HashMap<String, String>, carried: &RequestHeaders) -> Self {
        let mut merged = RequestHeaders::from(attributes.clone());
        for (name, value) in &carried.0 {
            merged.insert(name, value.clone());
        }
        merged.ensure_correlation_id();
        merged
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for RequestHeaders {
    fn from(map: HashMap<String, String>) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            headers.insert(name, value);
        }
        headers
    }
}

impl From<RequestHeaders> for HashMap<String, String> {
    fn from(headers: RequestHeaders) -> Self {
        headers.0
    }
}

/// Correlation id of the `counter`-th work item of a dispatch:
/// `<base, at most 64 chars>_kind_<counter>_SEQ_0`.
pub fn item_correlation_id(base: &str, counter: usize) -> String {
    let prefix: String = base.chars().take(MAX_CORRELATION_PREFIX).collect();
    format!("{}_kind_{}_SEQ_0", prefix, counter)
}

/// Collaboration context propagated into change events.
///
/// Wire format: `id=<uuid>,application=<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationContext {
    pub id: Uuid,
    pub application: String,
}

impl FromStr for CollaborationContext {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = None;
        let mut application = None;

        for part in s.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                return Err(ValidationError::InvalidFormat {
                    field: COLLABORATION_HEADER.to_string(),
                    message: format!("expected key=value, got '{}'", part.trim()),
                });
            };

            match key.trim() {
                "id" => id = Some(value.trim().to_string()),
                "application" => application = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let id = id.ok_or_else(|| ValidationError::Required {
            field: "x-collaboration.id".to_string(),
        })?;
        let id = Uuid::parse_str(&id).map_err(|_| ValidationError::InvalidFormat {
            field: "x-collaboration.id".to_string(),
            message: "must be a UUID".to_string(),
        })?;

        let application = application
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ValidationError::Required {
                field: "x-collaboration.application".to_string(),
            })?;

        Ok(Self { id, application })
    }
}

#[cfg(test)]
#[path = "headers_tests.rs"]
mod tests;
