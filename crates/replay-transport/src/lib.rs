//! # Replay Transport
//!
//! Message transport for the replay engine. Two abstractions live here:
//!
//! - a [`Publisher`] for fire-and-forget event broadcast whose message
//!   attributes are bounded in count and size, and
//! - a [`WorkQueue`] with at-least-once delivery, visibility timeouts and a
//!   per-message delivery count.
//!
//! [`QueueConsumer`] drives a [`WorkQueue`]: it decodes each received body
//! into the handler's message type once, acknowledges on success, schedules
//! redelivery with backoff on failure and invokes the handler's failure
//! callback when the delivery limit is reached.
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all transport operations
//! - [`message`] - Message structures, names and receipt handles
//! - [`provider`] - Provider types and their transport limits
//! - [`attributes`] - Header allow-listing and attribute capping
//! - [`client`] - `Publisher` and `WorkQueue` traits
//! - [`consumer`] - Queue polling loop and handler contract
//! - [`retry`] - Redelivery backoff policy
//! - [`providers`] - In-memory implementations

pub mod attributes;
pub mod client;
pub mod consumer;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod retry;

pub use attributes::{
    AttributePolicy, AUTHORIZATION_HEADER, COLLABORATION_HEADER, CORRELATION_ID_HEADER,
    OPERATION_ATTRIBUTE, PARTITION_ID_HEADER, USER_HEADER,
};
pub use client::{Publisher, WorkQueue};
pub use consumer::{
    ConsumerConfig, MessageHandler, MessageOutcome, PollSummary, QueueConsumer,
};
pub use error::{
    ConfigurationError, HandlerError, SerializationError, TransportError, ValidationError,
};
pub use message::{
    Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp, TopicName,
};
pub use provider::{ProviderType, TransportLimits};
pub use providers::{InMemoryPublisher, InMemoryWorkQueue, PublishedMessage};
pub use retry::{BackoffConfig, RedeliveryBackoff};
