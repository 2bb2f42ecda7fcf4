//! Transport traits implemented by every provider.

use crate::error::TransportError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, TopicName};
use crate::provider::{ProviderType, TransportLimits};
use async_trait::async_trait;
use chrono::Duration;

/// Fire-and-forget broadcast of messages to a topic.
///
/// Implementations apply [`crate::AttributePolicy`] to each message's
/// headers before sending, so callers may pass their full header set.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a single message
    async fn publish(&self, topic: &TopicName, message: Message)
        -> Result<MessageId, TransportError>;

    /// Publish a batch of messages in one logical call.
    ///
    /// `None` entries are skipped with a warning. Messages that violate the
    /// provider limits are skipped and logged; only a failure of the
    /// backend itself is returned as an error. Returns the ids of the
    /// messages that were accepted.
    async fn publish_batch(
        &self,
        topic: &TopicName,
        messages: Vec<Option<Message>>,
    ) -> Result<Vec<MessageId>, TransportError>;

    /// Limits enforced by this publisher
    fn limits(&self) -> TransportLimits;

    fn provider_type(&self) -> ProviderType;
}

/// At-least-once work queue with visibility timeouts.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn queue_name(&self) -> &QueueName;

    /// Enqueue a message directly, bypassing any topic
    async fn send_message(&self, message: Message) -> Result<MessageId, TransportError>;

    /// Receive up to `max_messages`, hiding each from other consumers for
    /// `visibility_timeout`. Waits up to `wait_time` when nothing is
    /// available.
    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Acknowledge and delete a received message
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), TransportError>;

    /// Make a received message visible again after `timeout`
    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}
