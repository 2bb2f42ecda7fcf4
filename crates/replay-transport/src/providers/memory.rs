//! In-memory transport implementation for testing and local runs.
//!
//! Provides:
//! - [`InMemoryWorkQueue`] with visibility timeouts, receipt handles and
//!   per-message delivery counts
//! - [`InMemoryPublisher`] fanning a topic out into work queues and, unless
//!   built with [`InMemoryPublisher::without_recording`], keeping every
//!   published message per topic for inspection
//!
//! Both are thread-safe and behave like their cloud counterparts closely
//! enough to exercise redelivery and attribute capping in tests.

use crate::attributes::{AttributePolicy, OPERATION_ATTRIBUTE};
use crate::client::{Publisher, WorkQueue};
use crate::error::TransportError;
use crate::message::{
    Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp, TopicName,
};
use crate::provider::{ProviderType, TransportLimits};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const RECEIVE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Internal state for a single work queue
#[derive(Default)]
struct QueueState {
    /// Messages waiting for delivery (FIFO order)
    messages: VecDeque<StoredMessage>,
    /// Messages received but not yet completed, keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
    completed: u64,
}

impl QueueState {
    /// Return messages whose visibility lock has lapsed to the queue
    fn reclaim_expired(&mut self, now: Timestamp) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.lock_expires_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(in_flight) = self.in_flight.remove(&handle) {
                let mut message = in_flight.message;
                message.available_at = in_flight.lock_expires_at;
                self.messages.push_back(message);
            }
        }
    }
}

/// A message stored in the queue with delivery metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    correlation_id: Option<String>,
    delivery_count: u32,
    first_delivered_at: Option<Timestamp>,
    available_at: Timestamp,
}

impl StoredMessage {
    fn from_message(message: Message, message_id: MessageId) -> Self {
        let mut attributes = message.attributes;
        if let Some(operation) = message.operation {
            attributes.insert(OPERATION_ATTRIBUTE.to_string(), operation);
        }

        Self {
            message_id,
            body: message.body,
            attributes,
            correlation_id: message.correlation_id,
            delivery_count: 0,
            first_delivered_at: None,
            available_at: Timestamp::now(),
        }
    }

    fn is_available(&self, now: Timestamp) -> bool {
        self.available_at <= now
    }
}

/// A message currently hidden from other consumers
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Timestamp,
}

// ============================================================================
// InMemoryWorkQueue
// ============================================================================

/// In-memory work queue with visibility-timeout redelivery
pub struct InMemoryWorkQueue {
    name: QueueName,
    state: Arc<RwLock<QueueState>>,
    limits: TransportLimits,
}

impl InMemoryWorkQueue {
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            state: Arc::new(RwLock::new(QueueState::default())),
            limits: TransportLimits::IN_MEMORY,
        }
    }

    /// Enqueue without going through the async trait; used by topic fan-out
    pub fn enqueue(&self, message: Message) -> MessageId {
        let message_id = MessageId::new();
        let stored = StoredMessage::from_message(message, message_id.clone());
        self.write_state().messages.push_back(stored);
        message_id
    }

    /// Messages waiting for delivery, including those scheduled for later
    pub fn pending_count(&self) -> usize {
        self.read_state().messages.len()
    }

    /// Messages received and not yet completed or rescheduled
    pub fn in_flight_count(&self) -> usize {
        self.read_state().in_flight.len()
    }

    /// Messages deleted through [`WorkQueue::complete_message`]
    pub fn completed_count(&self) -> u64 {
        self.read_state().completed
    }

    pub fn is_empty(&self) -> bool {
        let state = self.read_state();
        state.messages.is_empty() && state.in_flight.is_empty()
    }

    fn take_available(&self, max_messages: u32, visibility_timeout: Duration) -> Vec<ReceivedMessage> {
        let now = Timestamp::now();
        let mut state = self.write_state();
        state.reclaim_expired(now);

        let mut received = Vec::new();
        let mut index = 0;
        while index < state.messages.len() && received.len() < max_messages as usize {
            if !state.messages[index].is_available(now) {
                index += 1;
                continue;
            }

            let Some(mut stored) = state.messages.remove(index) else {
                break;
            };
            stored.delivery_count += 1;
            let first_delivered_at = *stored.first_delivered_at.get_or_insert(now);

            let handle = uuid::Uuid::new_v4().to_string();
            let lock_expires_at = now.add(visibility_timeout);

            received.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                attributes: stored.attributes.clone(),
                correlation_id: stored.correlation_id.clone(),
                receipt_handle: ReceiptHandle::new(
                    handle.clone(),
                    lock_expires_at,
                    ProviderType::InMemory,
                ),
                delivery_count: stored.delivery_count,
                first_delivered_at,
                delivered_at: now,
            });

            state.in_flight.insert(
                handle,
                InFlightMessage {
                    message: stored,
                    lock_expires_at,
                },
            );
        }

        received
    }

    // A poisoned lock only means another thread panicked mid-update; the
    // queue contents are still structurally valid.
    fn read_state(&self) -> RwLockReadGuard<'_, QueueState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, QueueState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn queue_name(&self) -> &QueueName {
        &self.name
    }

    async fn send_message(&self, message: Message) -> Result<MessageId, TransportError> {
        if message.body.len() > self.limits.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: message.body.len(),
                max_size: self.limits.max_message_size,
            });
        }

        Ok(self.enqueue(message))
    }

    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let deadline = Timestamp::now().add(wait_time);

        loop {
            let received = self.take_available(max_messages, visibility_timeout);
            if !received.is_empty() || Timestamp::now() >= deadline {
                return Ok(received);
            }

            tokio::time::sleep(RECEIVE_POLL_INTERVAL).await;
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        let mut state = self.write_state();
        match state.in_flight.remove(receipt.handle()) {
            Some(_) => {
                state.completed += 1;
                Ok(())
            }
            None => Err(TransportError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            }),
        }
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.write_state();
        let in_flight = state.in_flight.remove(receipt.handle()).ok_or_else(|| {
            TransportError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            }
        })?;

        let mut message = in_flight.message;
        message.available_at = Timestamp::now().add(timeout);
        state.messages.push_back(message);
        Ok(())
    }
}

// ============================================================================
// InMemoryPublisher
// ============================================================================

/// A message as it left the publisher, after attribute filtering
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub message_id: MessageId,
    pub topic: TopicName,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub published_at: Timestamp,
}

impl PublishedMessage {
    /// Decode the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Default)]
struct PublisherState {
    published: HashMap<TopicName, Vec<PublishedMessage>>,
    publish_calls: HashMap<TopicName, usize>,
    subscriptions: HashMap<TopicName, Vec<Arc<InMemoryWorkQueue>>>,
}

/// In-memory publisher with optional topic-to-queue fan-out
pub struct InMemoryPublisher {
    state: Arc<RwLock<PublisherState>>,
    policy: AttributePolicy,
    record_messages: bool,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::with_policy(AttributePolicy::new(TransportLimits::IN_MEMORY))
    }

    pub fn with_policy(policy: AttributePolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(PublisherState::default())),
            policy,
            record_messages: true,
        }
    }

    /// Stop keeping published messages. Fan-out and call counts still work;
    /// [`published`](Self::published) stays empty. Long-running processes
    /// use this so memory does not grow with every publish.
    pub fn without_recording(mut self) -> Self {
        self.record_messages = false;
        self
    }

    /// Forward every message published to `topic` into `queue`
    pub fn subscribe(&self, topic: TopicName, queue: Arc<InMemoryWorkQueue>) {
        self.write_state()
            .subscriptions
            .entry(topic)
            .or_default()
            .push(queue);
    }

    /// All messages published to `topic`, oldest first. Empty when
    /// recording is off.
    pub fn published(&self, topic: &TopicName) -> Vec<PublishedMessage> {
        self.read_state()
            .published
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `publish`/`publish_batch` calls made against `topic`
    pub fn publish_call_count(&self, topic: &TopicName) -> usize {
        self.read_state()
            .publish_calls
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    fn check_size(&self, message: &Message) -> Result<(), TransportError> {
        let max_size = self.policy.limits().max_message_size;
        if message.body.len() > max_size {
            return Err(TransportError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }
        Ok(())
    }

    /// Record the accepted messages (if enabled) and fan them out. The state
    /// lock is released before subscriber queues are touched.
    fn deliver(&self, topic: &TopicName, messages: Vec<Message>) -> Vec<MessageId> {
        let now = Timestamp::now();
        let published: Vec<PublishedMessage> = messages
            .into_iter()
            .map(|message| PublishedMessage {
                message_id: MessageId::new(),
                topic: topic.clone(),
                attributes: self
                    .policy
                    .apply(&message.attributes, message.operation.as_deref()),
                body: message.body,
                published_at: now,
            })
            .collect();

        let subscribers = {
            let mut state = self.write_state();
            *state.publish_calls.entry(topic.clone()).or_insert(0) += 1;
            if self.record_messages {
                state
                    .published
                    .entry(topic.clone())
                    .or_default()
                    .extend(published.iter().cloned());
            }
            state.subscriptions.get(topic).cloned().unwrap_or_default()
        };

        for queue in &subscribers {
            for message in &published {
                let mut forwarded = Message::new(message.body.clone());
                forwarded.attributes = message.attributes.clone();
                queue.enqueue(forwarded);
            }
        }

        debug!(
            topic = %topic,
            count = published.len(),
            subscribers = subscribers.len(),
            "Published messages"
        );

        published.into_iter().map(|m| m.message_id).collect()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PublisherState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PublisherState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(
        &self,
        topic: &TopicName,
        message: Message,
    ) -> Result<MessageId, TransportError> {
        self.check_size(&message)?;

        self.deliver(topic, vec![message])
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::ProviderError {
                provider: ProviderType::InMemory.to_string(),
                code: "PublishFailed".to_string(),
                message: "message was not recorded".to_string(),
            })
    }

    async fn publish_batch(
        &self,
        topic: &TopicName,
        messages: Vec<Option<Message>>,
    ) -> Result<Vec<MessageId>, TransportError> {
        let mut accepted = Vec::with_capacity(messages.len());

        for (index, message) in messages.into_iter().enumerate() {
            let Some(message) = message else {
                warn!(topic = %topic, index, "Skipping null message in batch");
                continue;
            };

            if let Err(e) = self.check_size(&message) {
                error!(topic = %topic, index, error = %e, "Skipping message that exceeds transport limits");
                continue;
            }

            accepted.push(message);
        }

        Ok(self.deliver(topic, accepted))
    }

    fn limits(&self) -> TransportLimits {
        self.policy.limits()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
