//! # Queue Consumer
//!
//! Polls a [`WorkQueue`] and hands each message to a typed
//! [`MessageHandler`].
//!
//! The body is decoded into the handler's message type exactly once, here.
//! Outcomes per message:
//!
//! - handler succeeds: the message is deleted
//! - handler fails below the delivery limit: the message is hidden for a
//!   backoff-derived visibility timeout and redelivered later
//! - handler fails at the delivery limit: the failure callback runs once and
//!   the message is deleted
//! - body cannot be decoded: the message is deleted, it can never succeed

use crate::client::WorkQueue;
use crate::error::{ConfigurationError, HandlerError, TransportError};
use crate::message::ReceivedMessage;
use crate::retry::{BackoffConfig, RedeliveryBackoff};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Longest visibility timeout a queue accepts (12 hours)
const MAX_VISIBILITY_SECS: i64 = 12 * 60 * 60;

// ============================================================================
// Configuration
// ============================================================================

/// Settings for the polling loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Messages requested per receive call
    pub max_messages: u32,
    /// Long-poll wait when the queue is empty
    pub wait_time_secs: u64,
    /// Visibility timeout applied on receive
    pub visibility_timeout_secs: u64,
    /// Deliveries before a message is treated as a terminal failure
    pub max_delivery_count: u32,
    /// Pause between polls that returned nothing
    pub poll_interval_ms: u64,
    /// Messages handled concurrently
    pub parallelism: usize,
    pub backoff: BackoffConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time_secs: 5,
            visibility_timeout_secs: 300,
            max_delivery_count: 3,
            poll_interval_ms: 1000,
            parallelism: 4,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_messages == 0 {
            return Err(ConfigurationError::Invalid {
                message: "consumer.max_messages must be greater than 0".to_string(),
            });
        }
        if self.max_delivery_count == 0 {
            return Err(ConfigurationError::Invalid {
                message: "consumer.max_delivery_count must be greater than 0".to_string(),
            });
        }
        if self.parallelism == 0 {
            return Err(ConfigurationError::Invalid {
                message: "consumer.parallelism must be greater than 0".to_string(),
            });
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigurationError::Invalid {
                message: "consumer.backoff.multiplier must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Handler Contract
// ============================================================================

/// Typed handler for one kind of queue message
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Body type the consumer decodes every message into
    type Message: DeserializeOwned + Clone + Send + Sync + 'static;

    /// Process one message. `attributes` are the transport attributes the
    /// message arrived with.
    async fn handle(
        &self,
        message: Self::Message,
        attributes: &HashMap<String, String>,
    ) -> Result<(), HandlerError>;

    /// Called once when a message has failed on its final allowed delivery
    async fn on_failure(
        &self,
        message: Self::Message,
        attributes: &HashMap<String, String>,
        error: &HandlerError,
    );
}

// ============================================================================
// Outcomes
// ============================================================================

/// What happened to a single received message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Handled and deleted
    Completed,
    /// Handler failed; hidden until redelivery
    Rescheduled {
        delivery_count: u32,
        visibility: Duration,
    },
    /// Handler failed on the final delivery; failure callback ran and the
    /// message was deleted
    FailedTerminally { delivery_count: u32 },
    /// Body could not be decoded; deleted without invoking the handler
    Discarded { reason: String },
}

/// Counts for one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub completed: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub discarded: usize,
    pub panicked: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Completed => self.completed += 1,
            MessageOutcome::Rescheduled { .. } => self.rescheduled += 1,
            MessageOutcome::FailedTerminally { .. } => self.failed += 1,
            MessageOutcome::Discarded { .. } => self.discarded += 1,
        }
    }
}

// ============================================================================
// Consumer
// ============================================================================

#[derive(Clone)]
struct DeliverySettings {
    max_delivery_count: u32,
    base_visibility: Duration,
    backoff: RedeliveryBackoff,
}

/// Polling consumer binding a work queue to a handler
pub struct QueueConsumer<H: MessageHandler> {
    queue: Arc<dyn WorkQueue>,
    handler: Arc<H>,
    config: ConsumerConfig,
    backoff: RedeliveryBackoff,
}

impl<H: MessageHandler> QueueConsumer<H> {
    pub fn new(queue: Arc<dyn WorkQueue>, handler: Arc<H>, config: ConsumerConfig) -> Self {
        let backoff = RedeliveryBackoff::from(&config.backoff);
        Self {
            queue,
            handler,
            config,
            backoff,
        }
    }

    /// Override the backoff derived from the configuration
    pub fn with_backoff(mut self, backoff: RedeliveryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Receive one batch and process every message in it.
    ///
    /// Messages are handled concurrently up to `parallelism`; the call
    /// returns after all of them have reached an outcome.
    pub async fn poll_once(&self) -> Result<PollSummary, TransportError> {
        let messages = self
            .queue
            .receive_messages(
                self.config.max_messages,
                to_chrono(Duration::from_secs(self.config.visibility_timeout_secs)),
                to_chrono(Duration::from_secs(self.config.wait_time_secs)),
            )
            .await?;

        let mut summary = PollSummary {
            received: messages.len(),
            ..PollSummary::default()
        };
        if messages.is_empty() {
            return Ok(summary);
        }

        let settings = DeliverySettings {
            max_delivery_count: self.config.max_delivery_count,
            base_visibility: Duration::from_secs(self.config.visibility_timeout_secs),
            backoff: self.backoff.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut tasks = JoinSet::new();

        for message in messages {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Concurrency limiter closed");
                    break;
                }
            };
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let settings = settings.clone();

            tasks.spawn(async move {
                let _permit = permit;
                process_message(queue.as_ref(), handler.as_ref(), &settings, message).await
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!(error = %e, "Message processing task panicked");
                    summary.panicked += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Poll until `shutdown` flips to `true`.
    ///
    /// Shutdown is checked between polls; an in-progress poll always runs to
    /// completion so no handler is interrupted mid-page.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        info!(queue = %self.queue.queue_name(), "Queue consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.poll_once().await {
                Ok(summary) if summary.received > 0 => {
                    debug!(
                        received = summary.received,
                        completed = summary.completed,
                        rescheduled = summary.rescheduled,
                        failed = summary.failed,
                        discarded = summary.discarded,
                        "Poll finished"
                    );
                    None
                }
                Ok(_) => Some(idle),
                Err(e) => {
                    error!(error = %e, transient = e.is_transient(), "Failed to receive messages");
                    Some(idle)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!(queue = %self.queue.queue_name(), "Queue consumer stopped");
    }
}

async fn process_message<H: MessageHandler>(
    queue: &dyn WorkQueue,
    handler: &H,
    settings: &DeliverySettings,
    message: ReceivedMessage,
) -> MessageOutcome {
    let message_id = message.message_id.clone();
    let delivery_count = message.delivery_count;

    let decoded: H::Message = match serde_json::from_slice(&message.body) {
        Ok(decoded) => decoded,
        Err(e) => {
            error!(
                message_id = %message_id,
                error = %e,
                "Discarding message with undecodable body"
            );
            acknowledge(queue, &message).await;
            return MessageOutcome::Discarded {
                reason: e.to_string(),
            };
        }
    };

    let error = match handler.handle(decoded.clone(), &message.attributes).await {
        Ok(()) => {
            acknowledge(queue, &message).await;
            return MessageOutcome::Completed;
        }
        Err(error) => error,
    };

    if message.has_reached_max_delivery_count(settings.max_delivery_count) {
        error!(
            message_id = %message_id,
            delivery_count,
            max_delivery_count = settings.max_delivery_count,
            error = %error,
            "Message failed on final delivery"
        );
        handler.on_failure(decoded, &message.attributes, &error).await;
        acknowledge(queue, &message).await;
        return MessageOutcome::FailedTerminally { delivery_count };
    }

    let visibility = settings
        .backoff
        .visibility_timeout(delivery_count, settings.base_visibility);
    warn!(
        message_id = %message_id,
        delivery_count,
        retry_in_secs = visibility.as_secs_f64(),
        error = %error,
        "Message handler failed, scheduling redelivery"
    );

    if let Err(e) = queue
        .change_visibility(&message.receipt_handle, to_chrono(visibility))
        .await
    {
        // The original visibility timeout still applies, so the message
        // comes back either way.
        warn!(message_id = %message_id, error = %e, "Failed to reset visibility timeout");
    }

    MessageOutcome::Rescheduled {
        delivery_count,
        visibility,
    }
}

async fn acknowledge(queue: &dyn WorkQueue, message: &ReceivedMessage) {
    if let Err(e) = queue.complete_message(&message.receipt_handle).await {
        error!(
            message_id = %message.message_id,
            error = %e,
            "Failed to delete message from queue"
        );
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::seconds(MAX_VISIBILITY_SECS))
        .min(chrono::Duration::seconds(MAX_VISIBILITY_SECS))
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
