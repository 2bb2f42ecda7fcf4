//! Replay engine settings.

use replay_transport::{ConfigurationError, TopicName};
use serde::{Deserialize, Serialize};

/// Batch sizes, page size and topic names of the replay engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Kinds per dispatched batch
    pub dispatch_batch_size: usize,
    /// Record ids requested per page
    pub page_size: usize,
    /// Change events per publish call; independent of `page_size`
    pub publish_batch_size: usize,
    /// Background dispatch tasks allowed to run at once
    pub parallelism: usize,
    /// Topic that carries work items into the work queue
    pub work_topic: String,
    /// Topic change events are published to
    pub change_topic: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dispatch_batch_size: 50,
            page_size: 1000,
            publish_batch_size: 50,
            parallelism: 4,
            work_topic: "replay-work".to_string(),
            change_topic: "records-changed".to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let sizes = [
            ("replay.dispatch_batch_size", self.dispatch_batch_size),
            ("replay.page_size", self.page_size),
            ("replay.publish_batch_size", self.publish_batch_size),
            ("replay.parallelism", self.parallelism),
        ];
        for (key, value) in sizes {
            if value == 0 {
                return Err(ConfigurationError::Invalid {
                    message: format!("{} must be greater than 0", key),
                });
            }
        }

        self.work_topic()?;
        self.change_topic()?;
        Ok(())
    }

    pub fn work_topic(&self) -> Result<TopicName, ConfigurationError> {
        parse_topic("replay.work_topic", &self.work_topic)
    }

    pub fn change_topic(&self) -> Result<TopicName, ConfigurationError> {
        parse_topic("replay.change_topic", &self.change_topic)
    }
}

fn parse_topic(key: &str, value: &str) -> Result<TopicName, ConfigurationError> {
    TopicName::new(value).map_err(|e| ConfigurationError::Invalid {
        message: format!("{}: {}", key, e),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
