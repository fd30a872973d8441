//! # Redrive
//!
//! Module providing a `RedrivePolicy` struct describing how a queue transport redelivers
//! messages that were not acknowledged, and when it gives up and dead-letters them.
use std::time;

use crate::message::MAX_RECEIVES;

/// Name of the dead letter queue used when none is configured.
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "inventory-updates-dlq";

#[derive(Clone, Debug, PartialEq, Eq)]
/// The redrive contract a queue transport must honor.
pub struct RedrivePolicy {
    /// How many times a message may be received before it is moved to the dead letter queue.
    pub max_receive_count: u32,
    /// How long a received message stays hidden from other receivers before it is redelivered.
    pub visibility_timeout: time::Duration,
    /// The queue dead-lettered messages are moved to.
    pub dead_letter_queue: String,
}

impl RedrivePolicy {
    /// Initialize a `RedrivePolicyBuilder`.
    pub fn build(dead_letter_queue: &str) -> RedrivePolicyBuilder {
        RedrivePolicyBuilder::new(dead_letter_queue)
    }

    /// Whether a message that has already been received `receive_count` times must be
    /// dead-lettered instead of being delivered again.
    pub fn should_dead_letter(&self, receive_count: u32) -> bool {
        receive_count >= self.max_receive_count
    }
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        RedrivePolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `RedrivePolicy`.
pub struct RedrivePolicyBuilder {
    pub max_receive_count: u32,
    pub visibility_timeout: time::Duration,
    pub dead_letter_queue: String,
}

impl Default for RedrivePolicyBuilder {
    fn default() -> Self {
        Self {
            max_receive_count: MAX_RECEIVES,
            visibility_timeout: time::Duration::from_secs(300),
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_owned(),
        }
    }
}

impl RedrivePolicyBuilder {
    pub fn new(dead_letter_queue: &str) -> Self {
        Self {
            dead_letter_queue: dead_letter_queue.to_owned(),
            ..RedrivePolicyBuilder::default()
        }
    }

    /// A count of zero would dead-letter every message unseen, so it is raised to one.
    pub fn max_receive_count(mut self, count: u32) -> RedrivePolicyBuilder {
        self.max_receive_count = count.max(1);
        self
    }

    pub fn visibility_timeout(mut self, timeout: time::Duration) -> RedrivePolicyBuilder {
        self.visibility_timeout = timeout;
        self
    }

    /// Provide a `RedrivePolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RedrivePolicy {
        RedrivePolicy {
            max_receive_count: self.max_receive_count,
            visibility_timeout: self.visibility_timeout,
            dead_letter_queue: self.dead_letter_queue.clone(),
        }
    }
}
