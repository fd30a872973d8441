//! # Queue
//!
//! The queue transport contract shared by the producer (which sends batches) and the
//! consumer (which receives and acknowledges messages). Redelivery and dead-lettering are
//! the transport's job: every implementation honors a [`RedrivePolicy`], consumers never
//! count receives themselves.
//!
//! [`RedrivePolicy`]: crate::redrive::RedrivePolicy
use std::collections::HashSet;
use std::time;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, QueueMessage, MAX_BATCH_SIZE, MAX_MESSAGE_BYTES};

pub mod memory;
pub mod pg;

/// Enumeration of errors for queue transport operations.
/// Batch validation errors reject the whole request; nothing in it is enqueued.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("batch request contains no entries")]
    EmptyBatch,
    #[error("batch request contains {0} entries, at most 10 are allowed")]
    TooManyEntries(usize),
    #[error("batch entry id {0} is used more than once in the request")]
    DuplicateEntryId(String),
    #[error("cannot receive {0} messages at once, must be between 1 and 10")]
    InvalidReceiveLimit(usize),
    #[error("receipt handle {0} is not valid")]
    ReceiptHandleInvalid(String),
    #[error("queue state lock was poisoned")]
    StatePoisoned,
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

/// An entry the transport accepted, with the id it assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEntry {
    pub sequence_id: String,
    pub message_id: String,
}

/// An entry the transport refused while accepting the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub sequence_id: String,
    pub reason: String,
}

/// Per-entry result of a `send_batch` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendBatchOutput {
    pub successful: Vec<SentEntry>,
    pub failed: Vec<FailedEntry>,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue 1 to [`MAX_BATCH_SIZE`] messages in one call.
    async fn send_batch(&self, entries: &[Message]) -> Result<SendBatchOutput, QueueError>;

    /// Receive up to `max_messages` visible messages, oldest first. Messages over the redrive
    /// threshold are dead-lettered instead of returned.
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a delivery, removing its message from the queue.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Age of the oldest message still held by the queue, if there is one.
    async fn approximate_age_of_oldest_message(
        &self,
    ) -> Result<Option<time::Duration>, QueueError>;
}

/// Reject batch requests no transport accepts: empty, oversized or with repeated entry ids.
pub fn validate_batch(entries: &[Message]) -> Result<(), QueueError> {
    if entries.is_empty() {
        return Err(QueueError::EmptyBatch);
    }
    if entries.len() > MAX_BATCH_SIZE {
        return Err(QueueError::TooManyEntries(entries.len()));
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.sequence_id.as_str()) {
            return Err(QueueError::DuplicateEntryId(entry.sequence_id.clone()));
        }
    }

    Ok(())
}

pub fn validate_receive_limit(max_messages: usize) -> Result<(), QueueError> {
    if max_messages == 0 || max_messages > MAX_BATCH_SIZE {
        return Err(QueueError::InvalidReceiveLimit(max_messages));
    }
    Ok(())
}

/// Split a validated batch into the entries to enqueue and the ones refused outright.
pub(crate) fn partition_entries(entries: &[Message]) -> (Vec<&Message>, Vec<FailedEntry>) {
    let mut accepted = Vec::with_capacity(entries.len());
    let mut failed = Vec::new();

    for entry in entries {
        if entry.body.len() > MAX_MESSAGE_BYTES {
            failed.push(FailedEntry {
                sequence_id: entry.sequence_id.clone(),
                reason: format!(
                    "message body is {} bytes, at most {MAX_MESSAGE_BYTES} are allowed",
                    entry.body.len()
                ),
            });
        } else {
            accepted.push(entry);
        }
    }

    (accepted, failed)
}
