use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::{Message, QueueMessage};
use crate::metrics::MESSAGES_DEAD_LETTERED;
use crate::redrive::RedrivePolicy;

use super::{
    partition_entries, validate_batch, validate_receive_limit, QueueError, QueueTransport,
    SendBatchOutput, SentEntry,
};

/// A message moved out of the main queue by the redrive policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

struct StoredMessage {
    message_id: String,
    body: String,
    sent_at: DateTime<Utc>,
    enqueued_at: Instant,
    receive_count: u32,
    invisible_until: Option<Instant>,
    receipt_handle: Option<String>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<DeadLetter>,
}

/// A queue transport held entirely in process memory.
///
/// It follows the same redrive contract as the PostgreSQL transport: a received message is
/// hidden for the visibility timeout, redelivered with a new receipt handle if it is not
/// deleted in time, and moved to the dead letter list once it has been received
/// `max_receive_count` times.
pub struct MemoryQueue {
    name: String,
    policy: RedrivePolicy,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new(name: &str, policy: RedrivePolicy) -> Self {
        Self {
            name: name.to_owned(),
            policy,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Number of messages in the queue, in flight or not.
    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.messages.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Messages the redrive policy has moved to the dead letter queue, oldest first.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.lock()?.dead_letters.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::StatePoisoned)
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn send_batch(&self, entries: &[Message]) -> Result<SendBatchOutput, QueueError> {
        validate_batch(entries)?;
        let (accepted, failed) = partition_entries(entries);

        let mut state = self.lock()?;
        let now = Instant::now();
        let mut successful = Vec::with_capacity(accepted.len());
        for entry in accepted {
            let message_id = Uuid::now_v7().to_string();
            state.messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: entry.body.clone(),
                sent_at: Utc::now(),
                enqueued_at: now,
                receive_count: 0,
                invisible_until: None,
                receipt_handle: None,
            });
            successful.push(SentEntry {
                sequence_id: entry.sequence_id.clone(),
                message_id,
            });
        }

        debug!(
            "queue {} accepted {} entries, refused {}",
            self.name,
            successful.len(),
            failed.len()
        );

        Ok(SendBatchOutput { successful, failed })
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        validate_receive_limit(max_messages)?;

        let mut state = self.lock()?;
        let now = Instant::now();
        let mut received = Vec::new();
        let mut index = 0;

        while index < state.messages.len() && received.len() < max_messages {
            let message = &mut state.messages[index];
            if !message.is_visible(now) {
                index += 1;
                continue;
            }

            if self.policy.should_dead_letter(message.receive_count) {
                if let Some(message) = state.messages.remove(index) {
                    warn!(
                        "moving message {} to {} after {} receives",
                        message.message_id, self.policy.dead_letter_queue, message.receive_count
                    );
                    metrics::counter!(MESSAGES_DEAD_LETTERED, "queue" => self.name.clone())
                        .increment(1);
                    state.dead_letters.push(DeadLetter {
                        message_id: message.message_id,
                        body: message.body,
                        receive_count: message.receive_count,
                        sent_at: message.sent_at,
                    });
                }
                continue;
            }

            let receipt_handle = Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.invisible_until = Some(now + self.policy.visibility_timeout);
            message.receipt_handle = Some(receipt_handle.clone());

            received.push(QueueMessage {
                message_id: message.message_id.clone(),
                receipt_handle,
                body: message.body.clone(),
                receive_count: message.receive_count,
                sent_at: message.sent_at,
            });
            index += 1;
        }

        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let position = state
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle));

        match position.and_then(|index| state.messages.remove(index)) {
            Some(_) => Ok(()),
            None => Err(QueueError::ReceiptHandleInvalid(receipt_handle.to_owned())),
        }
    }

    async fn approximate_age_of_oldest_message(&self) -> Result<Option<Duration>, QueueError> {
        let state = self.lock()?;
        Ok(state
            .messages
            .iter()
            .map(|m| m.enqueued_at.elapsed())
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MAX_RECEIVES;

    fn immediate_redelivery() -> RedrivePolicy {
        RedrivePolicy::build("test-dlq")
            .visibility_timeout(Duration::ZERO)
            .provide()
    }

    fn batch(n: usize) -> Vec<Message> {
        (1..=n).map(|i| Message::new(i, format!("body-{i}"))).collect()
    }

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let queue = MemoryQueue::new("test", RedrivePolicy::default());
        let output = queue.send_batch(&batch(3)).await.unwrap();

        assert_eq!(output.successful.len(), 3);
        assert!(output.failed.is_empty());

        let received = queue.receive(10).await.unwrap();
        let bodies: Vec<_> = received.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["body-1", "body-2", "body-3"]);
        assert!(received.iter().all(|m| m.receive_count == 1));
        assert_eq!(received[0].message_id, output.successful[0].message_id);
    }

    #[tokio::test]
    async fn test_received_messages_are_hidden_until_timeout() {
        let queue = MemoryQueue::new("test", RedrivePolicy::default());
        queue.send_batch(&batch(2)).await.unwrap();

        assert_eq!(queue.receive(1).await.unwrap().len(), 1);
        // Only the second message is still visible
        let second = queue.receive(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "body-2");
        assert!(queue.receive(10).await.unwrap().is_empty());
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_acknowledges_message() {
        let queue = MemoryQueue::new("test", immediate_redelivery());
        queue.send_batch(&batch(1)).await.unwrap();

        let received = queue.receive(1).await.unwrap();
        queue.delete(&received[0].receipt_handle).await.unwrap();

        assert!(queue.is_empty().unwrap());
        assert!(queue.receive(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_receipt_handle_is_rejected() {
        let queue = MemoryQueue::new("test", immediate_redelivery());
        queue.send_batch(&batch(1)).await.unwrap();

        let first = queue.receive(1).await.unwrap();
        let second = queue.receive(1).await.unwrap();
        assert_eq!(second[0].receive_count, 2);

        let result = queue.delete(&first[0].receipt_handle).await;
        assert!(matches!(result, Err(QueueError::ReceiptHandleInvalid(_))));
        queue.delete(&second[0].receipt_handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_unacknowledged_message_is_dead_lettered_after_max_receives() {
        let queue = MemoryQueue::new("test", immediate_redelivery());
        queue.send_batch(&batch(1)).await.unwrap();

        let mut deliveries = 0;
        for _ in 0..(MAX_RECEIVES * 2) {
            deliveries += queue.receive(10).await.unwrap().len();
        }

        assert_eq!(deliveries, usize::try_from(MAX_RECEIVES).unwrap());
        assert!(queue.is_empty().unwrap());

        let dead_letters = queue.dead_letters().unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].body, "body-1");
        assert_eq!(dead_letters[0].receive_count, MAX_RECEIVES);
    }

    #[tokio::test]
    async fn test_invalid_batches_enqueue_nothing() {
        let queue = MemoryQueue::new("test", RedrivePolicy::default());

        assert!(queue.send_batch(&[]).await.is_err());
        assert!(queue.send_batch(&batch(11)).await.is_err());
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_age_of_oldest_message() {
        let queue = MemoryQueue::new("test", RedrivePolicy::default());
        assert_eq!(queue.approximate_age_of_oldest_message().await.unwrap(), None);

        queue.send_batch(&batch(1)).await.unwrap();
        assert!(queue
            .approximate_age_of_oldest_message()
            .await
            .unwrap()
            .is_some());
    }
}
