use std::sync::Arc;

use inventory_common::message::{QueueMessage, StoreRecord};
use inventory_common::metrics::{
    timing_guard, ACK_FAILED, BATCH_DURATION, MESSAGES_FAILED, MESSAGES_RECEIVED, MESSAGES_STORED,
};
use inventory_common::queue::QueueTransport;
use inventory_common::store::Store;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::MessageError;
use crate::record::{IdStrategy, InventoryUpdate};

/// A message that was left on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMessage {
    pub message_id: String,
    pub receive_count: u32,
    pub reason: String,
}

/// What happened to the messages of one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Records written to the store.
    pub stored: usize,
    /// Ids of the messages deleted from the queue.
    pub acknowledged: Vec<String>,
    pub failed: Vec<FailedMessage>,
}

/// Stores the messages of a batch one at a time, in order, deleting each message from the
/// queue once its record is written. A message that fails is left on the queue and does not
/// affect the rest of the batch.
pub struct BatchProcessor {
    queue: Arc<dyn QueueTransport>,
    store: Arc<dyn Store>,
    id_strategy: IdStrategy,
}

impl BatchProcessor {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        store: Arc<dyn Store>,
        id_strategy: IdStrategy,
    ) -> Self {
        Self {
            queue,
            store,
            id_strategy,
        }
    }

    /// Parse a message and write its record.
    pub async fn process_message(
        &self,
        message: &QueueMessage,
    ) -> Result<StoreRecord, MessageError> {
        let update = InventoryUpdate::from_body(&message.body)?;
        let record = update.into_record(self.id_strategy.id_for(&message.body));
        self.store.put(&record).await?;
        Ok(record)
    }

    pub async fn process_batch(&self, batch: Vec<QueueMessage>) -> BatchOutcome {
        let _timing = timing_guard(BATCH_DURATION);
        metrics::counter!(MESSAGES_RECEIVED).increment(batch.len() as u64);

        let mut outcome = BatchOutcome::default();
        for message in batch {
            match self.process_message(&message).await {
                Ok(record) => {
                    outcome.stored += 1;
                    metrics::counter!(MESSAGES_STORED).increment(1);
                    debug!("stored message {} as {}", message.message_id, record.id);

                    match self.queue.delete(&message.receipt_handle).await {
                        Ok(()) => outcome.acknowledged.push(message.message_id),
                        Err(e) => {
                            // The record stays written, the message comes back after its
                            // visibility timeout.
                            error!(
                                "failed to acknowledge message {}: {}",
                                message.message_id, e
                            );
                            metrics::counter!(ACK_FAILED).increment(1);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "failed to process message {} (receive {}): {}",
                        message.message_id, message.receive_count, e
                    );
                    metrics::counter!(MESSAGES_FAILED, "reason" => failure_reason(&e))
                        .increment(1);
                    outcome.failed.push(FailedMessage {
                        message_id: message.message_id,
                        receive_count: message.receive_count,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "processed batch: {} stored, {} acknowledged, {} failed",
            outcome.stored,
            outcome.acknowledged.len(),
            outcome.failed.len()
        );
        outcome
    }
}

fn failure_reason(error: &MessageError) -> &'static str {
    match error {
        MessageError::Malformed(_) => "malformed",
        MessageError::MissingField(_) => "missing_field",
        MessageError::StoreWrite(_) => "store_write",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use inventory_common::message::Message;
    use inventory_common::queue::{QueueError, SendBatchOutput};
    use inventory_common::store::{MemoryStore, StoreError};

    use super::*;

    /// Only records which receipt handles were deleted.
    #[derive(Default)]
    struct RecordingQueue {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueTransport for RecordingQueue {
        async fn send_batch(&self, _entries: &[Message]) -> Result<SendBatchOutput, QueueError> {
            Ok(SendBatchOutput::default())
        }

        async fn receive(&self, _max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
            Ok(Vec::new())
        }

        async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
            self.deleted.lock().unwrap().push(receipt_handle.to_owned());
            Ok(())
        }

        async fn approximate_age_of_oldest_message(
            &self,
        ) -> Result<Option<std::time::Duration>, QueueError> {
            Ok(None)
        }
    }

    /// Rejects records for one product, stores the rest in memory.
    struct FailingStore {
        inner: MemoryStore,
        failing_product: String,
    }

    #[async_trait]
    impl Store for FailingStore {
        async fn put(&self, record: &StoreRecord) -> Result<(), StoreError> {
            if record.product_id == self.failing_product {
                return Err(StoreError::Rejected {
                    id: record.id,
                    reason: "write failed".to_owned(),
                });
            }
            self.inner.put(record).await
        }
    }

    fn message(n: usize, body: String) -> QueueMessage {
        QueueMessage {
            message_id: format!("m{n}"),
            receipt_handle: format!("h{n}"),
            body,
            receive_count: 1,
            sent_at: Utc::now(),
        }
    }

    fn good_body(n: usize) -> String {
        format!(
            r#"{{"product_id":"P{n}","location":"WH1","quantity":"{n}","update_date":"2024-01-01"}}"#
        )
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_affect_siblings() {
        let queue = Arc::new(RecordingQueue::default());
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(queue.clone(), store.clone(), IdStrategy::Random);

        let mut batch: Vec<_> = (1..=9).map(|n| message(n, good_body(n))).collect();
        batch.insert(4, message(0, "{not json".to_owned()));

        let outcome = processor.process_batch(batch).await;

        assert_eq!(outcome.stored, 9);
        assert_eq!(store.len(), 9);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].message_id, "m0");

        let deleted = queue.deleted.lock().unwrap().clone();
        let expected: Vec<_> = (1..=9).map(|n| format!("h{n}")).collect();
        assert_eq!(deleted, expected);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_only_that_message() {
        let queue = Arc::new(RecordingQueue::default());
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            failing_product: "P2".to_owned(),
        });
        let processor = BatchProcessor::new(queue.clone(), store.clone(), IdStrategy::Random);

        let batch = (1..=3).map(|n| message(n, good_body(n))).collect();
        let outcome = processor.process_batch(batch).await;

        assert_eq!(outcome.acknowledged, vec!["m1", "m3"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].message_id, "m2");
        assert_eq!(*queue.deleted.lock().unwrap(), vec!["h1", "h3"]);
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test]
    async fn test_stored_record_matches_body() {
        let queue = Arc::new(RecordingQueue::default());
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(queue, store.clone(), IdStrategy::Random);

        let record = processor
            .process_message(&message(1, good_body(1)))
            .await
            .unwrap();

        assert_eq!(record.product_id, "P1");
        assert_eq!(record.location, "WH1");
        assert_eq!(record.quantity, 1);
        assert_eq!(record.update_date, "2024-01-01");
        assert_eq!(store.get(&record.id), Some(record));
    }

    #[tokio::test]
    async fn test_redelivery_duplicates_only_with_random_ids() {
        for (strategy, expected) in [(IdStrategy::Random, 2), (IdStrategy::Content, 1)] {
            let queue = Arc::new(RecordingQueue::default());
            let store = Arc::new(MemoryStore::new());
            let processor = BatchProcessor::new(queue, store.clone(), strategy);

            processor.process_batch(vec![message(1, good_body(1))]).await;
            processor.process_batch(vec![message(1, good_body(1))]).await;

            assert_eq!(store.len(), expected, "{strategy:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_field_is_reported() {
        let queue = Arc::new(RecordingQueue::default());
        let processor =
            BatchProcessor::new(queue.clone(), Arc::new(MemoryStore::new()), IdStrategy::Random);

        let outcome = processor
            .process_batch(vec![message(1, r#"{"product_id":"P1"}"#.to_owned())])
            .await;

        assert_eq!(outcome.stored, 0);
        assert!(outcome.failed[0].reason.contains("location"));
        assert!(queue.deleted.lock().unwrap().is_empty());
    }
}
