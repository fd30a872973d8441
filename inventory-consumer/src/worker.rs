use std::future::Future;
use std::sync::Arc;
use std::time;

use inventory_common::message::{QueueMessage, MAX_BATCH_SIZE};
use inventory_common::metrics::{OLDEST_MESSAGE_AGE, RECEIVE_ERRORS};
use inventory_common::queue::QueueTransport;
use tokio::sync;
use tracing::{error, info, warn};

use crate::error::WorkerError;
use crate::processor::{BatchOutcome, BatchProcessor};

/// A worker to poll a queue and spawn tasks to process batches of messages as they arrive.
pub struct ConsumerWorker {
    /// The queue we receive messages from.
    queue: Arc<dyn QueueTransport>,
    processor: Arc<BatchProcessor>,
    /// The maximum number of messages to receive at once.
    batch_size: usize,
    /// The interval for polling the queue.
    poll_interval: time::Duration,
    /// Maximum number of batches being processed at once.
    max_concurrent_batches: usize,
    /// Age of the oldest queued message at which a warning is logged.
    oldest_message_alarm: time::Duration,
}

impl ConsumerWorker {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        processor: Arc<BatchProcessor>,
        batch_size: usize,
        poll_interval: time::Duration,
        max_concurrent_batches: usize,
        oldest_message_alarm: time::Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            poll_interval,
            max_concurrent_batches: max_concurrent_batches.max(1),
            oldest_message_alarm,
        }
    }

    /// Publish the age of the oldest queued message, warning once it reaches the alarm
    /// threshold.
    pub async fn report_queue_age(&self) -> Option<time::Duration> {
        let age = match self.queue.approximate_age_of_oldest_message().await {
            Ok(age) => age,
            Err(e) => {
                error!("failed to read age of oldest message: {}", e);
                return None;
            }
        };

        let seconds = age.map_or(0.0, |age| age.as_secs_f64());
        metrics::gauge!(OLDEST_MESSAGE_AGE).set(seconds);

        if let Some(age) = age.filter(|age| *age >= self.oldest_message_alarm) {
            warn!(
                "oldest message has been queued for {}s, alarm threshold is {}s",
                age.as_secs(),
                self.oldest_message_alarm.as_secs()
            );
        }
        age
    }

    /// Receive one batch and process it in place. Returns `None` when nothing was visible.
    pub async fn poll_once(&self) -> Result<Option<BatchOutcome>, WorkerError> {
        let batch = self.queue.receive(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.processor.process_batch(batch).await))
    }

    /// Wait until at least one message becomes visible in our queue.
    async fn wait_for_batch(&self) -> Vec<QueueMessage> {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.report_queue_age().await;

            match self.queue.receive(self.batch_size).await {
                Ok(batch) if !batch.is_empty() => return batch,
                Ok(_) => continue,
                Err(error) => {
                    error!("error while trying to receive messages: {}", error);
                    metrics::counter!(RECEIVE_ERRORS).increment(1);
                    continue;
                }
            }
        }
    }

    /// Run this worker until `shutdown` resolves, then wait for in-flight batches.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let semaphore = Arc::new(sync::Semaphore::new(self.max_concurrent_batches));

        loop {
            metrics::gauge!("inventory_consumer_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / self.max_concurrent_batches as f64,
            );

            // Take the permit first so received messages are not left waiting for one while
            // their visibility timeout runs.
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| WorkerError::SemaphoreClosed)?
                }
            };

            let batch = tokio::select! {
                _ = &mut shutdown => break,
                batch = self.wait_for_batch() => batch,
            };

            let processor = self.processor.clone();
            tokio::spawn(async move {
                // Move `permit` into the task so it is released when processing ends.
                let _permit = permit;
                processor.process_batch(batch).await
            });
        }

        info!("shutting down, waiting for in-flight batches");
        let in_flight = u32::try_from(self.max_concurrent_batches).unwrap_or(u32::MAX);
        let result = match semaphore.acquire_many(in_flight).await {
            Ok(_permits) => Ok(()),
            Err(_) => Err(WorkerError::SemaphoreClosed),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use inventory_common::message::{Message, MAX_RECEIVES};
    use inventory_common::queue::memory::MemoryQueue;
    use inventory_common::redrive::RedrivePolicy;
    use inventory_common::store::MemoryStore;

    use super::*;
    use crate::record::IdStrategy;

    fn worker(queue: Arc<MemoryQueue>, store: Arc<MemoryStore>) -> ConsumerWorker {
        let processor = Arc::new(BatchProcessor::new(
            queue.clone(),
            store,
            IdStrategy::Random,
        ));
        ConsumerWorker::new(
            queue,
            processor,
            10,
            time::Duration::from_millis(10),
            2,
            time::Duration::from_secs(600),
        )
    }

    fn immediate_redelivery() -> RedrivePolicy {
        RedrivePolicy::build("test-dlq")
            .visibility_timeout(time::Duration::ZERO)
            .provide()
    }

    #[tokio::test]
    async fn test_poison_message_is_dead_lettered_after_max_receives() {
        let queue = Arc::new(MemoryQueue::new("test", immediate_redelivery()));
        let store = Arc::new(MemoryStore::new());
        let worker = worker(queue.clone(), store.clone());

        queue
            .send_batch(&[Message::new(1, "{not json".to_owned())])
            .await
            .unwrap();

        let mut attempts = Vec::new();
        while let Some(outcome) = worker.poll_once().await.unwrap() {
            assert_eq!(outcome.stored, 0);
            attempts.push(outcome.failed[0].receive_count);
        }

        assert_eq!(attempts, (1..=MAX_RECEIVES).collect::<Vec<_>>());
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
        assert!(worker.poll_once().await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_poll_once_on_empty_queue() {
        let queue = Arc::new(MemoryQueue::new("test", RedrivePolicy::default()));
        let worker = worker(queue, Arc::new(MemoryStore::new()));

        assert!(worker.poll_once().await.unwrap().is_none());
        assert_eq!(worker.report_queue_age().await, None);
    }

    #[tokio::test]
    async fn test_run_processes_until_shutdown() {
        let queue = Arc::new(MemoryQueue::new("test", RedrivePolicy::default()));
        let store = Arc::new(MemoryStore::new());
        let worker = worker(queue.clone(), store.clone());

        let body = r#"{"product_id":"P1","location":"WH1","quantity":"5","update_date":"d"}"#;
        let batch: Vec<_> = (1..=10).map(|n| Message::new(n, body.to_owned())).collect();
        queue.send_batch(&batch).await.unwrap();
        queue.send_batch(&batch[..5]).await.unwrap();

        let watched = store.clone();
        let shutdown = async move {
            while watched.len() < 15 {
                tokio::time::sleep(time::Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(time::Duration::from_secs(5), worker.run(shutdown))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.len(), 15);
        assert!(queue.is_empty().unwrap());
    }
}
