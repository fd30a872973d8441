use std::sync::Arc;

use inventory_common::event::ObjectLocation;
use inventory_common::message::{Message, MAX_BATCH_SIZE};
use inventory_common::metrics::{
    BATCHES_SENT, ENTRIES_FAILED, MESSAGES_SENT, OBJECTS_FAILED, OBJECTS_PROCESSED, ROWS_PARSED,
};
use inventory_common::queue::QueueTransport;
use inventory_common::source::ObjectSource;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::batch::BatchAccumulator;
use crate::error::{ProducerError, SourceReadError};
use crate::parse::{decode, Records};

/// What a producer run sent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceSummary {
    pub rows: usize,
    pub batches: usize,
    pub messages: usize,
    pub failed_entries: usize,
}

impl std::ops::AddAssign for ProduceSummary {
    fn add_assign(&mut self, other: Self) {
        self.rows += other.rows;
        self.batches += other.batches;
        self.messages += other.messages;
        self.failed_entries += other.failed_entries;
    }
}

/// Fans the rows of an uploaded file out to the queue, in batches of at most
/// [`MAX_BATCH_SIZE`] messages.
///
/// Runs are sequential and never retry: the first batch the queue rejects as a whole
/// aborts the run, and no later batch is sent. Entries refused individually are logged
/// and counted without aborting.
pub struct Producer {
    queue: Arc<dyn QueueTransport>,
    batch_size: usize,
}

impl Producer {
    pub fn new(queue: Arc<dyn QueueTransport>) -> Self {
        Self::with_batch_size(queue, MAX_BATCH_SIZE)
    }

    pub fn with_batch_size(queue: Arc<dyn QueueTransport>, batch_size: usize) -> Self {
        Self {
            queue,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Send every row of `raw` to the queue.
    pub async fn produce(&self, raw: &[u8]) -> Result<ProduceSummary, ProducerError> {
        let text = decode(raw)?;
        let records = Records::new(text)?;

        let mut summary = ProduceSummary::default();
        let mut batch = BatchAccumulator::with_capacity(self.batch_size);

        for record in records {
            let record = record?;
            summary.rows += 1;
            metrics::counter!(ROWS_PARSED).increment(1);
            let body = record.to_body().map_err(|error| ProducerError::Serialize {
                row: summary.rows,
                error,
            })?;

            if batch.push(body) {
                self.submit(batch.flush(), &mut summary).await?;
            }
        }

        if !batch.is_empty() {
            self.submit(batch.flush(), &mut summary).await?;
        }

        Ok(summary)
    }

    async fn submit(
        &self,
        batch: Vec<Message>,
        summary: &mut ProduceSummary,
    ) -> Result<(), ProducerError> {
        let number = summary.batches + 1;
        let output = self
            .queue
            .send_batch(&batch)
            .await
            .map_err(|error| ProducerError::Transport {
                batch: number,
                error,
            })?;

        for failed in &output.failed {
            warn!(
                "batch {} entry {} was refused by the queue: {}",
                number, failed.sequence_id, failed.reason
            );
        }
        debug!(
            "sent batch {} with {} messages, {} refused",
            number,
            output.successful.len(),
            output.failed.len()
        );

        summary.batches = number;
        summary.messages += output.successful.len();
        summary.failed_entries += output.failed.len();

        metrics::counter!(BATCHES_SENT).increment(1);
        metrics::counter!(MESSAGES_SENT).increment(output.successful.len() as u64);
        metrics::counter!(ENTRIES_FAILED).increment(output.failed.len() as u64);

        Ok(())
    }

    /// Fetch one uploaded object and send its rows.
    pub async fn ingest(
        &self,
        source: &dyn ObjectSource,
        location: &ObjectLocation,
    ) -> Result<ProduceSummary, ProducerError> {
        let result = match source.get_object(&location.bucket, &location.key).await {
            Ok(raw) => self.produce(&raw).await,
            Err(e) => Err(SourceReadError::from(e).into()),
        };

        match result {
            Ok(summary) => {
                info!(
                    "ingested {}/{}: {} rows in {} batches, {} entries refused",
                    location.bucket,
                    location.key,
                    summary.rows,
                    summary.batches,
                    summary.failed_entries
                );
                metrics::counter!(OBJECTS_PROCESSED).increment(1);
                Ok(summary)
            }
            Err(e) => {
                error!("ingesting {}/{} failed: {}", location.bucket, location.key, e);
                metrics::counter!(OBJECTS_FAILED).increment(1);
                Err(e)
            }
        }
    }

    /// Ingest every location in order, stopping at the first failure.
    pub async fn ingest_all(
        &self,
        source: &dyn ObjectSource,
        locations: &[ObjectLocation],
    ) -> Result<ProduceSummary, ProducerError> {
        let mut total = ProduceSummary::default();
        for location in locations {
            total += self.ingest(source, location).await?;
        }
        Ok(total)
    }
}
