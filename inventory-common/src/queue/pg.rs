//! # PgQueue
//!
//! A queue transport backed by a PostgreSQL table. Several named queues share one table; a
//! dead-lettered message is moved by renaming its queue to the dead letter queue.
use std::time;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::{Message, QueueMessage};
use crate::metrics::MESSAGES_DEAD_LETTERED;
use crate::redrive::RedrivePolicy;

use super::{
    partition_entries, validate_batch, validate_receive_limit, QueueError, QueueTransport,
    SendBatchOutput, SentEntry,
};

/// Table created by the bundled migrations.
pub const DEFAULT_TABLE: &str = "queue_messages";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    body: String,
    receipt_handle: Uuid,
    receive_count: i32,
    sent_at: DateTime<Utc>,
}

impl From<MessageRow> for QueueMessage {
    fn from(row: MessageRow) -> Self {
        QueueMessage {
            message_id: row.id.to_string(),
            receipt_handle: row.receipt_handle.to_string(),
            body: row.body,
            receive_count: u32::try_from(row.receive_count).unwrap_or_default(),
            sent_at: row.sent_at,
        }
    }
}

/// A queue implemented on top of a PostgreSQL table.
pub struct PgQueue {
    queue_name: String,
    table: String,
    pool: PgPool,
    policy: RedrivePolicy,
}

impl PgQueue {
    /// Initialize a new PgQueue named `queue_name` stored in `table`.
    pub async fn new(
        queue_name: &str,
        table: &str,
        url: &str,
        max_connections: u32,
        policy: RedrivePolicy,
    ) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        Ok(Self::new_from_pool(queue_name, table, pool, policy))
    }

    /// Initialize a new PgQueue reusing an existing connection pool.
    pub fn new_from_pool(
        queue_name: &str,
        table: &str,
        pool: PgPool,
        policy: RedrivePolicy,
    ) -> Self {
        Self {
            queue_name: queue_name.to_owned(),
            table: table.to_owned(),
            pool,
            policy,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Move every visible message that exhausted its receives to the dead letter queue.
    async fn dead_letter_exhausted<'c, E>(&self, executor: E) -> Result<u64, QueueError>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let base_query = format!(
            r#"
WITH exhausted AS (
    SELECT
        id
    FROM
        "{0}"
    WHERE
        queue_name = $1
        AND visible_at <= NOW()
        AND receive_count >= $2
    FOR UPDATE SKIP LOCKED
)
UPDATE
    "{0}"
SET
    queue_name = $3,
    source_queue = $1,
    receive_count = 0,
    receipt_handle = NULL,
    visible_at = NOW()
FROM
    exhausted
WHERE
    "{0}".id = exhausted.id
            "#,
            &self.table
        );

        let result = sqlx::query(&base_query)
            .bind(&self.queue_name)
            .bind(i32::try_from(self.policy.max_receive_count).unwrap_or(i32::MAX))
            .bind(&self.policy.dead_letter_queue)
            .execute(executor)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl QueueTransport for PgQueue {
    async fn send_batch(&self, entries: &[Message]) -> Result<SendBatchOutput, QueueError> {
        validate_batch(entries)?;
        let (accepted, failed) = partition_entries(entries);
        if accepted.is_empty() {
            return Ok(SendBatchOutput {
                successful: Vec::new(),
                failed,
            });
        }

        let ids: Vec<Uuid> = accepted.iter().map(|_| Uuid::now_v7()).collect();
        let bodies: Vec<&str> = accepted.iter().map(|entry| entry.body.as_str()).collect();

        let base_query = format!(
            r#"
INSERT INTO "{}"
    (id, queue_name, body, receive_count, sent_at, visible_at)
SELECT
    id, $1, body, 0, NOW(), NOW()
FROM
    UNNEST($2::uuid[], $3::text[]) AS batch(id, body)
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(&self.queue_name)
            .bind(&ids)
            .bind(&bodies)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        let successful = accepted
            .iter()
            .zip(ids)
            .map(|(entry, id)| SentEntry {
                sequence_id: entry.sequence_id.clone(),
                message_id: id.to_string(),
            })
            .collect();

        Ok(SendBatchOutput { successful, failed })
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        validate_receive_limit(max_messages)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        let dead_lettered = self.dead_letter_exhausted(&mut *tx).await?;
        if dead_lettered > 0 {
            warn!(
                "moved {} messages from {} to {}",
                dead_lettered, self.queue_name, self.policy.dead_letter_queue
            );
            metrics::counter!(MESSAGES_DEAD_LETTERED, "queue" => self.queue_name.clone())
                .increment(dead_lettered);
        }

        let base_query = format!(
            r#"
WITH available AS (
    SELECT
        id
    FROM
        "{0}"
    WHERE
        queue_name = $1
        AND visible_at <= NOW()
    ORDER BY
        sent_at, id
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
UPDATE
    "{0}"
SET
    receive_count = "{0}".receive_count + 1,
    receipt_handle = gen_random_uuid(),
    visible_at = NOW() + make_interval(secs => $3)
FROM
    available
WHERE
    "{0}".id = available.id
RETURNING
    "{0}".id,
    "{0}".body,
    "{0}".receipt_handle,
    "{0}".receive_count,
    "{0}".sent_at
            "#,
            &self.table
        );

        let mut rows: Vec<MessageRow> = sqlx::query_as(&base_query)
            .bind(&self.queue_name)
            .bind(i64::try_from(max_messages).unwrap_or(i64::MAX))
            .bind(self.policy.visibility_timeout.as_secs_f64())
            .fetch_all(&mut *tx)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        tx.commit()
            .await
            .map_err(|error| QueueError::QueryError {
                command: "COMMIT".to_owned(),
                error,
            })?;

        // RETURNING does not preserve the CTE ordering
        rows.sort_by(|a, b| (a.sent_at, a.id).cmp(&(b.sent_at, b.id)));
        debug!("received {} messages from {}", rows.len(), self.queue_name);

        Ok(rows.into_iter().map(QueueMessage::from).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let handle = Uuid::parse_str(receipt_handle)
            .map_err(|_| QueueError::ReceiptHandleInvalid(receipt_handle.to_owned()))?;

        let base_query = format!(
            r#"
DELETE FROM "{}"
WHERE
    queue_name = $1
    AND receipt_handle = $2
            "#,
            &self.table
        );

        let result = sqlx::query(&base_query)
            .bind(&self.queue_name)
            .bind(handle)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        if result.rows_affected() == 0 {
            return Err(QueueError::ReceiptHandleInvalid(receipt_handle.to_owned()));
        }

        Ok(())
    }

    async fn approximate_age_of_oldest_message(
        &self,
    ) -> Result<Option<time::Duration>, QueueError> {
        let base_query = format!(
            r#"
SELECT
    EXTRACT(EPOCH FROM NOW() - MIN(sent_at))::float8
FROM
    "{}"
WHERE
    queue_name = $1
            "#,
            &self.table
        );

        let age: Option<f64> = sqlx::query_scalar(&base_query)
            .bind(&self.queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(age.map(|seconds| time::Duration::from_secs_f64(seconds.max(0.0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(pool: PgPool, visibility_timeout: time::Duration) -> PgQueue {
        let policy = RedrivePolicy::build("test-dlq")
            .max_receive_count(2)
            .visibility_timeout(visibility_timeout)
            .provide();
        PgQueue::new_from_pool("test", DEFAULT_TABLE, pool, policy)
    }

    fn batch(n: usize) -> Vec<Message> {
        (1..=n).map(|i| Message::new(i, format!("body-{i}"))).collect()
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_can_send_receive_and_delete(db: PgPool) {
        let queue = queue(db, time::Duration::from_secs(300));

        let output = queue.send_batch(&batch(3)).await.unwrap();
        assert_eq!(output.successful.len(), 3);

        let received = queue.receive(10).await.unwrap();
        let bodies: Vec<_> = received.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["body-1", "body-2", "body-3"]);
        assert!(queue.receive(10).await.unwrap().is_empty());

        for message in &received {
            queue.delete(&message.receipt_handle).await.unwrap();
        }
        assert_eq!(
            queue.approximate_age_of_oldest_message().await.unwrap(),
            None
        );
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_exhausted_messages_are_dead_lettered(db: PgPool) {
        let queue = queue(db.clone(), time::Duration::ZERO);
        queue.send_batch(&batch(1)).await.unwrap();

        assert_eq!(queue.receive(1).await.unwrap()[0].receive_count, 1);
        let second = queue.receive(1).await.unwrap();
        assert_eq!(second[0].receive_count, 2);
        assert!(queue.receive(1).await.unwrap().is_empty());

        let stale = queue.delete(&second[0].receipt_handle).await;
        assert!(matches!(stale, Err(QueueError::ReceiptHandleInvalid(_))));

        let dlq = PgQueue::new_from_pool("test-dlq", DEFAULT_TABLE, db, RedrivePolicy::default());
        let dead = dlq.receive(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, "body-1");
    }
}
