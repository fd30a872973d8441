//! # Store
//!
//! The key-value table consumed messages end up in. Records are keyed by `id` and a write
//! with an existing id replaces the previous record.
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::message::StoreRecord;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("writing record {id} failed with: {error}")]
    QueryError { id: Uuid, error: sqlx::Error },
    #[error("record {id} was rejected: {reason}")]
    Rejected { id: Uuid, reason: String },
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the record with `record.id`.
    async fn put(&self, record: &StoreRecord) -> Result<(), StoreError>;
}
