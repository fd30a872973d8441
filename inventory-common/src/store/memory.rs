use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::message::StoreRecord;

use super::{Store, StoreError};

/// A store held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, StoreRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<StoreRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, in no particular order.
    pub fn records(&self) -> Vec<StoreRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, record: &StoreRecord) -> Result<(), StoreError> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }
}
