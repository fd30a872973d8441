//! # Message
//!
//! Types flowing between the producer, the queue and the consumer.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// Maximum number of entries a single `send_batch` call may carry.
pub const MAX_BATCH_SIZE: usize = 10;

/// Receive count after which the queue stops redelivering a message and dead-letters it.
pub const MAX_RECEIVES: u32 = 5;

/// Largest message body the queue accepts, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Key under which fields beyond the header row are collected, in order.
pub const OVERFLOW_KEY: &str = "__overflow__";

/// One parsed row of the input, keyed by the header row.
///
/// Column order is the header order. A row shorter than the header holds `None` for the
/// missing trailing columns, a row longer than the header keeps the extra fields in
/// `overflow`. Serializes to a JSON object, with missing columns as `null` and the
/// overflow (if any) as an array under [`OVERFLOW_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "IndexMap<String, Value>")]
pub struct RawRecord {
    fields: IndexMap<String, Option<String>>,
    overflow: Vec<String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value. A repeated column keeps its first position and takes the last value.
    pub fn insert(&mut self, column: impl Into<String>, value: Option<String>) {
        self.fields.insert(column.into(), value);
    }

    pub fn push_overflow(&mut self, value: impl Into<String>) {
        self.overflow.push(value.into());
    }

    /// The value of `column`, or `None` if the column is unknown or absent in this row.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(|v| v.as_deref())
    }

    pub fn overflow(&self) -> &[String] {
        &self.overflow
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.overflow.is_empty()
    }

    /// Compact JSON object form used as the queue message body.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(!self.overflow.is_empty());
        let mut map = serializer.serialize_map(Some(self.fields.len() + extra))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        if !self.overflow.is_empty() {
            map.serialize_entry(OVERFLOW_KEY, &self.overflow)?;
        }
        map.end()
    }
}

impl TryFrom<IndexMap<String, Value>> for RawRecord {
    type Error = String;

    fn try_from(map: IndexMap<String, Value>) -> Result<Self, Self::Error> {
        let mut record = RawRecord::new();
        for (column, value) in map {
            if column == OVERFLOW_KEY {
                let Value::Array(values) = value else {
                    return Err(format!("{OVERFLOW_KEY} must be an array, got {value}"));
                };
                for value in values {
                    match value {
                        Value::String(s) => record.push_overflow(s),
                        other => return Err(format!("overflow value {other} is not a string")),
                    }
                }
                continue;
            }

            match value {
                Value::String(s) => record.insert(column, Some(s)),
                Value::Null => record.insert(column, None),
                other => return Err(format!("column {column} holds non-string value {other}")),
            }
        }
        Ok(record)
    }
}

/// An entry of an outbound batch.
///
/// `sequence_id` is only unique within the batch it was assigned in: it counts from 1 and
/// restarts with every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sequence_id: String,
    pub body: String,
}

impl Message {
    pub fn new(sequence_id: usize, body: String) -> Self {
        Self {
            sequence_id: sequence_id.to_string(),
            body,
        }
    }
}

/// A message as handed to a consumer by the queue transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Transport assigned id, stable across redeliveries.
    pub message_id: String,
    /// Handle for acknowledging this particular delivery. Changes on every redelivery.
    pub receipt_handle: String,
    pub body: String,
    /// Approximate number of times this message has been received, this delivery included.
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

/// A row as written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: Uuid,
    pub product_id: String,
    pub location: String,
    pub quantity: i64,
    pub update_date: String,
}
