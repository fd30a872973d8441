//! Object-created notifications, in the shape S3 event notifications use.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("notification contains no records")]
    NoRecords,
    #[error("object key {key} could not be decoded: {reason}")]
    InvalidKey { key: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectCreatedEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectEntity {
    /// URL-encoded, with spaces as `+`.
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Where a newly created object lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectCreatedEvent {
    /// Decoded locations of every record, in notification order.
    pub fn locations(&self) -> Result<Vec<ObjectLocation>, EventError> {
        if self.records.is_empty() {
            return Err(EventError::NoRecords);
        }

        self.records
            .iter()
            .map(|record| {
                Ok(ObjectLocation {
                    bucket: record.s3.bucket.name.clone(),
                    key: decode_key(&record.s3.object.key)?,
                })
            })
            .collect()
    }
}

fn decode_key(key: &str) -> Result<String, EventError> {
    let spaced = key.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| EventError::InvalidKey {
            key: key.to_owned(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locations_decode_keys_in_order() {
        let event: ObjectCreatedEvent = serde_json::from_str(
            r#"{"Records":[
                {"s3":{"bucket":{"name":"uploads"},"object":{"key":"daily+stock%2B1.csv","size":12}}},
                {"s3":{"bucket":{"name":"uploads"},"object":{"key":"2024/b.csv"}}}
            ]}"#,
        )
        .unwrap();

        let locations = event.locations().unwrap();
        assert_eq!(
            locations,
            vec![
                ObjectLocation {
                    bucket: "uploads".to_owned(),
                    key: "daily stock+1.csv".to_owned(),
                },
                ObjectLocation {
                    bucket: "uploads".to_owned(),
                    key: "2024/b.csv".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn test_empty_notification_has_no_locations() {
        let event: ObjectCreatedEvent = serde_json::from_str(r#"{"Records":[]}"#).unwrap();
        assert_eq!(event.locations(), Err(EventError::NoRecords));

        let event: ObjectCreatedEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(event.locations(), Err(EventError::NoRecords));
    }

    #[test]
    fn test_invalid_utf8_key_is_rejected() {
        let event: ObjectCreatedEvent = serde_json::from_str(
            r#"{"Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"%FF.csv"}}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            event.locations(),
            Err(EventError::InvalidKey { .. })
        ));
    }
}
