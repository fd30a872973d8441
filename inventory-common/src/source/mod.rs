//! Object sources the producer reads uploaded CSV files from.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod folder;
pub mod s3;

pub use folder::FolderSource;
pub use s3::S3Source;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("object {key} not found in bucket {bucket}")]
    NotFound { bucket: String, key: String },
    #[error("object key {0} is not valid for this source")]
    InvalidKey(String),
    #[error("object operation failed: {0}")]
    OperationFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A store of immutable objects, addressed by bucket and key.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetch the whole object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, SourceError>;
}

/// Object source serving fixed contents, always available for tests.
#[derive(Clone, Default)]
pub struct MemorySource {
    objects: HashMap<(String, String), Bytes>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, bucket: &str, key: &str, contents: impl Into<Bytes>) -> Self {
        self.objects
            .insert((bucket.to_owned(), key.to_owned()), contents.into());
        self
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, SourceError> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            })
    }
}
