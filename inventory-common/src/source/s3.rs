use async_trait::async_trait;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;

use super::{ObjectSource, SourceError};

pub struct S3Source {
    client: S3Client,
}

impl S3Source {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, SourceError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("failed to get object from S3: {e}");
                if let GetObjectError::NoSuchKey(_) = e.into_service_error() {
                    SourceError::NotFound {
                        bucket: bucket.to_owned(),
                        key: key.to_owned(),
                    }
                } else {
                    SourceError::OperationFailed(error_message)
                }
            })?;

        let body = output.body.collect().await.map_err(|e| {
            SourceError::OperationFailed(format!("failed to read S3 object body: {e}"))
        })?;

        Ok(body.into_bytes())
    }
}
