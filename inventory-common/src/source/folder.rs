use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectSource, SourceError};

/// Serves objects from a local directory laid out as `<root>/<bucket>/<key>`.
pub struct FolderSource {
    pub root: PathBuf,
}

impl FolderSource {
    pub async fn new(root: &str) -> Result<Self, SourceError> {
        let root = tokio::fs::canonicalize(root).await?;
        Ok(Self { root })
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, SourceError> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            if part.is_empty()
                || !relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err(SourceError::InvalidKey(format!("{bucket}/{key}")));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectSource for FolderSource {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, SourceError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SourceError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
