use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid object key: '{0}'")]
    InvalidKey(String),

    #[error("Upload rejected: {0}")]
    Rejected(String),
}

/// Result of a single object upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub bucket: String,
    pub key: String,
    pub bytes: u64,
}

/// Object storage the migration artifacts are uploaded to.
#[async_trait]
pub trait ObjectTransfer: Send + Sync {
    async fn upload(&self, local: &Path, key: &str, bucket: &str)
        -> Result<UploadReport, UploadError>;
}

/// Object key of `path` below `root`, with `/` separators.
pub fn object_key(root: &Path, path: &Path) -> Result<String, UploadError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| UploadError::InvalidKey(path.display().to_string()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return Err(UploadError::InvalidKey(relative.display().to_string())),
        }
    }

    if parts.is_empty() {
        return Err(UploadError::InvalidKey(path.display().to_string()));
    }
    Ok(parts.join("/"))
}

/// Stores objects as files, one directory per bucket.
pub struct LocalDirectoryTransfer {
    root: PathBuf,
}

impl LocalDirectoryTransfer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where `key` of `bucket` is stored.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, UploadError> {
        let mut path = self.root.join(checked_segment(bucket)?);
        for segment in key.split('/') {
            path.push(checked_segment(segment)?);
        }
        Ok(path)
    }
}

fn checked_segment(segment: &str) -> Result<&str, UploadError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
        return Err(UploadError::InvalidKey(segment.to_string()));
    }
    Ok(segment)
}

#[async_trait]
impl ObjectTransfer for LocalDirectoryTransfer {
    async fn upload(
        &self,
        local: &Path,
        key: &str,
        bucket: &str,
    ) -> Result<UploadReport, UploadError> {
        let target = self.object_path(bucket, key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = fs::copy(local, &target).await?;

        Ok(UploadReport {
            bucket: bucket.to_string(),
            key: key.to_string(),
            bytes,
        })
    }
}
