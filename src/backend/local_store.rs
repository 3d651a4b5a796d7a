//! Filesystem-backed object store

use crate::backend::{BackendError, ObjectStore};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Split `s3://bucket/key/prefix` into bucket and key
pub fn split_object_uri(uri: &str) -> Result<(&str, &str), BackendError> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| BackendError::Remote(format!("'{}' is not an s3:// location", uri)))?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(BackendError::Remote(format!("'{}' has no bucket", uri)));
    }
    Ok((bucket, key.trim_matches('/')))
}

/// Object store keeping `s3://bucket/key` at `<root>/bucket/key`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path backing a remote location
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, BackendError> {
        let (bucket, key) = split_object_uri(uri)?;
        let key = Path::new(key);
        if key
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BackendError::Remote(format!(
                "'{}' contains relative path segments",
                uri
            )));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload_directory(&self, local: &Path, remote: &str) -> Result<(), BackendError> {
        let target = self.resolve(remote)?;
        let source = local.to_path_buf();
        debug!("upload {} -> {}", source.display(), remote);
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| BackendError::Internal(format!("upload task failed: {}", e)))?
    }

    async fn download_directory(&self, remote: &str, local: &Path) -> Result<(), BackendError> {
        let source = self.resolve(remote)?;
        if !source.is_dir() {
            return Err(BackendError::Remote(format!("no objects under {}", remote)));
        }
        let target = local.to_path_buf();
        debug!("download {} -> {}", remote, target.display());
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| BackendError::Internal(format!("download task failed: {}", e)))?
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), BackendError> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}
