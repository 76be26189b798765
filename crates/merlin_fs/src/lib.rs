//! # Merlin FileSystem Storage
//!
//! A local filesystem [`BlobStore`] for merlin.
//!
//! Relative locations resolve against the storage root, absolute ones are used as given.
//! Object URIs (`gs://`, `s3://`) are rejected with [`StorageError::Unsupported`]; use
//! `merlin_opendal` to reach buckets.
//!
//! ## Features
//!
//! * **Atomic Writes**: Content is written to a temporary file and renamed into place, so a
//!   manifest is never observed half-written.
//!
//! ## Usage
//!
//! ```no_run
//! use merlin_fs::FileSystemStorage;
//!
//! let storage = FileSystemStorage::new(".");
//! ```

use bytes::Bytes;
use merlin_core::prelude::*;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

async fn atomic_write(path: &Path, data: Bytes) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension("tmp");

    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;

    Ok(())
}

#[derive(Clone, Debug)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    fn get_path(&self, location: &str) -> Result<PathBuf, StorageError> {
        if location.contains("://") {
            return Err(StorageError::Unsupported(format!(
                "{location} is not a local path"
            )));
        }
        Ok(self.root.join(location))
    }
}

impl BlobStore for FileSystemStorage {
    async fn write_file(&self, location: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.get_path(location)?;
        debug!(path = %path.display(), bytes = data.len(), "Writing file");
        atomic_write(&path, data).await
    }

    async fn read_file(&self, location: &str) -> Result<Bytes, StorageError> {
        let path = self.get_path(location)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string_lossy().to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, location: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.get_path(location)?).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());

        let location = "build/jobs/train-a/job-manifest.json";
        assert!(!storage.exists(location).await.unwrap());

        storage
            .write_file(location, Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();
        storage
            .write_file(location, Bytes::from_static(b"{\"a\":2}"))
            .await
            .unwrap();

        assert!(storage.exists(location).await.unwrap());
        let data = storage.read_file(location).await.unwrap();
        assert_eq!(&data[..], b"{\"a\":2}");
        assert!(!dir.path().join("build/jobs/train-a/job-manifest.tmp").exists());
    }

    #[tokio::test]
    async fn absolute_paths_bypass_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new("/nonexistent-root");

        let target = dir.path().join("out.json");
        let location = target.to_string_lossy();
        storage
            .write_file(&location, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(target.exists());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());

        let err = storage.read_file("nope.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn bucket_uris_are_unsupported() {
        let storage = FileSystemStorage::new(".");
        let err = storage.exists("gs://bucket/key").await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }

    #[tokio::test]
    async fn copy_between_locations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());

        storage
            .write_file("a/spec.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        storage.copy("a/spec.json", "b/c/spec.json").await.unwrap();
        assert_eq!(&storage.read_file("b/c/spec.json").await.unwrap()[..], b"{}");
    }
}
