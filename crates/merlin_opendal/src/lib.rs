//! # Merlin OpenDAL Storage
//!
//! A [`BlobStore`] powered by [Apache OpenDAL](https://opendal.apache.org/).
//!
//! Locations are routed by scheme: `gs://bucket/key` goes to GCS, `s3://bucket/key` to S3 and
//! anything else to the local filesystem under the configured root. Operators for specific
//! buckets can be registered up front, which is how tests swap a bucket for memory storage.
//!
//! ## Usage
//!
//! ```no_run
//! # use merlin_opendal::OpendalStorage;
//! # use opendal::{Operator, services::Gcs};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = OpendalStorage::new("/workdir")?;
//!
//! // or with an explicitly configured bucket
//! let op = Operator::new(Gcs::default().bucket("my-bucket"))?.finish();
//! let storage = storage.with_bucket("gs://my-bucket", op);
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use merlin_core::prelude::*;
use opendal::services::{Fs, Gcs, S3};
use opendal::{ErrorKind, Operator};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct OpendalStorage {
    local: Operator,
    buckets: HashMap<String, Operator>,
}

fn system(e: opendal::Error) -> StorageError {
    StorageError::System(format!("OpenDAL error: {e}"))
}

impl OpendalStorage {
    /// Storage resolving relative locations under `root`.
    pub fn new(root: &str) -> Result<Self, StorageError> {
        let local = Operator::new(Fs::default().root(root))
            .map_err(system)?
            .finish();
        Ok(Self {
            local,
            buckets: HashMap::new(),
        })
    }

    /// Serves every location under `prefix` (e.g. `gs://my-bucket`) with `op`.
    pub fn with_bucket(mut self, prefix: impl Into<String>, op: Operator) -> Self {
        self.buckets.insert(prefix.into(), op);
        self
    }

    /// The operator and the operator-relative path serving `location`.
    fn route(&self, location: &str) -> Result<(Operator, String), StorageError> {
        let Some((scheme, rest)) = location.split_once("://") else {
            if location.starts_with('/') {
                let op = Operator::new(Fs::default().root("/"))
                    .map_err(system)?
                    .finish();
                return Ok((op, location.trim_start_matches('/').to_string()));
            }
            return Ok((self.local.clone(), location.to_string()));
        };

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::InvalidRequest(format!(
                "{location} has no bucket"
            )));
        }

        if let Some(op) = self.buckets.get(&format!("{scheme}://{bucket}")) {
            return Ok((op.clone(), key.to_string()));
        }

        let op = match scheme {
            "gs" => Operator::new(Gcs::default().bucket(bucket))
                .map_err(system)?
                .finish(),
            "s3" => Operator::new(S3::default().bucket(bucket))
                .map_err(system)?
                .finish(),
            other => {
                return Err(StorageError::Unsupported(format!(
                    "no storage service for {other}:// locations"
                )));
            }
        };
        Ok((op, key.to_string()))
    }
}

impl BlobStore for OpendalStorage {
    async fn write_file(&self, location: &str, data: Bytes) -> Result<(), StorageError> {
        let (op, path) = self.route(location)?;
        debug!(location, bytes = data.len(), "Writing object");

        op.write(&path, data).await.map_err(system)?;
        Ok(())
    }

    async fn read_file(&self, location: &str) -> Result<Bytes, StorageError> {
        let (op, path) = self.route(location)?;

        match op.read(&path).await {
            Ok(buffer) => Ok(buffer.to_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(location.to_string()))
            }
            Err(e) => Err(system(e)),
        }
    }

    async fn exists(&self, location: &str) -> Result<bool, StorageError> {
        let (op, path) = self.route(location)?;
        op.exists(&path).await.map_err(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendal::services::Memory;

    fn memory() -> Operator {
        Operator::new(Memory::default()).unwrap().finish()
    }

    #[tokio::test]
    async fn registered_bucket_serves_its_uris() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OpendalStorage::new(dir.path().to_str().unwrap())
            .unwrap()
            .with_bucket("gs://merlin-ml", memory());

        let uri = "gs://merlin-ml/jobs/train-a/deployment/release/dev/job-manifest.json";
        assert!(!storage.exists(uri).await.unwrap());

        storage
            .write_file(uri, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(storage.exists(uri).await.unwrap());
        assert_eq!(&storage.read_file(uri).await.unwrap()[..], b"{}");
    }

    #[tokio::test]
    async fn relative_paths_go_to_the_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OpendalStorage::new(dir.path().to_str().unwrap()).unwrap();

        storage
            .write_file("build/a.json", Bytes::from_static(b"1"))
            .await
            .unwrap();
        assert!(dir.path().join("build/a.json").exists());
    }

    #[tokio::test]
    async fn copy_from_local_to_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OpendalStorage::new(dir.path().to_str().unwrap())
            .unwrap()
            .with_bucket("gs://b", memory());

        storage
            .write_file("spec.json", Bytes::from_static(b"{\"p\":1}"))
            .await
            .unwrap();
        storage.copy("spec.json", "gs://b/specs/spec.json").await.unwrap();
        assert_eq!(
            &storage.read_file("gs://b/specs/spec.json").await.unwrap()[..],
            b"{\"p\":1}"
        );
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OpendalStorage::new(dir.path().to_str().unwrap())
            .unwrap()
            .with_bucket("gs://b", memory());

        let err = storage.read_file("gs://b/none").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        let storage = OpendalStorage::new("/tmp").unwrap();
        assert!(matches!(
            storage.route("ftp://host/file"),
            Err(StorageError::Unsupported(_))
        ));
        assert!(matches!(
            storage.route("gs:///key"),
            Err(StorageError::InvalidRequest(_))
        ));
    }
}
