//! Filesystem store backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::H256;

use super::{ContentStore, ContentWriter, StoreError};

/// A content-addressed store over a filesystem repository.
///
/// The blob for digest `h` lives at `<root>/<hex(h)[0..2]>/<hex(h)>`; the
/// two-character shard level keeps directories at a tractable fan-out.
#[derive(Clone, Debug)]
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    /// Opens a store rooted at `root`. The directory is created lazily on
    /// first write; a missing directory reads as an empty store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, key: H256) -> PathBuf {
        let hex = hex::encode(key.as_bytes());
        self.root.join(&hex[..2]).join(hex)
    }

    /// The repository root this store reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ContentStore for FsBlockStore {
    async fn get(&self, key: H256) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, key: H256) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.blob_path(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContentWriter for FsBlockStore {
    async fn put(&self, key: H256, data: Bytes) -> Result<(), StoreError> {
        let path = self.blob_path(key);
        tokio::fs::create_dir_all(path.parent().expect("blob path always has a parent")).await?;
        tokio::fs::write(path, &data).await?;
        Ok(())
    }

    async fn remove(&self, key: H256) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FsBlockStore;
    use crate::store::{publish_raw, ContentStore, ContentWriter};

    #[tokio::test]
    async fn round_trip_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::new(dir.path());

        let key = publish_raw(&store, b"a stored node").await.unwrap();
        assert!(store.has(key).await.unwrap());
        assert_eq!(&store.get(key).await.unwrap().unwrap()[..], b"a stored node");

        // Blobs shard under the first two hex characters of the digest.
        let hex = hex::encode(key.as_bytes());
        assert!(dir.path().join(&hex[..2]).join(&hex).exists());

        store.remove(key).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_repository_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::new(dir.path().join("not-created-yet"));

        let key = keccak_hash::keccak(b"anything");
        assert!(!store.has(key).await.unwrap());
        assert_eq!(store.get(key).await.unwrap(), None);
    }
}
