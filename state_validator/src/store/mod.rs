//! The read contract the traversal engine consumes, and its backends.
//!
//! Every backend is a content-addressed mapping: keys are the Keccak-256
//! digests of the stored blobs. The engine only ever reads; the write side
//! ([`ContentWriter`]) exists for seeding stores in tests and tooling.

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use thiserror::Error;

mod fs;
mod memory;
mod postgres;

pub use fs::FsBlockStore;
pub use memory::MemoryStore;
pub use postgres::PgBlockStore;

/// Errors surfaced by a store backend.
///
/// These indicate the backend itself failed, not that a key was absent;
/// absence is the `Ok(None)` result of [`ContentStore::get`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

/// Read access to a content-addressed store.
///
/// Reads are idempotent and side-effect free. `get` returning `Ok(None)`
/// means the key is definitively absent from this backend at this moment.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetches the blob stored under `key`.
    async fn get(&self, key: H256) -> Result<Option<Bytes>, StoreError>;

    /// Returns whether a blob is stored under `key`, without fetching it.
    async fn has(&self, key: H256) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Write access, implemented by backends that can be seeded.
#[async_trait]
pub trait ContentWriter: Send + Sync {
    /// Stores `data` under `key`.
    async fn put(&self, key: H256, data: Bytes) -> Result<(), StoreError>;

    /// Removes the blob stored under `key`, if any.
    async fn remove(&self, key: H256) -> Result<(), StoreError>;
}

/// Stores a raw blob under its own Keccak-256 digest and returns the digest.
pub async fn publish_raw<W: ContentWriter + ?Sized>(
    store: &W,
    blob: &[u8],
) -> Result<H256, StoreError> {
    let key = keccak(blob);
    store.put(key, Bytes::copy_from_slice(blob)).await?;
    Ok(key)
}
