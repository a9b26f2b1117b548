//! In-memory store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::H256;
use parking_lot::RwLock;

use super::{ContentStore, ContentWriter, StoreError};

/// An in-memory content-addressed store.
///
/// The reference implementation of the store contract, used by tests and
/// development tooling. Not intended for production data.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<H256, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of blobs held.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Returns `true` if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get(&self, key: H256) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blocks.read().get(&key).cloned())
    }

    async fn has(&self, key: H256) -> Result<bool, StoreError> {
        Ok(self.blocks.read().contains_key(&key))
    }
}

#[async_trait]
impl ContentWriter for MemoryStore {
    async fn put(&self, key: H256, data: Bytes) -> Result<(), StoreError> {
        self.blocks.write().insert(key, data);
        Ok(())
    }

    async fn remove(&self, key: H256) -> Result<(), StoreError> {
        self.blocks.write().remove(&key);
        Ok(())
    }
}
