//! Completeness validation of Ethereum state against a content-addressed
//! block store.
//!
//! Validating completeness of a Merkle-Patricia trie means traversing every
//! node reachable from its root and confirming each one is physically present
//! in the backing store. [`Validator`] does so in parallel: the trie is split
//! into disjoint sub-tries over the hex-prefix space ([`partition`]), each
//! driven by a worker through a [`SubtrieIterator`][iterator::SubtrieIterator],
//! with per-worker progress checkpointed by a [`ProgressTracker`][tracker::ProgressTracker]
//! so an interrupted run resumes where it left off.

pub mod cache;
pub mod error;
pub mod iterator;
pub mod partition;
pub mod store;
pub mod tracker;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing_utils;

pub use cache::{CacheConfig, CacheStats};
pub use error::{TrieKind, ValidationError};
pub use iterator::SubtrieIterator;
pub use partition::partition;
pub use store::{ContentStore, StoreError};
pub use validator::{Params, TraversalKind, Validator, DEFAULT_RECOVERY_FORMAT, DEFAULT_WORKERS};
