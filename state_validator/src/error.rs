//! The error taxonomy of a validation run.

use ethereum_types::H256;
use mpt_codec::NodePath;
use thiserror::Error;

use crate::store::StoreError;

/// Which trie a node belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrieKind {
    /// The state trie, mapping hashed addresses to accounts.
    State,
    /// A per-contract storage trie.
    Storage,
}

impl std::fmt::Display for TrieKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrieKind::State => write!(f, "state"),
            TrieKind::Storage => write!(f, "storage"),
        }
    }
}

/// Why a validation run failed.
///
/// The first error any worker produces aborts the run; errors raised by
/// sibling workers racing the cancellation are discarded.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A referenced trie node is absent from the store. The defining
    /// validation failure.
    #[error("missing {trie} trie node {hash:#x} at path [{path}]")]
    MissingNode {
        /// The trie being traversed when the node was found missing.
        trie: TrieKind,
        /// The path from the trie root to the missing node.
        path: NodePath,
        /// The digest of the missing node.
        hash: H256,
    },

    /// A node of an account's storage trie is absent from the store,
    /// discovered while recursing out of a state-trie leaf.
    #[error(
        "missing storage trie node {hash:#x} at path [{path}] (account {addr_hash:#x}, storage root {storage_root:#x})"
    )]
    MissingStorageNode {
        /// The hashed address owning the storage trie.
        addr_hash: H256,
        /// The root of the storage trie.
        storage_root: H256,
        /// The path from the storage root to the missing node.
        path: NodePath,
        /// The digest of the missing node.
        hash: H256,
    },

    /// An account's bytecode is absent from the store.
    #[error("missing code {code_hash:#x} for account {addr_hash:#x} (leaf path [{path}])")]
    MissingCode {
        /// The hashed address owning the code.
        addr_hash: H256,
        /// The digest of the missing bytecode.
        code_hash: H256,
        /// The state-trie path of the account leaf.
        path: NodePath,
    },

    /// A stored blob does not decode as a trie node. Indicates a corrupt
    /// store rather than an incomplete one.
    #[error("malformed trie node at path [{path}]: {reason}")]
    MalformedNode {
        /// The path of the undecodable node.
        path: NodePath,
        /// What was wrong with the blob.
        reason: String,
    },

    /// A state-trie leaf body does not decode as an account.
    #[error("malformed account at path [{path}]: {reason}")]
    MalformedAccount {
        /// The state-trie path of the leaf.
        path: NodePath,
        /// What was wrong with the body.
        reason: String,
    },

    /// The backing store failed; surfaced as-is.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The recovery file could not be used to resume.
    #[error("recovery file error: {0}")]
    Recovery(String),

    /// The worker group was cancelled without a peer error, by a signal or an
    /// external deadline.
    #[error("validation cancelled")]
    Cancelled,
}

impl ValidationError {
    /// Returns `true` for the cancellation outcome that leaves a resumable
    /// recovery file behind.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ValidationError::Cancelled)
    }
}
