//! Codecs for working with Ethereum Merkle-Patricia tries at the node level.
//!
//! Higher-level trie libraries own a whole trie in memory; this crate instead
//! deals with tries one raw node blob at a time, which is what a traversal
//! over a content-addressed store sees:
//! - [`NodePath`][nibbles::NodePath] tracks a cursor position as a nibble
//!   sequence and converts to and from the compact (hex-prefix) encoding.
//! - [`decode_node`][node::decode_node] turns a raw blob into a
//!   [`DecodedNode`][node::DecodedNode] exposing the child references to
//!   follow.
//! - [`StateAccount`][account::StateAccount] decodes the body of a state-trie
//!   leaf, carrying the storage root and code hash to recurse into.
//! - [`TrieBuilder`][builder::TrieBuilder] constructs the `{hash → blob}`
//!   node set of a trie from key/value pairs, used to seed stores in tests.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod account;
pub mod builder;
pub mod nibbles;
pub mod node;

pub use account::{StateAccount, EMPTY_CODE_HASH, EMPTY_ROOT_HASH};
pub use nibbles::{Nibble, NodePath};
pub use node::{decode_node, ChildRef, DecodedNode};

use thiserror::Error;

/// Errors produced when decoding raw trie data.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum CodecError {
    /// The blob is not a structurally valid trie node.
    #[error("malformed trie node: {0}")]
    MalformedNode(String),

    /// The leaf body is not a structurally valid account.
    #[error("malformed account body: {0}")]
    MalformedAccount(String),
}
