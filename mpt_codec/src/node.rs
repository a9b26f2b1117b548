//! Decoding of raw trie node blobs into their structural form.

use bytes::Bytes;
use ethereum_types::H256;
use log::trace;
use rlp::{Prototype, Rlp};

use crate::nibbles::NodePath;
use crate::CodecError;

/// A reference from a trie node to one of its children.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ChildRef {
    /// The Keccak-256 digest of the child, to be resolved against the store.
    Hash(H256),

    /// A child whose RLP encoding is shorter than 32 bytes and is therefore
    /// embedded in the parent instead of being stored on its own.
    Embedded(Bytes),
}

/// The structural form of a raw trie node blob.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum DecodedNode {
    /// A branch node with 16 child slots and an optional value.
    Branch {
        /// The children of the branch, indexed by nibble.
        children: Box<[Option<ChildRef>; 16]>,
        /// The payload stored at this branch, if any.
        value: Option<Vec<u8>>,
    },

    /// An extension node forwarding to a single child through a shared path
    /// segment.
    Extension {
        /// The path segment of this extension.
        path: NodePath,
        /// The child the extension forwards to.
        child: ChildRef,
    },

    /// A leaf node terminating a key.
    Leaf {
        /// The final path segment of the key.
        path: NodePath,
        /// The payload of the leaf.
        value: Vec<u8>,
    },
}

/// Decodes a raw trie node blob.
///
/// An RLP list of 17 items is a branch; a list of 2 items is an extension or
/// leaf depending on the hex-prefix flag of its first item. Anything else is
/// malformed.
pub fn decode_node(blob: &[u8]) -> Result<DecodedNode, CodecError> {
    let rlp = Rlp::new(blob);
    let prototype = rlp
        .prototype()
        .map_err(|e| CodecError::MalformedNode(format!("invalid rlp: {e}")))?;

    match prototype {
        Prototype::List(17) => decode_branch(&rlp),
        Prototype::List(2) => decode_short_node(&rlp),
        other => Err(CodecError::MalformedNode(format!(
            "expected a list of 2 or 17 items, got {other:?}"
        ))),
    }
}

fn decode_branch(rlp: &Rlp<'_>) -> Result<DecodedNode, CodecError> {
    let mut children: [Option<ChildRef>; 16] = Default::default();
    for (i, slot) in children.iter_mut().enumerate() {
        let item = rlp
            .at(i)
            .map_err(|e| CodecError::MalformedNode(format!("branch child {i}: {e}")))?;
        *slot = decode_child(&item)
            .map_err(|reason| CodecError::MalformedNode(format!("branch child {i}: {reason}")))?;
    }

    let value = data_at(rlp, 16)?;
    trace!(
        "decoded branch node ({} children, value: {})",
        children.iter().flatten().count(),
        value.is_some()
    );

    Ok(DecodedNode::Branch {
        children: Box::new(children),
        value,
    })
}

fn decode_short_node(rlp: &Rlp<'_>) -> Result<DecodedNode, CodecError> {
    let encoded_path = data_at(rlp, 0)?
        .ok_or_else(|| CodecError::MalformedNode("empty path in short node".into()))?;
    let (path, is_leaf) = NodePath::from_hex_prefix_encoding(&encoded_path)
        .map_err(|e| CodecError::MalformedNode(e.to_string()))?;

    if is_leaf {
        let value = data_at(rlp, 1)?
            .ok_or_else(|| CodecError::MalformedNode("empty value in leaf node".into()))?;
        return Ok(DecodedNode::Leaf { path, value });
    }

    let item = rlp
        .at(1)
        .map_err(|e| CodecError::MalformedNode(format!("extension child: {e}")))?;
    let child = decode_child(&item)
        .map_err(|reason| CodecError::MalformedNode(format!("extension child: {reason}")))?
        .ok_or_else(|| CodecError::MalformedNode("extension with empty child".into()))?;

    Ok(DecodedNode::Extension { path, child })
}

/// A child slot holds the empty string, a 32-byte digest, or an in-place
/// encoding of a node smaller than 32 bytes.
fn decode_child(item: &Rlp<'_>) -> Result<Option<ChildRef>, String> {
    if item.is_list() {
        return Ok(Some(ChildRef::Embedded(Bytes::copy_from_slice(
            item.as_raw(),
        ))));
    }

    let data = item.data().map_err(|e| e.to_string())?;
    match data.len() {
        0 => Ok(None),
        32 => Ok(Some(ChildRef::Hash(H256::from_slice(data)))),
        n => Err(format!("child reference of {n} bytes")),
    }
}

fn data_at(rlp: &Rlp<'_>, index: usize) -> Result<Option<Vec<u8>>, CodecError> {
    let item = rlp
        .at(index)
        .map_err(|e| CodecError::MalformedNode(format!("item {index}: {e}")))?;
    let data = item
        .data()
        .map_err(|e| CodecError::MalformedNode(format!("item {index}: {e}")))?;

    Ok(match data.is_empty() {
        true => None,
        false => Some(data.to_vec()),
    })
}
