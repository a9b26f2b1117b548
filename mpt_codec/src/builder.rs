//! An insert-based trie builder producing the full node set of a trie.
//!
//! The builder exists for the write side of testing and seeding: it turns
//! key/value pairs into the exact `{hash → blob}` node set an execution
//! client would have persisted, so a content-addressed store can be populated
//! with (or selectively stripped of) the nodes of a known trie.

use std::collections::HashMap;

use ethereum_types::H256;
use keccak_hash::keccak;
use log::trace;
use rlp::RlpStream;

use crate::account::EMPTY_ROOT_HASH;
use crate::nibbles::{Nibble, NodePath};

/// The complete node set of a built trie.
#[derive(Clone, Debug)]
pub struct BuiltTrie {
    /// The root hash of the trie.
    pub root: H256,
    /// Every hashed node of the trie, keyed by its Keccak-256 digest.
    /// Nodes whose encoding is shorter than 32 bytes are embedded in their
    /// parents and do not appear here.
    pub nodes: HashMap<H256, Vec<u8>>,
}

#[derive(Clone, Debug, Default)]
enum BuildNode {
    #[default]
    Empty,
    Branch {
        children: Box<[BuildNode; 16]>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<Nibble>,
        child: Box<BuildNode>,
    },
    Leaf {
        path: Vec<Nibble>,
        value: Vec<u8>,
    },
}

enum EncodedChild {
    Raw(Vec<u8>),
    Hashed(H256),
}

/// Builds a trie incrementally from key/value pairs.
#[derive(Clone, Debug, Default)]
pub struct TrieBuilder {
    root: BuildNode,
}

impl TrieBuilder {
    /// Creates a builder for an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under a hashed key.
    pub fn insert(&mut self, key: H256, value: Vec<u8>) {
        self.insert_nibbles(NodePath::from_key(key).as_slice(), value);
    }

    /// Inserts a value under an explicit nibble path.
    pub fn insert_nibbles(&mut self, path: &[Nibble], value: Vec<u8>) {
        trace!("inserting {} byte value at {:?}", value.len(), path);
        let node = std::mem::take(&mut self.root);
        self.root = insert_into(node, path, value);
    }

    /// Encodes the trie, returning its root hash and every hashed node blob.
    pub fn build(&self) -> BuiltTrie {
        let mut nodes = HashMap::new();

        match encode_node(&self.root, &mut nodes) {
            None => BuiltTrie {
                root: EMPTY_ROOT_HASH,
                nodes,
            },
            Some(EncodedChild::Hashed(root)) => BuiltTrie { root, nodes },
            Some(EncodedChild::Raw(blob)) => {
                // The root is hashed regardless of its encoded size.
                let root = keccak(&blob);
                nodes.insert(root, blob);
                BuiltTrie { root, nodes }
            }
        }
    }
}

fn insert_into(node: BuildNode, key: &[Nibble], value: Vec<u8>) -> BuildNode {
    match node {
        BuildNode::Empty => BuildNode::Leaf {
            path: key.to_vec(),
            value,
        },

        BuildNode::Leaf {
            path,
            value: existing,
        } => {
            if path == key {
                return BuildNode::Leaf {
                    path,
                    value,
                };
            }

            let common = common_prefix_len(&path, key);
            let mut branch = empty_branch();
            place_into_branch(&mut branch, &path[common..], existing);
            place_into_branch(&mut branch, &key[common..], value);
            wrap_in_extension(&key[..common], branch)
        }

        BuildNode::Extension { path, child } => {
            let common = common_prefix_len(&path, key);
            if common == path.len() {
                return BuildNode::Extension {
                    path,
                    child: Box::new(insert_into(*child, &key[common..], value)),
                };
            }

            // The keys diverge inside the extension segment; split it.
            let mut branch = empty_branch();
            let existing_rest = &path[common..];
            place_child_into_branch(
                &mut branch,
                existing_rest[0],
                wrap_in_extension(&existing_rest[1..], *child),
            );
            place_into_branch(&mut branch, &key[common..], value);
            wrap_in_extension(&key[..common], branch)
        }

        BuildNode::Branch {
            mut children,
            value: branch_value,
        } => match key.split_first() {
            None => BuildNode::Branch {
                children,
                value,
            },
            Some((nibble, rest)) => {
                let slot = std::mem::take(&mut children[*nibble as usize]);
                children[*nibble as usize] = insert_into(slot, rest, value);
                BuildNode::Branch {
                    children,
                    value: branch_value,
                }
            }
        },
    }
}

fn empty_branch() -> BuildNode {
    BuildNode::Branch {
        children: Default::default(),
        value: Vec::new(),
    }
}

/// Places a value at `rest` below a branch: in the value slot when `rest` is
/// exhausted, in a leaf child under its first nibble otherwise.
fn place_into_branch(branch: &mut BuildNode, rest: &[Nibble], value: Vec<u8>) {
    let BuildNode::Branch {
        children,
        value: branch_value,
    } = branch
    else {
        unreachable!("placement target is always a branch")
    };

    match rest.split_first() {
        None => *branch_value = value,
        Some((nibble, tail)) => {
            children[*nibble as usize] = BuildNode::Leaf {
                path: tail.to_vec(),
                value,
            }
        }
    }
}

fn place_child_into_branch(branch: &mut BuildNode, nibble: Nibble, child: BuildNode) {
    let BuildNode::Branch { children, .. } = branch else {
        unreachable!("placement target is always a branch")
    };
    children[nibble as usize] = child;
}

fn wrap_in_extension(prefix: &[Nibble], node: BuildNode) -> BuildNode {
    match prefix.is_empty() {
        true => node,
        false => match node {
            // Collapse chained extensions rather than nesting them.
            BuildNode::Extension { path, child } => BuildNode::Extension {
                path: [prefix, &path].concat(),
                child,
            },
            BuildNode::Leaf { path, value } => BuildNode::Leaf {
                path: [prefix, &path].concat(),
                value,
            },
            node => BuildNode::Extension {
                path: prefix.to_vec(),
                child: Box::new(node),
            },
        },
    }
}

fn common_prefix_len(a: &[Nibble], b: &[Nibble]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Encodes a node, collecting every ≥ 32-byte encoding into `nodes` under its
/// digest. Returns `None` for the empty node.
fn encode_node(node: &BuildNode, nodes: &mut HashMap<H256, Vec<u8>>) -> Option<EncodedChild> {
    let blob = match node {
        BuildNode::Empty => return None,

        BuildNode::Leaf { path, value } => {
            let mut stream = RlpStream::new_list(2);
            stream.append(
                &NodePath::from_nibbles(path)
                    .to_hex_prefix_encoding(true)
                    .to_vec(),
            );
            stream.append(value);
            stream.out().to_vec()
        }

        BuildNode::Extension { path, child } => {
            let child_enc =
                encode_node(child, nodes).expect("extension child is never the empty node");
            let mut stream = RlpStream::new_list(2);
            stream.append(
                &NodePath::from_nibbles(path)
                    .to_hex_prefix_encoding(false)
                    .to_vec(),
            );
            append_child(&mut stream, child_enc);
            stream.out().to_vec()
        }

        BuildNode::Branch { children, value } => {
            let mut stream = RlpStream::new_list(17);
            for child in children.iter() {
                match encode_node(child, nodes) {
                    None => {
                        stream.append_empty_data();
                    }
                    Some(enc) => append_child(&mut stream, enc),
                }
            }
            match value.is_empty() {
                true => stream.append_empty_data(),
                false => stream.append(value),
            };
            stream.out().to_vec()
        }
    };

    Some(match blob.len() >= 32 {
        false => EncodedChild::Raw(blob),
        true => {
            let hash = keccak(&blob);
            nodes.insert(hash, blob);
            EncodedChild::Hashed(hash)
        }
    })
}

fn append_child(stream: &mut RlpStream, child: EncodedChild) {
    match child {
        EncodedChild::Raw(raw) => {
            stream.append_raw(&raw, 1);
        }
        EncodedChild::Hashed(hash) => {
            stream.append(&hash.as_bytes().to_vec());
        }
    }
}
