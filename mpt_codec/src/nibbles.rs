//! Define [`NodePath`] and how to convert nibble paths to and from the
//! compact (hex-prefix) encoding and printable strings.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use ethereum_types::H256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A Nibble has 4 bits and is stored as `u8`.
pub type Nibble = u8;

/// The pseudo-nibble marking a terminated (leaf) key.
///
/// It only ever appears as the final element of a 65-nibble leaf key and is
/// rendered as `t` when a path is printed, since it does not fit one hex
/// character.
pub const TERMINATOR: Nibble = 0x10;

/// The number of nibbles in a hashed (Keccak-256) trie key.
pub const KEY_NIBBLES: usize = 64;

/// Errors encountered when converting a hex-prefix encoding into a path.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum FromHexPrefixError {
    /// The encoding was empty.
    #[error("tried to convert an empty hex prefix byte string into a path")]
    Empty,

    /// The flag nibble at the start of the encoding is invalid.
    #[error("tried to convert a hex prefix byte string with invalid flags at the start: {0:#04b}")]
    InvalidFlags(Nibble),

    /// The encoding holds more nibbles than a trie key can.
    #[error("tried to convert a hex prefix byte string that was longer than 33 bytes (len: {0})")]
    TooLong(usize),
}

/// Errors encountered when parsing a printable path back into nibbles.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum PathParseError {
    /// A character was neither a hex digit nor the terminator marker.
    #[error("invalid path character {0:?}")]
    InvalidChar(char),

    /// The terminator marker appeared before the end of the path.
    #[error("terminator not in final position")]
    MisplacedTerminator,
}

/// A sequence of nibbles locating a node inside a trie, starting at the root.
///
/// Paths order lexicographically, which coincides with the order a pre-order
/// depth-first traversal emits nodes in (a parent sorts before everything in
/// its subtree).
#[derive(Clone, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct NodePath(Vec<Nibble>);

impl NodePath {
    /// Creates an empty path (the trie root).
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a path from a slice of nibbles.
    ///
    /// # Panics
    /// If any element is neither a nibble (`0..=15`) nor [`TERMINATOR`].
    pub fn from_nibbles(nibbles: &[Nibble]) -> Self {
        assert!(
            nibbles.iter().all(|n| *n <= 0xf || *n == TERMINATOR),
            "element out of nibble range"
        );
        Self(nibbles.to_vec())
    }

    /// Expands a hashed key into its 64-nibble path.
    pub fn from_key(key: H256) -> Self {
        let mut nibbles = Vec::with_capacity(KEY_NIBBLES);
        for byte in key.as_bytes() {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0xf);
        }
        Self(nibbles)
    }

    /// The number of nibbles in the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the path is the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The nibbles of the path.
    pub fn as_slice(&self) -> &[Nibble] {
        &self.0
    }

    /// Appends a single nibble.
    ///
    /// # Panics
    /// If `nibble` is out of range.
    pub fn push_nibble(&mut self, nibble: Nibble) {
        assert!(
            nibble <= 0xf || nibble == TERMINATOR,
            "attempted to append a value that is not a single nibble"
        );
        self.0.push(nibble);
    }

    /// Appends all nibbles of `other`.
    pub fn extend_from(&mut self, other: &NodePath) {
        self.0.extend_from_slice(&other.0);
    }

    /// Returns a new path of `self` followed by a single nibble.
    pub fn join_nibble(&self, nibble: Nibble) -> Self {
        let mut out = self.clone();
        out.push_nibble(nibble);
        out
    }

    /// Returns a new path of `self` followed by all nibbles of `other`.
    pub fn join(&self, other: &NodePath) -> Self {
        let mut out = self.clone();
        out.extend_from(other);
        out
    }

    /// Shortens the path to `len` nibbles.
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Returns `true` if `self` begins with `prefix`.
    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Packs a 64-nibble key path back into its 32-byte hash.
    ///
    /// Returns `None` unless the path is exactly [`KEY_NIBBLES`] plain
    /// nibbles long.
    pub fn to_key(&self) -> Option<H256> {
        if self.0.len() != KEY_NIBBLES || self.0.iter().any(|n| *n > 0xf) {
            return None;
        }

        let mut bytes = [0u8; 32];
        for (i, pair) in self.0.chunks(2).enumerate() {
            bytes[i] = (pair[0] << 4) | pair[1];
        }
        Some(H256(bytes))
    }

    /// Converts the path to its compact (hex-prefix) encoding.
    ///
    /// The first nibble of the output carries the `is_leaf` flag and the
    /// parity of the path length; the remaining nibbles are the path packed
    /// two per byte.
    pub fn to_hex_prefix_encoding(&self, is_leaf: bool) -> Bytes {
        let nibbles: &[Nibble] = match self.0.last() {
            Some(&TERMINATOR) => &self.0[..self.0.len() - 1],
            _ => &self.0,
        };

        let odd = nibbles.len() % 2 == 1;
        let flags: u8 = ((is_leaf as u8) << 1 | odd as u8) << 4;

        let mut bytes = BytesMut::with_capacity(nibbles.len() / 2 + 1);
        let mut iter = nibbles.iter();

        match odd {
            true => bytes.extend_from_slice(&[flags | iter.next().copied().unwrap_or(0)]),
            false => bytes.extend_from_slice(&[flags]),
        }
        while let (Some(hi), Some(lo)) = (iter.next(), iter.next()) {
            bytes.extend_from_slice(&[(hi << 4) | lo]);
        }

        bytes.freeze()
    }

    /// Converts a compact (hex-prefix) encoding into a path, returning the
    /// path and whether the encoding carried the leaf flag.
    pub fn from_hex_prefix_encoding(bytes: &[u8]) -> Result<(Self, bool), FromHexPrefixError> {
        if bytes.is_empty() {
            return Err(FromHexPrefixError::Empty);
        }
        if bytes.len() > 33 {
            return Err(FromHexPrefixError::TooLong(bytes.len()));
        }

        let flag_bits = bytes[0] >> 4;

        // is_odd --> 0b01
        // is_leaf --> 0b10
        let (is_leaf, odd) = match flag_bits {
            0b00 => (false, false),
            0b01 => (false, true),
            0b10 => (true, false),
            0b11 => (true, true),
            _ => return Err(FromHexPrefixError::InvalidFlags(flag_bits)),
        };

        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        if odd {
            nibbles.push(bytes[0] & 0xf);
        }
        for byte in &bytes[1..] {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0xf);
        }

        Ok((Self(nibbles), is_leaf))
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nibble in &self.0 {
            match *nibble {
                TERMINATOR => write!(f, "t")?,
                n => write!(f, "{n:x}")?,
            }
        }
        Ok(())
    }
}

impl Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({self})")
    }
}

impl FromStr for NodePath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut nibbles = Vec::with_capacity(s.len());
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            let nibble = match c {
                't' if chars.peek().is_none() => TERMINATOR,
                't' => return Err(PathParseError::MisplacedTerminator),
                c => c
                    .to_digit(16)
                    .ok_or(PathParseError::InvalidChar(c))? as Nibble,
            };
            nibbles.push(nibble);
        }

        Ok(Self(nibbles))
    }
}

impl From<&[Nibble]> for NodePath {
    fn from(nibbles: &[Nibble]) -> Self {
        Self::from_nibbles(nibbles)
    }
}
