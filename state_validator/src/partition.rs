//! Splitting a trie into disjoint sub-tries over the hex-prefix space.

use std::sync::Arc;

use ethereum_types::H256;
use mpt_codec::{Nibble, NodePath};
use tracing::debug;

use crate::error::TrieKind;
use crate::iterator::SubtrieIterator;
use crate::store::ContentStore;

/// A contiguous range of nibble prefixes owned by one worker.
///
/// At split depth `d`, the 16^d prefixes of length `d` are numbered
/// lexicographically; a bucket owns the prefixes `lo..=hi`. Exactly one
/// bucket per split additionally owns the *spine*: the root and every
/// branch/extension node sitting above depth `d`, so those are reported by
/// one worker only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrefixBucket {
    depth: u32,
    lo: u64,
    hi: u64,
    include_spine: bool,
}

impl PrefixBucket {
    /// The bucket covering a whole trie, spine included.
    pub fn whole_trie() -> Self {
        Self {
            depth: 0,
            lo: 0,
            hi: 0,
            include_spine: true,
        }
    }

    /// The split depth `d`.
    pub fn depth(&self) -> usize {
        self.depth as usize
    }

    /// Whether this bucket reports the nodes above the split depth.
    pub fn includes_spine(&self) -> bool {
        self.include_spine
    }

    /// The first prefix of the bucket, as nibbles.
    pub fn start_prefix(&self) -> NodePath {
        let mut path = NodePath::new();
        for i in (0..self.depth).rev() {
            path.push_nibble(((self.lo >> (4 * i)) & 0xf) as Nibble);
        }
        path
    }

    /// Whether a path of at least `depth` nibbles falls in this bucket.
    ///
    /// # Panics
    /// If `path` is shorter than the split depth.
    pub fn contains(&self, path: &[Nibble]) -> bool {
        let prefix = prefix_value(&path[..self.depth()]);
        (self.lo..=self.hi).contains(&prefix)
    }

    /// Whether the subtree rooted at `path` (of any length) can contain keys
    /// belonging to this bucket.
    pub fn intersects_subtree(&self, path: &[Nibble]) -> bool {
        if path.len() >= self.depth() {
            return self.contains(path);
        }

        // Pad the partial prefix with 0s and fs to bound its key range.
        let known = prefix_value(path);
        let shift = 4 * (self.depth() - path.len()) as u32;
        let min = known << shift;
        let max = min | ((1u64 << shift) - 1);

        min <= self.hi && max >= self.lo
    }
}

fn prefix_value(nibbles: &[Nibble]) -> u64 {
    nibbles
        .iter()
        .fold(0u64, |acc, nibble| (acc << 4) | *nibble as u64)
}

/// Computes the prefix buckets of an `n`-way split.
///
/// The split depth is the smallest `d` with `16^d ≥ n`; the 16^d prefixes are
/// distributed over `n` contiguous buckets whose sizes differ by at most one,
/// and the first bucket owns the spine.
pub fn partition_buckets(n: u32) -> Vec<PrefixBucket> {
    assert!(n >= 1, "cannot split a trie into zero sub-tries");

    let mut depth = 0u32;
    while 16u64.pow(depth) < n as u64 {
        depth += 1;
    }

    let total = 16u64.pow(depth);
    let base = total / n as u64;
    let extra = total % n as u64;

    let mut buckets = Vec::with_capacity(n as usize);
    let mut lo = 0u64;
    for i in 0..n as u64 {
        let width = base + u64::from(i < extra);
        buckets.push(PrefixBucket {
            depth,
            lo,
            hi: lo + width - 1,
            include_spine: i == 0,
        });
        lo += width;
    }

    debug!(workers = n, depth, "computed sub-trie partition");
    buckets
}

/// Splits the trie rooted at `root` into `n` non-overlapping sub-trie
/// cursors that together cover every node exactly once.
pub fn partition(
    store: Arc<dyn ContentStore>,
    trie: TrieKind,
    root: H256,
    n: u32,
) -> Vec<SubtrieIterator> {
    partition_buckets(n)
        .into_iter()
        .map(|bucket| SubtrieIterator::new(store.clone(), trie, root, bucket))
        .collect()
}
