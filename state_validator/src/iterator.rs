//! The pre-order cursor a worker drives over one sub-trie.

use std::sync::Arc;

use ethereum_types::H256;
use mpt_codec::{decode_node, ChildRef, DecodedNode, NodePath};

use crate::error::{TrieKind, ValidationError};
use crate::partition::PrefixBucket;
use crate::store::ContentStore;

/// The node a cursor is positioned on.
#[derive(Clone, Debug)]
pub struct CurrentNode {
    /// The path at which the node is referenced, from the trie root.
    pub path: NodePath,
    /// The digest the node was fetched under; `None` for nodes embedded in
    /// their parent.
    pub hash: Option<H256>,
    /// The decoded node.
    pub node: DecodedNode,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CursorState {
    Fresh,
    Active,
    Done,
}

#[derive(Clone, Debug)]
struct PendingVisit {
    path: NodePath,
    child: ChildRef,
}

/// A stateful cursor yielding every node of one sub-trie in pre-order.
///
/// The cursor is an explicit state machine: [`next`][Self::next] advances it
/// and reports `Ok(true)` while a node is available. The first failure - a
/// missing node, an undecodable blob, a store fault - is returned once, after
/// which the cursor is exhausted and keeps reporting `Ok(false)`.
///
/// Within its partition the cursor emits paths in strictly increasing
/// lexicographic order. Nodes above the split depth are traversed by every
/// worker that needs to pass through them but reported only by the bucket
/// owning the spine.
pub struct SubtrieIterator {
    store: Arc<dyn ContentStore>,
    trie: TrieKind,
    root: H256,
    bucket: PrefixBucket,
    stack: Vec<PendingVisit>,
    current: Option<CurrentNode>,
    pending: Option<CurrentNode>,
    state: CursorState,
}

impl SubtrieIterator {
    /// Creates a cursor over the part of the trie at `root` selected by
    /// `bucket`. No store reads happen until the first [`next`][Self::next].
    pub fn new(
        store: Arc<dyn ContentStore>,
        trie: TrieKind,
        root: H256,
        bucket: PrefixBucket,
    ) -> Self {
        Self {
            store,
            trie,
            root,
            bucket,
            stack: Vec::new(),
            current: None,
            pending: None,
            state: CursorState::Fresh,
        }
    }

    /// A cursor over the whole trie at `root`.
    pub fn whole_trie(store: Arc<dyn ContentStore>, trie: TrieKind, root: H256) -> Self {
        Self::new(store, trie, root, PrefixBucket::whole_trie())
    }

    /// The root this cursor iterates under.
    pub fn root(&self) -> H256 {
        self.root
    }

    /// The bucket this cursor is confined to.
    pub fn bucket(&self) -> PrefixBucket {
        self.bucket
    }

    /// Advances to the next node of the sub-trie in pre-order.
    ///
    /// With `descend = false` the subtree below the current node is skipped.
    /// Returns `Ok(false)` on exhaustion; a failure exhausts the cursor after
    /// being returned once.
    pub async fn next(&mut self, descend: bool) -> Result<bool, ValidationError> {
        match self.state {
            CursorState::Done => return Ok(false),
            CursorState::Fresh => {
                self.state = CursorState::Active;
                self.stack.push(PendingVisit {
                    path: NodePath::new(),
                    child: ChildRef::Hash(self.root),
                });
            }
            CursorState::Active => {
                if let Some(pending) = self.pending.take() {
                    self.current = Some(pending);
                    return Ok(true);
                }
                if let Some(current) = self.current.take() {
                    if descend {
                        self.push_children(&current, None);
                    }
                }
            }
        }

        loop {
            let Some(visit) = self.stack.pop() else {
                self.state = CursorState::Done;
                return Ok(false);
            };

            let current = match self.load(visit).await {
                Ok(node) => node,
                Err(e) => {
                    self.state = CursorState::Done;
                    return Err(e);
                }
            };

            if self.emits(&current) {
                self.current = Some(current);
                return Ok(true);
            }
            // A structural node outside this worker's share: pass through it
            // without reporting it.
            self.push_children(&current, None);
        }
    }

    /// Positions a fresh cursor so that the next call to
    /// [`next`][Self::next] yields the first node strictly after `target` in
    /// this cursor's pre-order. Subtrees entirely before the target are not
    /// read from the store.
    pub async fn seek(&mut self, target: &NodePath) -> Result<(), ValidationError> {
        assert_eq!(
            self.state,
            CursorState::Fresh,
            "seek on a cursor that has already been advanced"
        );

        self.state = CursorState::Active;
        self.stack.push(PendingVisit {
            path: NodePath::new(),
            child: ChildRef::Hash(self.root),
        });

        loop {
            let Some(visit) = self.stack.pop() else {
                self.state = CursorState::Done;
                return Ok(());
            };

            let current = match self.load(visit).await {
                Ok(node) => node,
                Err(e) => {
                    self.state = CursorState::Done;
                    return Err(e);
                }
            };

            if current.path == *target {
                // Resume exactly past the target: its children are expanded
                // on the next advance, the target itself is not re-reported.
                self.current = Some(current);
                return Ok(());
            }
            if current.path > *target {
                // The target path no longer resolves to a node; the first
                // reportable node past it becomes the next emission.
                if self.emits(&current) {
                    self.pending = Some(current);
                    return Ok(());
                }
                self.push_children(&current, None);
                continue;
            }

            self.push_children(&current, Some(target));
        }
    }

    /// The node the cursor is positioned on.
    pub fn current(&self) -> Option<&CurrentNode> {
        self.current.as_ref()
    }

    /// The path of the current node.
    pub fn path(&self) -> Option<&NodePath> {
        self.current.as_ref().map(|c| &c.path)
    }

    /// The digest of the current node; `None` when it is embedded.
    pub fn hash(&self) -> Option<H256> {
        self.current.as_ref().and_then(|c| c.hash)
    }

    /// The decoded form of the current node.
    pub fn node(&self) -> Option<&DecodedNode> {
        self.current.as_ref().map(|c| &c.node)
    }

    /// Whether the cursor is positioned on a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self.current.as_ref().map(|c| &c.node),
            Some(DecodedNode::Leaf { .. })
        )
    }

    /// The payload of the current leaf.
    pub fn leaf_blob(&self) -> Option<&[u8]> {
        match self.current.as_ref().map(|c| &c.node) {
            Some(DecodedNode::Leaf { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// The full 32-byte key of the current leaf.
    pub fn leaf_key(&self) -> Option<H256> {
        let current = self.current.as_ref()?;
        match &current.node {
            DecodedNode::Leaf { path: segment, .. } => current.path.join(segment).to_key(),
            _ => None,
        }
    }

    async fn load(&self, visit: PendingVisit) -> Result<CurrentNode, ValidationError> {
        let PendingVisit { path, child } = visit;

        let (hash, blob) = match child {
            ChildRef::Embedded(raw) => (None, raw),
            ChildRef::Hash(hash) => match self.store.get(hash).await? {
                None => {
                    return Err(ValidationError::MissingNode {
                        trie: self.trie,
                        path,
                        hash,
                    })
                }
                Some(blob) => (Some(hash), blob),
            },
        };

        let node = decode_node(&blob).map_err(|e| ValidationError::MalformedNode {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        Ok(CurrentNode { path, hash, node })
    }

    /// Queues the children of `node` for visiting, rightmost first so the
    /// leftmost pops first. Children whose subtree cannot contain work for
    /// this cursor are dropped; with `resume_after` set, so are children
    /// whose subtree lies entirely at or before that path.
    fn push_children(&mut self, node: &CurrentNode, resume_after: Option<&NodePath>) {
        match &node.node {
            DecodedNode::Leaf { .. } => {}
            DecodedNode::Extension { path: segment, child } => {
                self.push_child(node.path.join(segment), child, resume_after);
            }
            DecodedNode::Branch { children, .. } => {
                for nibble in (0..16u8).rev() {
                    if let Some(child) = &children[nibble as usize] {
                        self.push_child(node.path.join_nibble(nibble), child, resume_after);
                    }
                }
            }
        }
    }

    fn push_child(&mut self, path: NodePath, child: &ChildRef, resume_after: Option<&NodePath>) {
        // The spine owner also follows children above the split depth that
        // lie outside its own prefix range, since nobody else reports them.
        let in_share = self.bucket.intersects_subtree(path.as_slice())
            || (self.bucket.includes_spine() && path.len() < self.bucket.depth());
        if !in_share {
            return;
        }
        if let Some(target) = resume_after {
            // Everything under `path` compares below `target`: skip.
            if path < *target && !target.starts_with(&path) {
                return;
            }
        }
        self.stack.push(PendingVisit {
            path,
            child: child.clone(),
        });
    }

    /// Whether the current worker reports this node, as opposed to merely
    /// passing through it on the way to its own share.
    fn emits(&self, current: &CurrentNode) -> bool {
        let depth = self.bucket.depth();
        if current.path.len() >= depth {
            return self.bucket.contains(current.path.as_slice());
        }

        match &current.node {
            // A leaf above the split depth still carries a full key; it
            // belongs to whichever bucket that key falls in.
            DecodedNode::Leaf { path: segment, .. } => {
                let key = current.path.join(segment);
                match key.len() >= depth {
                    true => self.bucket.contains(key.as_slice()),
                    false => self.bucket.includes_spine(),
                }
            }
            // Branches and extensions above the split depth are the spine.
            _ => self.bucket.includes_spine(),
        }
    }
}

impl std::fmt::Debug for SubtrieIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtrieIterator")
            .field("trie", &self.trie)
            .field("root", &self.root)
            .field("bucket", &self.bucket)
            .field("state", &self.state)
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use ethereum_types::H256;
    use mpt_codec::builder::TrieBuilder;
    use mpt_codec::NodePath;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::SubtrieIterator;
    use crate::error::{TrieKind, ValidationError};
    use crate::store::{ContentWriter, MemoryStore};
    use crate::testing_utils::seed_store;

    fn random_trie(entries: usize, seed: u64) -> (TrieBuilder, Vec<H256>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = TrieBuilder::new();
        let mut keys = Vec::new();
        for _ in 0..entries {
            let key = H256(rng.gen());
            let value: Vec<u8> = (0..rng.gen_range(1..80)).map(|_| rng.gen()).collect();
            builder.insert(key, value);
            keys.push(key);
        }
        (builder, keys)
    }

    async fn drain(iter: &mut SubtrieIterator) -> Vec<(NodePath, Option<H256>)> {
        let mut visited = Vec::new();
        while iter.next(true).await.unwrap() {
            visited.push((iter.path().unwrap().clone(), iter.hash()));
        }
        visited
    }

    #[tokio::test]
    async fn yields_every_node_in_pre_order() {
        let (builder, _) = random_trie(60, 0x5eed);
        let built = builder.build();
        let store = Arc::new(MemoryStore::new());
        seed_store(&store, &built.nodes).await;

        let mut iter = SubtrieIterator::whole_trie(store, TrieKind::State, built.root);
        let visited = drain(&mut iter).await;

        // Pre-order over sorted children emits strictly increasing paths.
        for pair in visited.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} !< {}", pair[0].0, pair[1].0);
        }

        let hashed: HashSet<H256> = visited.iter().filter_map(|(_, h)| *h).collect();
        assert_eq!(hashed, built.nodes.keys().copied().collect());

        // Exhaustion is terminal.
        assert!(!iter.next(true).await.unwrap());
    }

    #[tokio::test]
    async fn missing_node_is_a_terminal_typed_failure() {
        let (builder, _) = random_trie(40, 0xdead);
        let built = builder.build();
        let store = Arc::new(MemoryStore::new());
        seed_store(&store, &built.nodes).await;

        // Strip a non-root node out of the store.
        let victim = *built
            .nodes
            .keys()
            .find(|hash| **hash != built.root)
            .unwrap();
        store.remove(victim).await.unwrap();

        let mut iter = SubtrieIterator::whole_trie(store, TrieKind::State, built.root);
        let err = loop {
            match iter.next(true).await {
                Ok(true) => continue,
                Ok(false) => panic!("cursor completed over an incomplete trie"),
                Err(e) => break e,
            }
        };

        match err {
            ValidationError::MissingNode { trie, path, hash } => {
                assert_eq!(trie, TrieKind::State);
                assert_eq!(hash, victim);
                assert!(!path.is_empty());
            }
            other => panic!("expected missing node, got {other}"),
        }
        assert!(!iter.next(true).await.unwrap());
    }

    #[tokio::test]
    async fn absent_root_reports_the_empty_path() {
        let store = Arc::new(MemoryStore::new());
        let root = keccak_hash::keccak(b"nothing stored");

        let mut iter = SubtrieIterator::whole_trie(store, TrieKind::Storage, root);
        match iter.next(true).await {
            Err(ValidationError::MissingNode { trie, path, hash }) => {
                assert_eq!(trie, TrieKind::Storage);
                assert!(path.is_empty());
                assert_eq!(hash, root);
            }
            other => panic!("expected missing root, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn descend_false_skips_the_current_subtree() {
        let (builder, _) = random_trie(60, 0xcafe);
        let built = builder.build();
        let store = Arc::new(MemoryStore::new());
        seed_store(&store, &built.nodes).await;

        // Skipping on the root node ends iteration immediately.
        let mut iter = SubtrieIterator::whole_trie(store, TrieKind::State, built.root);
        assert!(iter.next(true).await.unwrap());
        assert!(iter.path().unwrap().is_empty());
        assert!(!iter.next(false).await.unwrap());
    }

    #[tokio::test]
    async fn traverses_embedded_children_without_store_reads() {
        // Short nibble paths with tiny values produce nodes below the 32-byte
        // hashing cutoff, embedded in their parent.
        let mut builder = TrieBuilder::new();
        builder.insert_nibbles(&[1, 2, 3, 4], vec![0xaa]);
        builder.insert_nibbles(&[1, 2, 3, 5], vec![0xbb]);
        let built = builder.build();
        assert_eq!(built.nodes.len(), 1, "everything but the root embeds");

        let store = Arc::new(MemoryStore::new());
        seed_store(&store, &built.nodes).await;

        let mut iter = SubtrieIterator::whole_trie(store, TrieKind::Storage, built.root);
        let visited = drain(&mut iter).await;

        // Extension root, branch, two leaves.
        assert_eq!(visited.len(), 4);
        assert_eq!(visited.iter().filter(|(_, hash)| hash.is_some()).count(), 1);
        assert_eq!(visited[2].0, NodePath::from_nibbles(&[1, 2, 3, 4]));
        assert_eq!(visited[3].0, NodePath::from_nibbles(&[1, 2, 3, 5]));
    }

    #[tokio::test]
    async fn seek_resumes_exactly_past_the_target() {
        let (builder, _) = random_trie(50, 0xbeef);
        let built = builder.build();
        let store = Arc::new(MemoryStore::new());
        seed_store(&store, &built.nodes).await;

        let mut iter = SubtrieIterator::whole_trie(store.clone(), TrieKind::State, built.root);
        let full = drain(&mut iter).await;

        for step in [0, 1, full.len() / 2, full.len() - 1] {
            let target = &full[step].0;
            let mut resumed =
                SubtrieIterator::whole_trie(store.clone(), TrieKind::State, built.root);
            resumed.seek(target).await.unwrap();
            let rest = drain(&mut resumed).await;
            assert_eq!(rest, full[step + 1..], "resume after step {step}");
        }
    }

    #[tokio::test]
    async fn leaf_accessors_recover_the_inserted_key() {
        let (builder, keys) = random_trie(30, 0xfeed);
        let built = builder.build();
        let store = Arc::new(MemoryStore::new());
        seed_store(&store, &built.nodes).await;

        let mut iter = SubtrieIterator::whole_trie(store, TrieKind::State, built.root);
        let mut leaf_keys = HashSet::new();
        while iter.next(true).await.unwrap() {
            if iter.is_leaf() {
                assert!(iter.leaf_blob().is_some());
                leaf_keys.insert(iter.leaf_key().unwrap());
            }
        }

        assert_eq!(leaf_keys, keys.into_iter().collect());
    }
}
