//! The validation entry points and the worker group behind them.

use std::str::FromStr;
use std::sync::Arc;

use ethereum_types::{Address, H256};
use keccak_hash::keccak;
use mpt_codec::account::decode_account;
use mpt_codec::{NodePath, EMPTY_ROOT_HASH};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::{ByteLruCache, CacheConfig, CacheStats, CachedStore};
use crate::error::{TrieKind, ValidationError};
use crate::iterator::SubtrieIterator;
use crate::partition::partition;
use crate::store::ContentStore;
use crate::tracker::{ProgressTracker, RestoredWorker, TrackedIterator, WorkerSlot};

/// The default recovery file template; `%s` is replaced with the traversal
/// kind.
pub const DEFAULT_RECOVERY_FORMAT: &str = "./recover_validate_%s";

/// The default worker count.
pub const DEFAULT_WORKERS: u32 = 4;

/// Which parts of the world state a run traverses.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TraversalKind {
    /// The state trie plus every referenced storage trie and bytecode.
    Full,
    /// The state trie only, without decoding its leaves.
    StateOnly,
    /// A single storage trie.
    StorageOnly,
}

impl TraversalKind {
    /// The literal spelled into recovery file names and headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalKind::Full => "full",
            TraversalKind::StateOnly => "state",
            TraversalKind::StorageOnly => "storage",
        }
    }

    /// The kind of trie the outer traversal walks.
    pub fn trie_kind(&self) -> TrieKind {
        match self {
            TraversalKind::Full | TraversalKind::StateOnly => TrieKind::State,
            TraversalKind::StorageOnly => TrieKind::Storage,
        }
    }
}

impl std::fmt::Display for TraversalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraversalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" | "f" => Ok(TraversalKind::Full),
            "state" => Ok(TraversalKind::StateOnly),
            "storage" => Ok(TraversalKind::StorageOnly),
            other => Err(format!("unknown traversal kind {other:?}")),
        }
    }
}

/// Tuning of a [`Validator`].
#[derive(Clone, Debug)]
pub struct Params {
    /// How many workers traverse the outer trie in parallel.
    pub workers: u32,
    /// Template for the recovery file path; `%s` is substituted with the
    /// traversal kind.
    pub recovery_format: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            recovery_format: DEFAULT_RECOVERY_FORMAT.into(),
        }
    }
}

impl Params {
    fn normalize(mut self) -> Self {
        if self.workers == 0 {
            self.workers = 1;
        }
        if self.recovery_format.is_empty() {
            self.recovery_format = DEFAULT_RECOVERY_FORMAT.into();
        }
        self
    }
}

/// Cache counters of a validator, one instance per read path.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidatorCacheStats {
    /// The cache in front of trie-node reads.
    pub trie_nodes: CacheStats,
    /// The cache in front of raw reads (bytecode).
    pub raw_reads: CacheStats,
}

/// Validates the completeness of tries against a content-addressed store.
///
/// Construct one validator per store; each `validate_*` call creates a
/// private worker group bound to one root. The caches live and die with the
/// validator instance.
pub struct Validator {
    node_store: Arc<dyn ContentStore>,
    code_store: Arc<dyn ContentStore>,
    node_cache: Arc<ByteLruCache>,
    code_cache: Arc<ByteLruCache>,
    params: Params,
}

impl Validator {
    /// Creates a validator over `store` with default cache sizing.
    pub fn new(store: Arc<dyn ContentStore>, params: Params) -> Self {
        Self::with_cache_config(store, params, CacheConfig::default())
    }

    /// Creates a validator with explicit cache sizing, applied to both the
    /// trie-node and the raw read path.
    pub fn with_cache_config(
        store: Arc<dyn ContentStore>,
        params: Params,
        cache: CacheConfig,
    ) -> Self {
        let node_cache = Arc::new(ByteLruCache::new(cache));
        let code_cache = Arc::new(ByteLruCache::new(cache));
        Self {
            node_store: Arc::new(CachedStore::new(store.clone(), node_cache.clone())),
            code_store: Arc::new(CachedStore::new(store, code_cache.clone())),
            node_cache,
            code_cache,
            params: params.normalize(),
        }
    }

    /// Hit/miss counters of both caches.
    pub fn cache_stats(&self) -> ValidatorCacheStats {
        ValidatorCacheStats {
            trie_nodes: self.node_cache.stats(),
            raw_reads: self.code_cache.stats(),
        }
    }

    /// Validates the state trie at `state_root` and, through every account
    /// leaf, the referenced storage tries and bytecode.
    pub async fn validate_full(&self, state_root: H256) -> Result<(), ValidationError> {
        self.validate_full_with_cancel(state_root, CancellationToken::new())
            .await
    }

    /// [`validate_full`][Self::validate_full] under an externally held
    /// cancellation token; cancelling it behaves like an interrupt.
    pub async fn validate_full_with_cancel(
        &self,
        state_root: H256,
        cancel: CancellationToken,
    ) -> Result<(), ValidationError> {
        self.run(state_root, TraversalKind::Full, cancel).await
    }

    /// Validates the state trie only, without decoding account leaves.
    pub async fn validate_state(&self, state_root: H256) -> Result<(), ValidationError> {
        self.validate_state_with_cancel(state_root, CancellationToken::new())
            .await
    }

    /// [`validate_state`][Self::validate_state] under an external token.
    pub async fn validate_state_with_cancel(
        &self,
        state_root: H256,
        cancel: CancellationToken,
    ) -> Result<(), ValidationError> {
        self.run(state_root, TraversalKind::StateOnly, cancel).await
    }

    /// Validates a single storage trie. `state_root` is the context the
    /// storage trie was read under, for stores that key per owner.
    pub async fn validate_storage(
        &self,
        state_root: H256,
        address: Address,
        storage_root: H256,
    ) -> Result<(), ValidationError> {
        self.validate_storage_with_cancel(state_root, address, storage_root, CancellationToken::new())
            .await
    }

    /// [`validate_storage`][Self::validate_storage] under an external token.
    pub async fn validate_storage_with_cancel(
        &self,
        state_root: H256,
        address: Address,
        storage_root: H256,
        cancel: CancellationToken,
    ) -> Result<(), ValidationError> {
        let addr_hash = keccak(address.as_bytes());
        debug!(%addr_hash, %state_root, "validating storage trie");
        self.run(storage_root, TraversalKind::StorageOnly, cancel)
            .await
    }

    /// The shared engine: restore or partition, spawn the worker group, and
    /// propagate the first error.
    async fn run(
        &self,
        trie_root: H256,
        kind: TraversalKind,
        cancel: CancellationToken,
    ) -> Result<(), ValidationError> {
        if trie_root == EMPTY_ROOT_HASH {
            debug!("root is the empty-trie sentinel, nothing to traverse");
            return Ok(());
        }

        // An absent root fails before any worker starts; a cursor over a
        // dangling root must not silently complete.
        if !self.node_store.has(trie_root).await? {
            return Err(ValidationError::MissingNode {
                trie: kind.trie_kind(),
                path: NodePath::new(),
                hash: trie_root,
            });
        }

        let recovery_path = self.params.recovery_format.replacen("%s", kind.as_str(), 1);
        let tracker = ProgressTracker::new(recovery_path, trie_root, kind, self.params.workers);

        let workers = match tracker.restore(self.node_store.clone()).await? {
            Some(restored) => restored,
            None => partition(
                self.node_store.clone(),
                kind.trie_kind(),
                trie_root,
                self.params.workers,
            )
            .into_iter()
            .enumerate()
            .map(|(id, iter)| RestoredWorker {
                iter: tracker.wrap(iter, id as u32),
                resume_storage: None,
            })
            .collect(),
        };

        info!(root = %trie_root, %kind, workers = workers.len(), "starting validation");
        let signal_task = tracker.capture_signal(cancel.clone());

        let mut group = JoinSet::new();
        for worker in workers {
            let ctx = WorkerCtx {
                kind,
                state_root: trie_root,
                node_store: self.node_store.clone(),
                code_store: self.code_store.clone(),
                cancel: cancel.clone(),
            };
            group.spawn(drive_worker(worker, ctx));
        }

        let mut first_err: Option<ValidationError> = None;
        while let Some(joined) = group.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(ValidationError::Cancelled),
            };

            if let Err(e) = result {
                cancel.cancel();
                match &first_err {
                    None => first_err = Some(e),
                    // A worker racing the cancellation may report `Cancelled`
                    // before the causing error is joined; the cause wins.
                    Some(ValidationError::Cancelled) if !e.is_cancelled() => first_err = Some(e),
                    Some(_) => debug!("discarding error raised after the first: {e}"),
                }
            }
        }
        signal_task.abort();

        // Workers have joined: persist unfinished progress (or clear a stale
        // file on clean completion). A dump failure must not mask the error
        // that triggered the halt.
        if let Err(e) = tracker.halt_and_dump() {
            error!("failed to write recovery file: {e}");
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

struct WorkerCtx {
    kind: TraversalKind,
    state_root: H256,
    node_store: Arc<dyn ContentStore>,
    code_store: Arc<dyn ContentStore>,
    cancel: CancellationToken,
}

async fn drive_worker(worker: RestoredWorker, ctx: WorkerCtx) -> Result<(), ValidationError> {
    let RestoredWorker {
        mut iter,
        resume_storage,
    } = worker;
    let worker_id = iter.slot().worker_id();
    debug!(worker_id, "worker starting");

    // Finish the storage drain this worker was interrupted inside before
    // resuming the outer iteration.
    if let Some(storage) = resume_storage {
        let slot = iter.slot().clone();
        drain_storage(&ctx, &slot, storage.addr_hash, storage.storage_root).await?;
    }

    loop {
        if ctx.cancel.is_cancelled() {
            debug!(worker_id, "worker observed cancellation");
            return Err(ValidationError::Cancelled);
        }
        if !iter.next(true).await? {
            debug!(worker_id, "worker finished its partition");
            return Ok(());
        }
        if ctx.kind == TraversalKind::Full && iter.is_leaf() {
            inspect_account(&ctx, &iter).await?;
        }
    }
}

/// The per-leaf hook of a full traversal: decode the account, confirm its
/// bytecode is stored, and drain its storage trie.
async fn inspect_account(ctx: &WorkerCtx, iter: &TrackedIterator) -> Result<(), ValidationError> {
    let path = iter.path().cloned().unwrap_or_default();
    let blob = iter.leaf_blob().unwrap_or_default();

    let account = decode_account(blob).map_err(|e| ValidationError::MalformedAccount {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let addr_hash = iter
        .leaf_key()
        .ok_or_else(|| ValidationError::MalformedAccount {
            path: path.clone(),
            reason: "leaf key does not pack into a 32-byte hash".into(),
        })?;

    // The empty-code and empty-storage sentinels are never looked up.
    if account.has_code() {
        if ctx.code_store.get(account.code_hash).await?.is_none() {
            return Err(ValidationError::MissingCode {
                addr_hash,
                code_hash: account.code_hash,
                path,
            });
        }
    }

    if account.has_storage() {
        drain_storage(ctx, iter.slot(), addr_hash, account.storage_root).await?;
    }

    Ok(())
}

/// Fully traverses one storage trie, sequentially within the calling worker.
/// The storage context stays recorded in the slot until the drain completes,
/// so an interrupted drain is re-run on restore.
async fn drain_storage(
    ctx: &WorkerCtx,
    slot: &Arc<WorkerSlot>,
    addr_hash: H256,
    storage_root: H256,
) -> Result<(), ValidationError> {
    if storage_root == EMPTY_ROOT_HASH {
        return Ok(());
    }

    debug!(%addr_hash, %storage_root, state_root = %ctx.state_root, "draining storage trie");
    slot.enter_storage(addr_hash, storage_root);

    let mut iter = SubtrieIterator::whole_trie(ctx.node_store.clone(), TrieKind::Storage, storage_root);
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(ValidationError::Cancelled);
        }
        match iter.next(true).await {
            Ok(true) => {}
            Ok(false) => {
                slot.leave_storage();
                return Ok(());
            }
            Err(ValidationError::MissingNode { path, hash, .. }) => {
                return Err(ValidationError::MissingStorageNode {
                    addr_hash,
                    storage_root,
                    path,
                    hash,
                })
            }
            Err(e) => return Err(e),
        }
    }
}
