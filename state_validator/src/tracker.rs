//! Per-worker progress tracking and checkpoint recovery.
//!
//! Every worker owns one [`WorkerSlot`] that its [`TrackedIterator`] updates
//! on each step. When a run halts early, [`ProgressTracker::halt_and_dump`]
//! persists the unfinished slots to a recovery file; a later run over the
//! same root finds the file through [`ProgressTracker::restore`] and resumes
//! each worker past its recorded path instead of replaying completed work.
//!
//! The recovery file is line oriented and versioned:
//!
//! ```text
//! v1 workers=<N> root=<hex32> kind=<full|state|storage>
//! <worker_id> <start_prefix> <current_path> [addr_hash storage_root]
//! ```
//!
//! Paths are written one nibble per character (`t` for the terminator, the
//! reserved token `-` for an empty path). The trailing pair is present iff
//! the worker halted inside a storage-trie recursion.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethereum_types::H256;
use mpt_codec::NodePath;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ValidationError;
use crate::iterator::SubtrieIterator;
use crate::partition::partition_buckets;
use crate::store::ContentStore;
use crate::validator::TraversalKind;

const RECOVERY_VERSION: &str = "v1";

/// The storage recursion a worker was inside when it halted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageCtx {
    /// The hashed address owning the storage trie.
    pub addr_hash: H256,
    /// The root of the storage trie being drained.
    pub storage_root: H256,
}

#[derive(Clone, Debug)]
struct WorkerState {
    start_prefix: NodePath,
    current_path: Option<NodePath>,
    storage_ctx: Option<StorageCtx>,
    done: bool,
}

/// The progress record of one worker.
///
/// Written only by the owning worker while the group runs; read by the dump
/// routine once the group has been joined.
#[derive(Debug)]
pub struct WorkerSlot {
    worker_id: u32,
    state: Mutex<WorkerState>,
}

impl WorkerSlot {
    fn new(worker_id: u32, start_prefix: NodePath) -> Self {
        Self {
            worker_id,
            state: Mutex::new(WorkerState {
                start_prefix,
                current_path: None,
                storage_ctx: None,
                done: false,
            }),
        }
    }

    /// The id of the worker this slot belongs to.
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    fn record_path(&self, path: NodePath) {
        self.state.lock().current_path = Some(path);
    }

    fn mark_done(&self) {
        self.state.lock().done = true;
    }

    /// Records that the worker is draining the given storage trie.
    pub fn enter_storage(&self, addr_hash: H256, storage_root: H256) {
        self.state.lock().storage_ctx = Some(StorageCtx {
            addr_hash,
            storage_root,
        });
    }

    /// Records that the worker finished its storage drain.
    pub fn leave_storage(&self) {
        self.state.lock().storage_ctx = None;
    }
}

/// A thin proxy recording every step of a [`SubtrieIterator`] into the
/// worker's slot.
#[derive(Debug)]
pub struct TrackedIterator {
    iter: SubtrieIterator,
    slot: Arc<WorkerSlot>,
}

impl TrackedIterator {
    /// Advances the underlying cursor, mirroring its position into the slot.
    /// Exhaustion without an error marks the worker done.
    pub async fn next(&mut self, descend: bool) -> Result<bool, ValidationError> {
        let step = self.iter.next(descend).await;
        match &step {
            Ok(true) => {
                if let Some(path) = self.iter.path() {
                    self.slot.record_path(path.clone());
                }
            }
            Ok(false) => self.slot.mark_done(),
            Err(_) => {}
        }
        step
    }

    /// The slot this iterator reports into.
    pub fn slot(&self) -> &Arc<WorkerSlot> {
        &self.slot
    }

    /// See [`SubtrieIterator::path`].
    pub fn path(&self) -> Option<&NodePath> {
        self.iter.path()
    }

    /// See [`SubtrieIterator::is_leaf`].
    pub fn is_leaf(&self) -> bool {
        self.iter.is_leaf()
    }

    /// See [`SubtrieIterator::leaf_blob`].
    pub fn leaf_blob(&self) -> Option<&[u8]> {
        self.iter.leaf_blob()
    }

    /// See [`SubtrieIterator::leaf_key`].
    pub fn leaf_key(&self) -> Option<H256> {
        self.iter.leaf_key()
    }
}

/// A worker reconstructed from a recovery file.
#[derive(Debug)]
pub struct RestoredWorker {
    /// The tracked cursor, positioned past the worker's recorded path.
    pub iter: TrackedIterator,
    /// Set when the worker halted inside a storage recursion; that trie is
    /// re-drained before state iteration resumes.
    pub resume_storage: Option<StorageCtx>,
}

/// Tracks the progress of one worker group and persists it across
/// interruptions.
#[derive(Debug)]
pub struct ProgressTracker {
    recovery_path: PathBuf,
    root: H256,
    kind: TraversalKind,
    workers: u32,
    slots: Mutex<Vec<Arc<WorkerSlot>>>,
    signal_latch: Arc<AtomicBool>,
}

impl ProgressTracker {
    /// Creates a tracker for a group of `workers` workers traversing `root`.
    pub fn new(
        recovery_path: impl Into<PathBuf>,
        root: H256,
        kind: TraversalKind,
        workers: u32,
    ) -> Self {
        Self {
            recovery_path: recovery_path.into(),
            root,
            kind,
            workers,
            slots: Mutex::new(Vec::new()),
            signal_latch: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The path progress is dumped to.
    pub fn recovery_path(&self) -> &Path {
        &self.recovery_path
    }

    /// Registers a fresh cursor with the tracker.
    pub fn wrap(&self, iter: SubtrieIterator, worker_id: u32) -> TrackedIterator {
        let start_prefix = iter.bucket().start_prefix();
        self.wrap_with_state(iter, worker_id, start_prefix, None, None)
    }

    fn wrap_with_state(
        &self,
        iter: SubtrieIterator,
        worker_id: u32,
        start_prefix: NodePath,
        current_path: Option<NodePath>,
        storage_ctx: Option<StorageCtx>,
    ) -> TrackedIterator {
        let slot = Arc::new(WorkerSlot::new(worker_id, start_prefix));
        {
            let mut state = slot.state.lock();
            state.current_path = current_path;
            state.storage_ctx = storage_ctx;
        }
        self.slots.lock().push(slot.clone());
        TrackedIterator { iter, slot }
    }

    /// Arranges for an interrupt signal (SIGINT/SIGTERM) to cancel the worker
    /// group. The handler only latches the signal and flips the token; any
    /// dumping happens on the orchestrator once the workers have returned.
    ///
    /// The returned handle is aborted by the orchestrator when the run ends.
    pub fn capture_signal(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let latch = self.signal_latch.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("interrupt received, cancelling traversal workers");
            latch.store(true, Ordering::SeqCst);
            cancel.cancel();
        })
    }

    /// Whether an interrupt signal was observed.
    pub fn signal_latched(&self) -> bool {
        self.signal_latch.load(Ordering::SeqCst)
    }

    /// Reconstructs the worker group from a recovery file, if one exists.
    ///
    /// Workers absent from the file completed in the interrupted run and are
    /// not re-created. The file must describe the same root, traversal kind
    /// and worker count as the current invocation.
    pub async fn restore(
        &self,
        store: Arc<dyn ContentStore>,
    ) -> Result<Option<Vec<RestoredWorker>>, ValidationError> {
        let contents = match std::fs::read_to_string(&self.recovery_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ValidationError::Recovery(e.to_string())),
        };

        info!(path = %self.recovery_path.display(), "resuming from recovery file");

        let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| recovery_err("empty recovery file"))?;
        self.check_header(header)?;

        let buckets = partition_buckets(self.workers);
        let mut seen = vec![false; self.workers as usize];
        let mut restored = Vec::new();

        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 3 && fields.len() != 5 {
                return Err(recovery_err(format!(
                    "expected 3 or 5 fields per worker line, got {}",
                    fields.len()
                )));
            }

            let worker_id: u32 = fields[0]
                .parse()
                .map_err(|_| recovery_err(format!("invalid worker id {:?}", fields[0])))?;
            if worker_id >= self.workers {
                return Err(recovery_err(format!(
                    "worker id {worker_id} out of range for {} workers",
                    self.workers
                )));
            }
            if std::mem::replace(&mut seen[worker_id as usize], true) {
                return Err(recovery_err(format!("duplicate worker id {worker_id}")));
            }

            let start_prefix = parse_path_token(fields[1])?;
            let bucket = buckets[worker_id as usize];
            if start_prefix != bucket.start_prefix() {
                return Err(recovery_err(format!(
                    "worker {worker_id} start prefix {:?} does not match its partition",
                    fields[1]
                )));
            }

            let current_path = match fields[2] {
                "-" => None,
                token => Some(parse_path_token(token)?),
            };

            let resume_storage = match fields.len() {
                5 => Some(StorageCtx {
                    addr_hash: parse_hash(fields[3])?,
                    storage_root: parse_hash(fields[4])?,
                }),
                _ => None,
            };

            let mut iter =
                SubtrieIterator::new(store.clone(), self.kind.trie_kind(), self.root, bucket);
            if let Some(path) = &current_path {
                iter.seek(path).await?;
            }

            debug!(worker_id, "restored worker");
            restored.push(RestoredWorker {
                iter: self.wrap_with_state(
                    iter,
                    worker_id,
                    start_prefix,
                    current_path,
                    resume_storage,
                ),
                resume_storage,
            });
        }

        Ok(Some(restored))
    }

    fn check_header(&self, header: &str) -> Result<(), ValidationError> {
        let mut fields = header.split_whitespace();
        let version = fields.next().unwrap_or_default();
        if version != RECOVERY_VERSION {
            return Err(recovery_err(format!(
                "unknown recovery file version {version:?}"
            )));
        }

        for field in fields {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| recovery_err(format!("malformed header field {field:?}")))?;
            match key {
                "workers" => {
                    let workers: u32 = value
                        .parse()
                        .map_err(|_| recovery_err(format!("invalid worker count {value:?}")))?;
                    if workers != self.workers {
                        return Err(recovery_err(format!(
                            "recovery file was written with {workers} workers, this run uses {}; \
                             restart with matching --workers or remove the file",
                            self.workers
                        )));
                    }
                }
                "root" => {
                    if parse_hash(value)? != self.root {
                        return Err(recovery_err(format!(
                            "recovery file is for root {value}, not {:#x}; remove the stale file",
                            self.root
                        )));
                    }
                }
                "kind" => {
                    let kind = TraversalKind::from_str(value)
                        .map_err(|_| recovery_err(format!("unknown traversal kind {value:?}")))?;
                    if kind != self.kind {
                        return Err(recovery_err(format!(
                            "recovery file is for a {kind} traversal, not {}",
                            self.kind
                        )));
                    }
                }
                // Unknown header fields are reserved.
                _ => return Err(recovery_err(format!("unknown header field {key:?}"))),
            }
        }

        Ok(())
    }

    /// Persists every unfinished worker to the recovery file, fsyncing before
    /// return. With no unfinished worker, any pre-existing file is deleted
    /// instead. Returns the written path, if any.
    pub fn halt_and_dump(&self) -> std::io::Result<Option<PathBuf>> {
        let mut unfinished: Vec<(u32, WorkerState)> = self
            .slots
            .lock()
            .iter()
            .filter_map(|slot| {
                let state = slot.state.lock();
                match state.done {
                    true => None,
                    false => Some((slot.worker_id, state.clone())),
                }
            })
            .collect();
        unfinished.sort_by_key(|(id, _)| *id);

        if unfinished.is_empty() {
            match std::fs::remove_file(&self.recovery_path) {
                Ok(()) => debug!(path = %self.recovery_path.display(), "removed recovery file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            return Ok(None);
        }

        let mut file = std::fs::File::create(&self.recovery_path)?;
        writeln!(
            file,
            "{RECOVERY_VERSION} workers={} root={} kind={}",
            self.workers,
            hex::encode(self.root.as_bytes()),
            self.kind
        )?;
        for (worker_id, state) in &unfinished {
            write!(
                file,
                "{worker_id} {} {}",
                path_token(&state.start_prefix),
                state
                    .current_path
                    .as_ref()
                    .map(path_token)
                    .unwrap_or_else(|| "-".into()),
            )?;
            match &state.storage_ctx {
                None => writeln!(file)?,
                Some(ctx) => writeln!(
                    file,
                    " {} {}",
                    hex::encode(ctx.addr_hash.as_bytes()),
                    hex::encode(ctx.storage_root.as_bytes())
                )?,
            }
        }
        file.sync_all()?;

        info!(
            path = %self.recovery_path.display(),
            workers = unfinished.len(),
            "wrote recovery file"
        );
        Ok(Some(self.recovery_path.clone()))
    }
}

fn path_token(path: &NodePath) -> String {
    match path.is_empty() {
        true => "-".into(),
        false => path.to_string(),
    }
}

fn parse_path_token(token: &str) -> Result<NodePath, ValidationError> {
    match token {
        "-" => Ok(NodePath::new()),
        token => NodePath::from_str(token)
            .map_err(|e| recovery_err(format!("invalid path {token:?}: {e}"))),
    }
}

fn parse_hash(token: &str) -> Result<H256, ValidationError> {
    let bytes = hex::decode(token).map_err(|e| recovery_err(format!("invalid hash: {e}")))?;
    match bytes.len() {
        32 => Ok(H256::from_slice(&bytes)),
        n => Err(recovery_err(format!("hash of {n} bytes"))),
    }
}

fn recovery_err(msg: impl Into<String>) -> ValidationError {
    ValidationError::Recovery(msg.into())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler, falling back to SIGINT only: {e}");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
