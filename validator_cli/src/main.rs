use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ethereum_types::H256;
use state_validator::store::{FsBlockStore, PgBlockStore};
use state_validator::{ContentStore, Params, TraversalKind, ValidationError, Validator};
use tracing::info;

mod cli;
mod init;

use cli::Cli;

enum RunError {
    Config(String),
    Interrupted { recovery_path: String },
    Validation { root: H256, err: ValidationError },
}

fn config_err(msg: impl Into<String>) -> RunError {
    RunError::Config(msg.into())
}

#[tokio::main]
async fn main() -> ExitCode {
    // A .env file is optional; environment already set wins.
    let _ = dotenvy::dotenv();

    let args = Cli::parse();
    if let Err(e) = init::init_tracing(args.log_file.as_deref()) {
        eprintln!("configuration error: {e:#}");
        return ExitCode::from(2);
    }

    match run(args).await {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(RunError::Validation { root, err }) => {
            println!("state at root {root:#x} is not complete: {err}");
            ExitCode::from(1)
        }
        Err(RunError::Config(msg)) => {
            eprintln!("configuration error: {msg}");
            ExitCode::from(2)
        }
        Err(RunError::Interrupted { recovery_path }) => {
            println!("validation interrupted; recovery file written to {recovery_path}");
            ExitCode::from(130)
        }
    }
}

async fn run(args: Cli) -> Result<String, RunError> {
    let kind = args.kind;
    let state_root = args
        .state_root
        .ok_or_else(|| config_err("--state-root is required"))?;

    let store = open_store(&args).await?;
    let validator = Validator::new(
        store,
        Params {
            workers: args.workers,
            recovery_format: args.recovery_format.clone(),
        },
    );

    let (traversed_root, result) = match kind {
        TraversalKind::Full => (state_root, validator.validate_full(state_root).await),
        TraversalKind::StateOnly => (state_root, validator.validate_state(state_root).await),
        TraversalKind::StorageOnly => {
            let address = args
                .address
                .ok_or_else(|| config_err("--address is required for a storage traversal"))?;
            let storage_root = args.storage_root.ok_or_else(|| {
                config_err("--storage-root is required for a storage traversal")
            })?;
            (
                storage_root,
                validator
                    .validate_storage(state_root, address, storage_root)
                    .await,
            )
        }
    };

    let stats = validator.cache_stats();
    info!(
        node_hits = stats.trie_nodes.hits,
        node_misses = stats.trie_nodes.misses,
        raw_hits = stats.raw_reads.hits,
        raw_misses = stats.raw_reads.misses,
        "cache statistics"
    );

    match result {
        Ok(()) => Ok(format!(
            "{kind} trie for root {traversed_root:#x} is complete"
        )),
        Err(ValidationError::Cancelled) => Err(RunError::Interrupted {
            recovery_path: args.recovery_format.replacen("%s", kind.as_str(), 1),
        }),
        // A recovery file that does not match this invocation is an operator
        // problem, not a verdict about the state.
        Err(err @ ValidationError::Recovery(_)) => Err(config_err(err.to_string())),
        Err(err) => Err(RunError::Validation {
            root: traversed_root,
            err,
        }),
    }
}

async fn open_store(args: &Cli) -> Result<Arc<dyn ContentStore>, RunError> {
    match &args.ipfs_path {
        Some(path) => {
            info!(path = %path.display(), "reading blocks from filesystem repository");
            Ok(Arc::new(FsBlockStore::new(path.clone())))
        }
        None => {
            let uri = args.db.conn_string();
            info!(
                host = %args.db.hostname,
                port = args.db.port,
                name = %args.db.name,
                "connecting to blocks database"
            );
            let store = PgBlockStore::connect(&uri, args.key_prefix.clone())
                .await
                .map_err(|e| config_err(format!("failed to connect to the database: {e}")))?;
            Ok(Arc::new(store))
        }
    }
}
