//! PostgreSQL store backend.

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::H256;
use tokio_postgres::NoTls;
use tracing::{debug, error};

use super::{ContentStore, StoreError};

/// A content-addressed store over a `public.blocks` table.
///
/// The table schema is `blocks (key TEXT PRIMARY KEY, data BYTEA NOT NULL)`;
/// keys are hex digests carrying an optional datastore prefix that is applied
/// uniformly on every read. Deployments that widen the table (e.g. with a
/// `block_number` column) remain readable, the extra columns are ignored.
pub struct PgBlockStore {
    client: tokio_postgres::Client,
    key_prefix: String,
}

impl PgBlockStore {
    /// Connects to the database at `config` (a PostgreSQL connection URI).
    ///
    /// The connection task is spawned onto the current runtime and lives as
    /// long as the client.
    pub async fn connect(config: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(config, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {e}");
            }
        });

        let key_prefix = key_prefix.into();
        debug!(%key_prefix, "connected to blocks database");
        Ok(Self { client, key_prefix })
    }

    fn db_key(&self, key: H256) -> String {
        format!("{}{}", self.key_prefix, hex::encode(key.as_bytes()))
    }
}

impl std::fmt::Debug for PgBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgBlockStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentStore for PgBlockStore {
    async fn get(&self, key: H256) -> Result<Option<Bytes>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT data FROM public.blocks WHERE key = $1",
                &[&self.db_key(key)],
            )
            .await?;

        Ok(row.map(|row| Bytes::from(row.get::<_, Vec<u8>>(0))))
    }

    async fn has(&self, key: H256) -> Result<bool, StoreError> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM public.blocks WHERE key = $1)",
                &[&self.db_key(key)],
            )
            .await?;

        Ok(row.get(0))
    }
}
