//! Memory backend selection.
//!
//! `MemoryBackend` picks the message store from `memory.database_url`:
//! `postgres://` goes to pgvector, anything else (or nothing) to SQLite.

use blitz_core::memory::store::MessageStore;
use blitz_types::config::MemoryConfig;
use blitz_types::error::{MemoryError, RepositoryError};
use blitz_types::memory::{HistoryQuery, Message, ScopeFilter, SemanticMatch};
use chrono::{DateTime, Utc};

use crate::config::default_data_dir;
use crate::error::repo_error;
use crate::postgres::message::PgMessageStore;
use crate::postgres::pool::{lazy_pool, url_options};
use crate::sqlite::message::SqliteMessageStore;
use crate::sqlite::pool::{DatabasePool, default_database_url};

const PG_MEMORY_POOL_SIZE: u32 = 5;

pub enum MemoryBackend {
    Sqlite(SqliteMessageStore),
    Postgres(PgMessageStore),
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

impl MemoryBackend {
    /// Open the configured store and make sure its schema exists.
    pub async fn open(config: &MemoryConfig) -> Result<Self, MemoryError> {
        match config.database_url.as_deref() {
            Some(url) if is_postgres_url(url) => {
                let options =
                    url_options(url).map_err(|e| MemoryError::InvalidInput(e.to_string()))?;
                let store = PgMessageStore::new(
                    lazy_pool(options, PG_MEMORY_POOL_SIZE),
                    config.storage.dimension,
                );
                store.ensure_schema().await?;
                Ok(Self::Postgres(store))
            }
            Some(url) => Ok(Self::Sqlite(Self::open_sqlite(url, config).await?)),
            None => {
                tokio::fs::create_dir_all(default_data_dir())
                    .await
                    .map_err(|e| RepositoryError::Query(format!("cannot create data dir: {e}")))?;
                Ok(Self::Sqlite(
                    Self::open_sqlite(&default_database_url(), config).await?,
                ))
            }
        }
    }

    async fn open_sqlite(
        url: &str,
        config: &MemoryConfig,
    ) -> Result<SqliteMessageStore, RepositoryError> {
        let pool = DatabasePool::new(url).await.map_err(repo_error)?;
        tracing::info!(url, "sqlite memory store opened");
        Ok(SqliteMessageStore::new(pool)
            .with_search_candidates(config.storage.sqlite_search_candidates))
    }

    pub async fn close(&self) {
        match self {
            Self::Sqlite(s) => s.close().await,
            Self::Postgres(s) => s.close().await,
        }
    }
}

impl MessageStore for MemoryBackend {
    async fn insert(&self, message: &Message, embedding: &[f32]) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(s) => s.insert(message, embedding).await,
            Self::Postgres(s) => s.insert(message, embedding).await,
        }
    }

    async fn search(
        &self,
        embedding: &[f32],
        filter: &ScopeFilter,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SemanticMatch>, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.search(embedding, filter, top_k, threshold).await,
            Self::Postgres(s) => s.search(embedding, filter, top_k, threshold).await,
        }
    }

    async fn context_window(
        &self,
        anchor: &Message,
        filter: &ScopeFilter,
        range: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.context_window(anchor, filter, range).await,
            Self::Postgres(s) => s.context_window(anchor, filter, range).await,
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.delete_older_than(cutoff).await,
            Self::Postgres(s) => s.delete_older_than(cutoff).await,
        }
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<Message>, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.history(query).await,
            Self::Postgres(s) => s.history(query).await,
        }
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.count().await,
            Self::Postgres(s) => s.count().await,
        }
    }

    fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(s) => s.backend(),
            Self::Postgres(s) => s.backend(),
        }
    }
}
