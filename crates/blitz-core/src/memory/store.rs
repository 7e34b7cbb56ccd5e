//! MessageStore trait definition.
//!
//! The persistence port for semantic memory. Implementations live in
//! blitz-infra (`SqliteMessageStore`, `PgMessageStore`).

use blitz_types::error::RepositoryError;
use blitz_types::memory::{HistoryQuery, Message, ScopeFilter, SemanticMatch};
use chrono::{DateTime, Utc};

/// Repository trait for conversation messages and their embeddings.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait MessageStore: Send + Sync {
    /// Persist a message together with its embedding.
    ///
    /// Both rows are written in one transaction: either both exist afterwards
    /// or neither does.
    fn insert(
        &self,
        message: &Message,
        embedding: &[f32],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Nearest messages to `embedding` inside `filter`.
    ///
    /// Returns at most `top_k` matches with similarity >= `threshold`, sorted
    /// by similarity descending. `context` is left empty.
    fn search(
        &self,
        embedding: &[f32],
        filter: &ScopeFilter,
        top_k: usize,
        threshold: f32,
    ) -> impl std::future::Future<Output = Result<Vec<SemanticMatch>, RepositoryError>> + Send;

    /// Up to `range` messages immediately before and after `anchor` within
    /// `filter`, in ascending timestamp order, excluding the anchor itself.
    fn context_window(
        &self,
        anchor: &Message,
        filter: &ScopeFilter,
        range: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Delete messages (and their embeddings) older than `cutoff`.
    /// Returns the number of messages removed.
    fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Messages for a scope, newest first, paginated.
    fn history(
        &self,
        query: &HistoryQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Total number of stored messages.
    fn count(&self) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Short backend identifier for health reports ("sqlite", "postgres").
    fn backend(&self) -> &'static str;
}
