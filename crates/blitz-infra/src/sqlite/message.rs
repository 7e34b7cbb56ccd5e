//! SQLite message store.
//!
//! Implements `MessageStore` from `blitz-core`. Embeddings are stored as
//! little-endian `f32` BLOBs next to the message row and ranked in process:
//! the scope filter narrows the candidate set in SQL, cosine similarity is
//! computed over what remains.
//!
//! Ranking cost grows with the candidate set, so a search only scans the
//! newest `search_candidates` rows of its scope. Rows are streamed and only
//! those above the threshold are decoded into messages.

use blitz_core::memory::similarity::cosine_similarity;
use blitz_core::memory::store::MessageStore;
use blitz_types::error::RepositoryError;
use blitz_types::memory::{HistoryQuery, MemoryScope, Message, Role, ScopeFilter, SemanticMatch};
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use crate::error::repo_error;

/// SQLite-backed implementation of `MessageStore`.
pub struct SqliteMessageStore {
    pool: DatabasePool,
    search_candidates: usize,
}

pub const DEFAULT_SEARCH_CANDIDATES: usize = 10_000;

impl SqliteMessageStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            search_candidates: DEFAULT_SEARCH_CANDIDATES,
        }
    }

    /// Cap on rows ranked per search, newest first.
    pub fn with_search_candidates(mut self, limit: usize) -> Self {
        self.search_candidates = limit.max(1);
        self
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct MessageRow {
    id: String,
    content: String,
    role: String,
    timestamp: String,
    user_id: Option<String>,
    session_id: Option<String>,
    thread_id: Option<String>,
    resource_id: Option<String>,
    metadata: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            role: row.try_get("role")?,
            timestamp: row.try_get("timestamp")?,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            thread_id: row.try_get("thread_id")?,
            resource_id: row.try_get("resource_id")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let role: Role = self
            .role
            .parse()
            .map_err(|e| RepositoryError::Query(format!("invalid role: {e}")))?;
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid metadata JSON: {e}")))?;
        Ok(Message {
            id: parse_uuid(&self.id)?,
            content: self.content,
            role,
            timestamp: parse_datetime(&self.timestamp)?,
            scope: MemoryScope {
                user_id: self.user_id,
                session_id: self.session_id,
                thread_id: self.thread_id,
                resource_id: self.resource_id,
            },
            metadata,
            embedding: None,
        })
    }
}

fn rows_to_messages(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Message>, RepositoryError> {
    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let r = MessageRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        messages.push(r.into_message()?);
    }
    Ok(messages)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC form so text comparison matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, RepositoryError> {
    if bytes.len() % 4 != 0 {
        return Err(RepositoryError::Query(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Keep the `top_k` most similar matches, best first.
fn rank(matches: &mut Vec<SemanticMatch>, top_k: usize) {
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(top_k);
}

/// `"{column} = ? AND "` for a scoped filter, empty when unscoped.
fn scope_clause(filter: &ScopeFilter) -> (String, Option<&str>) {
    match filter.column() {
        Some((column, value)) => (format!("m.{column} = ? AND "), Some(value)),
        None => (String::new(), None),
    }
}

// ---------------------------------------------------------------------------
// MessageStore impl
// ---------------------------------------------------------------------------

impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: &Message, embedding: &[f32]) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&message.metadata)
            .map_err(|e| RepositoryError::Query(format!("serialize metadata: {e}")))?;
        let id = message.id.to_string();

        let mut tx = self.pool.writer.begin().await.map_err(repo_error)?;

        sqlx::query(
            r#"INSERT INTO messages
               (id, content, role, timestamp, user_id, session_id, thread_id, resource_id, metadata)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&message.content)
        .bind(message.role.to_string())
        .bind(format_datetime(&message.timestamp))
        .bind(&message.scope.user_id)
        .bind(&message.scope.session_id)
        .bind(&message.scope.thread_id)
        .bind(&message.scope.resource_id)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(repo_error)?;

        sqlx::query(
            "INSERT INTO message_embeddings (message_id, dimension, embedding) VALUES (?, ?, ?)",
        )
        .bind(&id)
        .bind(embedding.len() as i64)
        .bind(encode_embedding(embedding))
        .execute(&mut *tx)
        .await
        .map_err(repo_error)?;

        tx.commit().await.map_err(repo_error)?;
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        filter: &ScopeFilter,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SemanticMatch>, RepositoryError> {
        let (clause, value) = scope_clause(filter);
        let sql = format!(
            r#"SELECT m.*, e.embedding AS embedding FROM messages m
               JOIN message_embeddings e ON e.message_id = m.id
               WHERE {clause}1 = 1
               ORDER BY m.timestamp DESC
               LIMIT ?"#
        );
        let mut query = sqlx::query(&sql);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let mut rows = query
            .bind(i64::try_from(self.search_candidates).unwrap_or(i64::MAX))
            .fetch(&self.pool.reader);

        let mut candidates = 0usize;
        let mut matches = Vec::new();
        while let Some(row) = rows.try_next().await.map_err(repo_error)? {
            candidates += 1;
            let blob: Vec<u8> = row
                .try_get("embedding")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let similarity = cosine_similarity(embedding, &decode_embedding(&blob)?);
            if similarity < threshold {
                continue;
            }
            let message = MessageRow::from_row(&row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_message()?;
            matches.push(SemanticMatch {
                message,
                similarity,
                context: Vec::new(),
            });
            if matches.len() >= top_k.saturating_mul(2).max(64) {
                rank(&mut matches, top_k);
            }
        }

        rank(&mut matches, top_k);
        tracing::debug!(
            scope = %filter,
            candidates,
            matches = matches.len(),
            "sqlite similarity search"
        );
        Ok(matches)
    }

    async fn context_window(
        &self,
        anchor: &Message,
        filter: &ScopeFilter,
        range: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let (clause, value) = scope_clause(filter);
        let anchor_ts = format_datetime(&anchor.timestamp);
        let anchor_id = anchor.id.to_string();

        let before_sql = format!(
            r#"SELECT m.* FROM messages m
               WHERE {clause}m.timestamp < ? AND m.id != ?
               ORDER BY m.timestamp DESC LIMIT ?"#
        );
        let after_sql = format!(
            r#"SELECT m.* FROM messages m
               WHERE {clause}m.timestamp > ? AND m.id != ?
               ORDER BY m.timestamp ASC LIMIT ?"#
        );

        let mut before_q = sqlx::query(&before_sql);
        let mut after_q = sqlx::query(&after_sql);
        if let Some(value) = value {
            before_q = before_q.bind(value);
            after_q = after_q.bind(value);
        }
        let before_rows = before_q
            .bind(&anchor_ts)
            .bind(&anchor_id)
            .bind(range as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(repo_error)?;
        let after_rows = after_q
            .bind(&anchor_ts)
            .bind(&anchor_id)
            .bind(range as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(repo_error)?;

        let mut window = rows_to_messages(&before_rows)?;
        window.reverse();
        window.extend(rows_to_messages(&after_rows)?);
        Ok(window)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE timestamp < ?")
            .bind(format_datetime(&cutoff))
            .execute(&self.pool.writer)
            .await
            .map_err(repo_error)?;
        Ok(result.rows_affected())
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<Message>, RepositoryError> {
        let scope = &query.scope;
        let filters: Vec<(&str, &str)> = [
            ("user_id", scope.user_id.as_deref()),
            ("session_id", scope.session_id.as_deref()),
            ("thread_id", scope.thread_id.as_deref()),
            ("resource_id", scope.resource_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.map(|v| (column, v)))
        .collect();

        let mut sql = String::from("SELECT * FROM messages");
        for (i, (column, _)) in filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(column);
            sql.push_str(" = ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        for (_, value) in &filters {
            q = q.bind(*value);
        }
        let rows = q
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(repo_error)?;
        rows_to_messages(&rows)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(repo_error)?;
        Ok(count as u64)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    async fn store(dir: &tempfile::TempDir) -> SqliteMessageStore {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("mem.db").display());
        SqliteMessageStore::new(DatabasePool::new(&url).await.unwrap())
    }

    fn message(content: &str, scope: MemoryScope, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::now_v7(),
            content: content.to_string(),
            role: Role::User,
            timestamp: at,
            scope,
            metadata: Map::new(),
            embedding: None,
        }
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_embedding_blob_encoding() {
        let v = vec![1.0f32, -0.5, 0.25];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(&bytes).unwrap(), v);
        assert!(decode_embedding(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_datetime_format_is_fixed_width() {
        let a = format_datetime(&base_time());
        let b = format_datetime(&(base_time() + TimeDelta::microseconds(1)));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_insert_and_search_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let a = message("a", MemoryScope::thread("t1"), base_time());
        let b = message("b", MemoryScope::thread("t2"), base_time());
        store.insert(&a, &[1.0, 0.0]).await.unwrap();
        store.insert(&b, &[1.0, 0.0]).await.unwrap();

        let hits = store
            .search(&[1.0, 0.0], &ScopeFilter::Thread("t1".into()), 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message.id, a.id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);

        let all = store
            .search(&[1.0, 0.0], &ScopeFilter::Unscoped, 5, 0.5)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_search_threshold_and_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = MemoryScope::thread("t");
        for (i, v) in [[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]].iter().enumerate() {
            let m = message(&format!("m{i}"), scope.clone(), base_time());
            store.insert(&m, v).await.unwrap();
        }

        let hits = store
            .search(&[1.0, 0.0], &scope.resolve(), 1, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message.content, "m0");

        let hits = store
            .search(&[1.0, 0.0], &scope.resolve(), 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[tokio::test]
    async fn test_search_scans_newest_candidates_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await.with_search_candidates(2);
        let scope = MemoryScope::thread("t");
        let rows = [("oldest", [1.0, 0.0]), ("middle", [0.6, 0.4]), ("newest", [0.5, 0.5])];
        for (i, (content, v)) in rows.iter().enumerate() {
            let at = base_time() + TimeDelta::seconds(i as i64);
            store.insert(&message(content, scope.clone(), at), v).await.unwrap();
        }

        let hits = store
            .search(&[1.0, 0.0], &scope.resolve(), 5, 0.0)
            .await
            .unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.message.content.as_str()).collect();
        assert_eq!(contents, vec!["middle", "newest"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let m = message("once", MemoryScope::thread("t"), base_time());
        store.insert(&m, &[1.0]).await.unwrap();
        let err = store.insert(&m, &[1.0]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_context_window_is_ordered_and_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let t = MemoryScope::thread("t");
        let mut ids = Vec::new();
        for i in 0..5 {
            let m = message(
                &format!("turn {i}"),
                t.clone(),
                base_time() + TimeDelta::seconds(i),
            );
            store.insert(&m, &[1.0]).await.unwrap();
            ids.push(m);
        }
        let other = message("other", MemoryScope::thread("u"), base_time() + TimeDelta::seconds(2));
        store.insert(&other, &[1.0]).await.unwrap();

        let window = store
            .context_window(&ids[2], &t.resolve(), 1)
            .await
            .unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 1", "turn 3"]);

        let edge = store
            .context_window(&ids[0], &t.resolve(), 2)
            .await
            .unwrap();
        let contents: Vec<&str> = edge.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 1", "turn 2"]);
    }

    #[tokio::test]
    async fn test_delete_older_than_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let old = message("old", MemoryScope::default(), base_time() - TimeDelta::days(100));
        let new = message("new", MemoryScope::default(), base_time());
        store.insert(&old, &[1.0]).await.unwrap();
        store.insert(&new, &[1.0]).await.unwrap();

        let deleted = store
            .delete_older_than(base_time() - TimeDelta::days(90))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let (embeddings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM message_embeddings")
            .fetch_one(&store.pool.reader)
            .await
            .unwrap();
        assert_eq!(embeddings, 1);

        let hits = store
            .search(&[1.0], &ScopeFilter::Unscoped, 10, 0.0)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.message.id != old.id));
    }

    #[tokio::test]
    async fn test_history_filters_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = MemoryScope {
            session_id: Some("s1".into()),
            ..MemoryScope::user("alice")
        };
        for i in 0..4 {
            let m = message(&format!("h{i}"), scope.clone(), base_time() + TimeDelta::seconds(i));
            store.insert(&m, &[1.0]).await.unwrap();
        }
        let stray = message("stray", MemoryScope::user("alice"), base_time());
        store.insert(&stray, &[1.0]).await.unwrap();

        let page = store
            .history(&HistoryQuery {
                scope: scope.clone(),
                limit: 2,
                offset: 0,
            })
            .await
            .unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["h3", "h2"]);
        assert_eq!(page[0].scope, scope);

        let all_alice = store
            .history(&HistoryQuery {
                scope: MemoryScope::user("alice"),
                ..HistoryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(all_alice.len(), 5);
    }
}
