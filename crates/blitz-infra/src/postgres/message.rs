//! Postgres message store on pgvector.
//!
//! Embeddings live in a `vector(dimension)` column and are ranked in SQL with
//! the `<=>` cosine distance operator, backed by an ivfflat index.

use blitz_core::memory::store::MessageStore;
use blitz_types::error::RepositoryError;
use blitz_types::memory::{HistoryQuery, MemoryScope, Message, Role, ScopeFilter, SemanticMatch};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;

use crate::error::repo_error;

const MESSAGE_COLUMNS: &str = "m.id, m.content, m.role, m.timestamp, m.user_id, m.session_id, \
                               m.thread_id, m.resource_id, m.metadata";

pub struct PgMessageStore {
    pool: PgPool,
    dimension: usize,
}

impl PgMessageStore {
    pub fn new(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Create the extension, tables and index if missing.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        for statement in schema_statements(self.dimension) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(repo_error)?;
        }
        tracing::info!(dimension = self.dimension, "pgvector memory schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn schema_statements(dimension: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        r#"CREATE TABLE IF NOT EXISTS messages (
               id          UUID PRIMARY KEY,
               content     TEXT NOT NULL,
               role        TEXT NOT NULL,
               timestamp   TIMESTAMPTZ NOT NULL,
               user_id     TEXT,
               session_id  TEXT,
               thread_id   TEXT,
               resource_id TEXT,
               metadata    JSONB NOT NULL DEFAULT '{}'::jsonb
           )"#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (timestamp)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages (thread_id, timestamp)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_messages_resource ON messages (resource_id, timestamp)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_messages_user ON messages (user_id, timestamp)".to_string(),
        format!(
            r#"CREATE TABLE IF NOT EXISTS message_embeddings (
                   message_id UUID PRIMARY KEY REFERENCES messages (id) ON DELETE CASCADE,
                   embedding  vector({dimension}) NOT NULL
               )"#
        ),
        "CREATE INDEX IF NOT EXISTS idx_message_embeddings_cosine ON message_embeddings \
         USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
            .to_string(),
    ]
}

/// pgvector text literal, e.g. `[0.1,0.2]`.
fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn row_to_message(row: &PgRow) -> Result<Message, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let role: String = row.try_get("role").map_err(decode)?;
    let role: Role = role
        .parse()
        .map_err(|e| RepositoryError::Query(format!("invalid role: {e}")))?;
    let Json(metadata): Json<Map<String, Value>> = row.try_get("metadata").map_err(decode)?;
    Ok(Message {
        id: row.try_get("id").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        role,
        timestamp: row.try_get("timestamp").map_err(decode)?,
        scope: MemoryScope {
            user_id: row.try_get("user_id").map_err(decode)?,
            session_id: row.try_get("session_id").map_err(decode)?,
            thread_id: row.try_get("thread_id").map_err(decode)?,
            resource_id: row.try_get("resource_id").map_err(decode)?,
        },
        metadata,
        embedding: None,
    })
}

/// `m.{column} = $n AND ` for a scoped filter, empty when unscoped.
fn scope_clause(filter: &ScopeFilter, placeholder: usize) -> (String, Option<&str>) {
    match filter.column() {
        Some((column, value)) => (format!("m.{column} = ${placeholder} AND "), Some(value)),
        None => (String::new(), None),
    }
}

impl MessageStore for PgMessageStore {
    async fn insert(&self, message: &Message, embedding: &[f32]) -> Result<(), RepositoryError> {
        if embedding.len() != self.dimension {
            return Err(RepositoryError::Query(format!(
                "embedding has {} dimensions, column expects {}",
                embedding.len(),
                self.dimension
            )));
        }

        let mut tx = self.pool.begin().await.map_err(repo_error)?;

        sqlx::query(
            r#"INSERT INTO messages
               (id, content, role, timestamp, user_id, session_id, thread_id, resource_id, metadata)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(message.id)
        .bind(&message.content)
        .bind(message.role.to_string())
        .bind(message.timestamp)
        .bind(&message.scope.user_id)
        .bind(&message.scope.session_id)
        .bind(&message.scope.thread_id)
        .bind(&message.scope.resource_id)
        .bind(Json(&message.metadata))
        .execute(&mut *tx)
        .await
        .map_err(repo_error)?;

        sqlx::query("INSERT INTO message_embeddings (message_id, embedding) VALUES ($1, $2::vector)")
            .bind(message.id)
            .bind(vector_literal(embedding))
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
        let (clause, value) = scope_clause(filter, 4);
        let sql = format!(
            r#"SELECT {MESSAGE_COLUMNS},
                      (1 - (e.embedding <=> $1::vector))::float8 AS similarity
               FROM message_embeddings e
               JOIN messages m ON m.id = e.message_id
               WHERE {clause}(1 - (e.embedding <=> $1::vector)) >= $2
               ORDER BY e.embedding <=> $1::vector
               LIMIT $3"#
        );
        let mut query = sqlx::query(&sql)
            .bind(vector_literal(embedding))
            .bind(f64::from(threshold))
            .bind(top_k as i64);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(repo_error)?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let similarity: f64 = row
                .try_get("similarity")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            matches.push(SemanticMatch {
                message: row_to_message(row)?,
                similarity: (similarity as f32).clamp(0.0, 1.0),
                context: Vec::new(),
            });
        }
        Ok(matches)
    }

    async fn context_window(
        &self,
        anchor: &Message,
        filter: &ScopeFilter,
        range: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let (clause, value) = scope_clause(filter, 4);
        let window_sql = |cmp: &str, order: &str| {
            format!(
                r#"SELECT {MESSAGE_COLUMNS} FROM messages m
                   WHERE {clause}m.timestamp {cmp} $1 AND m.id <> $2
                   ORDER BY m.timestamp {order} LIMIT $3"#
            )
        };
        let before_sql = window_sql("<", "DESC");
        let after_sql = window_sql(">", "ASC");

        let mut before_q = sqlx::query(&before_sql)
            .bind(anchor.timestamp)
            .bind(anchor.id)
            .bind(range as i64);
        let mut after_q = sqlx::query(&after_sql)
            .bind(anchor.timestamp)
            .bind(anchor.id)
            .bind(range as i64);
        if let Some(value) = value {
            before_q = before_q.bind(value);
            after_q = after_q.bind(value);
        }
        let before_rows = before_q.fetch_all(&self.pool).await.map_err(repo_error)?;
        let after_rows = after_q.fetch_all(&self.pool).await.map_err(repo_error)?;

        let mut window = Vec::with_capacity(before_rows.len() + after_rows.len());
        for row in before_rows.iter().rev().chain(after_rows.iter()) {
            window.push(row_to_message(row)?);
        }
        Ok(window)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
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

        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m");
        for (i, (column, _)) in filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("m.{column} = ${}", i + 1));
        }
        let n = filters.len();
        sql.push_str(&format!(
            " ORDER BY m.timestamp DESC LIMIT ${} OFFSET ${}",
            n + 1,
            n + 2
        ));

        let mut q = sqlx::query(&sql);
        for (_, value) in &filters {
            q = q.bind(*value);
        }
        let rows = q
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(repo_error)?;
        rows.iter().map(row_to_message).collect()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(repo_error)?;
        Ok(count as u64)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.0]), "[0.5,-1,2]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_schema_uses_configured_dimension() {
        let statements = schema_statements(768);
        assert!(statements.iter().any(|s| s.contains("vector(768)")));
        assert!(statements.iter().any(|s| s.contains("vector_cosine_ops")));
        assert!(statements.iter().any(|s| s.contains("ON DELETE CASCADE")));
    }

    #[test]
    fn test_scope_clause_placeholder() {
        let scope = ScopeFilter::Resource("r1".into());
        let (clause, value) = scope_clause(&scope, 4);
        assert_eq!(clause, "m.resource_id = $4 AND ");
        assert_eq!(value, Some("r1"));
        let (clause, value) = scope_clause(&ScopeFilter::Unscoped, 4);
        assert!(clause.is_empty());
        assert!(value.is_none());
    }
}
