//! Postgres data store for direct mode.
//!
//! Every query runs inside a read-only transaction with a local statement
//! timeout. The caller's SQL is wrapped, never edited: an outer
//! `SELECT to_jsonb(q) FROM (...) AS q LIMIT $1` bounds the rows and turns each
//! one into a JSON object, and the stream is cut after `limit + 1` rows to
//! detect truncation.

use std::time::Duration;

use blitz_core::transport::direct::{ColumnInfo, DataStore, QueryRows, TableInfo};
use blitz_types::error::RepositoryError;
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::PgPool;
use sqlx::{Column, Executor, Row, Statement};

use crate::error::repo_error;

pub struct PgDataStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgDataStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Run `inner` (a complete SELECT) under the read-only guard and return
    /// at most `limit` rows.
    async fn collect(&self, inner: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(repo_error)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(repo_error)?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(repo_error)?;

        let describe = format!("SELECT * FROM (\n{inner}\n) AS q LIMIT 0");
        let columns: Vec<String> = (&mut *tx)
            .prepare(&describe)
            .await
            .map_err(repo_error)?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let wrapped = format!("SELECT to_jsonb(q) AS row FROM (\n{inner}\n) AS q LIMIT $1");
        let mut rows = Vec::new();
        let mut truncated = false;
        {
            let mut stream = sqlx::query(&wrapped)
                .bind(i64::from(limit) + 1)
                .fetch(&mut *tx);
            while let Some(row) = stream.try_next().await.map_err(repo_error)? {
                if rows.len() as u32 == limit {
                    truncated = true;
                    break;
                }
                let value: Value = row
                    .try_get("row")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                rows.push(match value {
                    Value::Object(map) => map,
                    other => Map::from_iter([("value".to_string(), other)]),
                });
            }
        }
        // Read-only: nothing to keep.
        tx.rollback().await.map_err(repo_error)?;

        Ok(QueryRows {
            columns,
            rows,
            truncated,
        })
    }
}

/// Drop surrounding whitespace and trailing semicolons so the text can sit
/// inside a subquery.
fn strip_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

impl DataStore for PgDataStore {
    async fn run_query(&self, sql: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        let inner = strip_statement(sql);
        if inner.is_empty() {
            return Err(RepositoryError::Query("query is empty".to_string()));
        }
        self.collect(inner, limit).await
    }

    async fn list_schema(&self, schema: &str) -> Result<Vec<TableInfo>, RepositoryError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"SELECT table_name::text, column_name::text, data_type::text, is_nullable::text
               FROM information_schema.columns
               WHERE table_schema = $1
               ORDER BY table_name, ordinal_position"#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        let mut tables: Vec<TableInfo> = Vec::new();
        for (table_name, name, data_type, is_nullable) in rows {
            let column = ColumnInfo {
                name,
                data_type,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            };
            match tables.last_mut() {
                Some(last) if last.table_name == table_name => last.columns.push(column),
                _ => tables.push(TableInfo {
                    table_name,
                    columns: vec![column],
                }),
            }
        }
        Ok(tables)
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        self.collect(&format!("SELECT * FROM {}", quote_ident(table)), limit)
            .await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "postgres ping failed");
                RepositoryError::Connection
            })?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_statement() {
        assert_eq!(strip_statement("  SELECT 1;  \n"), "SELECT 1");
        assert_eq!(strip_statement("SELECT 1 ; ;"), "SELECT 1");
        assert_eq!(strip_statement(";"), "");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("sales.orders"), "\"sales\".\"orders\"");
    }
}
