//! SQLite data store for direct mode.
//!
//! Opens the target database through a read-only pool, so `execute-query`
//! cannot modify it. Row limits are bound on an outer `SELECT` wrapper and
//! enforced again while streaming.

use std::str::FromStr;
use std::time::Duration;

use blitz_core::transport::direct::{ColumnInfo, DataStore, QueryRows, TableInfo};
use blitz_types::error::RepositoryError;
use futures_util::TryStreamExt;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use crate::error::repo_error;

pub struct SqliteDataStore {
    pool: SqlitePool,
}

impl SqliteDataStore {
    /// Lazily connecting read-only pool. Nothing is opened until the first
    /// `ping` or query.
    pub fn connect_lazy(database_url: &str, pool_size: u32) -> Result<Self, RepositoryError> {
        let opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| RepositoryError::Query(format!("invalid sqlite url: {e}")))?
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(opts);
        Ok(Self { pool })
    }

    async fn collect(
        &self,
        sql: &str,
        limit: u32,
    ) -> Result<QueryRows, RepositoryError> {
        let statement = self.pool.prepare(sql).await.map_err(repo_error)?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut stream = sqlx::query(sql)
            .bind(i64::from(limit) + 1)
            .fetch(&self.pool);
        let mut rows = Vec::new();
        let mut truncated = false;
        while let Some(row) = stream.try_next().await.map_err(repo_error)? {
            if rows.len() as u32 == limit {
                truncated = true;
                break;
            }
            rows.push(row_to_json(&row)?);
        }
        Ok(QueryRows {
            columns,
            rows,
            truncated,
        })
    }
}

/// Convert a dynamically typed SQLite row into a JSON object.
fn row_to_json(row: &SqliteRow) -> Result<Map<String, Value>, RepositoryError> {
    let decode_err = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i).map_err(decode_err)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(i).map_err(decode_err)?),
                "REAL" => Number::from_f64(row.try_get::<f64, _>(i).map_err(decode_err)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(i).map_err(decode_err)?;
                    Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(i).map_err(decode_err)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

/// SQLite has one namespace per attached database; `public` means `main`.
fn sqlite_schema(schema: &str) -> &str {
    if schema == "public" { "main" } else { schema }
}

fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

impl DataStore for SqliteDataStore {
    async fn run_query(&self, sql: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        let inner = sql.trim().trim_end_matches(';');
        let wrapped = format!("SELECT * FROM (\n{inner}\n) LIMIT ?");
        self.collect(&wrapped, limit).await
    }

    async fn list_schema(&self, schema: &str) -> Result<Vec<TableInfo>, RepositoryError> {
        let schema = sqlite_schema(schema);
        if schema.contains('.') || !blitz_core::transport::direct::is_valid_table_name(schema) {
            return Err(RepositoryError::Query(format!("invalid schema name '{schema}'")));
        }

        let tables: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' \
             ORDER BY name",
            quote_ident(schema)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        let mut out = Vec::with_capacity(tables.len());
        for (table_name,) in tables {
            let columns: Vec<(String, String, i64)> = sqlx::query_as(
                r#"SELECT name, type, "notnull" FROM pragma_table_info(?, ?) ORDER BY cid"#,
            )
            .bind(&table_name)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(repo_error)?;
            out.push(TableInfo {
                table_name,
                columns: columns
                    .into_iter()
                    .map(|(name, data_type, notnull)| ColumnInfo {
                        name,
                        data_type,
                        nullable: notnull == 0,
                    })
                    .collect(),
            });
        }
        Ok(out)
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        let sql = format!("SELECT * FROM {} LIMIT ?", quote_ident(table));
        self.collect(&sql, limit).await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "sqlite ping failed");
                RepositoryError::Connection
            })?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (tempfile::TempDir, SqliteDataStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let seed = SqlitePool::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT NOT NULL, total REAL, note TEXT)",
        )
        .execute(&seed)
        .await
        .unwrap();
        for i in 1..=25 {
            sqlx::query("INSERT INTO orders (customer, total, note) VALUES (?, ?, NULL)")
                .bind(format!("c{i}"))
                .bind(f64::from(i) * 1.5)
                .execute(&seed)
                .await
                .unwrap();
        }
        seed.close().await;

        let store = SqliteDataStore::connect_lazy(&format!("sqlite://{}", path.display()), 2).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_query_is_capped_and_flags_truncation() {
        let (_dir, store) = seeded().await;
        let rows = store
            .run_query("SELECT id, customer, total, note FROM orders ORDER BY id;", 10)
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 10);
        assert!(rows.truncated);
        assert_eq!(rows.columns, vec!["id", "customer", "total", "note"]);
        assert_eq!(rows.rows[0]["customer"], "c1");
        assert_eq!(rows.rows[0]["total"], 1.5);
        assert_eq!(rows.rows[0]["note"], Value::Null);

        let all = store.run_query("SELECT id FROM orders", 100).await.unwrap();
        assert_eq!(all.rows.len(), 25);
        assert!(!all.truncated);
    }

    #[tokio::test]
    async fn test_inner_limit_is_respected() {
        let (_dir, store) = seeded().await;
        let rows = store
            .run_query("SELECT id FROM orders LIMIT 3", 100)
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 3);
    }

    #[tokio::test]
    async fn test_bad_sql_is_query_error() {
        let (_dir, store) = seeded().await;
        let err = store.run_query("SELEKT nope", 10).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let (_dir, store) = seeded().await;
        assert!(store.run_query("DELETE FROM orders", 10).await.is_err());
        let rows = store.run_query("SELECT COUNT(*) AS n FROM orders", 10).await.unwrap();
        assert_eq!(rows.rows[0]["n"], 25);
    }

    #[tokio::test]
    async fn test_list_schema_and_sample() {
        let (_dir, store) = seeded().await;
        let tables = store.list_schema("public").await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_name, "orders");
        let customer = tables[0]
            .columns
            .iter()
            .find(|c| c.name == "customer")
            .unwrap();
        assert!(!customer.nullable);
        assert_eq!(customer.data_type, "TEXT");

        let sample = store.sample_rows("orders", 4).await.unwrap();
        assert_eq!(sample.rows.len(), 4);

        let err = store.sample_rows("missing_table", 4).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
    }

    #[tokio::test]
    async fn test_ping_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("absent.db").display());
        let store = SqliteDataStore::connect_lazy(&url, 1).unwrap();
        assert!(matches!(store.ping().await, Err(RepositoryError::Connection)));
    }
}
