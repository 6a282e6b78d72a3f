//! PostgreSQL document store backend.
//!
//! Enable with the `postgres` feature flag.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use super::{BackendResultExt, DocumentStore, StoreError, StoreResult, VersionedDoc};

/// PostgreSQL-backed document store.
///
/// Optimistic concurrency is enforced at the row level: updates carry the
/// version that was read and only commit when it still matches.
pub struct PostgresStore {
    pool: Arc<PgPool>,
    table_name: String,
}

impl PostgresStore {
    /// Connect and create a new store.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

    /// Create with an existing connection pool.
    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            table_name: "metering_documents".to_string(),
        }
    }

    /// Set custom table name.
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                collection VARCHAR(255) NOT NULL,
                doc_key VARCHAR(255) NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (collection, doc_key)
            );
            CREATE INDEX IF NOT EXISTS idx_{}_collection ON {} (collection);
            "#,
            self.table_name, self.table_name, self.table_name
        );
        sqlx::query(&query).execute(&*self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get(&self, collection: &str, key: &str) -> StoreResult<Option<VersionedDoc>> {
        let query = format!(
            "SELECT version, data FROM {} WHERE collection = $1 AND doc_key = $2",
            self.table_name
        );

        let row = sqlx::query(&query)
            .bind(collection)
            .bind(key)
            .fetch_optional(&*self.pool)
            .await
            .backend_err_ctx("get")?;

        Ok(row.map(|row| VersionedDoc {
            version: row.get::<i64, _>("version") as u64,
            data: row.get::<Value, _>("data"),
        }))
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        data: Value,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        match expected {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO {} (collection, doc_key, version, data)
                    VALUES ($1, $2, 1, $3)
                    ON CONFLICT (collection, doc_key) DO NOTHING
                    "#,
                    self.table_name
                );
                let result = sqlx::query(&query)
                    .bind(collection)
                    .bind(key)
                    .bind(&data)
                    .execute(&*self.pool)
                    .await
                    .backend_err_ctx("insert")?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict {
                        key: format!("{}/{}", collection, key),
                    });
                }
                Ok(1)
            }
            Some(version) => {
                let query = format!(
                    r#"
                    UPDATE {} SET data = $4, version = version + 1, updated_at = NOW()
                    WHERE collection = $1 AND doc_key = $2 AND version = $3
                    "#,
                    self.table_name
                );
                let result = sqlx::query(&query)
                    .bind(collection)
                    .bind(key)
                    .bind(version as i64)
                    .bind(&data)
                    .execute(&*self.pool)
                    .await
                    .backend_err_ctx("update")?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict {
                        key: format!("{}/{}", collection, key),
                    });
                }
                Ok(version + 1)
            }
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        let query = format!(
            "DELETE FROM {} WHERE collection = $1 AND doc_key = $2",
            self.table_name
        );
        let result = sqlx::query(&query)
            .bind(collection)
            .bind(key)
            .execute(&*self.pool)
            .await
            .backend_err_ctx("delete")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, collection: &str) -> StoreResult<Vec<String>> {
        let query = format!(
            "SELECT doc_key FROM {} WHERE collection = $1",
            self.table_name
        );
        let rows = sqlx::query(&query)
            .bind(collection)
            .fetch_all(&*self.pool)
            .await
            .backend_err_ctx("list_keys")?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("doc_key"))
            .collect())
    }
}
