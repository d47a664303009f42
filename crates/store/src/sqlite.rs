//! SQLite capability store.
//!
//! One row per capability in the `capabilities` table. Structured fields
//! (schema, endpoint, auth, retry policy) are stored as JSON text columns.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use toolrelay_core::capability::{CapabilityDefinition, RetryPolicy};
use toolrelay_core::error::StoreError;
use toolrelay_core::store::CapabilityStore;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Each connection to `:memory:` is its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite capability store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS capabilities (
                name             TEXT PRIMARY KEY NOT NULL,
                description      TEXT NOT NULL DEFAULT '',
                parameter_schema TEXT NOT NULL,
                endpoint         TEXT NOT NULL,
                auth             TEXT NOT NULL DEFAULT '{"type":"none"}',
                timeout_ms       INTEGER,
                retry_policy     TEXT,
                updated_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("capabilities table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert or replace a definition.
    pub async fn upsert(&self, def: &CapabilityDefinition) -> Result<(), StoreError> {
        let encode = |field: &str, value: Result<String, serde_json::Error>| {
            value.map_err(|e| StoreError::InvalidDefinition {
                name: def.name.clone(),
                reason: format!("{field}: {e}"),
            })
        };
        let schema = encode("parameter_schema", serde_json::to_string(&def.parameter_schema))?;
        let endpoint = encode("endpoint", serde_json::to_string(&def.endpoint))?;
        let auth = encode("auth", serde_json::to_string(&def.auth))?;
        let retry = def
            .retry_policy
            .as_ref()
            .map(|r| encode("retry_policy", serde_json::to_string(r)))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO capabilities
                (name, description, parameter_schema, endpoint, auth, timeout_ms, retry_policy, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                parameter_schema = excluded.parameter_schema,
                endpoint = excluded.endpoint,
                auth = excluded.auth,
                timeout_ms = excluded.timeout_ms,
                retry_policy = excluded.retry_policy,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&def.name)
        .bind(&def.description)
        .bind(&schema)
        .bind(&endpoint)
        .bind(&auth)
        .bind(def.timeout_ms.map(|t| t as i64))
        .bind(retry.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("INSERT failed: {e}")))?;

        debug!(capability = %def.name, "Stored capability");
        Ok(())
    }

    /// Delete a definition by name. Returns whether a row was removed.
    pub async fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM capabilities WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    fn row_to_definition(row: &sqlx::sqlite::SqliteRow) -> Result<CapabilityDefinition, StoreError> {
        let column = |name: &str| StoreError::Unavailable(format!("{name} column"));

        let name: String = row.try_get("name").map_err(|_| column("name"))?;
        let invalid = |field: &str, e: serde_json::Error| StoreError::InvalidDefinition {
            name: name.clone(),
            reason: format!("{field}: {e}"),
        };

        let description: String = row.try_get("description").map_err(|_| column("description"))?;
        let schema_json: String = row
            .try_get("parameter_schema")
            .map_err(|_| column("parameter_schema"))?;
        let endpoint_json: String = row.try_get("endpoint").map_err(|_| column("endpoint"))?;
        let auth_json: String = row.try_get("auth").map_err(|_| column("auth"))?;
        let timeout_ms: Option<i64> = row.try_get("timeout_ms").map_err(|_| column("timeout_ms"))?;
        let retry_json: Option<String> = row
            .try_get("retry_policy")
            .map_err(|_| column("retry_policy"))?;

        let parameter_schema =
            serde_json::from_str(&schema_json).map_err(|e| invalid("parameter_schema", e))?;
        let endpoint = serde_json::from_str(&endpoint_json).map_err(|e| invalid("endpoint", e))?;
        let auth = serde_json::from_str(&auth_json).map_err(|e| invalid("auth", e))?;
        let retry_policy = retry_json
            .map(|r| serde_json::from_str::<RetryPolicy>(&r))
            .transpose()
            .map_err(|e| invalid("retry_policy", e))?;

        Ok(CapabilityDefinition {
            name,
            description,
            parameter_schema,
            endpoint,
            auth,
            timeout_ms: timeout_ms.and_then(|t| u64::try_from(t).ok()),
            retry_policy,
        })
    }
}

#[async_trait]
impl CapabilityStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_all(&self) -> Result<Vec<CapabilityDefinition>, StoreError> {
        let rows = sqlx::query("SELECT * FROM capabilities ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("SELECT failed: {e}")))?;

        rows.iter().map(Self::row_to_definition).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
