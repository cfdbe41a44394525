//! Durable store adapter over a shared Postgres database.
//!
//! All nodes point at the same logical database, so a committed write is
//! cluster-durable no matter which node acted as owner. The table:
//!
//! ```sql
//! CREATE TABLE kv_store (
//!     key        TEXT PRIMARY KEY,
//!     value      BYTEA NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! )
//! ```

use async_trait::async_trait;
use cachemesh_kv::durable::{DurableError, DurableStore};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

const UPSERT: &str = "INSERT INTO kv_store (key, value) VALUES ($1, $2) \
                      ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value";
const DELETE: &str = "DELETE FROM kv_store WHERE key = $1";
const SELECT: &str = "SELECT value FROM kv_store WHERE key = $1";
const CREATE: &str = "CREATE TABLE IF NOT EXISTS kv_store (\
                        key TEXT PRIMARY KEY, \
                        value BYTEA NOT NULL, \
                        created_at TIMESTAMPTZ NOT NULL DEFAULT now())";

/// Write-through store over `sqlx::PgPool`. Connections are pooled and
/// re-established by the pool; callers bound each operation with their own
/// deadline.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database named by `url` (`POSTGRES_URL`).
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        Ok(Self { pool })
    }

    /// Create the `kv_store` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE).execute(&self.pool).await?;
        Ok(())
    }

    /// Round-trip liveness check, run at boot: an unreachable durable
    /// store is a fatal boot error.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> DurableError {
    DurableError::Backend(e.to_string())
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), DurableError> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DurableError> {
        sqlx::query(DELETE)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableError> {
        let row = sqlx::query(SELECT)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs only against a live database:
    /// `POSTGRES_URL=postgres://… cargo test -p cachemesh-bridge -- --ignored`
    #[tokio::test]
    #[ignore = "needs a live Postgres (set POSTGRES_URL)"]
    async fn test_postgres_roundtrip() {
        let url = std::env::var("POSTGRES_URL").expect("POSTGRES_URL must be set");
        let store = PostgresStore::connect(&url).await.unwrap();
        store.ensure_schema().await.unwrap();
        store.ping().await.unwrap();

        let key = "bridge-test-key";
        store.put(key, b"v1").await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), Some(b"v1".to_vec()));

        // Upsert replaces in place.
        store.put(key, b"v2").await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), Some(b"v2".to_vec()));

        store.delete(key).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), None);

        // Deleting an absent row is not an error.
        store.delete(key).await.unwrap();
    }
}
