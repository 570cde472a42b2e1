use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::orchestrator::db::PgPool;

/// Durable key/value storage for run contexts and node task records.
///
/// Every operation is atomic per key. Keys are opaque strings; callers scope
/// them per operation class so that different classes never share a key.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Deletes every listed key. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-process store, used by tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Store backed by the `task_store` table
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO task_store (key, value, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (key)
                DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
                "#,
                &[&key, &value],
            )
            .await?;
        log::debug!("Stored {} bytes under {key}", value.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT value FROM task_store WHERE key = $1", &[&key])
            .await?;
        Ok(row.map(|row| row.get::<_, Vec<u8>>(0)))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM task_store WHERE key = ANY($1)", &[&keys])
            .await?;
        log::debug!("Deleted {deleted} of {} keys", keys.len());
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT key FROM task_store WHERE starts_with(key, $1) ORDER BY key",
                &[&prefix],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}
