use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use super::ops::{self, OpStateEntry};
use crate::errors::{EmailError, EmailResult};

pub const DB_FILE_NAME: &str = "mailwake.db";

/// Durable namespaced string store. Cloning shares the underlying pool.
#[derive(Clone, Debug)]
pub struct OpStateStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl OpStateStore {
    /// Opens (creating if needed) the database file. The parent directory
    /// must already exist.
    pub async fn open(path: &Path) -> EmailResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                EmailError::Storage(format!("opening sqlite at {}: {e}", path.display()))
            })?;

        let store = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        store.migrate().await?;
        debug!(path = %path.display(), "Op-state store opened");
        Ok(store)
    }

    /// Single-connection in-memory database; contents vanish on close.
    pub async fn open_in_memory() -> EmailResult<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let store = Self { pool, path: None };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> EmailResult<()> {
        ops::ensure_op_state_table(&self.pool).await
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns an empty string when the key is absent.
    pub async fn get(&self, namespace: &str, key: &str) -> EmailResult<String> {
        ops::get_value(&self.pool, namespace, key).await
    }

    pub async fn get_entry(&self, namespace: &str, key: &str) -> EmailResult<Option<OpStateEntry>> {
        ops::get_entry(&self.pool, namespace, key).await
    }

    pub async fn set(&self, namespace: &str, key: &str, value: &str) -> EmailResult<()> {
        ops::set_value(&self.pool, namespace, key, value).await
    }

    /// Monotone write for counters such as UID watermarks: the stored value
    /// only ever grows, even when callers race. Returns whether it changed.
    pub async fn advance(&self, namespace: &str, key: &str, value: u32) -> EmailResult<bool> {
        ops::advance_value(&self.pool, namespace, key, value).await
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> EmailResult<()> {
        ops::delete_value(&self.pool, namespace, key).await
    }

    pub async fn delete_namespace(&self, namespace: &str) -> EmailResult<()> {
        ops::delete_namespace(&self.pool, namespace).await
    }

    pub async fn list(&self, namespace: &str) -> EmailResult<BTreeMap<String, String>> {
        ops::list_namespace(&self.pool, namespace).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
