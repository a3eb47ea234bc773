use once_cell::sync::OnceCell;
use redb::{Database, ReadTransaction, WriteTransaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::storage::{RepositoryError, RepositoryResult};

/// Global database manager for handling shared database instances.
/// redb holds an exclusive lock on its file, so every repository opened on
/// the same path within the process must share one `Database`.
static GLOBAL_DB_MANAGER: OnceCell<DatabaseManager> = OnceCell::new();

/// Maps database file paths to their shared `Database` instances
pub struct DatabaseManager {
    databases: Mutex<HashMap<PathBuf, Arc<Database>>>,
}

impl DatabaseManager {
    fn new() -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// Get the global database manager instance
    pub fn global() -> &'static DatabaseManager {
        GLOBAL_DB_MANAGER.get_or_init(DatabaseManager::new)
    }

    /// Get or create a shared database instance for a specific path
    pub fn get_or_create_database(&self, db_path: &Path) -> RepositoryResult<Arc<Database>> {
        let db_path_buf = db_path.to_path_buf();

        let mut map = self
            .databases
            .lock()
            .map_err(|e| RepositoryError::database(format!("Failed to lock database map: {}", e)))?;

        if let Some(existing_db) = map.get(&db_path_buf) {
            tracing::debug!(
                "Reusing existing database instance for: {}",
                db_path_buf.display()
            );
            Ok(existing_db.clone())
        } else {
            let db = Self::create_database(&db_path_buf)?;
            map.insert(db_path_buf, db.clone());
            Ok(db)
        }
    }

    fn create_database(db_path: &Path) -> RepositoryResult<Arc<Database>> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!("🗄️  Opening instance database: {}", db_path.display());

        let db = Database::create(db_path)
            .map_err(|e| RepositoryError::database(format!("Failed to create database: {}", e)))?;
        Ok(Arc::new(db))
    }

    /// Drop the shared instance for a path. The file is closed once the last
    /// repository holding it goes away.
    pub fn close_database(&self, db_path: &Path) -> RepositoryResult<bool> {
        let mut map = self
            .databases
            .lock()
            .map_err(|e| RepositoryError::database(format!("Failed to lock database map: {}", e)))?;

        let removed = map.remove(db_path).is_some();
        if removed {
            tracing::info!("Closed database: {}", db_path.display());
        }
        Ok(removed)
    }
}

/// Transaction scoping helpers
pub struct DatabaseOperation;

impl DatabaseOperation {
    /// Run `operation` inside a read transaction that is released on return
    pub fn read<F, R>(db: &Database, operation: F) -> RepositoryResult<R>
    where
        F: FnOnce(&ReadTransaction) -> RepositoryResult<R>,
    {
        let read_txn = db.begin_read().map_err(|e| {
            RepositoryError::database(format!("Failed to begin read transaction: {}", e))
        })?;

        operation(&read_txn)
    }

    /// Run `operation` inside a write transaction, committing on success
    pub fn write<F, R>(db: &Database, operation: F) -> RepositoryResult<R>
    where
        F: FnOnce(&WriteTransaction) -> RepositoryResult<R>,
    {
        let write_txn = db.begin_write().map_err(|e| {
            RepositoryError::database(format!("Failed to begin write transaction: {}", e))
        })?;

        let result = operation(&write_txn)?;

        write_txn.commit().map_err(|e| {
            RepositoryError::database(format!("Failed to commit write transaction: {}", e))
        })?;

        Ok(result)
    }
}
