//! Key-value persistence for identities
//!
//! The store is a flat string-to-string map. Identities are written as one
//! batch so a crash cannot leave a half-initialized scope behind.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use redb::{Database, TableDefinition, TableError};

use crate::{Result, errors::GnapError};

const IDENTITY_TABLE: TableDefinition<&str, &str> = TableDefinition::new("identity");

/// Persistence engine holding scope-qualified identity fields
pub trait KeyValueStore: Send + Sync {
    /// Read one value
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] if the read fails.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write all entries atomically
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] if the write fails; no entry is
    /// visible afterwards in that case.
    fn put_all(&self, entries: &[(String, String)]) -> Result<()>;
}

/// Embedded `redb` database file
///
/// The file is held open for the lifetime of this value and released when it
/// is dropped, so callers scope the store to the load or persist they need.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open the database at `path`, creating it and its parent directories
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] if the directory cannot be created
    /// or the file cannot be opened (for example while another process holds it).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                GnapError::persistence(format!(
                    "Failed to create cache directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let db = Database::create(path).map_err(|e| {
            GnapError::persistence(format!(
                "Failed to open key-value store {}: {e}",
                path.display()
            ))
        })?;

        tracing::debug!(path = %path.display(), "Opened key-value store");

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Location of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read().map_err(GnapError::persistence)?;
        let table = match txn.open_table(IDENTITY_TABLE) {
            Ok(table) => table,
            // Nothing has ever been written
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(GnapError::persistence(e)),
        };

        let value = table.get(key).map_err(GnapError::persistence)?;
        Ok(value.map(|guard| guard.value().to_string()))
    }

    fn put_all(&self, entries: &[(String, String)]) -> Result<()> {
        let txn = self.db.begin_write().map_err(GnapError::persistence)?;
        {
            let mut table = txn
                .open_table(IDENTITY_TABLE)
                .map_err(GnapError::persistence)?;
            for (key, value) in entries {
                table
                    .insert(key.as_str(), value.as_str())
                    .map_err(GnapError::persistence)?;
            }
        }
        txn.commit().map_err(GnapError::persistence)?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| GnapError::persistence("Memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put_all(&self, new_entries: &[(String, String)]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| GnapError::persistence("Memory store lock poisoned"))?;
        entries.extend(new_entries.iter().cloned());
        Ok(())
    }
}
