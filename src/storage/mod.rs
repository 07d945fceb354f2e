// src/storage/mod.rs

//! The embedded storage engine: a transactional ordered map keyed by UTF-8
//! string, backed by `redb`. Single-key mutations are each their own write
//! transaction; `redb`'s MVCC gives the single-writer discipline I1 asks
//! for without the worker pool needing to serialize writes itself.

use crate::error::KvError;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// A handle onto the embedded engine. Cheaply cloneable: `redb::Database`
/// is internally synchronized, so the worker pool opens one `StorageEngine`
/// and hands every worker task a `.clone()` of it rather than opening the
/// path again per worker (`redb` allows only one `Database` per file).
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<Database>,
    path: PathBuf,
    max_size_bytes: u64,
}

impl StorageEngine {
    /// Opens (creating if absent) the engine at `path`.
    pub fn open(path: impl AsRef<Path>, max_size_bytes: u64) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)
            .map_err(|e| KvError::Storage(format!("failed to open database at {path:?}: {e}")))?;

        // Ensure the table exists so later read transactions don't have to
        // special-case a missing table as "corrupt".
        {
            let txn = db
                .begin_write()
                .map_err(|e| KvError::Storage(e.to_string()))?;
            {
                txn.open_table(RECORDS)
                    .map_err(|e| KvError::Storage(e.to_string()))?;
            }
            txn.commit().map_err(|e| KvError::Storage(e.to_string()))?;
        }

        Ok(Self {
            db: Arc::new(db),
            path,
            max_size_bytes,
        })
    }

    /// Writes `(key, value)`, overwriting any existing record.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        if self.max_size_bytes > 0 {
            let current_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
            if current_size >= self.max_size_bytes {
                return Err(KvError::Storage(format!(
                    "database at {:?} has reached its configured capacity ({} bytes)",
                    self.path, self.max_size_bytes
                )));
            }
        }

        let txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        {
            let mut table = txn
                .open_table(RECORDS)
                .map_err(|e| KvError::Storage(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| KvError::Storage(e.to_string()))?;
        }
        txn.commit().map_err(|e| KvError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Returns the value for `key`, or `None` if absent. A record whose
    /// bytes are not valid UTF-8 is reported as absent and logged as a
    /// corruption event, per the engine's failure policy.
    pub fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        let table = match txn.open_table(RECORDS) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(KvError::Storage(e.to_string())),
        };
        let Some(guard) = table.get(key).map_err(|e| KvError::Storage(e.to_string()))? else {
            return Ok(None);
        };
        match String::from_utf8(guard.value().to_vec()) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                error!("corrupt (non-UTF-8) value stored for key '{key}'");
                Ok(None)
            }
        }
    }

    /// Removes `key` if present. Idempotent when absent.
    pub fn delete(&self, key: &str) -> Result<(), KvError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        {
            let mut table = txn
                .open_table(RECORDS)
                .map_err(|e| KvError::Storage(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| KvError::Storage(e.to_string()))?;
        }
        txn.commit().map_err(|e| KvError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Returns every stored key, in the engine's natural (lexicographic)
    /// order.
    pub fn list_keys(&self) -> Result<Vec<String>, KvError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        let table = match txn.open_table(RECORDS) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(KvError::Storage(e.to_string())),
        };
        let mut keys = Vec::new();
        for entry in table.iter().map_err(|e| KvError::Storage(e.to_string()))? {
            let (key, _value) = entry.map_err(|e| KvError::Storage(e.to_string()))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    /// Produces a consistent, compact copy of the whole database at
    /// `backup_path`, atomically replacing any prior contents there.
    ///
    /// A read transaction pins a consistent snapshot of the engine at the
    /// moment `backup` is called; concurrent writers may continue against
    /// the live database without affecting what gets copied (P7). Every
    /// record from that snapshot is copied into a fresh `Database` built at
    /// a temporary path, which is then renamed into place — giving the
    /// same "atomically replace prior contents" contract as the embedded
    /// engine's native `copy(compact=True)`.
    pub fn backup(&self, backup_path: impl AsRef<Path>) -> Result<(), KvError> {
        let backup_path = backup_path.as_ref();
        let tmp_path = backup_path.with_extension("redb.tmp");
        if tmp_path.exists() {
            std::fs::remove_file(&tmp_path)
                .map_err(|e| KvError::Storage(format!("failed to clear stale backup tmp: {e}")))?;
        }

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KvError::Storage(e.to_string()))?;

        let backup_db = Database::create(&tmp_path).map_err(|e| {
            KvError::Storage(format!("failed to create backup database: {e}"))
        })?;
        let write_txn = backup_db
            .begin_write()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        {
            let mut dest = write_txn
                .open_table(RECORDS)
                .map_err(|e| KvError::Storage(e.to_string()))?;
            match read_txn.open_table(RECORDS) {
                Ok(source) => {
                    for entry in source.iter().map_err(|e| KvError::Storage(e.to_string()))? {
                        let (key, value) = entry.map_err(|e| KvError::Storage(e.to_string()))?;
                        dest.insert(key.value(), value.value())
                            .map_err(|e| KvError::Storage(e.to_string()))?;
                    }
                }
                Err(redb::TableError::TableDoesNotExist(_)) => {}
                Err(e) => return Err(KvError::Storage(e.to_string())),
            }
        }
        write_txn
            .commit()
            .map_err(|e| KvError::Storage(e.to_string()))?;
        drop(backup_db);

        if backup_path.exists() {
            std::fs::remove_file(backup_path).map_err(|e| {
                KvError::Storage(format!("failed to replace prior backup contents: {e}"))
            })?;
        }
        std::fs::rename(&tmp_path, backup_path)
            .map_err(|e| KvError::Storage(format!("failed to finalize backup: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_engine(dir: &tempfile::TempDir, name: &str) -> StorageEngine {
        StorageEngine::open(dir.path().join(name), 0).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "a.redb");
        engine.put("foo", b"bar").unwrap();
        assert_eq!(engine.get("foo").unwrap(), Some("bar".to_string()));
    }

    #[test]
    fn get_on_absent_key_returns_none() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "b.redb");
        assert_eq!(engine.get("missing").unwrap(), None);
    }

    #[test]
    fn empty_value_is_distinct_from_absent() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "c.redb");
        engine.put("k", b"").unwrap();
        assert_eq!(engine.get("k").unwrap(), Some(String::new()));
        assert_eq!(engine.get("nope").unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "d.redb");
        engine.put("k", b"v").unwrap();
        engine.delete("k").unwrap();
        engine.delete("k").unwrap();
        assert_eq!(engine.get("k").unwrap(), None);
    }

    #[test]
    fn list_keys_on_empty_engine_is_empty() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "e.redb");
        assert!(engine.list_keys().unwrap().is_empty());
    }

    #[test]
    fn list_keys_returns_all_written_keys() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "f.redb");
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
        let mut keys = engine.list_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn backup_produces_a_readable_snapshot() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "g.redb");
        engine.put("x", b"y").unwrap();
        let backup_path = dir.path().join("backup.redb");
        engine.backup(&backup_path).unwrap();

        let restored = StorageEngine::open(&backup_path, 0).unwrap();
        assert_eq!(restored.get("x").unwrap(), Some("y".to_string()));
    }

    #[test]
    fn backup_replaces_prior_contents() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&dir, "h.redb");
        let backup_path = dir.path().join("backup.redb");

        engine.put("first", b"1").unwrap();
        engine.backup(&backup_path).unwrap();

        engine.delete("first").unwrap();
        engine.put("second", b"2").unwrap();
        engine.backup(&backup_path).unwrap();

        let restored = StorageEngine::open(&backup_path, 0).unwrap();
        assert_eq!(restored.get("first").unwrap(), None);
        assert_eq!(restored.get("second").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn put_past_capacity_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("i.redb"), 1).unwrap();
        let err = engine.put("k", b"v").unwrap_err();
        assert!(matches!(err, KvError::Storage(_)));
    }
}
