use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{PostdeckError, Result};

/// Synchronous, origin-scoped string store underneath the cache.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// In-process store with an optional entry cap, mirroring browser quota
/// behaviour.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries();
        if let Some(capacity) = self.capacity {
            if !entries.contains_key(key) && entries.len() >= capacity {
                return Err(PostdeckError::StorageFull(format!(
                    "{} entries already stored",
                    entries.len()
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// File-backed store for the CLI, kept apart from the document database.
pub struct SqliteKv {
    conn: Mutex<Connection>,
    capacity: Option<usize>,
}

impl SqliteKv {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/cache/001-initial/up.sql"
        ))]);
        migrations
            .to_latest(&mut conn)
            .map_err(|e| PostdeckError::Other(format!("cache migration failed: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
            capacity: None,
        })
    }

    /// Refuse new keys once `capacity` entries are stored.
    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PostdeckError::Other(format!("cache connection poisoned: {}", e)))
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        if let Some(capacity) = self.capacity {
            let (stored, present): (i64, bool) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(key = ?1), 0) > 0 FROM kv",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if !present && stored as usize >= capacity {
                return Err(PostdeckError::StorageFull(format!(
                    "{} entries already stored",
                    stored
                )));
            }
        }
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.set("a", "3").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("3"));
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_kv_basics() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn test_sqlite_kv_basics() {
        exercise(&SqliteKv::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_kv_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteKv::new(&path).unwrap();
            store.set("blog_user", "{}").unwrap();
        }
        let reopened = SqliteKv::new(&path).unwrap();
        assert_eq!(reopened.get("blog_user").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_sqlite_kv_capacity() {
        let store = SqliteKv::in_memory().unwrap().with_capacity(Some(1));
        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert!(matches!(
            store.set("b", "1"),
            Err(PostdeckError::StorageFull(_))
        ));
        store.remove("a").unwrap();
        store.set("b", "1").unwrap();
    }

    #[test]
    fn test_memory_kv_capacity() {
        let store = MemoryKv::with_capacity(1);
        store.set("a", "1").unwrap();
        // Overwriting an existing key never exceeds the cap
        store.set("a", "2").unwrap();
        assert!(matches!(
            store.set("b", "1"),
            Err(PostdeckError::StorageFull(_))
        ));
    }
}
