//! Ordered key-value engine backed by a single SQLite database.
//!
//! Keys are UTF-8 strings ordered lexicographically (SQLite's default BINARY
//! collation on TEXT), so range scans starting at a key walk entries in key
//! order. The on-disk layout (one directory holding the database and its
//! WAL) is not a stable external format.

use crate::error::{Result, StorageError};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

pub struct KvStore {
    conn: Mutex<Connection>,
}

impl KvStore {
    /// Opens (or creates) the store inside `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StorageError::Other(format!("create data dir: {e}")))?;
        let conn = Connection::open(dir.join("vigil.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value BLOB NOT NULL) WITHOUT ROWID",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        match stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0)) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
        Ok(stmt.execute(params![key])? > 0)
    }

    /// Visits every entry with `key >= from`, in key order, until the
    /// visitor returns `false` or the keyspace is exhausted.
    ///
    /// The statement is evaluated lazily, so stopping early does not pay for
    /// the rest of the table.
    pub fn scan_from<F>(&self, from: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<bool>,
    {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
        let mut rows = stmt.query(params![from])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }

    /// Visits every entry whose key starts with `prefix`, in key order.
    pub fn scan_prefix<F>(&self, prefix: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<bool>,
    {
        self.scan_from(prefix, |key, value| {
            if !key.starts_with(prefix) {
                return Ok(false);
            }
            visit(key, value)
        })
    }

    /// Applies a set of writes atomically. Readers never observe a partial
    /// batch.
    pub fn transaction<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&mut WriteBatch<'_>) -> Result<()>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut batch = WriteBatch { tx: &tx };
            build(&mut batch)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Flushes and closes the underlying database.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().unwrap();
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}

/// Write handle scoped to one transaction.
pub struct WriteBatch<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl WriteBatch<'_> {
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let mut stmt = self
            .tx
            .prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        let mut stmt = self.tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
        stmt.execute(params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, KvStore) {
        let dir = TempDir::new().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        (dir, kv)
    }

    #[test]
    fn put_get_delete() {
        let (_dir, kv) = open();
        kv.put("a", b"1").unwrap();
        assert_eq!(kv.get("a").unwrap(), Some(b"1".to_vec()));
        assert!(kv.delete("a").unwrap());
        assert_eq!(kv.get("a").unwrap(), None);
        assert!(!kv.delete("a").unwrap());
    }

    #[test]
    fn scan_prefix_walks_in_key_order() {
        let (_dir, kv) = open();
        for key in ["m:b:2", "m:a:1", "m:a:3", "m:a:2", "n:x"] {
            kv.put(key, key.as_bytes()).unwrap();
        }

        let mut seen = Vec::new();
        kv.scan_prefix("m:a:", |key, _| {
            seen.push(key.to_string());
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, vec!["m:a:1", "m:a:2", "m:a:3"]);
    }

    #[test]
    fn scan_stops_when_visitor_returns_false() {
        let (_dir, kv) = open();
        for i in 0..10 {
            kv.put(&format!("k:{i}"), b"v").unwrap();
        }
        let mut count = 0;
        kv.scan_prefix("k:", |_, _| {
            count += 1;
            Ok(count < 3)
        })
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn transaction_is_atomic() {
        let (_dir, kv) = open();
        kv.transaction(|batch| {
            batch.put("a", b"1")?;
            batch.put("b", b"2")?;
            Ok(())
        })
        .unwrap();
        assert!(kv.get("a").unwrap().is_some());
        assert!(kv.get("b").unwrap().is_some());

        // A failing build closure rolls the whole batch back.
        let result = kv.transaction(|batch| {
            batch.put("c", b"3")?;
            Err(StorageError::Other("boom".into()))
        });
        assert!(result.is_err());
        assert!(kv.get("c").unwrap().is_none());
    }
}
