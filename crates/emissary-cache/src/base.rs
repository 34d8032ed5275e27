//! Shared SQLite plumbing for every keyed cache.
//!
//! One connection per cache instance, serialized by a mutex, with every
//! statement dispatched through the bounded blocking pool so the event loop
//! is never blocked on SQLite. Expired rows are purged probabilistically on
//! writes rather than on a timer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use emissary_core::blocking::run_blocking;

use crate::error::{CacheError, Result};

/// Maximum accepted session id length in bytes.
pub const MAX_SESSION_ID_LEN: usize = 1024;

/// Base for SQLite-backed caches: WAL journal, shared pragmas, TTL,
/// probabilistic purge, idempotent close.
pub struct SqliteCache {
    conn: Arc<Mutex<Option<Connection>>>,
    db_path: PathBuf,
    ttl_secs: i64,
    purge_probability: f64,
}

impl SqliteCache {
    /// Open (or create) the database and apply `schema_sql`.
    ///
    /// Safe to call on every startup — schemas use `IF NOT EXISTS` throughout.
    pub fn open(
        db_path: &Path,
        ttl_secs: u64,
        purge_probability: f64,
        schema_sql: &str,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Database(rusqlite::Error::InvalidPath(
                        PathBuf::from(format!("{}: {e}", parent.display())),
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(schema_sql)?;

        info!(path = %db_path.display(), ttl_secs, "sqlite cache opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            db_path: db_path.to_path_buf(),
            ttl_secs: ttl_secs as i64,
            purge_probability,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            let c = guard.as_ref().ok_or(CacheError::Closed)?;
            f(c).map_err(CacheError::Database)
        })
        .await
    }

    /// Unix seconds now.
    pub fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Earliest `updated_at` still considered live.
    pub fn ttl_cutoff(&self) -> i64 {
        Self::now() - self.ttl_secs
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// With probability `purge_probability`, delete expired rows from `tables`.
    pub async fn maybe_purge(&self, tables: &'static [&'static str]) {
        if rand::random::<f64>() >= self.purge_probability {
            return;
        }
        let cutoff = self.ttl_cutoff();
        let result = self
            .with_conn(move |conn| {
                let mut total = 0usize;
                for table in tables {
                    total += conn.execute(
                        &format!("DELETE FROM {table} WHERE updated_at < ?1"),
                        rusqlite::params![cutoff],
                    )?;
                }
                Ok(total)
            })
            .await;
        match result {
            Ok(n) => debug!(rows = n, "probabilistic cache purge"),
            Err(e) => warn!(error = %e, "probabilistic cache purge failed"),
        }
    }

    /// Reject session ids over the 1024-byte cap.
    pub fn validate_session_id(session_id: &str) -> Result<()> {
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(CacheError::SessionIdTooLong {
                len: session_id.len(),
            });
        }
        Ok(())
    }

    /// Close the connection. Idempotent and safe from multiple threads.
    pub fn close(&self) {
        let mut guard = self.conn.lock().unwrap();
        if guard.take().is_some() {
            info!(path = %self.db_path.display(), "sqlite cache closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
        k TEXT PRIMARY KEY,
        v TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );";

    fn scratch() -> (tempfile::TempDir, SqliteCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::open(&dir.path().join("t.sqlite3"), 3600, 0.01, SCHEMA).unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn with_conn_round_trips() {
        let (_dir, cache) = scratch();
        cache
            .with_conn(|c| {
                c.execute(
                    "INSERT INTO kv (k, v, updated_at) VALUES ('a', 'b', 1)",
                    [],
                )
                .map(|_| ())
            })
            .await
            .unwrap();
        let v: String = cache
            .with_conn(|c| c.query_row("SELECT v FROM kv WHERE k = 'a'", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(v, "b");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_use() {
        let (_dir, cache) = scratch();
        cache.close();
        cache.close();
        let err = cache.with_conn(|c| c.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)));
        assert!(matches!(err.await, Err(CacheError::Closed)));
    }

    #[test]
    fn session_id_cap() {
        assert!(SqliteCache::validate_session_id("short").is_ok());
        let long = "x".repeat(1025);
        assert!(matches!(
            SqliteCache::validate_session_id(&long),
            Err(CacheError::SessionIdTooLong { len: 1025 })
        ));
    }
}
