//! Stable-list cache: which files were shown inline last turn, plus per-file
//! size/mtime fingerprints.
//!
//! Provider prompt caches are prefix-keyed, so files already placed in the
//! inline channel must stay there (in the same order) across the turns of a
//! session. The fingerprints decide which overflow files need a re-upload.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::base::SqliteCache;
use crate::error::Result;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS stable_list (
    session_id  TEXT PRIMARY KEY,
    paths       TEXT NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stable_list_updated ON stable_list(updated_at);
CREATE TABLE IF NOT EXISTS sent_files (
    session_id  TEXT NOT NULL,
    path        TEXT NOT NULL,
    size        INTEGER NOT NULL,
    mtime_ns    INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (session_id, path)
);
CREATE INDEX IF NOT EXISTS idx_sent_files_updated ON sent_files(updated_at);";

const TABLES: &[&str] = &["stable_list", "sent_files"];

/// Recorded fingerprint of a file at the time it was last sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFileInfo {
    pub size: u64,
    pub mtime_ns: i64,
}

pub struct StableListCache {
    db: SqliteCache,
}

impl StableListCache {
    pub fn open(db_path: &Path, ttl_secs: u64, purge_probability: f64) -> Result<Self> {
        Ok(Self {
            db: SqliteCache::open(db_path, ttl_secs, purge_probability, SCHEMA)?,
        })
    }

    /// The ordered inline file list from the previous turn, or `None`.
    pub async fn get_stable_list(&self, session_id: &str) -> Result<Option<Vec<PathBuf>>> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let cutoff = self.db.ttl_cutoff();
        let raw: Option<String> = self
            .db
            .with_conn(move |conn| {
                match conn.query_row(
                    "SELECT paths FROM stable_list WHERE session_id = ?1 AND updated_at >= ?2",
                    rusqlite::params![sid, cutoff],
                    |row| row.get(0),
                ) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
        match raw {
            None => Ok(None),
            Some(json) => {
                let paths: Vec<String> = serde_json::from_str(&json)?;
                Ok(Some(paths.into_iter().map(PathBuf::from).collect()))
            }
        }
    }

    /// Replace the session's stable list with `paths` (ordered).
    pub async fn save_stable_list(&self, session_id: &str, paths: &[PathBuf]) -> Result<()> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let json = serde_json::to_string(
            &paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        )?;
        let now = SqliteCache::now();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO stable_list (session_id, paths, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(session_id) DO UPDATE SET paths = ?2, updated_at = ?3",
                    rusqlite::params![sid, json, now],
                )
                .map(|_| ())
            })
            .await?;
        self.db.maybe_purge(TABLES).await;
        Ok(())
    }

    /// The fingerprint recorded when `path` was last sent for this session.
    pub async fn get_sent_file_info(
        &self,
        session_id: &str,
        path: &Path,
    ) -> Result<Option<SentFileInfo>> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let p = path.to_string_lossy().into_owned();
        let cutoff = self.db.ttl_cutoff();
        self.db
            .with_conn(move |conn| {
                match conn.query_row(
                    "SELECT size, mtime_ns FROM sent_files
                     WHERE session_id = ?1 AND path = ?2 AND updated_at >= ?3",
                    rusqlite::params![sid, p, cutoff],
                    |row| {
                        Ok(SentFileInfo {
                            size: row.get::<_, i64>(0)? as u64,
                            mtime_ns: row.get(1)?,
                        })
                    },
                ) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Record (or replace) the fingerprint for one file.
    pub async fn update_sent_file_info(
        &self,
        session_id: &str,
        path: &Path,
        size: u64,
        mtime_ns: i64,
    ) -> Result<()> {
        self.batch_update_sent_files(session_id, &[(path.to_path_buf(), size, mtime_ns)])
            .await
    }

    /// Record fingerprints for many files in one transaction.
    pub async fn batch_update_sent_files(
        &self,
        session_id: &str,
        files: &[(PathBuf, u64, i64)],
    ) -> Result<()> {
        SqliteCache::validate_session_id(session_id)?;
        if files.is_empty() {
            return Ok(());
        }
        let sid = session_id.to_string();
        let rows: Vec<(String, i64, i64)> = files
            .iter()
            .map(|(p, size, mtime)| (p.to_string_lossy().into_owned(), *size as i64, *mtime))
            .collect();
        let now = SqliteCache::now();
        self.db
            .with_conn(move |conn| {
                for (path, size, mtime_ns) in &rows {
                    conn.execute(
                        "INSERT INTO sent_files (session_id, path, size, mtime_ns, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(session_id, path)
                         DO UPDATE SET size = ?3, mtime_ns = ?4, updated_at = ?5",
                        rusqlite::params![sid, path, size, mtime_ns, now],
                    )?;
                }
                Ok(())
            })
            .await?;
        self.db.maybe_purge(TABLES).await;
        Ok(())
    }

    /// Whether `path` differs from the fingerprint recorded at last send.
    ///
    /// Unknown files, unreadable files, and any size or mtime_ns mismatch all
    /// count as "changed".
    pub async fn file_changed_since_last_send(
        &self,
        session_id: &str,
        path: &Path,
    ) -> Result<bool> {
        let recorded = match self.get_sent_file_info(session_id, path).await? {
            Some(info) => info,
            None => return Ok(true),
        };
        match current_fingerprint(path) {
            Some((size, mtime_ns)) => {
                Ok(size != recorded.size || mtime_ns != recorded.mtime_ns)
            }
            None => {
                warn!(path = %path.display(), "cannot stat file, treating as changed");
                Ok(true)
            }
        }
    }

    /// Drop all stable-list and fingerprint state for a session.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM stable_list WHERE session_id = ?1",
                    rusqlite::params![sid],
                )?;
                conn.execute(
                    "DELETE FROM sent_files WHERE session_id = ?1",
                    rusqlite::params![sid],
                )?;
                Ok(())
            })
            .await
    }

    pub fn close(&self) {
        self.db.close();
    }
}

/// Current `(size, mtime_ns)` of a file, or `None` if it cannot be stat'ed.
pub fn current_fingerprint(path: &Path) -> Option<(u64, i64)> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime_ns = meta
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_nanos() as i64;
    Some((meta.len(), mtime_ns))
}
