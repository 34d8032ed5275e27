//! Maps emissary session ids to CLI-native session identifiers.
//!
//! Different CLI agents use different session concepts (Claude and Gemini
//! emit a `session_id`, Codex a `thread_id`), so the live-follow tool needs a
//! persistent mapping from our session id to theirs. A `__PENDING__` marker
//! records a CLI run that has started but not yet reported its native id.

use std::path::Path;

use emissary_cache::SqliteCache;

use crate::error::Result;

/// Session mappings live for 6 months.
const MAPPING_TTL_SECS: u64 = 86_400 * 180;

/// Placeholder stored while a CLI run has not yet reported its native id.
pub const PENDING_MARKER: &str = "__PENDING__";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cli_session_mappings (
    project         TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    cli_name        TEXT NOT NULL,
    cli_session_id  TEXT NOT NULL,
    updated_at      INTEGER NOT NULL,
    PRIMARY KEY (project, session_id, cli_name)
);
CREATE INDEX IF NOT EXISTS idx_cli_session_mappings_updated
    ON cli_session_mappings(updated_at);";

const TABLES: &[&str] = &["cli_session_mappings"];

pub struct CliSessionBridge {
    db: SqliteCache,
}

impl CliSessionBridge {
    pub fn open(db_path: &Path, purge_probability: f64) -> Result<Self> {
        Ok(Self {
            db: SqliteCache::open(db_path, MAPPING_TTL_SECS, purge_probability, SCHEMA)?,
        })
    }

    /// Record (or replace) the CLI-native id for a session.
    pub async fn store_cli_session_id(
        &self,
        project: &str,
        session_id: &str,
        cli_name: &str,
        cli_session_id: &str,
    ) -> Result<()> {
        SqliteCache::validate_session_id(session_id)?;
        let (project, sid, cli, native) = (
            project.to_string(),
            session_id.to_string(),
            cli_name.to_string(),
            cli_session_id.to_string(),
        );
        let now = SqliteCache::now();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO cli_session_mappings
                         (project, session_id, cli_name, cli_session_id, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (project, session_id, cli_name)
                     DO UPDATE SET cli_session_id = ?4, updated_at = ?5",
                    rusqlite::params![project, sid, cli, native, now],
                )
                .map(|_| ())
            })
            .await?;
        self.db.maybe_purge(TABLES).await;
        Ok(())
    }

    /// Mark a session as started but not yet identified by its CLI.
    pub async fn mark_pending(
        &self,
        project: &str,
        session_id: &str,
        cli_name: &str,
    ) -> Result<()> {
        self.store_cli_session_id(project, session_id, cli_name, PENDING_MARKER)
            .await
    }

    /// The CLI-native id for a session, if known and not pending.
    pub async fn get_cli_session_id(
        &self,
        project: &str,
        session_id: &str,
        cli_name: &str,
    ) -> Result<Option<String>> {
        SqliteCache::validate_session_id(session_id)?;
        let (project, sid, cli) = (
            project.to_string(),
            session_id.to_string(),
            cli_name.to_string(),
        );
        let cutoff = self.db.ttl_cutoff();
        let row = self
            .db
            .with_conn(move |conn| {
                match conn.query_row(
                    "SELECT cli_session_id FROM cli_session_mappings
                     WHERE project = ?1 AND session_id = ?2 AND cli_name = ?3
                       AND updated_at >= ?4",
                    rusqlite::params![project, sid, cli, cutoff],
                    |row| row.get::<_, String>(0),
                ) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(row.filter(|v| v != PENDING_MARKER))
    }

    /// Which CLI (if any) owns this session, regardless of pending state.
    pub async fn get_cli_name(&self, project: &str, session_id: &str) -> Result<Option<String>> {
        SqliteCache::validate_session_id(session_id)?;
        let (project, sid) = (project.to_string(), session_id.to_string());
        let cutoff = self.db.ttl_cutoff();
        self.db
            .with_conn(move |conn| {
                match conn.query_row(
                    "SELECT cli_name FROM cli_session_mappings
                     WHERE project = ?1 AND session_id = ?2 AND updated_at >= ?3
                     ORDER BY updated_at DESC LIMIT 1",
                    rusqlite::params![project, sid, cutoff],
                    |row| row.get::<_, String>(0),
                ) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(Into::into)
    }

    /// The CLI name of a pending session, or `None` when nothing is pending.
    pub async fn pending_cli(&self, project: &str, session_id: &str) -> Result<Option<String>> {
        SqliteCache::validate_session_id(session_id)?;
        let (project, sid) = (project.to_string(), session_id.to_string());
        let cutoff = self.db.ttl_cutoff();
        self.db
            .with_conn(move |conn| {
                match conn.query_row(
                    "SELECT cli_name FROM cli_session_mappings
                     WHERE project = ?1 AND session_id = ?2 AND cli_session_id = ?3
                       AND updated_at >= ?4",
                    rusqlite::params![project, sid, PENDING_MARKER, cutoff],
                    |row| row.get::<_, String>(0),
                ) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(Into::into)
    }

    pub fn close(&self) {
        self.db.close();
    }
}
