//! Unified session cache.
//!
//! One table keyed `(session_id, provider)`; the three provider families are
//! typed views over it:
//!   - `responses`: last provider-issued response id (opaque string)
//!   - `gemini`: full Content history as JSON (signatures base64 on disk)
//!   - `chat`: flat OpenAI-chat message array (Grok)
//!
//! TTL and probabilistic purge come from the SQLite base; rewrites replace
//! the whole row under the cache mutex, so history is effectively
//! append-only from the caller's perspective.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use emissary_cache::SqliteCache;

use crate::convert::{content_from_json, content_to_json};
use crate::error::{Result, SessionError};
use crate::types::{ChatMessage, Content};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT NOT NULL,
    provider    TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (session_id, provider)
);
CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at);";

const TABLES: &[&str] = &["sessions"];

const PROVIDER_RESPONSES: &str = "responses";
const PROVIDER_GEMINI: &str = "gemini";
const PROVIDER_CHAT: &str = "chat";

pub struct SessionCache {
    db: SqliteCache,
}

impl SessionCache {
    pub fn open(db_path: &Path, ttl_secs: u64, purge_probability: f64) -> Result<Self> {
        Ok(Self {
            db: SqliteCache::open(db_path, ttl_secs, purge_probability, SCHEMA)?,
        })
    }

    async fn get_raw(&self, provider: &'static str, session_id: &str) -> Result<Option<String>> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let cutoff = self.db.ttl_cutoff();
        let row = self
            .db
            .with_conn(move |conn| {
                match conn.query_row(
                    "SELECT payload FROM sessions
                     WHERE session_id = ?1 AND provider = ?2 AND updated_at >= ?3",
                    rusqlite::params![sid, provider, cutoff],
                    |row| row.get::<_, String>(0),
                ) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(row)
    }

    async fn set_raw(
        &self,
        provider: &'static str,
        session_id: &str,
        payload: String,
    ) -> Result<()> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let now = SqliteCache::now();
        self.db
            .with_conn(move |conn| {
                // created_at survives the upsert; updated_at tracks last use.
                conn.execute(
                    "INSERT INTO sessions (session_id, provider, payload, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(session_id, provider)
                     DO UPDATE SET payload = ?3, updated_at = ?4",
                    rusqlite::params![sid, provider, payload, now],
                )
                .map(|_| ())
            })
            .await?;
        self.db.maybe_purge(TABLES).await;
        Ok(())
    }

    // ── Responses-API provider ───────────────────────────────────────────────

    /// The previous `response_id` for this session, if still live.
    pub async fn get_response_id(&self, session_id: &str) -> Result<Option<String>> {
        self.get_raw(PROVIDER_RESPONSES, session_id).await
    }

    pub async fn set_response_id(&self, session_id: &str, response_id: &str) -> Result<()> {
        debug!(session = %session_id, "storing response id");
        self.set_raw(PROVIDER_RESPONSES, session_id, response_id.to_string())
            .await
    }

    // ── Gemini provider ──────────────────────────────────────────────────────

    pub async fn get_gemini_history(&self, session_id: &str) -> Result<Option<Vec<Content>>> {
        let raw = match self.get_raw(PROVIDER_GEMINI, session_id).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let values: Vec<Value> = serde_json::from_str(&raw)
            .map_err(|e| SessionError::Corrupt(format!("gemini history: {e}")))?;
        let contents = values
            .iter()
            .map(content_from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(contents))
    }

    pub async fn set_gemini_history(&self, session_id: &str, history: &[Content]) -> Result<()> {
        let values: Vec<Value> = history.iter().map(content_to_json).collect();
        let payload = serde_json::to_string(&values)
            .map_err(|e| SessionError::Corrupt(format!("gemini history encode: {e}")))?;
        self.set_raw(PROVIDER_GEMINI, session_id, payload).await
    }

    // ── Grok / OpenAI-chat provider ──────────────────────────────────────────

    pub async fn get_chat_history(&self, session_id: &str) -> Result<Option<Vec<ChatMessage>>> {
        let raw = match self.get_raw(PROVIDER_CHAT, session_id).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let messages: Vec<ChatMessage> = serde_json::from_str(&raw)
            .map_err(|e| SessionError::Corrupt(format!("chat history: {e}")))?;
        Ok(Some(messages))
    }

    pub async fn set_chat_history(&self, session_id: &str, history: &[ChatMessage]) -> Result<()> {
        let payload = serde_json::to_string(history)
            .map_err(|e| SessionError::Corrupt(format!("chat history encode: {e}")))?;
        self.set_raw(PROVIDER_CHAT, session_id, payload).await
    }

    /// Drop every provider's state for a session.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        SqliteCache::validate_session_id(session_id)?;
        let sid = session_id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM sessions WHERE session_id = ?1",
                    rusqlite::params![sid],
                )
                .map(|_| ())
            })
            .await?;
        Ok(())
    }

    pub fn close(&self) {
        self.db.close();
    }
}
