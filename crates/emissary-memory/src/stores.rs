//! Project memory stores.
//!
//! Rolling provider vector stores, one active per type at any time. When the
//! active store's document count reaches the rollover limit a fresh store
//! named `project-{type}s-{NNN:03}` is created, registered protected with the
//! loiter killer, and made active. Old stores stay queryable forever.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use emissary_core::blocking::run_blocking;
use emissary_stores::{LoiterKillerClient, VectorStoreClient};

use crate::db::init_db;
use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    Conversation,
    Commit,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Conversation => "conversation",
            StoreType::Commit => "commit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(StoreType::Conversation),
            "commit" => Some(StoreType::Commit),
            _ => None,
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct MemoryStores {
    db: Arc<Mutex<Connection>>,
    client: Option<Arc<VectorStoreClient>>,
    loiter: Arc<LoiterKillerClient>,
    mock: bool,
    rollover_limit: u32,
}

impl MemoryStores {
    pub fn open(
        db_path: &Path,
        client: Option<Arc<VectorStoreClient>>,
        loiter: Arc<LoiterKillerClient>,
        mock: bool,
        rollover_limit: u32,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        init_db(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            client,
            loiter,
            mock,
            rollover_limit,
        })
    }

    /// The active conversation store, rolling over or recreating as needed.
    pub async fn active_conversation_store(&self) -> Result<String> {
        self.active_store(StoreType::Conversation).await
    }

    /// The active commit store, rolling over or recreating as needed.
    pub async fn active_commit_store(&self) -> Result<String> {
        self.active_store(StoreType::Commit).await
    }

    pub async fn active_store(&self, store_type: StoreType) -> Result<String> {
        let current = self.read_active(store_type).await?;

        if let Some((store_id, doc_count)) = current {
            if doc_count < self.rollover_limit as i64 {
                // Below the threshold: verify it still exists provider-side,
                // rotate transparently when the provider 404s.
                if self.verify_store(&store_id).await {
                    self.register_protected(store_type, &store_id).await;
                    return Ok(store_id);
                }
                warn!(store = %store_id, "active store missing at provider, rotating");
                self.deactivate(store_type).await?;
            }
            // At/over threshold, or verification failed: roll over below.
        }

        self.create_store(store_type).await
    }

    /// Append a document to the active store of `store_type` and bump its
    /// doc count. The next `active_store` call performs any needed rollover.
    pub async fn record_document(
        &self,
        store_type: StoreType,
        title: &str,
        content: &str,
    ) -> Result<()> {
        let store_id = self.active_store(store_type).await?;

        if !self.mock {
            let client = self.require_client()?;
            let file_name = format!("{}-{}.md", title, Uuid::new_v4().simple());
            let file_id = client.upload_text(&file_name, content).await?;
            client.attach_file(&store_id, &file_id).await?;
        }

        let db = Arc::clone(&self.db);
        let sid = store_id.clone();
        run_blocking(move || {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE stores SET doc_count = doc_count + 1 WHERE store_id = ?1",
                rusqlite::params![sid],
            )
        })
        .await?;
        Ok(())
    }

    /// Store ids for the given types, newest first. Old inactive stores are
    /// included — they remain queryable.
    pub async fn store_ids_by_type(&self, types: &[StoreType]) -> Result<Vec<String>> {
        let wanted: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        let db = Arc::clone(&self.db);
        let ids = run_blocking(move || -> rusqlite::Result<Vec<String>> {
            let conn = db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT store_id, store_type FROM stores ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            Ok(rows
                .filter_map(|r| r.ok())
                .filter(|(_, ty)| wanted.iter().any(|w| w == ty))
                .map(|(id, _)| id)
                .collect())
        })
        .await?;
        Ok(ids)
    }

    /// The active row for a type, if any: `(store_id, doc_count)`.
    async fn read_active(&self, store_type: StoreType) -> Result<Option<(String, i64)>> {
        let db = Arc::clone(&self.db);
        let ty = store_type.as_str();
        let row = run_blocking(move || -> rusqlite::Result<Option<(String, i64)>> {
            let conn = db.lock().unwrap();
            match conn.query_row(
                "SELECT store_id, doc_count FROM stores
                 WHERE store_type = ?1 AND is_active = 1
                 ORDER BY created_at DESC LIMIT 1",
                rusqlite::params![ty],
                |row| Ok((row.get(0)?, row.get(1)?)),
            ) {
                Ok(v) => Ok(Some(v)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;
        Ok(row)
    }

    async fn verify_store(&self, store_id: &str) -> bool {
        if self.mock {
            return true;
        }
        let Some(client) = self.client.as_deref() else {
            return true;
        };
        match client.store_exists(store_id).await {
            Ok(exists) => exists,
            Err(e) => {
                // Transient verification failures must not rotate the store.
                warn!(store = %store_id, error = %e, "store verification failed, assuming alive");
                true
            }
        }
    }

    async fn register_protected(&self, store_type: StoreType, store_id: &str) {
        let session_id = format!("project-memory-{store_type}");
        self.loiter
            .register_existing_store(&session_id, store_id, true)
            .await;
    }

    async fn deactivate(&self, store_type: StoreType) -> Result<()> {
        let db = Arc::clone(&self.db);
        let ty = store_type.as_str();
        run_blocking(move || {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE stores SET is_active = 0 WHERE store_type = ?1",
                rusqlite::params![ty],
            )
        })
        .await?;
        Ok(())
    }

    /// Create the next store in sequence and make it the active one.
    async fn create_store(&self, store_type: StoreType) -> Result<String> {
        let db = Arc::clone(&self.db);
        let ty = store_type.as_str();
        let count: i64 = run_blocking(move || {
            let conn = db.lock().unwrap();
            conn.query_row(
                "SELECT COUNT(*) FROM stores WHERE store_type = ?1",
                rusqlite::params![ty],
                |row| row.get(0),
            )
        })
        .await?;

        let name = format!("project-{}s-{:03}", store_type, count + 1);
        let store_id = if self.mock {
            format!("vs_mock_{name}")
        } else {
            self.require_client()?.create_store(&name).await?
        };

        self.register_protected(store_type, &store_id).await;

        let db = Arc::clone(&self.db);
        let sid = store_id.clone();
        let now = Utc::now().to_rfc3339();
        run_blocking(move || -> rusqlite::Result<()> {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE stores SET is_active = 0 WHERE store_type = ?1",
                rusqlite::params![ty],
            )?;
            conn.execute(
                "INSERT INTO stores (store_id, store_type, doc_count, created_at, is_active)
                 VALUES (?1, ?2, 0, ?3, 1)",
                rusqlite::params![sid, ty, now],
            )?;
            Ok(())
        })
        .await?;

        info!(store = %store_id, name = %name, "created memory store");
        Ok(store_id)
    }

    fn require_client(&self) -> Result<&Arc<VectorStoreClient>> {
        self.client.as_ref().ok_or_else(|| {
            MemoryError::Store(emissary_stores::StoreError::Unavailable(
                "no provider API key configured".into(),
            ))
        })
    }

    /// Row snapshot for tests and the `list_models`-style introspection.
    pub async fn rows(&self) -> Result<Vec<(String, String, i64, bool)>> {
        let db = Arc::clone(&self.db);
        let rows = run_blocking(move || -> rusqlite::Result<Vec<(String, String, i64, bool)>> {
            let conn = db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT store_id, store_type, doc_count, is_active FROM stores
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get::<_, i64>(3)? != 0,
                ))
            })?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await?;
        Ok(rows)
    }
}

/// Render a completed conversation as a memory document.
pub fn format_conversation_doc(
    session_id: &str,
    tool_name: &str,
    instructions: &str,
    response: &str,
) -> String {
    let now = Utc::now().format("%Y-%m-%d %H:%M UTC");
    format!(
        "# Conversation {session_id}\n\nDate: {now}\nTool: {tool_name}\n\n## Task\n\n{instructions}\n\n## Response\n\n{response}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mock_stores(dir: &tempfile::TempDir, rollover: u32) -> MemoryStores {
        let loiter = Arc::new(LoiterKillerClient::connect("http://127.0.0.1:1", true).await);
        MemoryStores::open(
            &dir.path().join("memory.sqlite3"),
            None,
            loiter,
            true,
            rollover,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn first_call_creates_store_001() {
        let dir = tempfile::tempdir().unwrap();
        let stores = mock_stores(&dir, 3).await;

        let id = stores.active_conversation_store().await.unwrap();
        assert_eq!(id, "vs_mock_project-conversations-001");

        // Stable across calls below the threshold.
        assert_eq!(stores.active_conversation_store().await.unwrap(), id);
    }

    #[tokio::test]
    async fn rollover_creates_002_and_deactivates_001() {
        let dir = tempfile::tempdir().unwrap();
        let stores = mock_stores(&dir, 3).await;

        let first = stores.active_conversation_store().await.unwrap();
        for i in 0..4 {
            stores
                .record_document(StoreType::Conversation, "conversation", &format!("doc {i}"))
                .await
                .unwrap();
        }

        let second = stores.active_conversation_store().await.unwrap();
        assert_eq!(second, "vs_mock_project-conversations-002");
        assert_ne!(first, second);

        let rows = stores.rows().await.unwrap();
        let old = rows.iter().find(|(id, ..)| id == &first).unwrap();
        let new = rows.iter().find(|(id, ..)| id == &second).unwrap();
        assert!(!old.3, "old store must be inactive");
        assert!(new.3, "new store must be active");
    }

    #[tokio::test]
    async fn commit_and_conversation_stores_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let stores = mock_stores(&dir, 3).await;

        let conv = stores.active_conversation_store().await.unwrap();
        let commit = stores.active_commit_store().await.unwrap();
        assert_eq!(commit, "vs_mock_project-commits-001");
        assert_ne!(conv, commit);
    }

    #[tokio::test]
    async fn old_stores_remain_queryable() {
        let dir = tempfile::tempdir().unwrap();
        let stores = mock_stores(&dir, 1).await;

        let first = stores.active_conversation_store().await.unwrap();
        stores
            .record_document(StoreType::Conversation, "conversation", "doc")
            .await
            .unwrap();
        let second = stores.active_conversation_store().await.unwrap();

        let ids = stores
            .store_ids_by_type(&[StoreType::Conversation])
            .await
            .unwrap();
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }
}
