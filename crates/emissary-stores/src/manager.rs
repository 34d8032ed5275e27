//! Vector-store lifecycle manager.
//!
//! Three modes, checked in order:
//!   1. mock — synthetic ids, no network;
//!   2. loiter-killer — the sidecar owns session stores, we upload only the
//!      delta of untracked files;
//!   3. direct — fresh provider store per call, tracked in-process so a
//!      session reuses its store across turns.
//!
//! Deletion is best-effort and a no-op whenever something else owns the
//! store's lifetime.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::VectorStoreClient;
use crate::error::{Result, StoreError};
use crate::loiter::LoiterKillerClient;

pub struct VectorStoreManager {
    client: Option<Arc<VectorStoreClient>>,
    loiter: Arc<LoiterKillerClient>,
    mock: bool,
    /// `get_all_for_session` reports locally-tracked stores even when the
    /// loiter killer owns tracking.
    report_all_stores: bool,
    /// session id → store ids created for it (direct and mock modes).
    session_stores: DashMap<String, Vec<String>>,
    /// store id → file paths already uploaded (direct mode delta skip).
    uploaded: DashMap<String, HashSet<String>>,
}

impl VectorStoreManager {
    pub fn new(
        client: Option<Arc<VectorStoreClient>>,
        loiter: Arc<LoiterKillerClient>,
        mock: bool,
        report_all_stores: bool,
    ) -> Self {
        Self {
            client,
            loiter,
            mock,
            report_all_stores,
            session_stores: DashMap::new(),
            uploaded: DashMap::new(),
        }
    }

    /// Create (or reuse) a store holding `files`. With a session id the store
    /// is session-owned and lease-managed; without one it is request-owned
    /// and the caller must delete it when done.
    pub async fn create(&self, files: &[PathBuf], session_id: Option<&str>) -> Result<String> {
        if self.mock {
            return Ok(self.mock_store(files, session_id));
        }

        if let Some(sid) = session_id {
            if let Some((vs_id, tracked)) = self.loiter.acquire(sid, false).await {
                let tracked: HashSet<String> = tracked.into_iter().collect();
                let delta: Vec<&PathBuf> = files
                    .iter()
                    .filter(|p| !tracked.contains(&p.to_string_lossy().into_owned()))
                    .collect();
                debug!(
                    store = %vs_id,
                    total = files.len(),
                    delta = delta.len(),
                    "incremental upload to loiter-managed store"
                );
                let client = self.require_client()?;
                for path in &delta {
                    self.upload_one(client, &vs_id, path).await?;
                }
                let paths: Vec<String> = files
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect();
                self.loiter.track_files(sid, &paths).await;
                self.remember(sid, &vs_id);
                return Ok(vs_id);
            }
        }

        // Direct mode: reuse the session's store when we made one earlier.
        if let Some(sid) = session_id {
            if let Some(existing) = self
                .session_stores
                .get(sid)
                .and_then(|v| v.first().cloned())
            {
                let client = self.require_client()?;
                let new_files = self.untracked(&existing, files);
                debug!(store = %existing, delta = new_files.len(), "adding files to session store");
                for path in &new_files {
                    self.upload_one(client, &existing, path).await?;
                }
                return Ok(existing);
            }
        }

        let client = self.require_client()?;
        let name = match session_id {
            Some(sid) => format!("session-{sid}"),
            None => format!("request-{}", Uuid::new_v4().simple()),
        };
        let vs_id = client
            .create_store(&name)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!(store = %vs_id, files = files.len(), "created vector store");
        for path in files {
            self.upload_one(client, &vs_id, path).await?;
        }
        if let Some(sid) = session_id {
            self.remember(sid, &vs_id);
        }
        Ok(vs_id)
    }

    /// Delete a store. No-op in mock mode and under loiter-killer management;
    /// failures are logged, never raised.
    pub async fn delete(&self, vs_id: &str) {
        if self.mock || self.loiter.is_enabled() {
            debug!(store = %vs_id, "delete skipped (externally managed)");
            return;
        }
        let Some(client) = self.client.as_deref() else {
            return;
        };
        if let Err(e) = client.delete_store(vs_id).await {
            warn!(store = %vs_id, error = %e, "vector store delete failed");
        }
        self.uploaded.remove(vs_id);
    }

    /// Stores known for a session. Empty when the loiter killer manages
    /// tracking, unless the report-all flag is on.
    pub fn get_all_for_session(&self, session_id: &str) -> Vec<String> {
        if self.loiter.is_enabled() && !self.report_all_stores {
            return Vec::new();
        }
        self.session_stores
            .get(session_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn mock_store(&self, files: &[PathBuf], session_id: Option<&str>) -> String {
        if let Some(sid) = session_id {
            if let Some(existing) = self
                .session_stores
                .get(sid)
                .and_then(|v| v.first().cloned())
            {
                return existing;
            }
        }
        let vs_id = format!("vs_mock_{}", Uuid::new_v4().simple());
        debug!(store = %vs_id, files = files.len(), "mock vector store");
        if let Some(sid) = session_id {
            self.remember(sid, &vs_id);
        }
        vs_id
    }

    fn remember(&self, session_id: &str, vs_id: &str) {
        let mut entry = self
            .session_stores
            .entry(session_id.to_string())
            .or_default();
        if !entry.iter().any(|v| v == vs_id) {
            entry.push(vs_id.to_string());
        }
    }

    fn untracked(&self, vs_id: &str, files: &[PathBuf]) -> Vec<PathBuf> {
        let seen = self.uploaded.get(vs_id);
        files
            .iter()
            .filter(|p| {
                seen.as_ref()
                    .map(|s| !s.contains(&p.to_string_lossy().into_owned()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    async fn upload_one(
        &self,
        client: &VectorStoreClient,
        vs_id: &str,
        path: &Path,
    ) -> Result<()> {
        let file_id = client
            .upload_file(path)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        client.attach_file(vs_id, &file_id).await?;
        self.uploaded
            .entry(vs_id.to_string())
            .or_default()
            .insert(path.to_string_lossy().into_owned());
        Ok(())
    }

    fn require_client(&self) -> Result<&Arc<VectorStoreClient>> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("no provider API key configured".into()))
    }
}
