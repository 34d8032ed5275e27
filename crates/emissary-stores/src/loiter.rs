//! Client for the loiter-killer service: a local HTTP sidecar that owns
//! vector-store lifecycles on behalf of sessions.
//!
//! Strictly best-effort: health-checked once at startup, short timeouts on
//! every call, and the first failure flips the client off until the next
//! process restart so repeated attempts don't amplify latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

pub struct LoiterKillerClient {
    client: reqwest::Client,
    base_url: String,
    enabled: AtomicBool,
}

impl LoiterKillerClient {
    /// Probe the service and build the client. In mock mode the service is
    /// treated as absent.
    pub async fn connect(base_url: &str, mock: bool) -> Self {
        let client = reqwest::Client::new();
        let this = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            enabled: AtomicBool::new(false),
        };

        if mock {
            info!("loiter killer: mock mode, service disabled");
            return this;
        }

        match this
            .client
            .get(format!("{}/health", this.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!(url = %this.base_url, "loiter killer available");
                this.enabled.store(true, Ordering::Relaxed);
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "loiter killer health check failed");
            }
            Err(e) => {
                warn!(url = %this.base_url, error = %e, "loiter killer not reachable");
            }
        }
        this
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn disable(&self) {
        if self.enabled.swap(false, Ordering::Relaxed) {
            warn!("loiter killer disabled until restart after a failed call");
        }
    }

    /// Get or create the session's vector store. Returns
    /// `(vector_store_id, already_tracked_file_paths)`, or `None` when the
    /// service is unavailable.
    pub async fn acquire(
        &self,
        session_id: &str,
        protected: bool,
    ) -> Option<(String, Vec<String>)> {
        if !self.is_enabled() {
            return None;
        }
        let url = format!("{}/session/{session_id}/acquire", self.base_url);
        let result = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(&json!({ "protected": protected }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.ok()?;
                let vs_id = body.get("vector_store_id")?.as_str()?.to_string();
                let reused = body.get("reused").and_then(|r| r.as_bool()).unwrap_or(false);
                let files = body
                    .get("file_paths")
                    .and_then(|f| f.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                info!(
                    session = %session_id,
                    store = %vs_id,
                    reused,
                    protected,
                    "loiter killer acquired store"
                );
                Some((vs_id, files))
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "loiter killer acquire failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "loiter killer request failed");
                self.disable();
                None
            }
        }
    }

    /// Register an already-created store (e.g. a protected project-memory
    /// store) so the service tracks its lifetime.
    pub async fn register_existing_store(
        &self,
        session_id: &str,
        vector_store_id: &str,
        protected: bool,
    ) -> bool {
        if !self.is_enabled() {
            debug!("loiter killer not enabled, skipping registration");
            return false;
        }
        let url = format!("{}/session/{session_id}/register", self.base_url);
        let result = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(&json!({ "vector_store_id": vector_store_id, "protected": protected }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(store = %vector_store_id, session = %session_id, "registered store with loiter killer");
                true
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "loiter killer register failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "loiter killer register failed");
                false
            }
        }
    }

    /// Track files for cleanup when the session lease expires. Best effort.
    pub async fn track_files(&self, session_id: &str, file_paths: &[String]) {
        if !self.is_enabled() || file_paths.is_empty() {
            return;
        }
        let url = format!("{}/session/{session_id}/files", self.base_url);
        let result = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(5))
            .json(&json!({ "file_paths": file_paths }))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "loiter killer track_files failed");
        }
    }

    /// Keep the session's lease alive during a long operation. Best effort.
    pub async fn renew_lease(&self, session_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let url = format!("{}/session/{session_id}/renew", self.base_url);
        if let Err(e) = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            debug!(error = %e, "loiter killer renew failed");
        }
    }

    /// Trigger a manual cleanup pass; returns the number of stores cleaned.
    pub async fn cleanup(&self) -> u64 {
        if !self.is_enabled() {
            return 0;
        }
        let url = format!("{}/cleanup", self.base_url);
        match self
            .client
            .post(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("cleaned").and_then(|c| c.as_u64()))
                .unwrap_or(0),
            _ => 0,
        }
    }
}
