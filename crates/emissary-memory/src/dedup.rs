//! Content-hash deduplication for search results.
//!
//! Hashes are remembered per scope (see `emissary_core::scope`), so the same
//! snippet is surfaced at most once within one logical user request, while
//! unrelated requests are unaffected.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

/// A search result in the common pre-display shape.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub content: String,
    pub score: f64,
    pub store_id: String,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub metadata: serde_json::Value,
}

pub struct SearchDeduplicator {
    cache_name: String,
    seen: Mutex<HashMap<String, HashSet<String>>>,
}

impl SearchDeduplicator {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Hash content together with its file id so identical snippets from
    /// different files stay distinct.
    pub fn content_hash(content: &str, file_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(b":");
        hasher.update(file_id.as_bytes());
        hex::encode(hasher.finalize())[..16].to_string()
    }

    /// Keep the first occurrence of each content hash within `scope`, up to
    /// `max_results`. Returns `(kept, duplicate_count)`.
    pub fn deduplicate(
        &self,
        scope: &str,
        results: Vec<SearchResult>,
        max_results: usize,
    ) -> (Vec<SearchResult>, usize) {
        let mut seen = self.seen.lock().unwrap();
        let scope_set = seen.entry(scope.to_string()).or_default();

        let mut kept = Vec::new();
        let mut duplicates = 0usize;
        for result in results {
            let hash = Self::content_hash(
                &result.content,
                result.file_id.as_deref().unwrap_or(""),
            );
            if scope_set.insert(hash) {
                kept.push(result);
                if kept.len() >= max_results {
                    break;
                }
            } else {
                duplicates += 1;
            }
        }
        (kept, duplicates)
    }

    /// Forget everything remembered for a scope.
    pub fn clear_scope(&self, scope: &str) {
        self.seen.lock().unwrap().remove(scope);
        debug!(cache = %self.cache_name, scope, "cleared deduplication scope");
    }
}
