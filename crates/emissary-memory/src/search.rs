//! `search_project_memory`: fan-out search over the project's rolling memory
//! stores.
//!
//! One provider search per (query × store) pair, bounded by a small semaphore
//! and an overall batch timeout. Results are score-sorted, deduplicated
//! within the caller's scope, redacted, and rendered as text.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use emissary_core::redaction::redact_secrets;
use emissary_core::scope::current_scope;
use emissary_stores::VectorStoreClient;

use crate::dedup::{SearchDeduplicator, SearchResult};
use crate::error::{MemoryError, Result};
use crate::stores::{MemoryStores, StoreType};

/// Concurrent provider searches across one request.
const MAX_CONCURRENT_SEARCHES: usize = 5;
/// Wall-clock cap for the whole batch.
const SEARCH_TIMEOUT_SECS: u64 = 10;
/// Displayed content is clipped to this many characters.
const MAX_CONTENT_CHARS: usize = 500;

pub struct MemorySearch {
    stores: Arc<MemoryStores>,
    client: Option<Arc<VectorStoreClient>>,
    dedup: Arc<SearchDeduplicator>,
    mock: bool,
    semaphore: Arc<Semaphore>,
}

impl MemorySearch {
    pub fn new(
        stores: Arc<MemoryStores>,
        client: Option<Arc<VectorStoreClient>>,
        dedup: Arc<SearchDeduplicator>,
        mock: bool,
    ) -> Self {
        Self {
            stores,
            client,
            dedup,
            mock,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_SEARCHES)),
        }
    }

    /// Run the search and render results for display.
    ///
    /// `query` may be a single query or semicolon-separated multi-queries.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        store_types: &[StoreType],
    ) -> Result<String> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidQuery("Search query is required".into()));
        }

        let store_ids = self.stores.store_ids_by_type(store_types).await?;
        if store_ids.is_empty() {
            let names: Vec<&str> = store_types.iter().map(|t| t.as_str()).collect();
            return Ok(format!("No {} stores found", names.join(", ")));
        }

        let client = match (&self.client, self.mock) {
            (Some(client), false) => client,
            _ => return Ok(format!("No results found for query: '{query}'")),
        };

        let queries: Vec<String> = if query.contains(';') {
            query
                .split(';')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            vec![query.to_string()]
        };
        let per_query_limit = (max_results / queries.len().max(1)).max(1);

        let mut tasks = Vec::new();
        for store_id in &store_ids {
            for q in &queries {
                let client = Arc::clone(client);
                let semaphore = Arc::clone(&self.semaphore);
                let store_id = store_id.clone();
                let q = q.clone();
                tasks.push(async move {
                    let _permit = semaphore.acquire().await.expect("search semaphore closed");
                    client
                        .search(&store_id, &q, per_query_limit)
                        .await
                        .map(|hits| (store_id, hits))
                });
            }
        }

        let batch = tokio::time::timeout(
            Duration::from_secs(SEARCH_TIMEOUT_SECS),
            join_all(tasks),
        )
        .await
        .map_err(|_| {
            warn!("memory search timed out");
            MemoryError::SearchTimeout {
                secs: SEARCH_TIMEOUT_SECS,
            }
        })?;

        let mut all_results: Vec<SearchResult> = Vec::new();
        let mut errors = 0usize;
        for outcome in batch {
            match outcome {
                Ok((store_id, hits)) => {
                    all_results.extend(hits.into_iter().map(|h| SearchResult {
                        content: h.content,
                        score: h.score,
                        store_id: store_id.clone(),
                        file_id: h.file_id,
                        file_name: h.file_name,
                        metadata: h.metadata,
                    }));
                }
                Err(e) => {
                    errors += 1;
                    warn!(error = %e, "memory store search failed");
                }
            }
        }

        all_results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let scope = current_scope();
        let (kept, duplicates) = self.dedup.deduplicate(&scope, all_results, max_results);
        debug!(
            kept = kept.len(),
            duplicates,
            errors,
            stores = store_ids.len(),
            "memory search complete"
        );

        if kept.is_empty() {
            return Ok(format!("No results found for query: '{query}'"));
        }

        Ok(render(&kept, store_ids.len(), errors))
    }
}

fn render(results: &[SearchResult], store_count: usize, errors: usize) -> String {
    let mut out = vec![format!(
        "Found {} results across {} memory stores:",
        results.len(),
        store_count
    )];

    for (i, result) in results.iter().enumerate() {
        out.push(format!("\n--- Result {} ---", i + 1));
        if let Some(ty) = result.metadata.get("type").and_then(|v| v.as_str()) {
            out.push(format!("Type: {ty}"));
        }
        if let Some(dt) = result.metadata.get("datetime").and_then(|v| v.as_str()) {
            out.push(format!("Date: {dt}"));
        }
        if let Some(sid) = result.metadata.get("session_id").and_then(|v| v.as_str()) {
            out.push(format!("Session: {sid}"));
        }
        if let Some(branch) = result.metadata.get("branch").and_then(|v| v.as_str()) {
            out.push(format!("Branch: {branch}"));
        }
        out.push(format!("Score: {}", result.score));

        let mut content = redact_secrets(&result.content);
        if content.len() > MAX_CONTENT_CHARS {
            let mut cut = MAX_CONTENT_CHARS;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content = format!("{}...", &content[..cut]);
        }
        out.push(format!("Content: {content}"));
    }

    if errors > 0 {
        out.push(format!("\nNote: {errors} searches failed"));
    }

    out.join("\n")
}
