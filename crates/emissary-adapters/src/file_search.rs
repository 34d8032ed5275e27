//! `file_search_msearch` for Gemini models: the same multi-query interface
//! the Responses API exposes as a built-in, implemented as a parallel fan-out
//! over the request's vector stores.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use emissary_stores::{SearchHit, VectorStoreClient};

/// Queries accepted per call, matching the provider built-in.
pub const MAX_QUERIES: usize = 5;
/// Concurrent store searches.
const MAX_CONCURRENT_SEARCHES: usize = 20;
/// Wall-clock cap for the whole fan-out.
const SEARCH_TIMEOUT_MS: u64 = 3000;
/// Result cap, matching the provider built-in.
const MAX_RESULTS: usize = 40;
/// Per-store result request size.
const PER_STORE_RESULTS: usize = 40;

fn semaphore() -> &'static Arc<Semaphore> {
    static SEM: OnceLock<Arc<Semaphore>> = OnceLock::new();
    SEM.get_or_init(|| Arc::new(Semaphore::new(MAX_CONCURRENT_SEARCHES)))
}

/// Issue up to 5 queries across all stores; returns the provider-built-in
/// response shape `{"results": [{text, metadata, citation}]}`.
pub async fn msearch(
    client: &Arc<VectorStoreClient>,
    store_ids: &[String],
    queries: &[String],
) -> Value {
    if queries.is_empty() || store_ids.is_empty() {
        return json!({ "results": [] });
    }
    let queries = &queries[..queries.len().min(MAX_QUERIES)];

    let mut tasks = Vec::new();
    for query in queries {
        for store_id in store_ids {
            let client = Arc::clone(client);
            let query = query.clone();
            let store_id = store_id.clone();
            tasks.push(async move {
                let _permit = semaphore()
                    .acquire()
                    .await
                    .expect("file search semaphore closed");
                client.search(&store_id, &query, PER_STORE_RESULTS).await
            });
        }
    }

    let outcomes = match tokio::time::timeout(
        Duration::from_millis(SEARCH_TIMEOUT_MS),
        join_all(tasks),
    )
    .await
    {
        Ok(outcomes) => outcomes,
        Err(_) => {
            warn!("file search timed out");
            Vec::new()
        }
    };

    let mut hits: Vec<SearchHit> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(batch) => hits.extend(batch),
            Err(e) => debug!(error = %e, "file search store error"),
        }
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();
    for hit in hits {
        let mut hasher = Sha256::new();
        hasher.update(hit.content.as_bytes());
        let key = hex::encode(hasher.finalize());
        if !seen.insert(key) {
            continue;
        }
        let i = results.len();
        let mut metadata = match &hit.metadata {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        metadata.insert(
            "file_name".into(),
            json!(hit.file_name.as_deref().unwrap_or("unknown")),
        );
        metadata.insert("score".into(), json!(hit.score));
        results.push(json!({
            "text": hit.content,
            "metadata": Value::Object(metadata),
            "citation": format!("<source>{i}</source>"),
        }));
        if results.len() >= MAX_RESULTS {
            break;
        }
    }

    json!({ "results": results })
}
