//! HTTP client for the provider's vector-store surface.
//!
//! Adapters treat stores as read-only; every mutation goes through the
//! manager. Upload conflicts ("file already attached") are swallowed — the
//! desired end state is already true.

use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// One hit from a vector-store search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub content: String,
    pub score: f64,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub metadata: Value,
}

pub struct VectorStoreClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl VectorStoreClient {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    /// Create a store; returns the provider id.
    pub async fn create_store(&self, name: &str) -> Result<String> {
        let body = json!({
            "name": name,
            "expires_after": { "anchor": "last_active_at", "days": 365 },
        });
        let resp = self
            .client
            .post(format!("{}/v1/vector_stores", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let value = check(resp).await?;
        value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Parse("vector store create response missing id".into()))
    }

    /// Whether the store still exists. A provider 404 is `Ok(false)`.
    pub async fn store_exists(&self, store_id: &str) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/v1/vector_stores/{store_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        check(resp).await?;
        Ok(true)
    }

    pub async fn delete_store(&self, store_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/v1/vector_stores/{store_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// Upload a file from disk; returns the provider file id.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.txt".to_string());
        self.upload_bytes(&file_name, bytes).await
    }

    /// Upload an in-memory document (used for memory write-back).
    pub async fn upload_text(&self, file_name: &str, content: &str) -> Result<String> {
        self.upload_bytes(file_name, content.as_bytes().to_vec())
            .await
    }

    async fn upload_bytes(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let resp = self
            .client
            .post(format!("{}/v1/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let value = check(resp).await?;
        value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Parse("file upload response missing id".into()))
    }

    /// Attach an uploaded file to a store. Conflicts are swallowed.
    pub async fn attach_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!(
                "{}/v1/vector_stores/{store_id}/files",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .json(&json!({ "file_id": file_id }))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status == 409 {
            debug!(store_id, file_id, "file already attached, ignoring");
            return Ok(());
        }
        if !(200..300).contains(&status) {
            let message = resp.text().await.unwrap_or_default();
            if message.contains("already") {
                debug!(store_id, file_id, "file already attached, ignoring");
                return Ok(());
            }
            warn!(status, store_id, body = %message, "attach file failed");
            return Err(StoreError::Api { status, message });
        }
        Ok(())
    }

    /// Search one store.
    pub async fn search(
        &self,
        store_id: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let resp = self
            .client
            .post(format!(
                "{}/v1/vector_stores/{store_id}/search",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "max_num_results": max_results }))
            .send()
            .await?;
        let value = check(resp).await?;
        Ok(parse_search_hits(&value))
    }
}

async fn check(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status().as_u16();
    if !(200..300).contains(&status) {
        let message = resp.text().await.unwrap_or_default();
        warn!(status, body = %message, "vector store API error");
        return Err(StoreError::Api { status, message });
    }
    resp.json().await.map_err(StoreError::Http)
}

/// Parse search hits leniently — content may be a string or a block list.
fn parse_search_hits(value: &Value) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for item in value.get("data").and_then(|d| d.as_array()).into_iter().flatten() {
        let content = match item.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        };
        hits.push(SearchHit {
            content: content.trim().to_string(),
            score: item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0),
            file_id: item
                .get("file_id")
                .and_then(|f| f.as_str())
                .map(str::to_string),
            file_name: item
                .get("filename")
                .or_else(|| item.get("file_name"))
                .and_then(|f| f.as_str())
                .map(str::to_string),
            metadata: item
                .get("attributes")
                .or_else(|| item.get("metadata"))
                .cloned()
                .unwrap_or(Value::Null),
        });
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_and_block_content() {
        let value = json!({
            "data": [
                { "content": "plain text", "score": 0.9, "file_id": "f1" },
                { "content": [ { "type": "text", "text": "a" }, { "type": "text", "text": "b" } ],
                  "score": 0.5, "filename": "notes.md" },
            ]
        });
        let hits = parse_search_hits(&value);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "plain text");
        assert_eq!(hits[0].file_id.as_deref(), Some("f1"));
        assert_eq!(hits[1].content, "a\nb");
        assert_eq!(hits[1].file_name.as_deref(), Some("notes.md"));
    }

    #[test]
    fn empty_response_yields_no_hits() {
        assert!(parse_search_hits(&json!({})).is_empty());
    }
}
