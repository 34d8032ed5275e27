//! Built-in tool declarations and execution.
//!
//! Two search tools are always on offer: project memory (every request) and
//! session attachments (only when the request carries a vector store).
//! Declarations come in three wire shapes because each provider's validator
//! is picky in a different way:
//!   - Responses API: flat `{type:"function", name, description, parameters}`
//!     — no nested `function` wrapper;
//!   - OpenAI-chat (Grok): nested `{type:"function", function:{...}}`;
//!   - Gemini: bare `FunctionDeclaration` objects, plus `file_search_msearch`
//!     mapping onto the Responses API's `file_search` built-in.
//!
//! Execution dispatches by name; unknown names return a textual error
//! instead of raising.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use emissary_core::redaction::redact_secrets;
use emissary_core::scope::current_scope;
use emissary_memory::{MemorySearch, SearchDeduplicator, StoreType};
use emissary_stores::VectorStoreClient;

use crate::file_search;

const DEFAULT_MEMORY_RESULTS: usize = 40;
const DEFAULT_ATTACHMENT_RESULTS: usize = 20;

pub struct ToolHandler {
    memory: Option<Arc<MemorySearch>>,
    store_client: Option<Arc<VectorStoreClient>>,
    vector_store_ids: Vec<String>,
    dedup: Arc<SearchDeduplicator>,
}

impl ToolHandler {
    pub fn new(
        memory: Option<Arc<MemorySearch>>,
        store_client: Option<Arc<VectorStoreClient>>,
        vector_store_ids: Vec<String>,
        dedup: Arc<SearchDeduplicator>,
    ) -> Self {
        Self {
            memory,
            store_client,
            vector_store_ids,
            dedup,
        }
    }

    pub fn has_vector_stores(&self) -> bool {
        !self.vector_store_ids.is_empty()
    }

    pub fn vector_store_ids(&self) -> &[String] {
        &self.vector_store_ids
    }

    // ── Declarations ─────────────────────────────────────────────────────────

    /// Flat shape for the Responses API.
    pub fn declarations_responses(&self) -> Vec<Value> {
        self.base_declarations()
            .into_iter()
            .map(|(name, description, parameters)| {
                json!({
                    "type": "function",
                    "name": name,
                    "description": description,
                    "parameters": parameters,
                })
            })
            .collect()
    }

    /// Nested shape for OpenAI-chat compatible providers.
    pub fn declarations_chat(&self) -> Vec<Value> {
        self.base_declarations()
            .into_iter()
            .map(|(name, description, parameters)| {
                json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": description,
                        "parameters": parameters,
                    }
                })
            })
            .collect()
    }

    /// Gemini `FunctionDeclaration` objects. Adds `file_search_msearch` when
    /// the request has stores to search.
    pub fn declarations_gemini(&self) -> Vec<Value> {
        let mut decls: Vec<Value> = self
            .base_declarations()
            .into_iter()
            .map(|(name, description, parameters)| {
                json!({ "name": name, "description": description, "parameters": parameters })
            })
            .collect();
        if self.has_vector_stores() {
            decls.push(file_search_declaration());
        }
        decls
    }

    fn base_declarations(&self) -> Vec<(&'static str, &'static str, Value)> {
        let mut decls = vec![(
            "search_project_memory",
            "Search the project's long-term memory: prior conversations and commit \
             history. Supports semicolon-separated multi-queries.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query, or several queries separated by semicolons"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum results to return (default: 40)"
                    },
                    "store_types": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["conversation", "commit"] },
                        "description": "Store types to search (default: both)"
                    }
                },
                "required": ["query"]
            }),
        )];
        if self.has_vector_stores() {
            decls.push((
                "search_session_attachments",
                "Search the files attached to this request (context that did not fit inline).",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search query" },
                        "max_results": {
                            "type": "integer",
                            "description": "Maximum results to return (default: 20)"
                        }
                    },
                    "required": ["query"]
                }),
            ));
        }
        decls
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Execute a tool call by name. Errors come back as text — the model can
    /// read them; the loop must not crash.
    pub async fn execute(&self, name: &str, args: &Value) -> String {
        info!(tool = %name, "executing builtin tool");
        match name {
            "search_project_memory" | "search_project_history" => {
                self.execute_memory_search(args).await
            }
            "search_session_attachments" => self.execute_attachment_search(args).await,
            "file_search_msearch" => {
                let queries = parse_queries(args);
                self.msearch(&queries).await.to_string()
            }
            other => format!("Unknown function: {other}"),
        }
    }

    /// The multi-query file search used by Gemini's tool namespace.
    pub async fn msearch(&self, queries: &[String]) -> Value {
        let Some(client) = &self.store_client else {
            return json!({ "results": [] });
        };
        file_search::msearch(client, &self.vector_store_ids, queries).await
    }

    async fn execute_memory_search(&self, args: &Value) -> String {
        let Some(memory) = &self.memory else {
            return "Project memory is not available.".to_string();
        };
        let Some(query) = args.get("query").and_then(|q| q.as_str()) else {
            return "missing required parameter: query".to_string();
        };
        let max_results = args
            .get("max_results")
            .and_then(|m| m.as_u64())
            .unwrap_or(DEFAULT_MEMORY_RESULTS as u64) as usize;
        let store_types: Vec<StoreType> = args
            .get("store_types")
            .and_then(|s| s.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(StoreType::parse)
                    .collect()
            })
            .unwrap_or_else(|| vec![StoreType::Conversation, StoreType::Commit]);

        match memory.search(query, max_results, &store_types).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "memory search failed");
                format!("Error searching memory: {e}")
            }
        }
    }

    async fn execute_attachment_search(&self, args: &Value) -> String {
        if self.store_client.is_none() || self.vector_store_ids.is_empty() {
            return "No attachments on this request.".to_string();
        }
        let Some(query) = args.get("query").and_then(|q| q.as_str()) else {
            return "missing required parameter: query".to_string();
        };
        let max_results = args
            .get("max_results")
            .and_then(|m| m.as_u64())
            .unwrap_or(DEFAULT_ATTACHMENT_RESULTS as u64) as usize;

        let raw = self.msearch(&[query.to_string()]).await;
        let results = raw
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        if results.is_empty() {
            return format!("No results found in attachments for query: '{query}'");
        }

        // Deduplicate within the current request scope so repeated searches
        // don't resurface identical snippets.
        let scope = current_scope();
        let as_results: Vec<emissary_memory::dedup::SearchResult> = results
            .iter()
            .map(|r| emissary_memory::dedup::SearchResult {
                content: r.get("text").and_then(|t| t.as_str()).unwrap_or("").to_string(),
                score: r
                    .pointer("/metadata/score")
                    .and_then(|s| s.as_f64())
                    .unwrap_or(0.0),
                store_id: String::new(),
                file_id: None,
                file_name: r
                    .pointer("/metadata/file_name")
                    .and_then(|f| f.as_str())
                    .map(str::to_string),
                metadata: r.get("metadata").cloned().unwrap_or(Value::Null),
            })
            .collect();
        let (kept, _) = self.dedup.deduplicate(&scope, as_results, max_results);
        if kept.is_empty() {
            return format!("No new results in attachments for query: '{query}'");
        }

        let mut out = vec![format!("Found {} results in attached files:", kept.len())];
        for (i, result) in kept.iter().enumerate() {
            out.push(format!(
                "\n--- Result {} ({}, score {:.3}) ---",
                i + 1,
                result.file_name.as_deref().unwrap_or("unknown"),
                result.score
            ));
            out.push(redact_secrets(&result.content));
        }
        out.join("\n")
    }
}

fn parse_queries(args: &Value) -> Vec<String> {
    args.get("queries")
        .and_then(|q| q.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn file_search_declaration() -> Value {
    json!({
        "name": "file_search_msearch",
        "description": "Issues multiple queries to search over files and vector stores. \
                        Use this to find information in uploaded documents or project memory.",
        "parameters": {
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Array of search queries (max 5). Include the user's \
                                    original question plus focused queries for key terms.",
                    "maxItems": 5
                }
            },
            "required": []
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(with_stores: bool) -> ToolHandler {
        ToolHandler::new(
            None,
            None,
            if with_stores {
                vec!["vs_123".to_string()]
            } else {
                Vec::new()
            },
            Arc::new(SearchDeduplicator::new("attachments")),
        )
    }

    #[test]
    fn responses_shape_is_flat() {
        let decls = handler(true).declarations_responses();
        assert_eq!(decls.len(), 2);
        for d in &decls {
            assert_eq!(d["type"], "function");
            assert!(d.get("name").is_some(), "name must be top-level");
            assert!(d.get("function").is_none(), "no nested function wrapper");
            assert!(d.get("parameters").is_some());
        }
    }

    #[test]
    fn chat_shape_is_nested() {
        let decls = handler(false).declarations_chat();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0]["type"], "function");
        assert_eq!(decls[0]["function"]["name"], "search_project_memory");
    }

    #[test]
    fn attachment_tool_only_declared_with_stores() {
        let without = handler(false).declarations_responses();
        assert!(without
            .iter()
            .all(|d| d["name"] != "search_session_attachments"));

        let with = handler(true).declarations_responses();
        assert!(with
            .iter()
            .any(|d| d["name"] == "search_session_attachments"));
    }

    #[test]
    fn gemini_shape_includes_msearch_with_stores() {
        let decls = handler(true).declarations_gemini();
        let names: Vec<&str> = decls
            .iter()
            .filter_map(|d| d["name"].as_str())
            .collect();
        assert!(names.contains(&"search_project_memory"));
        assert!(names.contains(&"search_session_attachments"));
        assert!(names.contains(&"file_search_msearch"));
        // Bare declarations: no "type" wrapper at all.
        assert!(decls.iter().all(|d| d.get("type").is_none()));

        let msearch = decls
            .iter()
            .find(|d| d["name"] == "file_search_msearch")
            .unwrap();
        assert_eq!(msearch["parameters"]["properties"]["queries"]["maxItems"], 5);
    }

    #[tokio::test]
    async fn unknown_tool_returns_text_not_panic() {
        let out = handler(false).execute("mystery_tool", &json!({})).await;
        assert_eq!(out, "Unknown function: mystery_tool");
    }

    #[tokio::test]
    async fn memory_search_without_service_degrades() {
        let out = handler(false)
            .execute("search_project_memory", &json!({"query": "q"}))
            .await;
        assert_eq!(out, "Project memory is not available.");
    }

    #[tokio::test]
    async fn alias_routes_to_memory_search() {
        let out = handler(false)
            .execute("search_project_history", &json!({"query": "q"}))
            .await;
        assert_eq!(out, "Project memory is not available.");
    }

    #[tokio::test]
    async fn attachment_search_without_stores_degrades() {
        let out = handler(false)
            .execute("search_session_attachments", &json!({"query": "q"}))
            .await;
        assert_eq!(out, "No attachments on this request.");
    }
}
