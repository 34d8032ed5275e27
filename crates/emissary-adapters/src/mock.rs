//! Test and `adapter_mock` doubles.
//!
//! `MockAdapter` is the runtime short-circuit behind the `dev.adapter_mock`
//! config flag: deterministic output, no network, synthetic ids shaped like
//! the real ones. The scripted transports drive the tool-loop tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use emissary_sessions::types::{ChatMessage, Content};
use emissary_sessions::SessionCache;

use crate::gemini::GeminiTransport;
use crate::grok::ChatTransport;
use crate::provider::{Adapter, AdapterError, GenerateOutcome, GenerateRequest};
use crate::tools::ToolHandler;

/// Deterministic adapter used when `dev.adapter_mock` is on.
pub struct MockAdapter {
    name: &'static str,
    model: String,
    context_window: usize,
    issues_response_id: bool,
    sessions: Arc<SessionCache>,
}

impl MockAdapter {
    pub fn new(
        name: &'static str,
        model: impl Into<String>,
        context_window: usize,
        issues_response_id: bool,
        sessions: Arc<SessionCache>,
    ) -> Self {
        Self {
            name,
            model: model.into(),
            context_window,
            issues_response_id,
            sessions,
        }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn generate(
        &self,
        req: &GenerateRequest,
        _tools: &ToolHandler,
    ) -> Result<GenerateOutcome, AdapterError> {
        let snippet: String = req.prompt.chars().take(120).collect();
        let content = format!("[mock:{}] {}", self.model, snippet);
        let response_id = self
            .issues_response_id
            .then(|| format!("resp_mock{}", Uuid::new_v4().simple()));

        // Keep session continuation semantics observable in mock mode.
        if let Some(sid) = &req.session_id {
            if let Some(rid) = &response_id {
                self.sessions.set_response_id(sid, rid).await?;
            } else if self.name == "gemini" {
                let mut history = self
                    .sessions
                    .get_gemini_history(sid)
                    .await?
                    .unwrap_or_default();
                history.push(Content::user_text(req.prompt.clone()));
                history.push(Content::model_text(content.clone()));
                self.sessions.set_gemini_history(sid, &history).await?;
            } else {
                let mut history = self
                    .sessions
                    .get_chat_history(sid)
                    .await?
                    .unwrap_or_default();
                history.push(ChatMessage::user(req.prompt.clone()));
                history.push(ChatMessage::assistant(Some(content.clone()), None));
                self.sessions.set_chat_history(sid, &history).await?;
            }
        }

        Ok(GenerateOutcome {
            content,
            response_id,
        })
    }
}

// ── Scripted transports ──────────────────────────────────────────────────────

/// Plays back queued generateContent responses, recording request bodies.
pub struct ScriptedGeminiTransport {
    responses: RwLock<VecDeque<Value>>,
    requests: RwLock<Vec<Value>>,
}

impl ScriptedGeminiTransport {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: RwLock::new(responses.into()),
            requests: RwLock::new(Vec::new()),
        }
    }

    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn request_body(&self, index: usize) -> Value {
        self.requests.read().await[index].clone()
    }
}

#[async_trait]
impl GeminiTransport for ScriptedGeminiTransport {
    async fn generate_content(&self, _model: &str, body: Value) -> Result<Value, AdapterError> {
        self.requests.write().await.push(body);
        self.responses
            .write()
            .await
            .pop_front()
            .ok_or_else(|| AdapterError::Parse("scripted gemini transport exhausted".into()))
    }
}

/// Plays back queued chat-completion responses, recording request bodies.
pub struct ScriptedChatTransport {
    responses: RwLock<VecDeque<Value>>,
    requests: RwLock<Vec<Value>>,
}

impl ScriptedChatTransport {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: RwLock::new(responses.into()),
            requests: RwLock::new(Vec::new()),
        }
    }

    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn request_body(&self, index: usize) -> Value {
        self.requests.read().await[index].clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedChatTransport {
    async fn complete(&self, body: Value) -> Result<Value, AdapterError> {
        self.requests.write().await.push(body);
        self.responses
            .write()
            .await
            .pop_front()
            .ok_or_else(|| AdapterError::Parse("scripted chat transport exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emissary_memory::SearchDeduplicator;
    use std::time::Duration;

    #[tokio::test]
    async fn mock_adapter_issues_resp_prefixed_ids() {
        let dir = tempfile::tempdir().unwrap();
        let sessions =
            Arc::new(SessionCache::open(&dir.path().join("s.sqlite3"), 3600, 0.0).unwrap());
        let adapter = MockAdapter::new("responses", "gpt-4.1", 1_000_000, true, sessions.clone());
        let tools = ToolHandler::new(None, None, vec![], Arc::new(SearchDeduplicator::new("t")));

        let req = GenerateRequest {
            prompt: "Say 'Hello World'".into(),
            images: vec![],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(10),
            session_id: Some("s1".into()),
        };
        let out = adapter.generate(&req, &tools).await.unwrap();
        assert!(!out.content.is_empty());
        assert!(out.response_id.as_deref().unwrap().starts_with("resp_"));

        // Continuation id stored for the session.
        assert_eq!(
            sessions.get_response_id("s1").await.unwrap(),
            out.response_id
        );
    }
}
