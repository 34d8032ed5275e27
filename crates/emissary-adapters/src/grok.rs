//! xAI Grok adapter (OpenAI-chat wire format).
//!
//! History is a flat message list. Tool calls ride on assistant messages as
//! a `tool_calls` array; results come back as `role: "tool"` messages with a
//! matching `tool_call_id`. The tool-call loop mirrors the Gemini adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use emissary_sessions::types::{ChatMessage, FunctionRef, ToolCallMsg};
use emissary_sessions::SessionCache;

use crate::provider::{map_gateway_idle, Adapter, AdapterError, GenerateOutcome, GenerateRequest};
use crate::tools::ToolHandler;

const MAX_TOOL_ITERATIONS: usize = 8;

/// Wire transport, mockable for tool-loop tests.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, body: Value) -> Result<Value, AdapterError>;
}

pub struct GrokAdapter {
    transport: Arc<dyn ChatTransport>,
    model: String,
    context_window: usize,
    sessions: Arc<SessionCache>,
}

impl GrokAdapter {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        model: impl Into<String>,
        context_window: usize,
        sessions: Arc<SessionCache>,
    ) -> Self {
        Self {
            transport,
            model: model.into(),
            context_window,
            sessions,
        }
    }

    fn build_body(
        &self,
        history: &[ChatMessage],
        req: &GenerateRequest,
        tools: &ToolHandler,
    ) -> Value {
        let mut messages = json!(history);
        // Images go on the newest user message as content blocks; stored
        // history stays text-only.
        if !req.images.is_empty() {
            if let Some(last_user) = messages
                .as_array_mut()
                .into_iter()
                .flatten()
                .rev()
                .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
            {
                let text = last_user
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default();
                let mut blocks = vec![json!({ "type": "text", "text": text })];
                blocks.extend(emissary_images::format::chat_blocks(&req.images));
                last_user["content"] = json!(blocks);
            }
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        let declarations = tools.declarations_chat();
        if !declarations.is_empty() {
            body["tools"] = json!(declarations);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl Adapter for GrokAdapter {
    fn name(&self) -> &str {
        "grok"
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
        tools: &ToolHandler,
    ) -> Result<GenerateOutcome, AdapterError> {
        let mut history: Vec<ChatMessage> = match &req.session_id {
            Some(sid) => self
                .sessions
                .get_chat_history(sid)
                .await?
                .unwrap_or_default(),
            None => Vec::new(),
        };
        history.push(ChatMessage::user(req.prompt.clone()));

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let body = self.build_body(&history, req, tools);
            let resp = self
                .transport
                .complete(body)
                .await
                .map_err(|e| map_gateway_idle(e, &self.model))?;

            let message = resp
                .pointer("/choices/0/message")
                .ok_or_else(|| AdapterError::Parse("response has no choices".into()))?;
            let content = message
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            let tool_calls = parse_tool_calls(message);

            if tool_calls.is_empty() {
                let text = content.unwrap_or_default();
                history.push(ChatMessage::assistant(Some(text.clone()), None));
                if let Some(sid) = &req.session_id {
                    if let Err(e) = self.sessions.set_chat_history(sid, &history).await {
                        warn!(session = %sid, error = %e, "failed to store chat history");
                    }
                }
                debug!(iteration, "grok turn complete");
                return Ok(GenerateOutcome {
                    content: text,
                    response_id: None,
                });
            }

            history.push(ChatMessage::assistant(content, Some(tool_calls.clone())));
            for call in &tool_calls {
                let args: Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
                let output = tools.execute(&call.function.name, &args).await;
                history.push(ChatMessage::tool(call.id.clone(), output));
            }
        }

        warn!(
            model = %self.model,
            max_iterations = MAX_TOOL_ITERATIONS,
            "grok tool loop hit maximum iterations"
        );
        Err(AdapterError::Parse(format!(
            "tool loop exceeded {MAX_TOOL_ITERATIONS} iterations without a text response"
        )))
    }
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCallMsg> {
    message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    Some(ToolCallMsg {
                        id: call.get("id")?.as_str()?.to_string(),
                        kind: "function".to_string(),
                        function: FunctionRef {
                            name: call.pointer("/function/name")?.as_str()?.to_string(),
                            arguments: call
                                .pointer("/function/arguments")
                                .and_then(|a| a.as_str())
                                .unwrap_or("{}")
                                .to_string(),
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── HTTP transport ───────────────────────────────────────────────────────────

pub struct HttpChatTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpChatTransport {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(&self, body: Value) -> Result<Value, AdapterError> {
        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, body = %message, "chat completions API error");
            return Err(AdapterError::Api { status, message });
        }
        resp.json().await.map_err(AdapterError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedChatTransport;
    use emissary_memory::SearchDeduplicator;
    use std::time::Duration;

    fn handler() -> ToolHandler {
        ToolHandler::new(None, None, Vec::new(), Arc::new(SearchDeduplicator::new("t")))
    }

    fn sessions(dir: &tempfile::TempDir) -> Arc<SessionCache> {
        Arc::new(SessionCache::open(&dir.path().join("s.sqlite3"), 3600, 0.0).unwrap())
    }

    fn req(session: Option<&str>) -> GenerateRequest {
        GenerateRequest {
            prompt: "hello grok".into(),
            images: vec![],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(30),
            session_id: session.map(str::to_string),
        }
    }

    fn text_choice(text: &str) -> Value {
        json!({ "choices": [ { "message": { "role": "assistant", "content": text } } ] })
    }

    fn tool_call_choice(name: &str, id: &str) -> Value {
        json!({ "choices": [ { "message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [
                { "id": id, "type": "function",
                  "function": { "name": name, "arguments": "{\"query\":\"q\"}" } }
            ]
        }}]})
    }

    #[tokio::test]
    async fn plain_reply_persists_history() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedChatTransport::new(vec![text_choice("hey")]));
        let adapter = GrokAdapter::new(
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            "grok-4",
            256_000,
            sessions(&dir),
        );

        let out = adapter.generate(&req(Some("k1")), &handler()).await.unwrap();
        assert_eq!(out.content, "hey");

        let history = adapter
            .sessions
            .get_chat_history("k1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[tokio::test]
    async fn tool_loop_appends_tool_messages_with_matching_ids() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedChatTransport::new(vec![
            tool_call_choice("search_project_memory", "call_7"),
            text_choice("done"),
        ]));
        let adapter = GrokAdapter::new(
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            "grok-4",
            256_000,
            sessions(&dir),
        );

        let out = adapter.generate(&req(Some("k1")), &handler()).await.unwrap();
        assert_eq!(out.content, "done");
        assert_eq!(transport.request_count().await, 2);

        // Second request carried assistant tool_calls + tool result message.
        let second = transport.request_body(1).await;
        let messages = second["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3); // user, assistant(tool_calls), tool
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_7");
        assert_eq!(messages[1]["tool_calls"][0]["type"], "function");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_7");

        // Declarations use the nested chat shape.
        assert!(second["tools"][0]["function"]["name"].is_string());
    }

    #[tokio::test]
    async fn session_history_feeds_next_turn() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = sessions(&dir);
        sessions
            .set_chat_history(
                "k2",
                &[
                    ChatMessage::user("earlier question"),
                    ChatMessage::assistant(Some("earlier answer".into()), None),
                ],
            )
            .await
            .unwrap();

        let transport = Arc::new(ScriptedChatTransport::new(vec![text_choice("followup")]));
        let adapter = GrokAdapter::new(
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            "grok-4",
            256_000,
            sessions,
        );

        adapter.generate(&req(Some("k2")), &handler()).await.unwrap();
        let body = transport.request_body(0).await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"], "earlier question");
    }

    #[test]
    fn images_turn_the_user_message_into_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedChatTransport::new(vec![]));
        let adapter = GrokAdapter::new(
            transport as Arc<dyn ChatTransport>,
            "grok-4",
            256_000,
            sessions(&dir),
        );

        let mut request = req(None);
        request.images = vec![emissary_images::LoadedImage {
            data: vec![0xff, 0xd8, 0xff],
            mime_type: "image/jpeg".into(),
            source: emissary_images::ImageSource::File,
            origin: "/tmp/a.jpg".into(),
        }];
        let history = vec![ChatMessage::user("what is this?")];
        let body = adapter.build_body(&history, &request, &handler());

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "what is this?");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn runaway_tool_loop_errors_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let responses: Vec<Value> = (0..MAX_TOOL_ITERATIONS)
            .map(|i| tool_call_choice("search_project_memory", &format!("c{i}")))
            .collect();
        let transport = Arc::new(ScriptedChatTransport::new(responses));
        let adapter = GrokAdapter::new(
            transport as Arc<dyn ChatTransport>,
            "grok-4",
            256_000,
            sessions(&dir),
        );
        let err = adapter.generate(&req(None), &handler()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Parse(_)));
    }
}
