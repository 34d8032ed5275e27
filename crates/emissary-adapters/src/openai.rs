//! OpenAI Responses API adapter.
//!
//! Dispatch decision:
//!   1. model in NO_STREAM → background;
//!   2. timeout > 180s or model not in SUPPORTS_STREAM → background;
//!   3. otherwise → streaming.
//!
//! The background path polls `retrieve` every ~3s and runs the
//! function-call follow-up loop chained through `previous_response_id`.
//! The streaming path concatenates output-text deltas from the SSE stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use emissary_sessions::SessionCache;

use crate::provider::{map_gateway_idle, Adapter, AdapterError, GenerateOutcome, GenerateRequest};
use crate::sse::{parse_sse_line, SseParsed};
use crate::tools::ToolHandler;

/// Models that support streaming responses.
pub const SUPPORTS_STREAM: &[&str] = &["gpt-4.1", "o3", "o4-mini"];
/// Models that must run in background mode.
pub const NO_STREAM: &[&str] = &["o3-pro"];

/// Streaming is only safe under the gateway idle limit.
const STREAM_TIMEOUT_CEILING: Duration = Duration::from_secs(180);
const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Follow-up rounds before the loop is declared runaway.
const MAX_TOOL_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Streaming,
    Background,
}

/// Pure dispatch decision, see module docs.
pub fn dispatch_mode(model: &str, timeout: Duration) -> DispatchMode {
    if NO_STREAM.contains(&model) {
        return DispatchMode::Background;
    }
    if timeout > STREAM_TIMEOUT_CEILING || !SUPPORTS_STREAM.contains(&model) {
        return DispatchMode::Background;
    }
    DispatchMode::Streaming
}

/// Result of consuming an entire SSE stream.
#[derive(Debug, Default)]
pub struct StreamedResponse {
    pub content: String,
    pub response_id: Option<String>,
}

/// Wire transport, split out so the dispatch logic is testable against a
/// scripted fake.
#[async_trait]
pub trait ResponsesTransport: Send + Sync {
    async fn create(&self, body: Value) -> Result<Value, AdapterError>;
    async fn retrieve(&self, response_id: &str) -> Result<Value, AdapterError>;
    async fn stream(&self, body: Value) -> Result<StreamedResponse, AdapterError>;
}

pub struct ResponsesAdapter {
    transport: Arc<dyn ResponsesTransport>,
    model: String,
    context_window: usize,
    sessions: Arc<SessionCache>,
    poll_interval: Duration,
}

impl ResponsesAdapter {
    pub fn new(
        transport: Arc<dyn ResponsesTransport>,
        model: impl Into<String>,
        context_window: usize,
        sessions: Arc<SessionCache>,
    ) -> Self {
        Self {
            transport,
            model: model.into(),
            context_window,
            sessions,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Test hook: shrink the poll interval so poll-loop tests run fast.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn build_body(&self, req: &GenerateRequest, tools: &ToolHandler, prev_id: Option<&str>) -> Value {
        let mut declarations = tools.declarations_responses();
        if self.model == "gpt-4.1" {
            declarations.push(json!({ "type": "web_search" }));
        }

        // With images the user turn becomes a content-block list; plain text
        // keeps the simple string form.
        let content = if req.images.is_empty() {
            json!(req.prompt)
        } else {
            let mut blocks = vec![json!({ "type": "input_text", "text": req.prompt })];
            blocks.extend(emissary_images::format::responses_blocks(&req.images));
            json!(blocks)
        };

        let mut body = json!({
            "model": self.model,
            "input": [{ "role": "user", "content": content }],
        });
        if !declarations.is_empty() {
            body["tools"] = json!(declarations);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(effort) = &req.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        if let Some(prev) = prev_id {
            body["previous_response_id"] = json!(prev);
        }
        body
    }

    async fn generate_background(
        &self,
        mut body: Value,
        req: &GenerateRequest,
        tools: &ToolHandler,
    ) -> Result<GenerateOutcome, AdapterError> {
        body["background"] = json!(true);
        let created = self
            .transport
            .create(body)
            .await
            .map_err(|e| map_gateway_idle(e, &self.model))?;
        let mut current_id = response_id_of(&created)
            .ok_or_else(|| AdapterError::Parse("background create returned no id".into()))?;

        let started = Instant::now();
        let mut rounds = 0usize;

        loop {
            if started.elapsed() >= req.timeout {
                // Report the timeout; the provider-side job is left running.
                warn!(
                    model = %self.model,
                    id = %current_id,
                    "background job still unfinished at deadline"
                );
                return Err(AdapterError::Timeout {
                    secs: req.timeout.as_secs(),
                });
            }

            let job = self.transport.retrieve(&current_id).await?;
            match job.get("status").and_then(|s| s.as_str()).unwrap_or("") {
                "completed" => {
                    let content = extract_output_text(&job);
                    let calls = extract_function_calls(&job);
                    if !calls.is_empty() && content.is_empty() {
                        rounds += 1;
                        if rounds > MAX_TOOL_ROUNDS {
                            return Err(AdapterError::Parse(format!(
                                "tool loop exceeded {MAX_TOOL_ROUNDS} rounds without text"
                            )));
                        }
                        info!(
                            model = %self.model,
                            calls = calls.len(),
                            round = rounds,
                            "executing function calls from background response"
                        );
                        let results = execute_function_calls(tools, &calls).await;
                        let mut input: Vec<Value> = calls;
                        input.extend(results);

                        let mut follow = json!({
                            "model": self.model,
                            "previous_response_id": current_id,
                            "input": input,
                            "background": true,
                        });
                        if let Some(effort) = &req.reasoning_effort {
                            follow["reasoning"] = json!({ "effort": effort });
                        }
                        let follow_resp = self.transport.create(follow).await?;
                        current_id = response_id_of(&follow_resp).ok_or_else(|| {
                            AdapterError::Parse("follow-up create returned no id".into())
                        })?;
                        continue;
                    }

                    return Ok(GenerateOutcome {
                        content,
                        response_id: Some(current_id),
                    });
                }
                "queued" | "in_progress" => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                other => {
                    let detail = job
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("Unknown error");
                    return Err(AdapterError::Api {
                        status: 500,
                        message: format!("job failed with status={other}: {detail}"),
                    });
                }
            }
        }
    }

    async fn generate_streaming(
        &self,
        mut body: Value,
        req: &GenerateRequest,
    ) -> Result<GenerateOutcome, AdapterError> {
        body["stream"] = json!(true);
        let streamed = match tokio::time::timeout(req.timeout, self.transport.stream(body)).await {
            Err(_) => {
                return Err(AdapterError::Timeout {
                    secs: req.timeout.as_secs(),
                })
            }
            Ok(result) => result.map_err(|e| map_gateway_idle(e, &self.model))?,
        };

        debug!(
            model = %self.model,
            content_len = streamed.content.len(),
            response_id = streamed.response_id.as_deref().unwrap_or(""),
            "stream complete"
        );

        let content = if streamed.content.is_empty() {
            match &streamed.response_id {
                // A stream that ends with an id but no text means the model
                // acknowledged the request without producing output; say so
                // instead of returning "".
                Some(id) => format!(
                    "Model {} acknowledged request (response_id: {id}) but did not \
                     produce output within the streaming window.",
                    self.model
                ),
                None => String::new(),
            }
        } else {
            streamed.content
        };

        Ok(GenerateOutcome {
            content,
            response_id: streamed.response_id,
        })
    }
}

#[async_trait]
impl Adapter for ResponsesAdapter {
    fn name(&self) -> &str {
        "responses"
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
        let prev_id = match &req.session_id {
            Some(sid) => self.sessions.get_response_id(sid).await?,
            None => None,
        };
        let body = self.build_body(req, tools, prev_id.as_deref());

        let outcome = match dispatch_mode(&self.model, req.timeout) {
            DispatchMode::Background => self.generate_background(body, req, tools).await?,
            DispatchMode::Streaming => self.generate_streaming(body, req).await?,
        };

        if let (Some(sid), Some(rid)) = (&req.session_id, &outcome.response_id) {
            if let Err(e) = self.sessions.set_response_id(sid, rid).await {
                warn!(session = %sid, error = %e, "failed to store response id");
            }
        }
        Ok(outcome)
    }
}

// ── Response parsing helpers ─────────────────────────────────────────────────

fn response_id_of(value: &Value) -> Option<String> {
    value
        .get("id")
        .and_then(|i| i.as_str())
        .map(str::to_string)
}

/// Output text: prefer the convenience field, else walk `output` message items.
pub fn extract_output_text(job: &Value) -> String {
    if let Some(text) = job.get("output_text").and_then(|t| t.as_str()) {
        return text.to_string();
    }
    let mut parts = Vec::new();
    for item in job.get("output").and_then(|o| o.as_array()).into_iter().flatten() {
        if item.get("type").and_then(|t| t.as_str()) == Some("message") {
            for block in item
                .get("content")
                .and_then(|c| c.as_array())
                .into_iter()
                .flatten()
            {
                if block.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        parts.push(text.to_string());
                    }
                }
            }
        }
    }
    parts.join("")
}

/// Raw `function_call` output items, preserved verbatim for the follow-up
/// request's input.
pub fn extract_function_calls(job: &Value) -> Vec<Value> {
    job.get("output")
        .and_then(|o| o.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("function_call"))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

async fn execute_function_calls(tools: &ToolHandler, calls: &[Value]) -> Vec<Value> {
    let mut results = Vec::new();
    for call in calls {
        let name = call.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let call_id = call.get("call_id").and_then(|c| c.as_str()).unwrap_or("");
        let args: Value = call
            .get("arguments")
            .and_then(|a| a.as_str())
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}));

        let output = tools.execute(name, &args).await;
        results.push(json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }));
    }
    results
}

// ── HTTP transport ───────────────────────────────────────────────────────────

pub struct HttpResponsesTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpResponsesTransport {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AdapterError> {
        let resp = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, body = %message, "Responses API error");
            return Err(AdapterError::Api { status, message });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ResponsesTransport for HttpResponsesTransport {
    async fn create(&self, body: Value) -> Result<Value, AdapterError> {
        let resp = self.post(&body).await?;
        resp.json().await.map_err(AdapterError::Http)
    }

    async fn retrieve(&self, response_id: &str) -> Result<Value, AdapterError> {
        let resp = self
            .client
            .get(format!("{}/v1/responses/{response_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let message = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Api { status, message });
        }
        resp.json().await.map_err(AdapterError::Http)
    }

    async fn stream(&self, body: Value) -> Result<StreamedResponse, AdapterError> {
        let resp = self.post(&body).await?;
        Ok(consume_event_stream(resp).await)
    }
}

/// Iterate the SSE event stream, capturing the first `resp_`-prefixed id and
/// concatenating output-text deltas.
async fn consume_event_stream(resp: reqwest::Response) -> StreamedResponse {
    let mut out = StreamedResponse::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "response stream error");
                break;
            }
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break;
                }
                if let Ok(event) = serde_json::from_str::<Value>(&data) {
                    apply_stream_event(&event, &mut out);
                }
            }
        }
        line_buf = remainder;
    }

    out
}

/// Fold one stream event into the accumulated response.
pub fn apply_stream_event(event: &Value, out: &mut StreamedResponse) {
    if out.response_id.is_none() {
        // The response id appears either as a top-level `id` or nested under
        // `response.id`; either way it is prefixed `resp_`.
        let candidate = event
            .get("id")
            .and_then(|i| i.as_str())
            .or_else(|| event.pointer("/response/id").and_then(|i| i.as_str()));
        if let Some(id) = candidate {
            if id.starts_with("resp_") {
                out.response_id = Some(id.to_string());
            }
        }
    }

    match event.get("type").and_then(|t| t.as_str()) {
        Some("ResponseOutputTextDelta") | Some("response.output_text.delta") => {
            if let Some(delta) = event.get("delta").and_then(|d| d.as_str()) {
                out.content.push_str(delta);
            }
        }
        Some("response.output_text") => {
            if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                out.content.push_str(text);
            }
        }
        Some(_) => {}
        None => {
            // Unshaped events: honor bare output_text / text fields.
            if let Some(text) = event.get("output_text").and_then(|t| t.as_str()) {
                out.content.push_str(text);
            } else if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                out.content.push_str(text);
            }
        }
    }
}

// ── Scripted transport for tests ─────────────────────────────────────────────

/// Fake transport driven by queued responses; records every request body.
pub struct ScriptedResponsesTransport {
    pub creates: RwLock<Vec<Value>>,
    pub retrieves: RwLock<Vec<Value>>,
    created_ids: RwLock<Vec<String>>,
    retrieve_queue: RwLock<std::collections::VecDeque<Value>>,
    stream_result: RwLock<Option<StreamedResponse>>,
}

impl ScriptedResponsesTransport {
    pub fn new(created_ids: Vec<&str>, retrieve_queue: Vec<Value>) -> Self {
        Self {
            creates: RwLock::new(Vec::new()),
            retrieves: RwLock::new(Vec::new()),
            created_ids: RwLock::new(created_ids.into_iter().map(str::to_string).collect()),
            retrieve_queue: RwLock::new(retrieve_queue.into()),
            stream_result: RwLock::new(None),
        }
    }

    pub async fn set_stream_result(&self, result: StreamedResponse) {
        *self.stream_result.write().await = Some(result);
    }
}

#[async_trait]
impl ResponsesTransport for ScriptedResponsesTransport {
    async fn create(&self, body: Value) -> Result<Value, AdapterError> {
        self.creates.write().await.push(body);
        let mut ids = self.created_ids.write().await;
        if ids.is_empty() {
            return Err(AdapterError::Parse("scripted transport exhausted".into()));
        }
        let id = ids.remove(0);
        Ok(json!({ "id": id, "status": "queued" }))
    }

    async fn retrieve(&self, response_id: &str) -> Result<Value, AdapterError> {
        self.retrieves.write().await.push(json!(response_id));
        let mut queue = self.retrieve_queue.write().await;
        queue
            .pop_front()
            .ok_or_else(|| AdapterError::Parse("scripted retrieve queue exhausted".into()))
    }

    async fn stream(&self, _body: Value) -> Result<StreamedResponse, AdapterError> {
        let mut guard = self.stream_result.write().await;
        guard
            .take()
            .ok_or_else(|| AdapterError::Parse("no scripted stream result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emissary_memory::SearchDeduplicator;

    fn handler() -> ToolHandler {
        ToolHandler::new(None, None, Vec::new(), Arc::new(SearchDeduplicator::new("t")))
    }

    fn sessions(dir: &tempfile::TempDir) -> Arc<SessionCache> {
        Arc::new(SessionCache::open(&dir.path().join("s.sqlite3"), 3600, 0.0).unwrap())
    }

    #[test]
    fn no_stream_model_always_goes_background() {
        assert_eq!(
            dispatch_mode("o3-pro", Duration::from_secs(30)),
            DispatchMode::Background
        );
    }

    #[test]
    fn streaming_model_with_short_timeout_streams() {
        assert_eq!(
            dispatch_mode("gpt-4.1", Duration::from_secs(180)),
            DispatchMode::Streaming
        );
        assert_eq!(
            dispatch_mode("o3", Duration::from_secs(60)),
            DispatchMode::Streaming
        );
    }

    #[test]
    fn long_timeout_or_unknown_model_goes_background() {
        assert_eq!(
            dispatch_mode("gpt-4.1", Duration::from_secs(181)),
            DispatchMode::Background
        );
        assert_eq!(
            dispatch_mode("gpt-exotic", Duration::from_secs(30)),
            DispatchMode::Background
        );
    }

    #[test]
    fn stream_events_accumulate_deltas_and_id() {
        let mut out = StreamedResponse::default();
        apply_stream_event(
            &json!({"type": "response.created", "response": {"id": "resp_abc"}}),
            &mut out,
        );
        apply_stream_event(
            &json!({"type": "response.output_text.delta", "delta": "Hello"}),
            &mut out,
        );
        apply_stream_event(
            &json!({"type": "response.output_text.delta", "delta": " World"}),
            &mut out,
        );
        // Unknown typed events are ignored, even with text fields.
        apply_stream_event(
            &json!({"type": "response.output_text.done", "text": "Hello World"}),
            &mut out,
        );
        assert_eq!(out.content, "Hello World");
        assert_eq!(out.response_id.as_deref(), Some("resp_abc"));
    }

    #[test]
    fn images_switch_the_user_turn_to_content_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedResponsesTransport::new(vec![], vec![]);
        let adapter = ResponsesAdapter::new(
            Arc::new(transport) as Arc<dyn ResponsesTransport>,
            "gpt-4.1",
            1_000_000,
            sessions(&dir),
        );

        let mut req = GenerateRequest {
            prompt: "describe this".into(),
            images: vec![emissary_images::LoadedImage {
                data: vec![0x89, 0x50, 0x4e, 0x47],
                mime_type: "image/png".into(),
                source: emissary_images::ImageSource::File,
                origin: "/tmp/a.png".into(),
            }],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(60),
            session_id: None,
        };
        let body = adapter.build_body(&req, &handler(), None);
        let content = body["input"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "input_text");
        assert_eq!(content[1]["type"], "input_image");

        // Without images the simple string form is kept.
        req.images.clear();
        let body = adapter.build_body(&req, &handler(), None);
        assert!(body["input"][0]["content"].is_string());
    }

    #[test]
    fn untyped_events_fall_back_to_text_fields() {
        let mut out = StreamedResponse::default();
        apply_stream_event(&json!({"output_text": "a"}), &mut out);
        apply_stream_event(&json!({"text": "b"}), &mut out);
        assert_eq!(out.content, "ab");
    }

    #[test]
    fn output_text_extraction_walks_message_items() {
        let job = json!({
            "output": [
                { "type": "reasoning", "content": [] },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "part one " },
                    { "type": "output_text", "text": "part two" },
                ]},
            ]
        });
        assert_eq!(extract_output_text(&job), "part one part two");
    }

    #[tokio::test]
    async fn background_poll_waits_through_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedResponsesTransport::new(
            vec!["resp_1"],
            vec![
                json!({ "id": "resp_1", "status": "in_progress" }),
                json!({ "id": "resp_1", "status": "completed", "output_text": "done" }),
            ],
        ));
        let adapter = ResponsesAdapter::new(
            Arc::clone(&transport) as Arc<dyn ResponsesTransport>,
            "o3-pro",
            200_000,
            sessions(&dir),
        )
        .with_poll_interval(Duration::from_millis(1));

        let req = GenerateRequest {
            prompt: "hi".into(),
            images: vec![],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(10),
            session_id: Some("s1".into()),
        };
        let out = adapter.generate(&req, &handler()).await.unwrap();
        assert_eq!(out.content, "done");
        assert_eq!(out.response_id.as_deref(), Some("resp_1"));
    }

    #[tokio::test]
    async fn background_function_calls_chain_through_previous_response_id() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedResponsesTransport::new(
            vec!["resp_1", "resp_2"],
            vec![
                json!({ "id": "resp_1", "status": "completed", "output": [
                    { "type": "function_call", "name": "search_project_memory",
                      "call_id": "call_9", "arguments": "{\"query\":\"x\"}" }
                ]}),
                json!({ "id": "resp_2", "status": "completed", "output_text": "final answer" }),
            ],
        ));
        let adapter = ResponsesAdapter::new(
            Arc::clone(&transport) as Arc<dyn ResponsesTransport>,
            "o3-pro",
            200_000,
            sessions(&dir),
        )
        .with_poll_interval(Duration::from_millis(1));

        let req = GenerateRequest {
            prompt: "hi".into(),
            images: vec![],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(10),
            session_id: Some("s1".into()),
        };
        let out = adapter.generate(&req, &handler()).await.unwrap();
        assert_eq!(out.content, "final answer");
        assert_eq!(out.response_id.as_deref(), Some("resp_2"));

        // The follow-up create chained off the first response and carried
        // both the calls and their outputs.
        let creates = transport.creates.read().await;
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[1]["previous_response_id"], "resp_1");
        let input = creates[1]["input"].as_array().unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["type"], "function_call");
        assert_eq!(input[1]["type"], "function_call_output");
        assert_eq!(input[1]["call_id"], "call_9");
    }

    #[tokio::test]
    async fn background_failure_status_is_an_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedResponsesTransport::new(
            vec!["resp_1"],
            vec![json!({ "id": "resp_1", "status": "failed",
                         "error": { "message": "quota exceeded" } })],
        ));
        let adapter = ResponsesAdapter::new(
            transport as Arc<dyn ResponsesTransport>,
            "o3-pro",
            200_000,
            sessions(&dir),
        )
        .with_poll_interval(Duration::from_millis(1));

        let req = GenerateRequest {
            prompt: "hi".into(),
            images: vec![],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(5),
            session_id: None,
        };
        let err = adapter.generate(&req, &handler()).await.unwrap_err();
        match err {
            AdapterError::Api { message, .. } => {
                assert!(message.contains("status=failed"));
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_stream_with_id_synthesizes_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedResponsesTransport::new(vec![], vec![]);
        transport
            .set_stream_result(StreamedResponse {
                content: String::new(),
                response_id: Some("resp_silent".into()),
            })
            .await;
        let adapter = ResponsesAdapter::new(
            Arc::new(transport) as Arc<dyn ResponsesTransport>,
            "gpt-4.1",
            1_000_000,
            sessions(&dir),
        );

        let req = GenerateRequest {
            prompt: "hi".into(),
            images: vec![],
            vector_store_ids: vec![],
            temperature: None,
            reasoning_effort: None,
            thinking_budget: None,
            timeout: Duration::from_secs(60),
            session_id: None,
        };
        let out = adapter.generate(&req, &handler()).await.unwrap();
        assert!(out.content.contains("resp_silent"));
        assert!(out.content.contains("did not produce output"));
    }
}
