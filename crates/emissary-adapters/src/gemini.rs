//! Google Vertex/Gemini adapter.
//!
//! Requests go to the regional generateContent endpoint, authenticated by
//! the service-account token source in `crate::gcp`. Conversation state is
//! the full Content history from the session cache; thought signatures on
//! function-call parts are echoed back verbatim. Function calls from the
//! model run in a loop: execute, append a user-role functionResponse turn,
//! re-issue, until the model returns pure text or the iteration cap is hit.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use emissary_sessions::convert::{content_from_json, content_to_json};
use emissary_sessions::types::{Content, Part};
use emissary_sessions::SessionCache;

use crate::gcp::{ServiceAccountAuth, VertexEndpoint};
use crate::provider::{Adapter, AdapterError, GenerateOutcome, GenerateRequest};
use crate::tools::ToolHandler;

/// Tool-call loop iterations before giving up.
const MAX_TOOL_ITERATIONS: usize = 8;

/// Wire transport, mockable for tool-loop tests.
#[async_trait]
pub trait GeminiTransport: Send + Sync {
    async fn generate_content(&self, model: &str, body: Value) -> Result<Value, AdapterError>;
}

pub struct GeminiAdapter {
    transport: Arc<dyn GeminiTransport>,
    model: String,
    context_window: usize,
    sessions: Arc<SessionCache>,
}

impl GeminiAdapter {
    pub fn new(
        transport: Arc<dyn GeminiTransport>,
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

    fn build_body(&self, contents: &[Content], req: &GenerateRequest, tools: &ToolHandler) -> Value {
        let mut generation_config = json!({
            "temperature": req.temperature.unwrap_or(1.0),
            "topP": 0.95,
            "maxOutputTokens": 65535,
        });
        // Thinking budget applies to reasoning-capable (pro) models only;
        // a non-positive budget means "dynamic".
        if self.model.contains("pro") {
            if let Some(budget) = req.thinking_budget {
                generation_config["thinkingConfig"] = json!({
                    "thinkingBudget": if budget > 0 { budget } else { -1 },
                });
            }
        }

        let mut wire_contents: Vec<Value> =
            contents.iter().map(content_to_json).collect();
        // Images ride on the newest user turn only; they are not replayed
        // from (or written into) the session history.
        if !req.images.is_empty() {
            if let Some(last_user) = wire_contents
                .iter_mut()
                .rev()
                .find(|c| c.get("role").and_then(|r| r.as_str()) == Some("user"))
            {
                if let Some(parts) = last_user.get_mut("parts").and_then(|p| p.as_array_mut()) {
                    parts.extend(emissary_images::format::gemini_parts(&req.images));
                }
            }
        }

        let mut body = json!({
            "contents": wire_contents,
            "generationConfig": generation_config,
            // Developer-facing system: all safety categories off.
            "safetySettings": [
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "OFF" },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "OFF" },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "OFF" },
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "OFF" },
            ],
        });

        let declarations = tools.declarations_gemini();
        if !declarations.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }

    async fn dispatch_call(&self, part: &Part, tools: &ToolHandler) -> Part {
        let Some(fc) = part.function_call.as_ref() else {
            return Part::default();
        };
        let response = if fc.name == "file_search_msearch" {
            let queries: Vec<String> = fc
                .args
                .get("queries")
                .and_then(|q| q.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            info!(queries = queries.len(), "executing file search fan-out");
            tools.msearch(&queries).await
        } else {
            let text = tools.execute(&fc.name, &fc.args).await;
            json!({ "result": text })
        };
        Part::function_response(fc.name.clone(), fc.id.clone(), response)
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
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
        let mut contents: Vec<Content> = match &req.session_id {
            Some(sid) => self
                .sessions
                .get_gemini_history(sid)
                .await?
                .unwrap_or_default(),
            None => Vec::new(),
        };
        contents.push(Content::user_text(req.prompt.clone()));

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let body = self.build_body(&contents, req, tools);
            let resp = self.transport.generate_content(&self.model, body).await?;

            let candidate = resp
                .pointer("/candidates/0/content")
                .ok_or_else(|| AdapterError::Parse("response has no candidates".into()))?;
            let model_content = content_from_json(candidate)
                .map_err(|e| AdapterError::Parse(e.to_string()))?;

            let call_parts: Vec<Part> = model_content
                .parts
                .iter()
                .filter(|p| p.function_call.is_some())
                .cloned()
                .collect();

            if call_parts.is_empty() {
                let text = model_content.joined_text();
                contents.push(model_content);
                if let Some(sid) = &req.session_id {
                    if let Err(e) = self.sessions.set_gemini_history(sid, &contents).await {
                        warn!(session = %sid, error = %e, "failed to store gemini history");
                    }
                }
                debug!(iteration, "gemini turn complete");
                return Ok(GenerateOutcome {
                    content: text,
                    response_id: None,
                });
            }

            // Append the model turn unchanged: thought signatures on the
            // call parts must be echoed back on the next request.
            contents.push(model_content);

            let mut response_parts = Vec::with_capacity(call_parts.len());
            for part in &call_parts {
                response_parts.push(self.dispatch_call(part, tools).await);
            }
            contents.push(Content {
                role: "user".to_string(),
                parts: response_parts,
            });
        }

        warn!(
            model = %self.model,
            max_iterations = MAX_TOOL_ITERATIONS,
            "gemini tool loop hit maximum iterations"
        );
        Err(AdapterError::Parse(format!(
            "tool loop exceeded {MAX_TOOL_ITERATIONS} iterations without a text response"
        )))
    }
}

// ── HTTP transport (Vertex AI) ───────────────────────────────────────────────

pub struct HttpGeminiTransport {
    client: reqwest::Client,
    endpoint: VertexEndpoint,
    auth: ServiceAccountAuth,
}

impl HttpGeminiTransport {
    /// Build from a service account key file. A configured project wins;
    /// the project named inside the key file is the fallback.
    pub fn from_file(
        path: &str,
        project: Option<String>,
        location: Option<String>,
        token_refresh_leeway: Duration,
    ) -> Result<Self, AdapterError> {
        let (auth, project_hint) =
            ServiceAccountAuth::from_key_file(Path::new(path), token_refresh_leeway)?;
        let project = project.or(project_hint).ok_or_else(|| {
            AdapterError::Unavailable(
                "project_id not found in service account JSON and not configured".into(),
            )
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: VertexEndpoint {
                project,
                location: location.unwrap_or_else(|| "us-central1".to_string()),
            },
            auth,
        })
    }
}

#[async_trait]
impl GeminiTransport for HttpGeminiTransport {
    async fn generate_content(&self, model: &str, body: Value) -> Result<Value, AdapterError> {
        let token = self.auth.bearer(&self.client).await?;
        let url = self.endpoint.generate_content_url(model);

        debug!(model, location = %self.endpoint.location, "sending request to Vertex AI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Vertex AI error");
            return Err(AdapterError::Api {
                status,
                message: text,
            });
        }

        resp.json().await.map_err(AdapterError::Http)
    }
}
