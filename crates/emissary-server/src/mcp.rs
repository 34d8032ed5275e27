//! MCP stdio transport.
//!
//! JSON-RPC 2.0, one object per line, stdin → stdout. Logging never touches
//! stdout. The transport carries the cancellation contract:
//!   - writes for request ids marked cancelled are dropped silently;
//!   - broken-pipe (and any other) write failures are swallowed — a dead
//!     client must not kill the server;
//!   - a cancelled tool call yields an empty-content-block result, not an
//!     error.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use emissary_core::EmissaryError;

use crate::app::Services;
use crate::executor;
use crate::spec;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Request ids whose responses must be dropped instead of written.
#[derive(Default)]
pub struct CancelledRequests {
    ids: DashMap<String, ()>,
}

impl CancelledRequests {
    pub fn mark(&self, key: &str) {
        self.ids.insert(key.to_string(), ());
    }

    /// True (and forgets the id) when the response should be dropped.
    pub fn take(&self, key: &str) -> bool {
        self.ids.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ids.contains_key(key)
    }
}

fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Stdout writer with the disconnect tolerance contract.
pub struct ResponseWriter {
    out: tokio::sync::Mutex<tokio::io::Stdout>,
    pub cancelled: Arc<CancelledRequests>,
}

impl ResponseWriter {
    pub fn new(cancelled: Arc<CancelledRequests>) -> Self {
        Self {
            out: tokio::sync::Mutex::new(tokio::io::stdout()),
            cancelled,
        }
    }

    /// Write one JSON-RPC response line. Cancelled ids are dropped; write
    /// and flush failures are logged and swallowed.
    pub async fn respond(&self, id: &Value, response: Value) {
        let key = id_key(id);
        if self.cancelled.take(&key) {
            debug!(request = %key, "dropping response for cancelled request");
            return;
        }

        let mut line = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize response");
                return;
            }
        };
        line.push(b'\n');

        let mut out = self.out.lock().await;
        if let Err(e) = out.write_all(&line).await {
            if is_disconnect(&e) {
                debug!(request = %key, "client disconnected while sending response");
            } else {
                warn!(request = %key, error = %e, "stdout write failed, swallowing");
            }
            return;
        }
        if let Err(e) = out.flush().await {
            debug!(request = %key, error = %e, "stdout flush failed, swallowing");
        }
    }
}

const EPIPE: i32 = 32;

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
    ) || e.raw_os_error() == Some(EPIPE)
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn text_result(id: Value, text: String, is_error: bool) -> Value {
    rpc_result(
        id,
        json!({
            "content": [ { "type": "text", "text": text } ],
            "isError": is_error,
        }),
    )
}

/// Run the stdio loop until stdin closes.
pub async fn serve(services: Arc<Services>) -> anyhow::Result<()> {
    let cancelled = Arc::new(CancelledRequests::default());
    let writer = Arc::new(ResponseWriter::new(Arc::clone(&cancelled)));
    // request key → in-flight tool task, so a client cancel can abort it.
    let in_flight: Arc<DashMap<String, AbortHandle>> = Arc::new(DashMap::new());

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    info!("emissary MCP server listening on stdio");

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF — the client closed the pipe.
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                writer
                    .respond(
                        &Value::Null,
                        rpc_error(Value::Null, -32700, format!("Parse error: {e}")),
                    )
                    .await;
                continue;
            }
        };

        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();

        match method.as_str() {
            "notifications/cancelled" => {
                let request_id = request
                    .pointer("/params/requestId")
                    .cloned()
                    .unwrap_or(Value::Null);
                let key = id_key(&request_id);
                info!(request = %key, "client cancelled request");
                cancelled.mark(&key);
                if let Some((_, abort)) = in_flight.remove(&key) {
                    abort.abort();
                }
            }
            "tools/call" => {
                // Spawned so the read loop keeps draining notifications
                // (cancellation must be deliverable mid-call).
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                let key = id_key(&id);
                let services = Arc::clone(&services);
                let writer = Arc::clone(&writer);
                let in_flight_map = Arc::clone(&in_flight);
                let handle = tokio::spawn(async move {
                    let response = handle_request(&services, request).await;
                    if let Some(response) = response {
                        writer.respond(&id, response).await;
                    }
                });
                in_flight.insert(key.clone(), handle.abort_handle());
                // Reap the entry when the task finishes on its own.
                let reaper_key = key;
                let reaper_map = in_flight_map;
                tokio::spawn(async move {
                    let _ = handle.await;
                    reaper_map.remove(&reaper_key);
                });
            }
            _ => {
                if let Some(response) = handle_request(&services, request.clone()).await {
                    let id = request.get("id").cloned().unwrap_or(Value::Null);
                    writer.respond(&id, response).await;
                }
            }
        }
    }

    Ok(())
}

/// Handle one JSON-RPC request. `None` for notifications.
pub async fn handle_request(services: &Arc<Services>, request: Value) -> Option<Value> {
    let id = request.get("id").cloned();
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let is_notification = id.is_none();
    let id = id.unwrap_or(Value::Null);

    match method {
        "initialize" => Some(rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "emissary",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )),

        "notifications/initialized" | "notifications/cancelled" => None,

        "ping" => Some(rpc_result(id, json!({}))),

        "tools/list" => {
            let tools: Vec<Value> = spec::all_tools()
                .iter()
                .flat_map(|t| {
                    let primary = json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": spec::input_schema(t),
                    });
                    let aliases = t.aliases.iter().map(move |alias| {
                        json!({
                            "name": alias,
                            "description": t.description,
                            "inputSchema": spec::input_schema(t),
                        })
                    });
                    std::iter::once(primary).chain(aliases)
                })
                .collect();
            Some(rpc_result(id, json!({ "tools": tools })))
        }

        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(json!({}));
            let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

            let Some(tool) = spec::find_tool(tool_name) else {
                return Some(text_result(
                    id,
                    format!("Unknown tool: {tool_name}"),
                    true,
                ));
            };

            match executor::execute_tool(services, tool, &arguments).await {
                Ok(text) => Some(text_result(id, text, false)),
                // A cancelled call fakes success with empty content so the
                // client's task group survives the abort.
                Err(EmissaryError::Cancelled) => Some(rpc_result(
                    id,
                    json!({ "content": [], "isError": false }),
                )),
                Err(e) => Some(text_result(id, format!("{}: {e}", e.code()), true)),
            }
        }

        _ => {
            if is_notification {
                None
            } else {
                Some(rpc_error(id, -32601, format!("Method not found: {method}")))
            }
        }
    }
}
