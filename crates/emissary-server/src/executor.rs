//! Tool executor: the pipeline between a validated MCP call and its string
//! result.
//!
//! Chat tools: validate → route parameters → attachment store → context pack
//! → (cross-provider handoff) → timeout-wrapped adapter dispatch → redact →
//! background memory write-back. Every failure surfaces as a typed error at
//! this boundary; nothing is allowed to crash the event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use emissary_adapters::{AdapterError, GenerateRequest, ToolHandler};
use emissary_context::{PackError, PackRequest};
use emissary_core::config::expand_home;
use emissary_core::redaction::redact_secrets;
use emissary_core::scope;
use emissary_core::{EmissaryError, Result};
use emissary_images::{load_images, ImageLimits};
use emissary_memory::stores::format_conversation_doc;
use emissary_memory::StoreType;
use emissary_sessions::compact;

use crate::app::Services;
use crate::follow::{LiveFollowService, DEFAULT_TAIL_LINES};
use crate::spec::{self, BuiltinTool, ProviderKind, ToolSpec};

/// Execute one tool invocation end to end.
pub async fn execute_tool(
    services: &Arc<Services>,
    spec: &'static ToolSpec,
    args: &Value,
) -> Result<String> {
    let values = spec::validate(spec, args)?;
    let session_id = values
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    // Deduplication scope: the session when there is one, otherwise an
    // isolated single-use scope.
    scope::with_scope(session_id.clone(), async {
        match spec.provider {
            ProviderKind::Builtin(builtin) => {
                execute_builtin(services, builtin, &values, session_id.as_deref()).await
            }
            _ => execute_chat(services, spec, values).await,
        }
    })
    .await
}

async fn execute_builtin(
    services: &Arc<Services>,
    builtin: BuiltinTool,
    values: &std::collections::HashMap<&'static str, Value>,
    session_id: Option<&str>,
) -> Result<String> {
    match builtin {
        BuiltinTool::Ping => Ok("pong".to_string()),
        BuiltinTool::ListModels => Ok(render_model_list()),
        BuiltinTool::MemorySearch => {
            let Some(search) = &services.memory_search else {
                return Ok("Project memory is disabled.".to_string());
            };
            let query = values["query"].as_str().unwrap_or_default();
            let max_results = values["max_results"].as_u64().unwrap_or(40) as usize;
            let store_types: Vec<StoreType> = values["store_types"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .filter_map(StoreType::parse)
                        .collect()
                })
                .unwrap_or_else(|| vec![StoreType::Conversation, StoreType::Commit]);
            search
                .search(query, max_results, &store_types)
                .await
                .map(|text| redact_secrets(&text))
                .map_err(|e| EmissaryError::Provider(e.to_string()))
        }
        BuiltinTool::LiveFollow => {
            let sid = session_id.ok_or_else(|| {
                EmissaryError::Validation("session_id is required to follow a session".into())
            })?;
            let lines = values
                .get("lines")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_TAIL_LINES as u64) as usize;
            let transcript_dirs = services
                .config
                .follow
                .transcript_dirs
                .iter()
                .map(|d| expand_home(d))
                .collect();
            let project = std::env::current_dir()
                .ok()
                .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "default".to_string());
            let service = LiveFollowService::new(
                Arc::clone(&services.cli_bridge),
                transcript_dirs,
                project,
            );
            Ok(service.follow(sid, lines).await)
        }
        BuiltinTool::AttachmentSearch => {
            let sid = session_id.ok_or_else(|| {
                EmissaryError::Validation("session_id is required for attachment search".into())
            })?;
            let store_ids = services.store_manager.get_all_for_session(sid);
            if store_ids.is_empty() {
                return Ok("No attachments tracked for this session.".to_string());
            }
            let handler = ToolHandler::new(
                services.memory_search.clone(),
                services.store_client.clone(),
                store_ids,
                Arc::clone(&services.dedup),
            );
            let query = values["query"].as_str().unwrap_or_default();
            let max_results = values["max_results"].clone();
            Ok(handler
                .execute(
                    "search_session_attachments",
                    &json!({ "query": query, "max_results": max_results }),
                )
                .await)
        }
    }
}

async fn execute_chat(
    services: &Arc<Services>,
    spec: &'static ToolSpec,
    values: std::collections::HashMap<&'static str, Value>,
) -> Result<String> {
    let session_id = values["session_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EmissaryError::Validation("session_id must be a string".into()))?;
    let instructions = values["instructions"].as_str().unwrap_or_default().to_string();
    let output_format = values["output_format"].as_str().unwrap_or("").to_string();
    let context = path_list(&values, "context");
    let priority_context = path_list(&values, "priority_context");
    let attachments = path_list(&values, "attachments");
    let disable_history_record = values
        .get("disable_history_record")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let timeout = Duration::from_secs(spec.timeout_secs);
    let mut vector_store_ids: Vec<String> = Vec::new();

    // Request-scoped attachment store: created first, deleted on any exit.
    let mut request_store: Option<String> = None;
    if !attachments.is_empty() {
        let vs_id = services
            .store_manager
            .create(&attachments, None)
            .await
            .map_err(|e| EmissaryError::VectorStoreUnavailable(e.to_string()))?;
        vector_store_ids.push(vs_id.clone());
        request_store = Some(vs_id);
    }

    let result = run_chat(
        services,
        spec,
        &session_id,
        &instructions,
        &output_format,
        context,
        priority_context,
        &values,
        timeout,
        &mut vector_store_ids,
    )
    .await;

    // Ownership rule: request-scoped stores die with the request, success
    // or failure.
    if let Some(vs_id) = request_store {
        let manager = Arc::clone(&services.store_manager);
        tokio::spawn(async move {
            manager.delete(&vs_id).await;
        });
    }

    let content = result?;
    let redacted = redact_secrets(&content);

    if !disable_history_record {
        if let Some(memory) = &services.memory {
            let memory = Arc::clone(memory);
            let doc = format_conversation_doc(&session_id, spec.name, &instructions, &redacted);
            tokio::spawn(async move {
                if let Err(e) = memory
                    .record_document(StoreType::Conversation, "conversation", &doc)
                    .await
                {
                    // Also reached when the write-back is cancelled at
                    // shutdown; exit quietly either way.
                    debug!(error = %e, "memory write-back failed");
                }
            });
        }
    }

    Ok(redacted)
}

#[allow(clippy::too_many_arguments)]
async fn run_chat(
    services: &Arc<Services>,
    spec: &'static ToolSpec,
    session_id: &str,
    instructions: &str,
    output_format: &str,
    context: Vec<PathBuf>,
    priority_context: Vec<PathBuf>,
    values: &std::collections::HashMap<&'static str, Value>,
    timeout: Duration,
    vector_store_ids: &mut Vec<String>,
) -> Result<String> {
    // Cross-provider handoff: when this provider has no continuation state
    // for the session but another one does, inject a compacted transcript.
    let handoff = build_handoff(services, spec, session_id).await;
    let instructions = match handoff {
        Some(block) => format!("{block}\n\n{instructions}"),
        None => instructions.to_string(),
    };

    let packed = services
        .packer
        .pack(PackRequest {
            instructions,
            output_format: output_format.to_string(),
            context,
            priority_context,
            session_id: session_id.to_string(),
            context_window: spec.context_window,
        })
        .await
        .map_err(map_pack_error)?;

    if !packed.overflow_files.is_empty() {
        let vs_id = services
            .store_manager
            .create(&packed.changed_overflow, Some(session_id))
            .await
            .map_err(|e| EmissaryError::VectorStoreUnavailable(e.to_string()))?;
        if !vector_store_ids.contains(&vs_id) {
            vector_store_ids.push(vs_id);
        }
    }

    let adapter = services.adapter_for(spec)?;
    let tools = ToolHandler::new(
        services.memory_search.clone(),
        services.store_client.clone(),
        vector_store_ids.clone(),
        Arc::clone(&services.dedup),
    );

    // Vision input: load (and screen) images up front so a bad path or URL
    // fails the call before any provider traffic.
    let image_paths: Vec<String> = values
        .get("images")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let images = if image_paths.is_empty() {
        Vec::new()
    } else {
        load_images(&image_paths, ImageLimits::default())
            .await
            .map_err(|e| EmissaryError::Validation(e.to_string()))?
    };

    let request = GenerateRequest {
        prompt: packed.prompt,
        images,
        vector_store_ids: vector_store_ids.clone(),
        temperature: values.get("temperature").and_then(|v| v.as_f64()),
        reasoning_effort: values
            .get("reasoning_effort")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        thinking_budget: values.get("thinking_budget").and_then(|v| v.as_i64()),
        timeout,
        session_id: Some(session_id.to_string()),
    };

    info!(
        tool = %spec.name,
        model = %spec.model,
        session = %session_id,
        inline = packed.inline_files.len(),
        overflow = packed.overflow_files.len(),
        "dispatching chat tool"
    );

    let op_id = format!("{}-{}", spec.name, Uuid::new_v4());
    let outcome = services
        .ops
        .run_with_timeout(op_id, timeout, async move {
            adapter
                .generate(&request, &tools)
                .await
                .map_err(map_adapter_error)
        })
        .await?;

    Ok(outcome.content)
}

/// Inject prior history from a sibling provider when this one starts cold.
async fn build_handoff(
    services: &Arc<Services>,
    spec: &'static ToolSpec,
    session_id: &str,
) -> Option<String> {
    let sessions = &services.sessions;

    let has_native_state = match spec.provider {
        ProviderKind::Responses => sessions
            .get_response_id(session_id)
            .await
            .ok()
            .flatten()
            .is_some(),
        ProviderKind::Gemini => sessions
            .get_gemini_history(session_id)
            .await
            .ok()
            .flatten()
            .is_some(),
        ProviderKind::Grok => sessions
            .get_chat_history(session_id)
            .await
            .ok()
            .flatten()
            .is_some(),
        ProviderKind::Builtin(_) => return None,
    };
    if has_native_state {
        return None;
    }

    let turns = if spec.provider != ProviderKind::Gemini {
        if let Ok(Some(history)) = sessions.get_gemini_history(session_id).await {
            compact::turns_from_contents(&history)
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };
    let turns = if turns.is_empty() && spec.provider != ProviderKind::Grok {
        match sessions.get_chat_history(session_id).await {
            Ok(Some(history)) => compact::turns_from_chat(&history),
            _ => Vec::new(),
        }
    } else {
        turns
    };
    if turns.is_empty() {
        return None;
    }

    let limit = compact::handoff_limit(spec.model);
    let block = compact::compact_for_handoff(&turns, limit, None).await;
    if block.is_empty() {
        None
    } else {
        debug!(session = %session_id, tool = %spec.name, "injecting cross-provider handoff");
        Some(block)
    }
}

fn path_list(
    values: &std::collections::HashMap<&'static str, Value>,
    key: &str,
) -> Vec<PathBuf> {
    values
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

fn render_model_list() -> String {
    let models: Vec<Value> = spec::all_tools()
        .iter()
        .filter(|t| !matches!(t.provider, ProviderKind::Builtin(_)))
        .map(|t| {
            json!({
                "id": t.name,
                "model": t.model,
                "context_window": t.context_window,
                "timeout": t.timeout_secs,
                "description": t.description,
                "parameters": t.params.iter().map(|p| p.name).collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&models).unwrap_or_else(|_| "[]".to_string())
}

fn map_pack_error(err: PackError) -> EmissaryError {
    match err {
        PackError::BudgetExceeded { needed, budget } => {
            EmissaryError::BudgetExceeded { needed, budget }
        }
        PackError::Cache(e) => match e {
            emissary_cache::CacheError::SessionIdTooLong { len } => EmissaryError::Validation(
                format!("session_id too long ({len} bytes, max 1024)"),
            ),
            other => EmissaryError::Database(other.to_string()),
        },
        PackError::Io(e) => EmissaryError::Io(e),
    }
}

fn map_adapter_error(err: AdapterError) -> EmissaryError {
    match err {
        AdapterError::Timeout { secs } => EmissaryError::Timeout { secs },
        AdapterError::GatewayIdle { status, model } => {
            EmissaryError::GatewayIdle { status, model }
        }
        AdapterError::Cancelled => EmissaryError::Cancelled,
        AdapterError::Session(msg) => EmissaryError::Database(msg),
        other => {
            warn!(error = %other, "adapter error");
            EmissaryError::Provider(other.to_string())
        }
    }
}
