//! Tool catalog: every tool is a static record of tagged parameter specs,
//! and one validator walks the record list for every call.
//!
//! Routes say where a validated value goes: into the prompt builder, the
//! adapter call, vector-store creation, or session management.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use emissary_core::EmissaryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRoute {
    Prompt,
    Adapter,
    VectorStore,
    Session,
}

pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub route: ParamRoute,
    pub required: bool,
    /// Factory, not a value: list defaults must be fresh per call.
    pub default: Option<fn() -> Value>,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    MemorySearch,
    AttachmentSearch,
    LiveFollow,
    ListModels,
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Responses,
    Gemini,
    Grok,
    Builtin(BuiltinTool),
}

pub struct ToolSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub model: &'static str,
    pub provider: ProviderKind,
    pub context_window: usize,
    pub timeout_secs: u64,
    pub params: &'static [ParamSpec],
}

fn empty_list() -> Value {
    json!([])
}

fn default_output_format() -> Value {
    json!("plain text")
}

fn default_false() -> Value {
    json!(false)
}

fn default_memory_results() -> Value {
    json!(40)
}

fn default_attachment_results() -> Value {
    json!(20)
}

fn default_store_types() -> Value {
    json!(["conversation", "commit"])
}

fn default_follow_lines() -> Value {
    json!(50)
}

macro_rules! chat_params {
    ($($extra:expr),*) => {
        &[
            ParamSpec { name: "instructions", kind: ParamKind::String, route: ParamRoute::Prompt,
                        required: true, default: None,
                        description: "What the model should do" },
            ParamSpec { name: "output_format", kind: ParamKind::String, route: ParamRoute::Prompt,
                        required: false, default: Some(default_output_format),
                        description: "Desired shape of the answer" },
            ParamSpec { name: "context", kind: ParamKind::StringList, route: ParamRoute::Prompt,
                        required: false, default: Some(empty_list),
                        description: "Files or directories to make available to the model" },
            ParamSpec { name: "priority_context", kind: ParamKind::StringList, route: ParamRoute::Prompt,
                        required: false, default: Some(empty_list),
                        description: "Files that must be inlined regardless of budget" },
            ParamSpec { name: "attachments", kind: ParamKind::StringList, route: ParamRoute::VectorStore,
                        required: false, default: Some(empty_list),
                        description: "Files uploaded to a request-scoped vector store" },
            ParamSpec { name: "images", kind: ParamKind::StringList, route: ParamRoute::Adapter,
                        required: false, default: Some(empty_list),
                        description: "Image files or URLs for vision-capable models (JPEG, PNG, GIF, WebP)" },
            ParamSpec { name: "session_id", kind: ParamKind::String, route: ParamRoute::Session,
                        required: true, default: None,
                        description: "Conversation id for multi-turn continuation" },
            ParamSpec { name: "temperature", kind: ParamKind::Number, route: ParamRoute::Adapter,
                        required: false, default: None,
                        description: "Sampling temperature" },
            ParamSpec { name: "disable_history_record", kind: ParamKind::Boolean, route: ParamRoute::Adapter,
                        required: false, default: Some(default_false),
                        description: "Skip writing this conversation to project memory" },
            $($extra),*
        ]
    };
}

static RESPONSES_CHAT_PARAMS: &[ParamSpec] = chat_params![ParamSpec {
    name: "reasoning_effort",
    kind: ParamKind::String,
    route: ParamRoute::Adapter,
    required: false,
    default: None,
    description: "Reasoning effort: low, medium, or high"
}];

static GEMINI_CHAT_PARAMS: &[ParamSpec] = chat_params![ParamSpec {
    name: "thinking_budget",
    kind: ParamKind::Integer,
    route: ParamRoute::Adapter,
    required: false,
    default: None,
    description: "Thinking token budget for reasoning-capable models (-1 = dynamic)"
}];

static GROK_CHAT_PARAMS: &[ParamSpec] = chat_params![];

static MEMORY_SEARCH_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "query",
        kind: ParamKind::String,
        route: ParamRoute::Prompt,
        required: true,
        default: None,
        description: "Search query, or several queries separated by semicolons",
    },
    ParamSpec {
        name: "max_results",
        kind: ParamKind::Integer,
        route: ParamRoute::Prompt,
        required: false,
        default: Some(default_memory_results),
        description: "Maximum results to return",
    },
    ParamSpec {
        name: "store_types",
        kind: ParamKind::StringList,
        route: ParamRoute::Prompt,
        required: false,
        default: Some(default_store_types),
        description: "Store types to search: conversation, commit",
    },
];

static ATTACHMENT_SEARCH_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "query",
        kind: ParamKind::String,
        route: ParamRoute::Prompt,
        required: true,
        default: None,
        description: "Search query",
    },
    ParamSpec {
        name: "max_results",
        kind: ParamKind::Integer,
        route: ParamRoute::Prompt,
        required: false,
        default: Some(default_attachment_results),
        description: "Maximum results to return",
    },
    ParamSpec {
        name: "session_id",
        kind: ParamKind::String,
        route: ParamRoute::Session,
        required: true,
        default: None,
        description: "Session whose attached stores should be searched",
    },
];

static LIVE_FOLLOW_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "session_id",
        kind: ParamKind::String,
        route: ParamRoute::Session,
        required: true,
        default: None,
        description: "Session to follow: an emissary session id or a CLI-native one",
    },
    ParamSpec {
        name: "lines",
        kind: ParamKind::Integer,
        route: ParamRoute::Prompt,
        required: false,
        default: Some(default_follow_lines),
        description: "Number of recent transcript entries to return",
    },
];

static NO_PARAMS: &[ParamSpec] = &[];

static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "chat_with_gpt4_1",
        aliases: &[],
        description: "Fast long-context assistant (OpenAI gpt-4.1).",
        model: "gpt-4.1",
        provider: ProviderKind::Responses,
        context_window: 1_000_000,
        timeout_secs: 300,
        params: RESPONSES_CHAT_PARAMS,
    },
    ToolSpec {
        name: "chat_with_o3",
        aliases: &[],
        description: "Chain-of-thought helper (OpenAI o3).",
        model: "o3",
        provider: ProviderKind::Responses,
        context_window: 200_000,
        timeout_secs: 300,
        params: RESPONSES_CHAT_PARAMS,
    },
    ToolSpec {
        name: "chat_with_o3_pro",
        aliases: &[],
        description: "Heavy reasoning model, background mode only (OpenAI o3-pro).",
        model: "o3-pro",
        provider: ProviderKind::Responses,
        context_window: 200_000,
        timeout_secs: 1800,
        params: RESPONSES_CHAT_PARAMS,
    },
    ToolSpec {
        name: "chat_with_o4_mini",
        aliases: &[],
        description: "Compact reasoning model (OpenAI o4-mini).",
        model: "o4-mini",
        provider: ProviderKind::Responses,
        context_window: 200_000,
        timeout_secs: 300,
        params: RESPONSES_CHAT_PARAMS,
    },
    ToolSpec {
        name: "chat_with_gemini_pro",
        aliases: &[],
        description: "Deep multimodal reasoner (Gemini 2.5 Pro via Vertex).",
        model: "gemini-2.5-pro",
        provider: ProviderKind::Gemini,
        context_window: 2_000_000,
        timeout_secs: 300,
        params: GEMINI_CHAT_PARAMS,
    },
    ToolSpec {
        name: "chat_with_gemini_flash",
        aliases: &[],
        description: "Flash summary sprinter (Gemini 2.5 Flash via Vertex).",
        model: "gemini-2.5-flash",
        provider: ProviderKind::Gemini,
        context_window: 1_000_000,
        timeout_secs: 120,
        params: GEMINI_CHAT_PARAMS,
    },
    ToolSpec {
        name: "chat_with_grok",
        aliases: &[],
        description: "xAI Grok assistant.",
        model: "grok-4",
        provider: ProviderKind::Grok,
        context_window: 256_000,
        timeout_secs: 300,
        params: GROK_CHAT_PARAMS,
    },
    ToolSpec {
        name: "search_project_memory",
        aliases: &["search_project_history"],
        description: "Search prior conversations and commit history for this project.",
        model: "memory_search",
        provider: ProviderKind::Builtin(BuiltinTool::MemorySearch),
        context_window: 0,
        timeout_secs: 30,
        params: MEMORY_SEARCH_PARAMS,
    },
    ToolSpec {
        name: "search_session_attachments",
        aliases: &[],
        description: "Search files attached to a session's vector stores.",
        model: "attachment_search",
        provider: ProviderKind::Builtin(BuiltinTool::AttachmentSearch),
        context_window: 0,
        timeout_secs: 30,
        params: ATTACHMENT_SEARCH_PARAMS,
    },
    ToolSpec {
        name: "live_follow_session",
        aliases: &[],
        description: "Follow a CLI agent session (Codex, Claude, Gemini) and return recent \
                      transcript content. Useful for monitoring what a running CLI agent is \
                      doing or has done.",
        model: "live_follow_session",
        provider: ProviderKind::Builtin(BuiltinTool::LiveFollow),
        context_window: 0,
        timeout_secs: 30,
        params: LIVE_FOLLOW_PARAMS,
    },
    ToolSpec {
        name: "list_models",
        aliases: &[],
        description: "List the available model tools and their parameters.",
        model: "",
        provider: ProviderKind::Builtin(BuiltinTool::ListModels),
        context_window: 0,
        timeout_secs: 10,
        params: NO_PARAMS,
    },
    ToolSpec {
        name: "ping",
        aliases: &[],
        description: "Liveness probe; returns \"pong\".",
        model: "",
        provider: ProviderKind::Builtin(BuiltinTool::Ping),
        context_window: 0,
        timeout_secs: 10,
        params: NO_PARAMS,
    },
];

pub fn all_tools() -> &'static [ToolSpec] {
    TOOLS
}

/// Resolve a tool by primary name or alias.
pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS
        .iter()
        .find(|t| t.name == name || t.aliases.contains(&name))
}

/// JSON schema for the MCP `tools/list` response.
pub fn input_schema(spec: &ToolSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in spec.params {
        let ty = match param.kind {
            ParamKind::String => json!({ "type": "string", "description": param.description }),
            ParamKind::Integer => json!({ "type": "integer", "description": param.description }),
            ParamKind::Number => json!({ "type": "number", "description": param.description }),
            ParamKind::Boolean => json!({ "type": "boolean", "description": param.description }),
            ParamKind::StringList => json!({
                "type": "array",
                "items": { "type": "string" },
                "description": param.description
            }),
        };
        properties.insert(param.name.to_string(), ty);
        if param.required {
            required.push(json!(param.name));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

/// Validate & coerce call arguments against the tool's parameter records.
///
/// Unknown arguments and type mismatches are validation errors; optional
/// parameters materialize their default (factories run per call).
pub fn validate(
    spec: &ToolSpec,
    args: &Value,
) -> Result<HashMap<&'static str, Value>, EmissaryError> {
    let empty = Map::new();
    let map = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(EmissaryError::Validation(
                "arguments must be an object".into(),
            ))
        }
    };

    for key in map.keys() {
        if !spec.params.iter().any(|p| p.name == key) {
            return Err(EmissaryError::Validation(format!(
                "unexpected argument '{key}' for tool {}",
                spec.name
            )));
        }
    }

    let mut out = HashMap::new();
    for param in spec.params {
        let value = match map.get(param.name) {
            Some(v) if !v.is_null() => coerce(param, v)?,
            _ => {
                if param.required {
                    return Err(EmissaryError::Validation(format!(
                        "missing required argument '{}' for tool {}",
                        param.name, spec.name
                    )));
                }
                match param.default {
                    Some(factory) => factory(),
                    None => Value::Null,
                }
            }
        };
        out.insert(param.name, value);
    }
    Ok(out)
}

fn coerce(param: &ParamSpec, value: &Value) -> Result<Value, EmissaryError> {
    let ok = match param.kind {
        ParamKind::String => value.is_string(),
        ParamKind::Integer => value.is_i64() || value.is_u64(),
        ParamKind::Number => value.is_number(),
        ParamKind::Boolean => value.is_boolean(),
        ParamKind::StringList => value
            .as_array()
            .map(|arr| arr.iter().all(|v| v.is_string()))
            .unwrap_or(false),
    };
    if !ok {
        return Err(EmissaryError::Validation(format!(
            "argument '{}' has the wrong type",
            param.name
        )));
    }
    Ok(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_contains_chat_and_builtin_tools() {
        assert!(find_tool("chat_with_gpt4_1").is_some());
        assert!(find_tool("chat_with_gemini_pro").is_some());
        assert!(find_tool("ping").is_some());
        assert!(find_tool("nope").is_none());
    }

    #[test]
    fn alias_resolves_to_memory_search() {
        let spec = find_tool("search_project_history").unwrap();
        assert_eq!(spec.name, "search_project_memory");
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let spec = find_tool("chat_with_gpt4_1").unwrap();
        let err = validate(spec, &json!({ "instructions": "hi" })).unwrap_err();
        assert!(err.to_string().contains("session_id"));
    }

    #[test]
    fn unknown_argument_is_rejected() {
        let spec = find_tool("ping").unwrap();
        assert!(validate(spec, &json!({ "bogus": 1 })).is_err());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let spec = find_tool("chat_with_gpt4_1").unwrap();
        let err = validate(
            spec,
            &json!({ "instructions": "x", "session_id": "s", "context": "not-a-list" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("context"));
    }

    #[test]
    fn defaults_materialize_fresh_per_call() {
        let spec = find_tool("search_project_memory").unwrap();
        let a = validate(spec, &json!({ "query": "q" })).unwrap();
        let b = validate(spec, &json!({ "query": "q" })).unwrap();
        assert_eq!(a["max_results"], json!(40));
        assert_eq!(a["store_types"], json!(["conversation", "commit"]));
        assert_eq!(a["store_types"], b["store_types"]);
    }

    #[test]
    fn schema_lists_required_params() {
        let spec = find_tool("chat_with_gpt4_1").unwrap();
        let schema = input_schema(spec);
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"instructions"));
        assert!(required.contains(&"session_id"));
        assert!(schema["properties"]["context"]["type"] == "array");
    }

    #[test]
    fn reasoning_effort_only_on_responses_tools() {
        let has = |name: &str| {
            find_tool(name)
                .unwrap()
                .params
                .iter()
                .any(|p| p.name == "reasoning_effort")
        };
        assert!(has("chat_with_o3"));
        assert!(!has("chat_with_gemini_pro"));
        assert!(!has("chat_with_grok"));
    }
}
