//! History representations for the three provider families.
//!
//! `HistoryItem` is the flat Responses-API shape used as the internal lingua
//! franca. `Content`/`Part` is the Gemini-native shape (thought signatures as
//! raw bytes in memory). `ChatMessage` is the OpenAI-chat shape used by Grok.

use serde::{Deserialize, Serialize};

/// One item of Responses-API-format history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryItem {
    Message {
        role: String,
        content: Vec<MessagePart>,
    },
    FunctionCall {
        name: String,
        call_id: String,
        /// JSON-encoded argument object.
        arguments: String,
        /// Base64 of the provider's opaque signature bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    FunctionCallOutput {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    InputText { text: String },
}

impl MessagePart {
    pub fn text(&self) -> &str {
        match self {
            MessagePart::Text { text } | MessagePart::InputText { text } => text,
        }
    }
}

/// Gemini content turn. Roles are `user` or `model`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: "model".into(),
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all text parts.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_call_parts(&self) -> Vec<&Part> {
        self.parts
            .iter()
            .filter(|p| p.function_call.is_some())
            .collect()
    }
}

/// One Gemini part. At most one of `text`, `function_call`,
/// `function_response` is set; `thought_signature` rides alongside a
/// function call and MUST round-trip byte-for-byte.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Part {
    pub text: Option<String>,
    pub function_call: Option<FunctionCall>,
    pub function_response: Option<FunctionResponse>,
    pub thought_signature: Option<Vec<u8>>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_response(name: impl Into<String>, id: Option<String>, response: serde_json::Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                id,
                name: name.into(),
                response,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub id: Option<String>,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

/// OpenAI-chat-format message (Grok). Tool calls are carried on assistant
/// messages; results come back as `role: "tool"` with a matching id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMsg>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Option<Vec<ToolCallMsg>>) -> Self {
        Self {
            role: "assistant".into(),
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMsg {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}
