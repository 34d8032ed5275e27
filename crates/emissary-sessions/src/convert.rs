//! Converters between the flat Responses-API history shape and Gemini
//! `Content` turns, plus the JSON form used both on disk and on the Gemini
//! wire (camelCase, signatures as base64).
//!
//! Grouping rules: consecutive function calls collapse into a single model
//! turn; consecutive function outputs collapse into a single user turn.
//! Thought signatures survive every conversion byte-for-byte.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Result, SessionError};
use crate::types::{Content, FunctionCall, FunctionResponse, HistoryItem, MessagePart, Part};

/// Convert Responses-API history to a Gemini `Content` list.
pub fn responses_to_contents(history: &[HistoryItem]) -> Vec<Content> {
    let call_names = call_id_to_name(history);
    let mut contents = Vec::new();
    let mut i = 0;

    while i < history.len() {
        match &history[i] {
            HistoryItem::Message { role, content } => {
                let gemini_role = if role == "user" { "user" } else { "model" };
                let parts: Vec<Part> = content
                    .iter()
                    .filter(|p| !p.text().is_empty())
                    .map(|p| Part::text(p.text()))
                    .collect();
                if !parts.is_empty() {
                    contents.push(Content {
                        role: gemini_role.to_string(),
                        parts,
                    });
                }
                i += 1;
            }
            HistoryItem::FunctionCall { .. } => {
                let mut parts = Vec::new();
                while let Some(HistoryItem::FunctionCall {
                    name,
                    call_id,
                    arguments,
                    thought_signature,
                }) = history.get(i)
                {
                    parts.push(function_call_part(
                        name,
                        call_id,
                        arguments,
                        thought_signature.as_deref(),
                    ));
                    i += 1;
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: "model".to_string(),
                        parts,
                    });
                }
            }
            HistoryItem::FunctionCallOutput { .. } => {
                let mut parts = Vec::new();
                while let Some(HistoryItem::FunctionCallOutput {
                    call_id,
                    name,
                    output,
                }) = history.get(i)
                {
                    let resolved = name
                        .clone()
                        .or_else(|| call_names.get(call_id.as_str()).cloned())
                        .unwrap_or_else(|| "unknown".to_string());
                    parts.push(Part::function_response(
                        resolved,
                        Some(call_id.clone()),
                        json!({ "result": output }),
                    ));
                    i += 1;
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: "user".to_string(),
                        parts,
                    });
                }
            }
        }
    }

    contents
}

/// Flatten one `Content` back into Responses-API items. Text parts come
/// first as a single message, then function calls, then function outputs.
pub fn content_to_responses(content: &Content) -> Vec<HistoryItem> {
    let role = if content.role == "user" { "user" } else { "assistant" };

    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut outputs = Vec::new();

    for part in &content.parts {
        if let Some(text) = &part.text {
            if !text.is_empty() {
                text_parts.push(MessagePart::Text { text: text.clone() });
            }
        }
        if let Some(fc) = &part.function_call {
            calls.push(HistoryItem::FunctionCall {
                name: fc.name.clone(),
                call_id: fc.id.clone().unwrap_or_default(),
                arguments: fc.args.to_string(),
                thought_signature: part.thought_signature.as_ref().map(|b| B64.encode(b)),
            });
        }
        if let Some(fr) = &part.function_response {
            let output = match fr.response.get("result") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => fr.response.to_string(),
            };
            outputs.push(HistoryItem::FunctionCallOutput {
                call_id: fr.id.clone().unwrap_or_default(),
                name: Some(fr.name.clone()),
                output,
            });
        }
    }

    let mut items = Vec::new();
    if !text_parts.is_empty() {
        items.push(HistoryItem::Message {
            role: role.to_string(),
            content: text_parts,
        });
    }
    items.extend(calls);
    items.extend(outputs);
    items
}

fn function_call_part(
    name: &str,
    call_id: &str,
    arguments: &str,
    thought_signature: Option<&str>,
) -> Part {
    let args: Value = serde_json::from_str(arguments).unwrap_or_else(|_| {
        warn!(name, "unparseable function-call arguments, substituting empty object");
        json!({})
    });
    let bytes = thought_signature.and_then(|sig| match B64.decode(sig) {
        Ok(b) => Some(b),
        Err(e) => {
            warn!(name, error = %e, "invalid base64 thought signature, dropping");
            None
        }
    });
    Part {
        function_call: Some(FunctionCall {
            name: name.to_string(),
            id: if call_id.is_empty() {
                None
            } else {
                Some(call_id.to_string())
            },
            args,
        }),
        thought_signature: bytes,
        ..Default::default()
    }
}

fn call_id_to_name(history: &[HistoryItem]) -> HashMap<&str, String> {
    history
        .iter()
        .filter_map(|item| match item {
            HistoryItem::FunctionCall { name, call_id, .. } => {
                Some((call_id.as_str(), name.clone()))
            }
            _ => None,
        })
        .collect()
}

// ── JSON form (disk + Gemini wire) ───────────────────────────────────────────

/// Serialize a `Content` to its camelCase JSON form. Thought signatures are
/// encoded base64, exactly as the provider sends them.
pub fn content_to_json(content: &Content) -> Value {
    let parts: Vec<Value> = content
        .parts
        .iter()
        .map(|part| {
            let mut obj = serde_json::Map::new();
            if let Some(text) = &part.text {
                obj.insert("text".into(), json!(text));
            }
            if let Some(fc) = &part.function_call {
                let mut call = serde_json::Map::new();
                call.insert("name".into(), json!(fc.name));
                call.insert("args".into(), fc.args.clone());
                if let Some(id) = &fc.id {
                    call.insert("id".into(), json!(id));
                }
                obj.insert("functionCall".into(), Value::Object(call));
            }
            if let Some(fr) = &part.function_response {
                let mut resp = serde_json::Map::new();
                resp.insert("name".into(), json!(fr.name));
                resp.insert("response".into(), fr.response.clone());
                if let Some(id) = &fr.id {
                    resp.insert("id".into(), json!(id));
                }
                obj.insert("functionResponse".into(), Value::Object(resp));
            }
            if let Some(sig) = &part.thought_signature {
                obj.insert("thoughtSignature".into(), json!(B64.encode(sig)));
            }
            Value::Object(obj)
        })
        .collect();

    json!({ "role": content.role, "parts": parts })
}

/// Parse a `Content` from its camelCase JSON form.
pub fn content_from_json(value: &Value) -> Result<Content> {
    let role = value
        .get("role")
        .and_then(|r| r.as_str())
        .unwrap_or("model")
        .to_string();

    let mut parts = Vec::new();
    for raw in value
        .get("parts")
        .and_then(|p| p.as_array())
        .into_iter()
        .flatten()
    {
        let mut part = Part::default();
        if let Some(text) = raw.get("text").and_then(|t| t.as_str()) {
            part.text = Some(text.to_string());
        }
        if let Some(fc) = raw.get("functionCall") {
            let name = fc
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| SessionError::Corrupt("functionCall missing name".into()))?;
            part.function_call = Some(FunctionCall {
                name: name.to_string(),
                id: fc.get("id").and_then(|i| i.as_str()).map(str::to_string),
                args: fc.get("args").cloned().unwrap_or_else(|| json!({})),
            });
        }
        if let Some(fr) = raw.get("functionResponse") {
            let name = fr
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| SessionError::Corrupt("functionResponse missing name".into()))?;
            part.function_response = Some(FunctionResponse {
                id: fr.get("id").and_then(|i| i.as_str()).map(str::to_string),
                name: name.to_string(),
                response: fr.get("response").cloned().unwrap_or_else(|| json!({})),
            });
        }
        if let Some(sig) = raw.get("thoughtSignature").and_then(|s| s.as_str()) {
            part.thought_signature = Some(
                B64.decode(sig)
                    .map_err(|e| SessionError::Corrupt(format!("bad thoughtSignature: {e}")))?,
            );
        }
        parts.push(part);
    }

    Ok(Content { role, parts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, id: &str, sig: Option<&[u8]>) -> HistoryItem {
        HistoryItem::FunctionCall {
            name: name.into(),
            call_id: id.into(),
            arguments: r#"{"query":"rust"}"#.into(),
            thought_signature: sig.map(|b| B64.encode(b)),
        }
    }

    fn output(id: &str) -> HistoryItem {
        HistoryItem::FunctionCallOutput {
            call_id: id.into(),
            name: None,
            output: "42 results".into(),
        }
    }

    #[test]
    fn consecutive_calls_group_into_one_model_turn() {
        let history = vec![
            HistoryItem::Message {
                role: "user".into(),
                content: vec![MessagePart::Text { text: "hi".into() }],
            },
            call("search_project_memory", "c1", None),
            call("search_session_attachments", "c2", None),
            output("c1"),
            output("c2"),
        ];

        let contents = responses_to_contents(&history);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
        assert_eq!(contents[1].parts.len(), 2);
        assert_eq!(contents[2].role, "user");
        assert_eq!(contents[2].parts.len(), 2);
        // Output parts resolve their function name through the call-id map.
        let fr = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(fr.name, "search_project_memory");
    }

    #[test]
    fn thought_signature_survives_round_trip_bit_for_bit() {
        let sig: Vec<u8> = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0xff, 0x10, 0x80, 1, 2, 3, 4, 5, 6, 7, 8];
        let history = vec![call("search_project_memory", "c1", Some(&sig))];

        let contents = responses_to_contents(&history);
        assert_eq!(contents[0].parts[0].thought_signature.as_deref(), Some(sig.as_slice()));

        let back = content_to_responses(&contents[0]);
        match &back[0] {
            HistoryItem::FunctionCall {
                thought_signature: Some(b64),
                ..
            } => assert_eq!(B64.decode(b64).unwrap(), sig),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn json_form_round_trips_signature_bytes() {
        let sig: Vec<u8> = (0u8..=255).collect();
        let content = Content {
            role: "model".into(),
            parts: vec![Part {
                function_call: Some(FunctionCall {
                    name: "file_search_msearch".into(),
                    id: Some("c9".into()),
                    args: json!({"queries": ["a"]}),
                }),
                thought_signature: Some(sig.clone()),
                ..Default::default()
            }],
        };

        let parsed = content_from_json(&content_to_json(&content)).unwrap();
        assert_eq!(parsed, content);
        assert_eq!(parsed.parts[0].thought_signature.as_deref(), Some(sig.as_slice()));
    }

    #[test]
    fn content_flattens_text_and_calls() {
        let content = Content {
            role: "model".into(),
            parts: vec![
                Part::text("thinking aloud"),
                Part {
                    function_call: Some(FunctionCall {
                        name: "search_project_memory".into(),
                        id: Some("c1".into()),
                        args: json!({"query": "q"}),
                    }),
                    ..Default::default()
                },
            ],
        };
        let items = content_to_responses(&content);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], HistoryItem::Message { role, .. } if role == "assistant"));
        assert!(matches!(&items[1], HistoryItem::FunctionCall { name, .. } if name == "search_project_memory"));
    }

    #[test]
    fn function_response_result_string_is_extracted() {
        let content = Content {
            role: "user".into(),
            parts: vec![Part::function_response(
                "search_project_memory",
                Some("c1".into()),
                json!({"result": "found things"}),
            )],
        };
        let items = content_to_responses(&content);
        match &items[0] {
            HistoryItem::FunctionCallOutput { output, .. } => assert_eq!(output, "found things"),
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
