//! `live_follow_session`: locate and tail CLI agent session transcripts.
//!
//! Codex writes JSONL thread events, Claude writes JSONL user/assistant
//! messages, Gemini writes one JSON document with a `messages` array. The
//! tailer normalizes all three into a common entry stream; the service
//! resolves a session id to a transcript file through the CLI session
//! bridge, a pending-marker scan, or a direct filename lookup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tracing::{debug, warn};

use emissary_core::blocking::run_blocking;
use emissary_sessions::CliSessionBridge;

/// Default number of entries returned by the tool.
pub const DEFAULT_TAIL_LINES: usize = 50;
/// Tool outputs over this length are clipped in the rendered transcript.
const MAX_OUTPUT_CHARS: usize = 500;
/// Directory recursion cap for transcript lookups.
const MAX_LOOKUP_DEPTH: usize = 6;
/// How recent a transcript must be for the pending-marker scan.
const PENDING_SCAN_WINDOW: Duration = Duration::from_secs(86_400);
/// Bytes of a transcript scanned for the session-id marker.
const PENDING_SCAN_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Codex,
    Claude,
    Gemini,
}

/// One normalized transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    Message { text: String, timestamp: Option<String> },
    Reasoning { text: String, timestamp: Option<String> },
    ToolCall { name: String, arguments: String },
    ToolOutput { output: String },
}

/// Detect the transcript format from the head of the file.
pub fn detect_format(path: &Path) -> TranscriptFormat {
    let Ok(content) = std::fs::read_to_string(path) else {
        return TranscriptFormat::Codex;
    };
    let first_line = content.lines().next().unwrap_or("").trim();

    if let Ok(data) = serde_json::from_str::<Value>(first_line) {
        if data.get("thread_id").is_some()
            || data.get("type").and_then(|t| t.as_str()) == Some("thread.started")
            || data.get("item").is_some()
            || data.get("payload").is_some()
        {
            return TranscriptFormat::Codex;
        }
        if matches!(
            data.get("type").and_then(|t| t.as_str()),
            Some("user") | Some("assistant")
        ) || data.get("message").is_some()
        {
            return TranscriptFormat::Claude;
        }
        if data.get("messages").is_some() {
            return TranscriptFormat::Gemini;
        }
    }

    // A single JSON document with a messages array is a Gemini save file.
    if let Ok(whole) = serde_json::from_str::<Value>(&content) {
        if whole.get("messages").is_some() {
            return TranscriptFormat::Gemini;
        }
    }

    TranscriptFormat::Codex
}

/// Read and parse the last `lines` relevant entries from a transcript.
pub fn tail(path: &Path, format: TranscriptFormat, lines: usize) -> Vec<TranscriptEntry> {
    let mut entries = match format {
        TranscriptFormat::Codex => parse_jsonl(path, parse_codex_entry),
        TranscriptFormat::Claude => parse_jsonl(path, parse_claude_entry),
        TranscriptFormat::Gemini => parse_gemini(path),
    };
    if entries.len() > lines {
        entries.drain(..entries.len() - lines);
    }
    entries
}

/// Render entries as readable text, the same surface the CLI user would see.
pub fn render_entries(entries: &[TranscriptEntry]) -> String {
    let mut parts = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            TranscriptEntry::Message { text, .. } => parts.push(text.clone()),
            TranscriptEntry::Reasoning { text, .. } => parts.push(format!("[thinking] {text}")),
            TranscriptEntry::ToolCall { name, arguments } => {
                parts.push(format!("[tool: {name}] {arguments}"))
            }
            TranscriptEntry::ToolOutput { output } => {
                let mut clipped = output.clone();
                if clipped.len() > MAX_OUTPUT_CHARS {
                    let mut cut = MAX_OUTPUT_CHARS;
                    while !clipped.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    clipped = format!("{}...", &clipped[..cut]);
                }
                parts.push(format!("[output] {clipped}"))
            }
        }
    }
    parts.join("\n\n")
}

fn parse_jsonl(
    path: &Path,
    parse: fn(&Value) -> Option<TranscriptEntry>,
) -> Vec<TranscriptEntry> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            serde_json::from_str::<Value>(line).ok().and_then(|v| parse(&v))
        })
        .collect()
}

fn parse_codex_entry(data: &Value) -> Option<TranscriptEntry> {
    let timestamp = data
        .get("timestamp")
        .and_then(|t| t.as_str())
        .map(str::to_string);

    // Legacy shape: item.completed → agent_message.
    if data.get("type").and_then(|t| t.as_str()) == Some("item.completed") {
        let item = data.get("item")?;
        if item.get("type").and_then(|t| t.as_str()) == Some("agent_message") {
            return Some(TranscriptEntry::Message {
                text: item.get("text").and_then(|t| t.as_str())?.to_string(),
                timestamp,
            });
        }
        return None;
    }

    // Current shape: response_item with a typed payload.
    if data.get("type").and_then(|t| t.as_str()) == Some("response_item") {
        let payload = data.get("payload")?;
        return match payload.get("type").and_then(|t| t.as_str()) {
            Some("message") => {
                let text = collect_texts(payload.get("content")?, "output_text");
                (!text.is_empty()).then_some(TranscriptEntry::Message { text, timestamp })
            }
            // Reasoning content is encrypted; only the summary is readable.
            Some("reasoning") => {
                let text = collect_texts(payload.get("summary")?, "summary_text");
                (!text.is_empty()).then_some(TranscriptEntry::Reasoning { text, timestamp })
            }
            Some("function_call") => Some(TranscriptEntry::ToolCall {
                name: payload
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string(),
                arguments: payload
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .unwrap_or_default()
                    .to_string(),
            }),
            Some("function_call_output") => Some(TranscriptEntry::ToolOutput {
                output: payload
                    .get("output")
                    .and_then(|o| o.as_str())
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => None,
        };
    }

    // Legacy reasoning events.
    if data.get("type").and_then(|t| t.as_str()) == Some("event_msg") {
        let payload = data.get("payload")?;
        if payload.get("type").and_then(|t| t.as_str()) == Some("agent_reasoning") {
            return Some(TranscriptEntry::Reasoning {
                text: payload.get("text").and_then(|t| t.as_str())?.to_string(),
                timestamp,
            });
        }
    }

    None
}

fn collect_texts(items: &Value, kind: &str) -> String {
    items
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter(|i| i.get("type").and_then(|t| t.as_str()) == Some(kind))
                .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn parse_claude_entry(data: &Value) -> Option<TranscriptEntry> {
    match data.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => {
            let content = data.pointer("/message/content")?;
            if let Some(blocks) = content.as_array() {
                // A tool_use block wins over any surrounding text.
                for block in blocks {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        return Some(TranscriptEntry::ToolCall {
                            name: block
                                .get("name")
                                .and_then(|n| n.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: block
                                .get("input")
                                .map(|i| i.to_string())
                                .unwrap_or_default(),
                        });
                    }
                }
                let text = collect_texts(content, "text");
                return (!text.is_empty()).then_some(TranscriptEntry::Message {
                    text,
                    timestamp: None,
                });
            }
            let text = content.as_str()?.to_string();
            (!text.is_empty()).then_some(TranscriptEntry::Message {
                text,
                timestamp: None,
            })
        }
        Some("tool_result") => Some(TranscriptEntry::ToolOutput {
            output: data
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    }
}

fn parse_gemini(path: &Path) -> Vec<TranscriptEntry> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(data) = serde_json::from_str::<Value>(&content) else {
        return Vec::new();
    };
    data.get("messages")
        .and_then(|m| m.as_array())
        .map(|messages| {
            messages
                .iter()
                .filter_map(parse_gemini_entry)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_gemini_entry(msg: &Value) -> Option<TranscriptEntry> {
    match msg.get("role").and_then(|r| r.as_str()) {
        Some("model") => {
            if let Some(tc) = msg
                .get("tool_calls")
                .and_then(|t| t.as_array())
                .and_then(|arr| arr.first())
            {
                return Some(TranscriptEntry::ToolCall {
                    name: tc
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: tc.get("arguments").map(|a| a.to_string()).unwrap_or_default(),
                });
            }
            let text = msg.get("content").and_then(|c| c.as_str())?.to_string();
            (!text.is_empty()).then_some(TranscriptEntry::Message {
                text,
                timestamp: None,
            })
        }
        Some("tool") => Some(TranscriptEntry::ToolOutput {
            output: msg
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    }
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct LiveFollowService {
    bridge: Arc<CliSessionBridge>,
    transcript_dirs: Vec<PathBuf>,
    project: String,
}

impl LiveFollowService {
    pub fn new(bridge: Arc<CliSessionBridge>, transcript_dirs: Vec<PathBuf>, project: String) -> Self {
        Self {
            bridge,
            transcript_dirs,
            project,
        }
    }

    /// Follow a session and return its recent transcript content.
    ///
    /// Resolution order: bridge mapping, pending-marker scan, then the
    /// session id used directly as a CLI-native id.
    pub async fn follow(&self, session_id: &str, lines: usize) -> String {
        let mut transcript = None;

        match self.bridge.get_cli_name(&self.project, session_id).await {
            Ok(Some(cli_name)) => {
                if let Ok(Some(native_id)) = self
                    .bridge
                    .get_cli_session_id(&self.project, session_id, &cli_name)
                    .await
                {
                    transcript = self.locate(&native_id).await;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cli session bridge lookup failed"),
        }

        if transcript.is_none() {
            if let Ok(Some(_cli)) = self.bridge.pending_cli(&self.project, session_id).await {
                transcript = self.find_by_marker(session_id).await;
            }
        }

        if transcript.is_none() {
            transcript = self.locate(session_id).await;
        }

        let Some(path) = transcript else {
            return format!("Error: No transcript found for session '{session_id}'");
        };

        debug!(path = %path.display(), "tailing transcript");
        let rendered = run_blocking(move || {
            let format = detect_format(&path);
            render_entries(&tail(&path, format, lines))
        })
        .await;

        if rendered.is_empty() {
            format!("No content in transcript for session '{session_id}'")
        } else {
            rendered
        }
    }

    /// Most recently modified transcript whose filename contains `needle`.
    async fn locate(&self, needle: &str) -> Option<PathBuf> {
        let dirs = self.transcript_dirs.clone();
        let needle = needle.to_string();
        run_blocking(move || {
            let mut best: Option<(SystemTime, PathBuf)> = None;
            for dir in &dirs {
                scan_dir(dir, 0, &mut |path| {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                    if name.map(|n| n.contains(&needle)).unwrap_or(false) {
                        if let Ok(modified) = path.metadata().and_then(|m| m.modified()) {
                            if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                                best = Some((modified, path.to_path_buf()));
                            }
                        }
                    }
                });
            }
            best.map(|(_, path)| path)
        })
        .await
    }

    /// Scan recent transcripts for the session-id marker injected into the
    /// task text when the CLI run was launched.
    async fn find_by_marker(&self, session_id: &str) -> Option<PathBuf> {
        let dirs = self.transcript_dirs.clone();
        let marker = session_id.to_string();
        run_blocking(move || {
            let now = SystemTime::now();
            let mut found = None;
            for dir in &dirs {
                scan_dir(dir, 0, &mut |path| {
                    if found.is_some() {
                        return;
                    }
                    let fresh = path
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(|m| now.duration_since(m).unwrap_or_default() < PENDING_SCAN_WINDOW)
                        .unwrap_or(false);
                    if !fresh {
                        return;
                    }
                    if let Ok(head) = read_head(path, PENDING_SCAN_BYTES) {
                        if head.contains(&marker) {
                            found = Some(path.to_path_buf());
                        }
                    }
                });
            }
            found
        })
        .await
    }
}

fn scan_dir(dir: &Path, depth: usize, visit: &mut dyn FnMut(&Path)) {
    if depth > MAX_LOOKUP_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_dir(&path, depth + 1, visit);
        } else {
            visit(&path);
        }
    }
}

fn read_head(path: &Path, max_bytes: usize) -> std::io::Result<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; max_bytes];
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
