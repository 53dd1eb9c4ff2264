//! Per-agent line parsers: turn one line of an agent's stdout into zero or
//! more content events.
//!
//! Agents disagree on their stdout shape (Claude's `stream-json`, Codex's
//! event-per-line JSON, plain text from OpenCode/Kimi). The session engine
//! never branches on agent kind directly; it looks up a [`ParserId`] from the
//! registry and calls [`parse_line`].

use crate::domain::models::ParserId;

/// One parsed content event surfaced on a session's `"content"` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEvent {
    AssistantText { content: String },
    ToolStart { name: String, id: String },
    ToolResult { id: String, result: String, is_error: bool },
    Thought { content: String },
    Usage { input_tokens: u64, output_tokens: u64 },
    Error { message: String },
}

/// Parse one complete line (no trailing newline) into zero or more events.
/// Blank lines produce no events. Lines that don't parse as the expected
/// shape fall back to a plain assistant-text event rather than being dropped,
/// so partial/unexpected output is never silently lost.
pub fn parse_line(parser: ParserId, line: &str) -> Vec<ContentEvent> {
    if line.trim().is_empty() {
        return Vec::new();
    }
    match parser {
        ParserId::ClaudeStreamJson => parse_claude_stream_json(line),
        ParserId::CodexEvents => parse_codex_event(line),
        ParserId::GeminiEvents => parse_gemini_event(line),
        ParserId::PlainText => vec![ContentEvent::AssistantText { content: line.to_string() }],
    }
}

fn json_str<'a>(v: &'a serde_json::Value, key: &str) -> &'a str {
    v.get(key).and_then(|x| x.as_str()).unwrap_or_default()
}

fn parse_claude_stream_json(line: &str) -> Vec<ContentEvent> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
        return vec![ContentEvent::AssistantText { content: line.to_string() }];
    };
    let Some(event_type) = json.get("type").and_then(|t| t.as_str()) else {
        return vec![ContentEvent::AssistantText { content: line.to_string() }];
    };
    match event_type {
        "assistant" => {
            let content = json
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            if content.is_empty() {
                Vec::new()
            } else {
                vec![ContentEvent::AssistantText { content }]
            }
        }
        "tool_use" => vec![ContentEvent::ToolStart {
            name: json_str(&json, "name").to_string(),
            id: json_str(&json, "id").to_string(),
        }],
        "tool_result" => vec![ContentEvent::ToolResult {
            id: json_str(&json, "id").to_string(),
            result: json_str(&json, "result").to_string(),
            is_error: json.get("is_error").and_then(|e| e.as_bool()).unwrap_or(false),
        }],
        "result" => {
            let input = json.get("usage").and_then(|u| u.get("input_tokens")).and_then(|t| t.as_u64()).unwrap_or(0);
            let output = json.get("usage").and_then(|u| u.get("output_tokens")).and_then(|t| t.as_u64()).unwrap_or(0);
            vec![ContentEvent::Usage { input_tokens: input, output_tokens: output }]
        }
        "error" => vec![ContentEvent::Error {
            message: json_str(&json, "message").to_string(),
        }],
        _ => Vec::new(),
    }
}

fn parse_codex_event(line: &str) -> Vec<ContentEvent> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
        return vec![ContentEvent::AssistantText { content: line.to_string() }];
    };
    match json.get("msg").and_then(|m| m.get("type")).and_then(|t| t.as_str()) {
        Some("agent_message") => {
            let content = json.get("msg").and_then(|m| m.get("message")).and_then(|m| m.as_str()).unwrap_or_default();
            vec![ContentEvent::AssistantText { content: content.to_string() }]
        }
        Some("agent_reasoning") => {
            let content = json.get("msg").and_then(|m| m.get("text")).and_then(|t| t.as_str()).unwrap_or_default();
            vec![ContentEvent::Thought { content: content.to_string() }]
        }
        Some("error") => vec![ContentEvent::Error {
            message: json.get("msg").and_then(|m| m.get("message")).and_then(|m| m.as_str()).unwrap_or_default().to_string(),
        }],
        _ => Vec::new(),
    }
}

fn parse_gemini_event(line: &str) -> Vec<ContentEvent> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
        return vec![ContentEvent::AssistantText { content: line.to_string() }];
    };
    match json.get("type").and_then(|t| t.as_str()) {
        Some("content") => vec![ContentEvent::AssistantText { content: json_str(&json, "text").to_string() }],
        Some("error") => vec![ContentEvent::Error { message: json_str(&json, "message").to_string() }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_produces_no_events() {
        assert!(parse_line(ParserId::ClaudeStreamJson, "   ").is_empty());
    }

    #[test]
    fn plain_text_passes_through() {
        let events = parse_line(ParserId::PlainText, "hello world");
        assert_eq!(events, vec![ContentEvent::AssistantText { content: "hello world".to_string() }]);
    }

    #[test]
    fn claude_assistant_text_extracted() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#;
        let events = parse_line(ParserId::ClaudeStreamJson, line);
        assert_eq!(events, vec![ContentEvent::AssistantText { content: "hi".to_string() }]);
    }

    #[test]
    fn claude_error_event() {
        let line = r#"{"type":"error","message":"boom"}"#;
        let events = parse_line(ParserId::ClaudeStreamJson, line);
        assert_eq!(events, vec![ContentEvent::Error { message: "boom".to_string() }]);
    }

    #[test]
    fn unparseable_json_falls_back_to_text() {
        let events = parse_line(ParserId::ClaudeStreamJson, "not json at all");
        assert_eq!(events, vec![ContentEvent::AssistantText { content: "not json at all".to_string() }]);
    }

    #[test]
    fn codex_agent_message() {
        let line = r#"{"msg":{"type":"agent_message","message":"done"}}"#;
        let events = parse_line(ParserId::CodexEvents, line);
        assert_eq!(events, vec![ContentEvent::AssistantText { content: "done".to_string() }]);
    }
}
