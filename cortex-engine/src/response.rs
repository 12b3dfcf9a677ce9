//! Parses what the LLM caller returns into dispatchable text and tool calls.

use serde_json::Value;

/// Whole-message sentinel: the turn produced nothing worth sending.
pub const NO_REPLY: &str = "NO_REPLY";
/// Whole-message sentinel emitted for idle heartbeat turns.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// What the external `llm(context)` function returns.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A single `{id, name, arguments}` tool call as the LLM caller emits it
///, before it's been parsed into a typed
/// [`crate::tools::ToolCall`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// True if `text` is one of the silence sentinels.
pub fn is_silent(text: &str) -> bool {
    text == NO_REPLY || text == HEARTBEAT_OK
}

/// Strips every `[[send_to:<channel>]]` directive out of `text` and returns
/// the cleaned text plus the channels named, in the order they appeared.
/// Repeatable: more than one directive fans the same content out to
/// multiple channels.
pub fn extract_send_to_directives(text: &str) -> (String, Vec<String>) {
    const PREFIX: &str = "[[send_to:";
    const SUFFIX: &str = "]]";

    let mut cleaned = String::with_capacity(text.len());
    let mut channels = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(PREFIX) {
        cleaned.push_str(&rest[..start]);
        let after_prefix = &rest[start + PREFIX.len()..];
        match after_prefix.find(SUFFIX) {
            Some(end) => {
                let channel = after_prefix[..end].trim();
                if !channel.is_empty() {
                    channels.push(channel.to_string());
                }
                rest = &after_prefix[end + SUFFIX.len()..];
            }
            None => {
                // Unterminated directive; treat the rest as literal text.
                cleaned.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    cleaned.push_str(rest);

    (cleaned.trim().to_string(), channels)
}
