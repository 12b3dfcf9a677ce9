//! Typed tool dispatch.

use cortex_core::domain::Priority;
use serde::Deserialize;

use crate::response::ToolCallRequest;

/// The tool calls this turn loop recognizes.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SessionsSpawn { task: String, priority: Priority },
    MemoryQuery { query: String, limit: usize },
    /// An unrecognized tool name; `raw` is the untouched arguments payload
    /// so the caller can at least log it.
    Unknown { name: String, raw: serde_json::Value },
}

#[derive(Deserialize)]
struct SpawnArgs {
    task: String,
    #[serde(default)]
    priority: Option<Priority>,
}

#[derive(Deserialize)]
struct MemoryQueryArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

const DEFAULT_MEMORY_QUERY_LIMIT: usize = 5;

impl ToolCall {
    /// Parses a raw request, falling back to `Unknown` for unrecognized
    /// names or a malformed arguments payload for a recognized one (a
    /// malformed call is still someone else's bug to fix, not this turn's
    /// fault, so it degrades to `Unknown` rather than failing the parse).
    pub fn parse(request: &ToolCallRequest) -> Self {
        match request.name.as_str() {
            "sessions_spawn" => match serde_json::from_value::<SpawnArgs>(request.arguments.clone()) {
                Ok(args) => ToolCall::SessionsSpawn {
                    task: args.task,
                    priority: args.priority.unwrap_or(Priority::Normal),
                },
                Err(_) => ToolCall::Unknown {
                    name: request.name.clone(),
                    raw: request.arguments.clone(),
                },
            },
            "memory_query" => match serde_json::from_value::<MemoryQueryArgs>(request.arguments.clone()) {
                Ok(args) => ToolCall::MemoryQuery {
                    query: args.query,
                    limit: args.limit.unwrap_or(DEFAULT_MEMORY_QUERY_LIMIT),
                },
                Err(_) => ToolCall::Unknown {
                    name: request.name.clone(),
                    raw: request.arguments.clone(),
                },
            },
            other => ToolCall::Unknown {
                name: other.to_string(),
                raw: request.arguments.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call-1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn parses_sessions_spawn_with_default_priority() {
        let parsed = ToolCall::parse(&request("sessions_spawn", serde_json::json!({"task": "research weather"})));
        assert_eq!(
            parsed,
            ToolCall::SessionsSpawn {
                task: "research weather".into(),
                priority: Priority::Normal,
            }
        );
    }

    #[test]
    fn parses_memory_query_with_default_limit() {
        let parsed = ToolCall::parse(&request("memory_query", serde_json::json!({"query": "server_ip"})));
        assert_eq!(
            parsed,
            ToolCall::MemoryQuery {
                query: "server_ip".into(),
                limit: DEFAULT_MEMORY_QUERY_LIMIT,
            }
        );
    }

    #[test]
    fn unrecognized_name_becomes_unknown() {
        let parsed = ToolCall::parse(&request("delete_everything", serde_json::json!({})));
        assert!(matches!(parsed, ToolCall::Unknown { name, .. } if name == "delete_everything"));
    }

    #[test]
    fn malformed_arguments_on_a_known_tool_degrade_to_unknown() {
        let parsed = ToolCall::parse(&request("sessions_spawn", serde_json::json!({"oops": true})));
        assert!(matches!(parsed, ToolCall::Unknown { name, .. } if name == "sessions_spawn"));
    }
}
