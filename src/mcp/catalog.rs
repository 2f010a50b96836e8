use crate::errors::{ErrorCode, McpError};
use crate::services::command_builder::ActionKind;
use crate::utils::suggest::suggest;
use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn credential_schema() -> Value {
    json!({
        "type": "object",
        "description": "SSH target. Supply password or private_key.",
        "properties": {
            "host": {"type": "string"},
            "port": {"type": "integer", "minimum": 1, "maximum": 65535},
            "username": {"type": "string"},
            "user": {"type": "string"},
            "password": {"type": "string"},
            "private_key": {"type": "string"},
            "passphrase": {"type": "string"},
            "host_key_fingerprint": {"type": "string"},
            "host_key_fingerprint_sha256": {"type": "string"}
        },
        "required": ["host"],
        "additionalProperties": false
    })
}

fn action_kind_schema() -> Value {
    json!({"type": "string", "enum": ActionKind::accepted_names()})
}

static TOOL_CATALOG: Lazy<Vec<ToolDef>> = Lazy::new(|| {
    vec![
        ToolDef {
            name: "hostops_ops".to_string(),
            description: "Run commands and platform actions on a remote host over SSH. \
                Long-running actions are detached and tracked by log/pid artifacts; \
                use poll or follow to read progress and the classified outcome."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["execute", "launch", "poll", "follow", "cleanup", "classify"]
                    },
                    "credential": credential_schema(),
                    "command": {"type": "string"},
                    "wait_for_output": {"type": "boolean"},
                    "action_kind": action_kind_schema(),
                    "kind": action_kind_schema(),
                    "params": {"type": "object"},
                    "parameters": {"type": "object"},
                    "inline": {"type": "boolean"},
                    "job_id": {"type": "string"},
                    "log_file_name": {"type": "string"},
                    "pid_file_name": {"type": "string"},
                    "timeout_ms": {"type": "integer", "minimum": 1},
                    "poll_interval_ms": {"type": "integer", "minimum": 1},
                    "log_content": {"type": "string"},
                    "trace_id": {"type": "string"}
                },
                "required": ["action"],
                "additionalProperties": false
            }),
        },
        ToolDef {
            name: "hostops_jobs".to_string(),
            description: "Inspect and prune the registry of detached jobs.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["job_list", "job_get", "job_forget"]},
                    "job_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1},
                    "state": {"type": "string", "enum": ["running", "finished"]},
                    "host": {"type": "string"},
                    "trace_id": {"type": "string"}
                },
                "required": ["action"],
                "additionalProperties": false
            }),
        },
    ]
});

static TOOL_MAP: Lazy<HashMap<String, ToolDef>> = Lazy::new(|| {
    TOOL_CATALOG
        .iter()
        .cloned()
        .map(|tool| (tool.name.clone(), tool))
        .collect()
});

pub fn tool_catalog() -> &'static Vec<ToolDef> {
    &TOOL_CATALOG
}

pub fn tool_by_name(name: &str) -> Option<&'static ToolDef> {
    TOOL_MAP.get(name)
}

static TOOL_VALIDATORS: Lazy<HashMap<String, JSONSchema>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for tool in TOOL_CATALOG.iter() {
        if let Ok(schema) = JSONSchema::compile(&tool.input_schema) {
            map.insert(tool.name.clone(), schema);
        }
    }
    map
});

pub fn validate_tool_args(tool_name: &str, args: &Value) -> Result<(), McpError> {
    let Some(tool) = tool_by_name(tool_name) else {
        return Ok(());
    };
    let Some(schema) = TOOL_VALIDATORS.get(tool_name) else {
        return Err(McpError::new(
            ErrorCode::InternalError,
            format!("No compiled schema for {}", tool_name),
        ));
    };
    if let Err(errors) = schema.validate(args) {
        let message = format_schema_errors(tool_name, args, errors, &tool.input_schema);
        return Err(McpError::new(ErrorCode::InvalidParams, message));
    }
    Ok(())
}

fn format_schema_errors(
    tool_name: &str,
    args: &Value,
    errors: jsonschema::ErrorIterator,
    schema: &Value,
) -> String {
    let header = match args.get("action").and_then(|v| v.as_str()) {
        Some(action) => format!("Invalid arguments for {}:{}", tool_name, action),
        None => format!("Invalid arguments for {}", tool_name),
    };
    let mut rendered = Vec::new();
    let mut did_you_means = Vec::new();

    for err in errors.take(10) {
        let pointer = err.instance_path.to_string();
        let location = if pointer.is_empty() {
            "(root)".to_string()
        } else {
            pointer.clone()
        };
        match &err.kind {
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                let known = known_properties(schema, &err.schema_path.to_string());
                let known: Vec<&str> = known.iter().map(String::as_str).collect();
                for field in unexpected {
                    rendered.push(format!("{}: unknown field '{}'", location, field));
                    let suggestions = suggest(field, &known, 3);
                    if !suggestions.is_empty() {
                        did_you_means.push(format!("field '{}': {}", field, suggestions.join(", ")));
                    }
                }
            }
            ValidationErrorKind::Enum { options } => {
                let allowed: Vec<&str> = options
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
                    .unwrap_or_default();
                rendered.push(format!(
                    "{}: expected one of {}",
                    location,
                    allowed.iter().take(12).copied().collect::<Vec<_>>().join(", ")
                ));
                let received = args.pointer(&pointer).and_then(|v| v.as_str()).unwrap_or("");
                let suggestions = suggest(received, &allowed, 3);
                if !suggestions.is_empty() {
                    did_you_means.push(format!("{}: {}", location, suggestions.join(", ")));
                }
            }
            ValidationErrorKind::Required { property } => {
                let field = property
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| property.to_string());
                rendered.push(format!("{}: missing required field '{}'", location, field));
            }
            ValidationErrorKind::Type { kind } => {
                rendered.push(format!("{}: expected {}", location, format_type_kind(kind)));
            }
            _ => rendered.push(format!("{}: {}", location, err)),
        }
    }

    let mut lines = vec![header];
    lines.extend(rendered.iter().map(|line| format!("- {}", line)));
    if !did_you_means.is_empty() {
        lines.push(format!(
            "Did you mean: {}",
            did_you_means.iter().take(3).cloned().collect::<Vec<_>>().join(" | ")
        ));
    }
    lines.join("\n")
}

fn format_type_kind(kind: &TypeKind) -> String {
    match kind {
        TypeKind::Single(primitive) => primitive.to_string(),
        TypeKind::Multiple(types) => {
            let list: Vec<String> = (*types).into_iter().map(|t| t.to_string()).collect();
            if list.is_empty() {
                "unknown".to_string()
            } else {
                list.join(" | ")
            }
        }
    }
}

/// Property names declared next to the `additionalProperties` keyword that
/// `schema_path` points at.
fn known_properties(schema: &Value, schema_path: &str) -> Vec<String> {
    let parent = schema_path
        .trim_start_matches('/')
        .trim_end_matches("additionalProperties")
        .trim_end_matches('/');
    let node = if parent.is_empty() {
        Some(schema)
    } else {
        schema.pointer(&format!("/{}", parent))
    };
    node.and_then(|n| n.get("properties"))
        .and_then(|v| v.as_object())
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}
