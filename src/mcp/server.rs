use crate::app::App;
use crate::errors::{ErrorCode, McpError, ToolError, ToolErrorKind};
use crate::mcp::catalog::{tool_catalog, validate_tool_args};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "hostops";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn map_tool_error(tool: &str, error: &ToolError) -> McpError {
    let mut lines = vec![
        "HostopsError".to_string(),
        format!("tool: {}", tool),
        format!("kind: {:?}", error.kind).to_lowercase(),
        format!("code: {}", error.code),
        format!("retryable: {}", error.retryable),
        format!("message: {}", error.message),
    ];
    if let Some(hint) = &error.hint {
        lines.push(format!("hint: {}", hint));
    }
    let message = lines.join("\n");
    let data = serde_json::to_value(error).unwrap_or(Value::Null);

    let code = match error.kind {
        ToolErrorKind::InvalidParams | ToolErrorKind::UnknownAction => ErrorCode::InvalidParams,
        ToolErrorKind::Denied | ToolErrorKind::Conflict | ToolErrorKind::NotFound => {
            ErrorCode::InvalidRequest
        }
        _ => ErrorCode::InternalError,
    };
    McpError::new(code, message).with_data(data)
}

pub struct McpServer {
    app: Arc<App>,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    async fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"list": true, "call": true}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    async fn handle_tools_list(&self) -> Value {
        serde_json::json!({ "tools": tool_catalog() })
    }

    pub async fn handle_tools_call(&self, name: &str, args: Value) -> Result<Value, McpError> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        validate_tool_args(name, &args)?;

        let result = self
            .app
            .tool_executor
            .execute(name, args)
            .await
            .map_err(|err| map_tool_error(name, &err))?;

        let text = serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string());
        Ok(serde_json::json!({
            "content": [ { "type": "text", "text": text } ],
            "structuredContent": result,
        }))
    }

    /// Answers one line of input. `None` means the line needs no reply.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    ErrorCode::ParseError.as_i32(),
                    "Parse error",
                ))
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(req) => req,
            Err(_) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    ErrorCode::InvalidRequest.as_i32(),
                    "Invalid request",
                ))
            }
        };

        match request.method.as_str() {
            "notifications/initialized" => request
                .id
                .map(|id| JsonRpcResponse::success(id, serde_json::json!({}))),
            _ if request.method.starts_with("notifications/") && request.id.is_none() => None,
            "initialize" => {
                let id = request.id?;
                Some(JsonRpcResponse::success(id, self.handle_initialize().await))
            }
            "tools/list" => {
                let id = request.id?;
                Some(JsonRpcResponse::success(id, self.handle_tools_list().await))
            }
            "tools/call" => {
                let id = request.id?;
                let params = request.params.as_object().cloned().unwrap_or_default();
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                if name.is_empty() {
                    return Some(JsonRpcResponse::failure(
                        id,
                        ErrorCode::InvalidParams.as_i32(),
                        "Missing tool name",
                    ));
                }
                let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                Some(match self.handle_tools_call(name, args).await {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(err) => JsonRpcResponse::from_error(id, err),
                })
            }
            _ => request.id.map(|id| {
                JsonRpcResponse::failure(
                    id,
                    ErrorCode::MethodNotFound.as_i32(),
                    "Method not found",
                )
            }),
        }
    }

    /// Serves newline-delimited JSON-RPC until `reader` reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut writer = writer;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| ToolError::internal(err.to_string()))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(trimmed).await {
                let payload = serde_json::to_string(&response).unwrap_or_default();
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    pub async fn run_stdio(&self) -> Result<(), ToolError> {
        self.app.logger.info(
            "Serving MCP over stdio",
            Some(&serde_json::json!({"version": SERVER_VERSION})),
        );
        let reader = BufReader::new(tokio::io::stdin());
        let writer = BufWriter::new(tokio::io::stdout());
        self.serve(reader, writer).await
    }
}

pub async fn run_stdio() -> Result<(), ToolError> {
    let app = Arc::new(App::initialize()?);
    McpServer::new(app).run_stdio().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_map_to_invalid_request_with_data() {
        let err = ToolError::conflict("busy").with_hint("wait");
        let mapped = map_tool_error("hostops_ops", &err);
        assert_eq!(mapped.code, ErrorCode::InvalidRequest);
        assert!(mapped.message.starts_with("HostopsError\ntool: hostops_ops\nkind: conflict"));
        assert!(mapped.message.ends_with("hint: wait"));
        assert_eq!(mapped.data.unwrap()["code"], "CONFLICT");
    }

    #[test]
    fn unknown_actions_map_to_invalid_params() {
        let mapped = map_tool_error("hostops_jobs", &ToolError::unknown_action("nope"));
        assert_eq!(mapped.code, ErrorCode::InvalidParams);
        let mapped = map_tool_error("hostops_ops", &ToolError::transport("refused"));
        assert_eq!(mapped.code, ErrorCode::InternalError);
    }
}
