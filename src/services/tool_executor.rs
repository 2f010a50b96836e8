use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::redact::redact_object;
use crate::utils::suggest::suggest;

use serde_json::Value;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<Value, ToolError>;
}

#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("executor"),
            handlers: Arc::new(handlers),
        }
    }

    pub async fn execute(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        let Some(handler) = self.handlers.get(tool) else {
            let mut candidates: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
            candidates.sort();
            let suggestions = suggest(tool, &candidates, 3);
            let hint = if suggestions.is_empty() {
                format!("Available tools: {}", candidates.join(", "))
            } else {
                format!("Did you mean: {}", suggestions.join(", "))
            };
            return Err(ToolError::invalid_params(format!("Unknown tool: {}", tool)).with_hint(hint));
        };

        let started_at = std::time::Instant::now();
        let trace_id = args
            .get("trace_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.logger.debug(
            "Tool call",
            Some(&serde_json::json!({
                "tool": tool,
                "trace_id": trace_id,
                "args": redact_object(&args),
            })),
        );

        let result = handler.handle(args).await;
        let duration_ms = started_at.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => self.logger.info(
                "Tool call completed",
                Some(&serde_json::json!({
                    "tool": tool,
                    "trace_id": trace_id,
                    "duration_ms": duration_ms,
                })),
            ),
            Err(err) => self.logger.warn(
                "Tool call failed",
                Some(&serde_json::json!({
                    "tool": tool,
                    "trace_id": trace_id,
                    "duration_ms": duration_ms,
                    "code": err.code,
                    "error": err.message,
                })),
            ),
        }
        result
    }
}
