use async_trait::async_trait;
use hostops::errors::ToolError;
use hostops::services::transport::{ExecuteOutcome, ExecutionResult, HostCredential, RemoteTransport};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

type Responder = dyn Fn(&str) -> Result<ExecuteOutcome, ToolError> + Send + Sync;

/// Transport double that records every command and answers from a closure.
pub struct MockTransport {
    commands: Mutex<Vec<String>>,
    responder: Box<Responder>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<ExecuteOutcome, ToolError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    /// Answers every command with the same exit code and stdout.
    pub fn replying(exit_code: i64, stdout: &str) -> Arc<Self> {
        let stdout = stdout.to_string();
        Self::new(move |_| Ok(completed(exit_code, &stdout, "")))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn execute(
        &self,
        _credential: &HostCredential,
        command: &str,
        _wait_for_output: bool,
    ) -> Result<ExecuteOutcome, ToolError> {
        self.commands.lock().unwrap().push(command.to_string());
        (self.responder)(command)
    }
}

pub fn completed(exit_code: i64, stdout: &str, stderr: &str) -> ExecuteOutcome {
    ExecuteOutcome::Completed(ExecutionResult::new(exit_code, stdout, stderr))
}

pub fn poll_reply(log: &str, liveness: &str) -> ExecuteOutcome {
    completed(0, &format!("{}\n\n---STATUS-SEPARATOR---\n{}\n", log, liveness), "")
}

pub fn credential() -> HostCredential {
    HostCredential::password("203.0.113.7", 22, "root", "hunter2")
}

pub fn credential_json() -> Value {
    json!({"host": "203.0.113.7", "port": 22, "username": "root", "password": "hunter2"})
}
