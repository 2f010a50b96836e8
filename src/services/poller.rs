use crate::constants::jobs::STATUS_SEPARATOR;
use crate::errors::ToolError;
use crate::services::artifacts::JobHandle;
use crate::services::classifier::last_exit_marker;
use crate::services::logger::Logger;
use crate::services::transport::{HostCredential, RemoteTransport};
use crate::utils::shell::quote;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Running,
    Finished,
}

impl Liveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Liveness::Running => "running",
            Liveness::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub log_content: String,
    pub liveness: Liveness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPoll {
    pub snapshot: JobSnapshot,
    /// Separator or liveness token was missing or unrecognised.
    pub malformed: bool,
}

/// Prints the log tail, the separator, then `running` or `finished`.
/// A PID file that is absent or still empty counts as running.
pub fn poll_script(handle: &JobHandle, artifact_dir: &str, max_log_bytes: usize) -> String {
    [
        format!("LOG_PATH={}", quote(&handle.log_path(artifact_dir))),
        format!("PID_PATH={}", quote(&handle.pid_path(artifact_dir))),
        format!("tail -c {} \"$LOG_PATH\" 2>/dev/null", max_log_bytes),
        "echo".to_string(),
        format!("echo {}", quote(STATUS_SEPARATOR)),
        "pid=\"$(cat \"$PID_PATH\" 2>/dev/null | tr -dc '0-9')\"".to_string(),
        "if [ -z \"$pid\" ]; then echo running; elif ps -p \"$pid\" >/dev/null 2>&1; then echo running; else echo finished; fi".to_string(),
    ]
    .join("\n")
}

pub fn parse_poll_output(stdout: &str) -> ParsedPoll {
    let Some(index) = stdout.rfind(STATUS_SEPARATOR) else {
        let log_content = stdout.trim().to_string();
        let exit_code = last_exit_marker(&log_content);
        return ParsedPoll {
            snapshot: JobSnapshot {
                log_content,
                liveness: Liveness::Finished,
                exit_code,
            },
            malformed: true,
        };
    };
    let log_content = stdout[..index].trim().to_string();
    let token = stdout[index + STATUS_SEPARATOR.len()..]
        .split_whitespace()
        .next()
        .unwrap_or("");
    let (liveness, malformed) = match token {
        "running" => (Liveness::Running, false),
        "finished" => (Liveness::Finished, false),
        _ => (Liveness::Finished, true),
    };
    let exit_code = last_exit_marker(&log_content);
    ParsedPoll {
        snapshot: JobSnapshot {
            log_content,
            liveness,
            exit_code,
        },
        malformed,
    }
}

#[derive(Clone)]
pub struct StatusPoller {
    logger: Logger,
    transport: Arc<dyn RemoteTransport>,
    artifact_dir: String,
    max_log_bytes: usize,
}

impl StatusPoller {
    pub fn new(
        logger: Logger,
        transport: Arc<dyn RemoteTransport>,
        artifact_dir: String,
        max_log_bytes: usize,
    ) -> Self {
        Self {
            logger: logger.child("poller"),
            transport,
            artifact_dir,
            max_log_bytes,
        }
    }

    pub async fn poll(
        &self,
        credential: &HostCredential,
        handle: &JobHandle,
    ) -> Result<JobSnapshot, ToolError> {
        let handle = JobHandle::parse(&handle.log_file_name, &handle.pid_file_name)?;
        let script = poll_script(&handle, &self.artifact_dir, self.max_log_bytes);
        let result = self
            .transport
            .execute(credential, &script, true)
            .await?
            .into_completed()?;
        let parsed = parse_poll_output(&result.stdout);
        if parsed.malformed {
            self.logger.warn(
                "Malformed poll response, treating job as finished",
                Some(&serde_json::json!({
                    "host": credential.host_key(),
                    "log_file_name": handle.log_file_name,
                    "exit_code": result.exit_code,
                    "stderr": credential.scrub(&result.stderr),
                })),
            );
        }
        Ok(parsed.snapshot)
    }
}
