use crate::constants::jobs::EXIT_MARKER;
use crate::constants::limits::COMMAND_LOG_PREVIEW;
use crate::errors::ToolError;
use crate::services::artifacts::JobHandle;
use crate::services::classifier::{Outcome, OutcomeClassifier};
use crate::services::command_builder::{build, ActionRequest};
use crate::services::logger::Logger;
use crate::services::transport::{ExecutionResult, HostCredential, RemoteTransport};
use crate::utils::redact::redact_text;
use crate::utils::shell::quote;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCompletion {
    pub result: ExecutionResult,
    /// Set when a non-zero exit was recovered by a rule, or when a
    /// long-running action was forced inline.
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchResult {
    Detached { handle: JobHandle, pid: Option<i64> },
    Completed(SyncCompletion),
}

/// Shell text that starts `inner` in the background on the remote host,
/// records its PID and appends an exit marker to the log when it ends.
pub fn wrap_detached(inner: &str, handle: &JobHandle, artifact_dir: &str) -> String {
    let script = format!(
        "({})\nrc=$?\necho \"{}$rc\"\nexit $rc",
        inner, EXIT_MARKER
    );
    let log = quote(&handle.log_path(artifact_dir));
    let pid = quote(&handle.pid_path(artifact_dir));
    format!(
        ": > {log}; nohup bash -c {script} > {log} 2>&1 < /dev/null & echo $! > {pid}; cat {pid}",
        log = log,
        pid = pid,
        script = quote(&script)
    )
}

fn parse_pid(stdout: &str) -> Option<i64> {
    stdout
        .split_whitespace()
        .last()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|pid| *pid > 0)
}

#[derive(Clone)]
pub struct JobLauncher {
    logger: Logger,
    transport: Arc<dyn RemoteTransport>,
    classifier: Arc<OutcomeClassifier>,
    artifact_dir: String,
}

impl JobLauncher {
    pub fn new(
        logger: Logger,
        transport: Arc<dyn RemoteTransport>,
        classifier: Arc<OutcomeClassifier>,
        artifact_dir: String,
    ) -> Self {
        Self {
            logger: logger.child("launcher"),
            transport,
            classifier,
            artifact_dir,
        }
    }

    pub fn artifact_dir(&self) -> &str {
        &self.artifact_dir
    }

    /// Detaches long-running actions; runs everything else synchronously.
    pub async fn launch(
        &self,
        credential: &HostCredential,
        request: &ActionRequest,
    ) -> Result<LaunchResult, ToolError> {
        if request.action.is_long_running() {
            let handle = JobHandle::generate(request.action);
            let pid = self.launch_detached(credential, request, &handle).await?;
            Ok(LaunchResult::Detached { handle, pid })
        } else {
            self.launch_inline(credential, request)
                .await
                .map(LaunchResult::Completed)
        }
    }

    /// Runs any action synchronously, holding the session until it exits.
    pub async fn launch_inline(
        &self,
        credential: &HostCredential,
        request: &ActionRequest,
    ) -> Result<SyncCompletion, ToolError> {
        let command = build(request)?;
        self.logger.info(
            "Running action",
            Some(&serde_json::json!({
                "host": credential.host_key(),
                "action": request.action,
                "command": self.preview(&command, request),
            })),
        );
        let result = self
            .transport
            .execute(credential, &command, true)
            .await?
            .into_completed()?;

        if result.success() {
            let outcome = request.action.is_long_running().then(|| {
                self.classifier
                    .recover(request.action, &result.combined_output())
                    .unwrap_or_else(|| Outcome::completed(request.action))
            });
            return Ok(SyncCompletion { result, outcome });
        }
        if request.action.nonzero_exit_is_answer() {
            return Ok(SyncCompletion {
                result,
                outcome: None,
            });
        }
        if let Some(outcome) = self
            .classifier
            .recover(request.action, &result.combined_output())
        {
            self.logger.warn(
                "Non-zero exit recovered by outcome rule",
                Some(&serde_json::json!({
                    "host": credential.host_key(),
                    "action": request.action,
                    "exit_code": result.exit_code,
                    "title": outcome.title,
                })),
            );
            return Ok(SyncCompletion {
                result,
                outcome: Some(outcome),
            });
        }
        Err(self.failure(credential, request, &result))
    }

    /// Starts `request` in the background under `handle` and returns the
    /// remote PID when the wrapper reported one.
    pub async fn launch_detached(
        &self,
        credential: &HostCredential,
        request: &ActionRequest,
        handle: &JobHandle,
    ) -> Result<Option<i64>, ToolError> {
        let inner = build(request)?;
        let command = wrap_detached(&inner, handle, &self.artifact_dir);
        let result = self
            .transport
            .execute(credential, &command, true)
            .await?
            .into_completed()?;
        if !result.success() {
            return Err(self
                .failure(credential, request, &result)
                .with_hint("The backgrounding wrapper could not be started on the host."));
        }
        let pid = parse_pid(&result.stdout);
        if pid.is_none() {
            self.logger.warn(
                "Detached job started without a readable PID",
                Some(&serde_json::json!({
                    "host": credential.host_key(),
                    "log_file_name": handle.log_file_name,
                    "stdout": credential.scrub(&result.stdout),
                })),
            );
        }
        self.logger.info(
            "Detached job launched",
            Some(&serde_json::json!({
                "host": credential.host_key(),
                "action": request.action,
                "log_file_name": handle.log_file_name,
                "pid": pid,
                "command": self.preview(&inner, request),
            })),
        );
        Ok(pid)
    }

    fn failure(
        &self,
        credential: &HostCredential,
        request: &ActionRequest,
        result: &ExecutionResult,
    ) -> ToolError {
        let mut secrets = request.secret_values();
        secrets.extend(credential.secret_values());
        let scrub = |text: &str| redact_text(text, usize::MAX, Some(secrets.as_slice()));
        ToolError::remote_command_failed(result.exit_code, &scrub(&result.stdout), &scrub(&result.stderr))
    }

    fn preview(&self, command: &str, request: &ActionRequest) -> String {
        let secrets = request.secret_values();
        redact_text(command, COMMAND_LOG_PREVIEW, Some(secrets.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_backgrounds_and_records_pid() {
        let handle = JobHandle::parse("wo-action-1712345678901.log", "wo-action-1712345678901.log.pid").unwrap();
        let wrapped = wrap_detached("sudo wo site delete 'a.com' --force", &handle, "/tmp");
        assert!(wrapped.starts_with(": > '/tmp/wo-action-1712345678901.log'; nohup bash -c '"));
        assert!(wrapped.contains("> '/tmp/wo-action-1712345678901.log' 2>&1 < /dev/null &"));
        assert!(wrapped.ends_with(
            "echo $! > '/tmp/wo-action-1712345678901.log.pid'; cat '/tmp/wo-action-1712345678901.log.pid'"
        ));
        assert!(wrapped.contains("__HOSTOPS_EXIT__=$rc"));
    }

    #[test]
    fn parse_pid_reads_last_token() {
        assert_eq!(parse_pid("4242\n"), Some(4242));
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("nope"), None);
    }
}
