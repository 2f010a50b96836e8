use crate::constants::jobs::ARTIFACT_PREFIX;
use crate::errors::ToolError;
use crate::services::command_builder::ActionKind;
use crate::services::logger::Logger;
use crate::services::transport::{HostCredential, RemoteTransport};
use crate::utils::shell::quote;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static LOG_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^wo-action-[0-9]{6,16}(?:-[a-z0-9][a-z0-9-]{0,62})?\.log$")
        .expect("log artifact regex")
});
static PID_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^wo-action-[0-9]{6,16}(?:-[a-z0-9][a-z0-9-]{0,62})?\.log\.pid$")
        .expect("pid artifact regex")
});

/// Names of the two remote files backing one detached job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub log_file_name: String,
    pub pid_file_name: String,
}

impl JobHandle {
    pub fn generate(action: ActionKind) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let nonce: u32 = rand::random();
        let log_file_name = format!(
            "{}{}-{}-{:08x}.log",
            ARTIFACT_PREFIX,
            millis,
            action.as_str(),
            nonce
        );
        let pid_file_name = format!("{}.pid", log_file_name);
        Self {
            log_file_name,
            pid_file_name,
        }
    }

    /// Accepts caller-supplied names only if both match the artifact
    /// patterns; they end up inside shell text.
    pub fn parse(log_file_name: &str, pid_file_name: &str) -> Result<Self, ToolError> {
        validate_log_name(log_file_name)?;
        validate_pid_name(pid_file_name)?;
        Ok(Self {
            log_file_name: log_file_name.to_string(),
            pid_file_name: pid_file_name.to_string(),
        })
    }

    pub fn log_path(&self, artifact_dir: &str) -> String {
        join_dir(artifact_dir, &self.log_file_name)
    }

    pub fn pid_path(&self, artifact_dir: &str) -> String {
        join_dir(artifact_dir, &self.pid_file_name)
    }
}

fn join_dir(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

pub fn validate_log_name(name: &str) -> Result<(), ToolError> {
    if LOG_NAME_RE.is_match(name) {
        return Ok(());
    }
    Err(
        ToolError::invalid_params(format!("Invalid log file name: {}", name))
            .with_hint("Use the log_file_name returned by launch (wo-action-<millis>-<action>-<nonce>.log)."),
    )
}

pub fn validate_pid_name(name: &str) -> Result<(), ToolError> {
    if PID_NAME_RE.is_match(name) {
        return Ok(());
    }
    Err(
        ToolError::invalid_params(format!("Invalid PID file name: {}", name))
            .with_hint("Use the pid_file_name returned by launch (<log_file_name>.pid)."),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupAck {
    pub success: bool,
    pub removed: bool,
}

/// Best-effort removal of job artifacts. Never fails from the caller's view.
#[derive(Clone)]
pub struct ArtifactCleanup {
    logger: Logger,
    transport: Arc<dyn RemoteTransport>,
    artifact_dir: String,
}

impl ArtifactCleanup {
    pub fn new(logger: Logger, transport: Arc<dyn RemoteTransport>, artifact_dir: String) -> Self {
        Self {
            logger: logger.child("cleanup"),
            transport,
            artifact_dir,
        }
    }

    pub async fn cleanup(
        &self,
        credential: &HostCredential,
        log_file_name: &str,
        pid_file_name: &str,
    ) -> CleanupAck {
        let handle = match JobHandle::parse(log_file_name, pid_file_name) {
            Ok(handle) => handle,
            Err(err) => {
                self.logger.warn(
                    "Refusing to clean up invalid artifact names",
                    Some(&serde_json::json!({
                        "log_file_name": log_file_name,
                        "pid_file_name": pid_file_name,
                        "error": err.message,
                    })),
                );
                return CleanupAck {
                    success: true,
                    removed: false,
                };
            }
        };
        let command = format!(
            "rm -f {} {}",
            quote(&handle.log_path(&self.artifact_dir)),
            quote(&handle.pid_path(&self.artifact_dir))
        );
        let outcome = self
            .transport
            .execute(credential, &command, true)
            .await
            .and_then(|outcome| outcome.into_completed());
        let removed = match outcome {
            Ok(result) if result.success() => true,
            Ok(result) => {
                self.logger.warn(
                    "Artifact cleanup exited non-zero",
                    Some(&serde_json::json!({
                        "host": credential.host_key(),
                        "log_file_name": handle.log_file_name,
                        "exit_code": result.exit_code,
                        "stderr": credential.scrub(&result.stderr),
                    })),
                );
                false
            }
            Err(err) => {
                self.logger.warn(
                    "Artifact cleanup failed",
                    Some(&serde_json::json!({
                        "host": credential.host_key(),
                        "log_file_name": handle.log_file_name,
                        "code": err.code,
                        "error": err.message,
                    })),
                );
                false
            }
        };
        CleanupAck {
            success: true,
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_handles_validate_and_differ() {
        let a = JobHandle::generate(ActionKind::CreateSite);
        let b = JobHandle::generate(ActionKind::CreateSite);
        assert!(JobHandle::parse(&a.log_file_name, &a.pid_file_name).is_ok());
        assert_ne!(a, b);
        assert!(a.log_file_name.starts_with("wo-action-"));
        assert!(a.log_file_name.contains("-create-site-"));
        assert_eq!(a.pid_file_name, format!("{}.pid", a.log_file_name));
    }

    #[test]
    fn legacy_handles_are_accepted() {
        assert!(JobHandle::parse("wo-action-1712345678901.log", "wo-action-1712345678901.log.pid").is_ok());
    }

    #[test]
    fn hostile_names_are_rejected() {
        for name in [
            "wo-action-171234;rm -rf /.log",
            "../wo-action-1712345678901.log",
            "wo-action-1712345678901.log\n",
            "wo-action-1712345678901-$(id).log",
            "other-1712345678901.log",
        ] {
            assert!(validate_log_name(name).is_err(), "{}", name);
        }
        assert!(validate_pid_name("wo-action-1712345678901.log").is_err());
    }

    #[test]
    fn paths_join_the_artifact_dir() {
        let handle = JobHandle::parse("wo-action-1712345678901.log", "wo-action-1712345678901.log.pid").unwrap();
        assert_eq!(handle.log_path("/tmp/"), "/tmp/wo-action-1712345678901.log");
        assert_eq!(handle.pid_path("/var/tmp"), "/var/tmp/wo-action-1712345678901.log.pid");
    }
}
