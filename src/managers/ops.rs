use crate::errors::ToolError;
use crate::services::artifacts::{ArtifactCleanup, JobHandle};
use crate::services::classifier::{Outcome, OutcomeClassifier};
use crate::services::command_builder::{ActionKind, ActionRequest};
use crate::services::job::{JobRecord, JobService};
use crate::services::launcher::{JobLauncher, SyncCompletion};
use crate::services::logger::Logger;
use crate::services::poller::{JobSnapshot, Liveness, StatusPoller};
use crate::services::transport::{ExecuteOutcome, HostCredential, RemoteTransport};
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

const OPS_ACTIONS: &[&str] = &["execute", "launch", "poll", "cleanup", "classify", "follow"];

#[derive(Debug, Clone)]
pub struct OpsSettings {
    pub artifact_dir: String,
    pub poll_max_log_bytes: usize,
    pub poll_interval_ms: u64,
    pub call_budget_ms: u64,
}

/// `hostops_ops`: run, launch, poll, classify and clean up remote actions.
#[derive(Clone)]
pub struct OpsManager {
    logger: Logger,
    validation: Validation,
    transport: Arc<dyn RemoteTransport>,
    launcher: JobLauncher,
    poller: StatusPoller,
    cleanup: ArtifactCleanup,
    classifier: Arc<OutcomeClassifier>,
    jobs: Arc<JobService>,
    poll_interval_ms: u64,
    call_budget_ms: u64,
}

struct ResolvedJob {
    handle: JobHandle,
    action: Option<ActionKind>,
    record: Option<JobRecord>,
}

impl OpsManager {
    pub fn new(
        logger: Logger,
        validation: Validation,
        transport: Arc<dyn RemoteTransport>,
        classifier: Arc<OutcomeClassifier>,
        jobs: Arc<JobService>,
        settings: OpsSettings,
    ) -> Self {
        let launcher = JobLauncher::new(
            logger.clone(),
            transport.clone(),
            classifier.clone(),
            settings.artifact_dir.clone(),
        );
        let poller = StatusPoller::new(
            logger.clone(),
            transport.clone(),
            settings.artifact_dir.clone(),
            settings.poll_max_log_bytes,
        );
        let cleanup = ArtifactCleanup::new(logger.clone(), transport.clone(), settings.artifact_dir);
        Self {
            logger: logger.child("ops"),
            validation,
            transport,
            launcher,
            poller,
            cleanup,
            classifier,
            jobs,
            poll_interval_ms: settings.poll_interval_ms,
            call_budget_ms: settings.call_budget_ms,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        match action.as_str() {
            "execute" => self.execute(&args).await,
            "launch" => self.launch(&args).await,
            "poll" => self.poll(&args).await,
            "cleanup" => self.cleanup(&args).await,
            "classify" => self.classify(&args),
            "follow" => self.follow(&args).await,
            _ => Err(unknown_action_error("hostops_ops", &action, OPS_ACTIONS)),
        }
    }

    fn credential(&self, args: &Value) -> Result<HostCredential, ToolError> {
        HostCredential::from_value(args.get("credential"), &self.validation)
    }

    fn action_kind(&self, args: &Value) -> Result<Option<ActionKind>, ToolError> {
        let raw = self.validation.ensure_optional_string(
            args.get("action_kind").or_else(|| args.get("kind")),
            "action_kind",
            true,
        )?;
        raw.map(|value| ActionKind::parse(&value)).transpose()
    }

    fn require_action_kind(&self, args: &Value) -> Result<ActionKind, ToolError> {
        self.action_kind(args)?
            .ok_or_else(|| ToolError::invalid_params("action_kind is required"))
    }

    async fn execute(&self, args: &Value) -> Result<Value, ToolError> {
        let credential = self.credential(args)?;
        let command = self.validation.ensure_string(
            args.get("command").unwrap_or(&Value::Null),
            "command",
            false,
        )?;
        let wait_for_output = self
            .validation
            .optional_bool(args.get("wait_for_output"), "wait_for_output")?
            .unwrap_or(true);
        match self
            .transport
            .execute(&credential, &command, wait_for_output)
            .await?
        {
            ExecuteOutcome::Completed(result) => Ok(serde_json::json!({
                "exit_code": result.exit_code,
                "stdout": result.stdout,
                "stderr": result.stderr,
            })),
            ExecuteOutcome::Accepted => Ok(serde_json::json!({"accepted": true})),
        }
    }

    async fn launch(&self, args: &Value) -> Result<Value, ToolError> {
        let credential = self.credential(args)?;
        let action = self.require_action_kind(args)?;
        let parameters = self
            .validation
            .ensure_string_map(args.get("params").or_else(|| args.get("parameters")), "params")?;
        let inline = self
            .validation
            .optional_bool(args.get("inline"), "inline")?
            .unwrap_or(false);
        let request = ActionRequest { action, parameters };

        if !action.is_long_running() || inline {
            let completion = self.launcher.launch_inline(&credential, &request).await?;
            return sync_view(action, completion, &credential);
        }

        let host_key = credential.host_key();
        let handle = JobHandle::generate(action);
        let record = self.jobs.register_launch(&host_key, action, &handle)?;
        match self
            .launcher
            .launch_detached(&credential, &request, &handle)
            .await
        {
            Ok(pid) => {
                self.jobs.attach_pid(&record.job_id, pid);
                Ok(serde_json::json!({
                    "mode": "detached",
                    "action_kind": action,
                    "job_id": record.job_id,
                    "log_file_name": handle.log_file_name,
                    "pid_file_name": handle.pid_file_name,
                    "pid": pid,
                }))
            }
            Err(err) => {
                self.jobs.abandon(&record.job_id);
                Err(err)
            }
        }
    }

    fn resolve_job(&self, args: &Value, host_key: &str) -> Result<ResolvedJob, ToolError> {
        let explicit_action = self.action_kind(args)?;
        let job_id = self
            .validation
            .ensure_optional_string(args.get("job_id"), "job_id", true)?;
        if let Some(job_id) = job_id {
            let record = self
                .jobs
                .get(&job_id)
                .filter(|record| record.host_key == host_key)
                .ok_or_else(|| {
                    ToolError::not_found(format!("Job not found: {}", job_id))
                        .with_hint("Jobs are scoped to the credential that launched them; pass log_file_name and pid_file_name instead.")
                })?;
            return Ok(ResolvedJob {
                handle: record.handle(),
                action: explicit_action.or(Some(record.action)),
                record: Some(record),
            });
        }
        let log_file_name = self.validation.ensure_string(
            args.get("log_file_name").unwrap_or(&Value::Null),
            "log_file_name",
            true,
        )?;
        let pid_file_name = self.validation.ensure_string(
            args.get("pid_file_name").unwrap_or(&Value::Null),
            "pid_file_name",
            true,
        )?;
        let handle = JobHandle::parse(&log_file_name, &pid_file_name)?;
        let record = self.jobs.find_by_handle(host_key, &handle);
        let action = explicit_action.or_else(|| record.as_ref().map(|r| r.action));
        Ok(ResolvedJob {
            handle,
            action,
            record,
        })
    }

    /// One poll; classifies and records the outcome once the job is finished.
    async fn poll_once(
        &self,
        credential: &HostCredential,
        job: &ResolvedJob,
    ) -> Result<(JobSnapshot, Option<Outcome>), ToolError> {
        let snapshot = self.poller.poll(credential, &job.handle).await?;
        if snapshot.liveness != Liveness::Finished {
            return Ok((snapshot, None));
        }
        let outcome = job
            .action
            .map(|action| self.classifier.classify(action, &snapshot.log_content));
        if let Some(record) = job.record.as_ref() {
            self.jobs.complete(&record.job_id, outcome.clone());
        }
        Ok((snapshot, outcome))
    }

    async fn poll(&self, args: &Value) -> Result<Value, ToolError> {
        let credential = self.credential(args)?;
        let job = self.resolve_job(args, &credential.host_key())?;
        let (snapshot, outcome) = self.poll_once(&credential, &job).await?;
        Ok(poll_view(&job, &snapshot, outcome.as_ref()))
    }

    async fn follow(&self, args: &Value) -> Result<Value, ToolError> {
        let credential = self.credential(args)?;
        let job = self.resolve_job(args, &credential.host_key())?;
        let budget_ms = self
            .validation
            .optional_positive_u64(args.get("timeout_ms"), "timeout_ms")?
            .unwrap_or(self.call_budget_ms)
            .min(self.call_budget_ms);
        let interval_ms = self
            .validation
            .optional_positive_u64(args.get("poll_interval_ms"), "poll_interval_ms")?
            .unwrap_or(self.poll_interval_ms);
        let started = Instant::now();
        let mut polls = 0u64;
        loop {
            let (snapshot, outcome) = self.poll_once(&credential, &job).await?;
            polls += 1;
            let elapsed = started.elapsed().as_millis() as u64;
            let finished = snapshot.liveness == Liveness::Finished;
            if finished || elapsed.saturating_add(interval_ms) > budget_ms {
                let mut view = poll_view(&job, &snapshot, outcome.as_ref());
                if let Value::Object(map) = &mut view {
                    map.insert("polls".to_string(), Value::from(polls));
                    map.insert("timed_out".to_string(), Value::Bool(!finished));
                    map.insert("elapsed_ms".to_string(), Value::from(elapsed));
                }
                if !finished {
                    self.logger.debug(
                        "Follow budget exhausted",
                        Some(&serde_json::json!({
                            "log_file_name": job.handle.log_file_name,
                            "polls": polls,
                            "budget_ms": budget_ms,
                        })),
                    );
                }
                return Ok(view);
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }

    async fn cleanup(&self, args: &Value) -> Result<Value, ToolError> {
        let credential = self.credential(args)?;
        let (log_file_name, pid_file_name) = match self
            .validation
            .ensure_optional_string(args.get("job_id"), "job_id", true)?
            .and_then(|job_id| self.jobs.get(&job_id))
            .filter(|record| record.host_key == credential.host_key())
        {
            Some(record) => (record.log_file_name, record.pid_file_name),
            None => (
                args.get("log_file_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                args.get("pid_file_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            ),
        };
        let ack = self
            .cleanup
            .cleanup(&credential, &log_file_name, &pid_file_name)
            .await;
        serde_json::to_value(ack).map_err(|err| ToolError::internal(err.to_string()))
    }

    fn classify(&self, args: &Value) -> Result<Value, ToolError> {
        let action = self.require_action_kind(args)?;
        let log = args
            .get("log_content")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let outcome = self.classifier.classify(action, log);
        serde_json::to_value(outcome).map_err(|err| ToolError::internal(err.to_string()))
    }
}

fn poll_view(job: &ResolvedJob, snapshot: &JobSnapshot, outcome: Option<&Outcome>) -> Value {
    let mut view = serde_json::json!({
        "log_content": snapshot.log_content,
        "status": snapshot.liveness.as_str(),
        "log_file_name": job.handle.log_file_name,
        "pid_file_name": job.handle.pid_file_name,
    });
    if let Value::Object(map) = &mut view {
        if let Some(code) = snapshot.exit_code {
            map.insert("exit_code".to_string(), Value::from(code));
        }
        if let Some(outcome) = outcome {
            map.insert(
                "outcome".to_string(),
                serde_json::to_value(outcome).unwrap_or(Value::Null),
            );
        }
        if let Some(record) = job.record.as_ref() {
            map.insert("job_id".to_string(), Value::String(record.job_id.clone()));
        }
        if let Some(action) = job.action {
            map.insert("action_kind".to_string(), Value::String(action.to_string()));
        }
    }
    view
}

/// Response body for a synchronous action, with the per-kind answer
/// fields (`installed`, `sites`, `accounts`) filled in.
pub fn sync_view(
    action: ActionKind,
    completion: SyncCompletion,
    credential: &HostCredential,
) -> Result<Value, ToolError> {
    let SyncCompletion { result, outcome } = completion;
    let mut map = serde_json::Map::new();
    map.insert("mode".to_string(), Value::String("sync".to_string()));
    map.insert("action_kind".to_string(), Value::String(action.to_string()));
    map.insert("exit_code".to_string(), Value::from(result.exit_code));
    map.insert("stdout".to_string(), Value::String(result.stdout.clone()));
    map.insert("stderr".to_string(), Value::String(result.stderr.clone()));
    if let Some(outcome) = outcome {
        map.insert(
            "outcome".to_string(),
            serde_json::to_value(outcome).map_err(|err| ToolError::internal(err.to_string()))?,
        );
    }
    match action {
        ActionKind::ProbePlatformInstalled => {
            let installed = result.success();
            map.insert("installed".to_string(), Value::Bool(installed));
            if installed {
                map.insert(
                    "version".to_string(),
                    Value::String(result.stdout.trim().to_string()),
                );
            }
        }
        ActionKind::ListSites if result.success() => {
            let sites: Vec<Value> = result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect();
            map.insert("sites".to_string(), Value::Array(sites));
        }
        ActionKind::ListAccounts if result.success() => {
            let accounts: Value = serde_json::from_str(result.stdout.trim()).map_err(|err| {
                ToolError::internal(format!("Account list is not valid JSON: {}", err))
                    .with_details(serde_json::json!({"stdout": credential.scrub(&result.stdout)}))
            })?;
            map.insert("accounts".to_string(), accounts);
        }
        _ => {}
    }
    Ok(Value::Object(map))
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for OpsManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.handle_action(args).await
    }
}
