use crate::errors::ToolError;
use crate::services::job::{JobRecord, JobService, JobState};
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_action_error;
use chrono::TimeZone;
use serde_json::Value;
use std::sync::Arc;

const JOB_ACTIONS: &[&str] = &["job_list", "job_get", "job_forget"];
const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 500;

fn public_job_view(job: &JobRecord) -> Value {
    let expires_at = chrono::Utc
        .timestamp_millis_opt(job.expires_at_ms)
        .single()
        .map(|dt| dt.to_rfc3339());
    serde_json::json!({
        "job_id": job.job_id,
        "host": job.host_key,
        "action_kind": job.action,
        "exclusion_class": job.exclusion_class,
        "state": job.state,
        "log_file_name": job.log_file_name,
        "pid_file_name": job.pid_file_name,
        "pid": job.pid,
        "started_at": job.started_at,
        "ended_at": job.ended_at,
        "expires_at": expires_at,
        "outcome": job.outcome,
    })
}

/// `hostops_jobs`: read and prune the job registry.
#[derive(Clone)]
pub struct JobManager {
    logger: Logger,
    validation: Validation,
    job_service: Arc<JobService>,
}

impl JobManager {
    pub fn new(logger: Logger, validation: Validation, job_service: Arc<JobService>) -> Self {
        Self {
            logger: logger.child("job"),
            validation,
            job_service,
        }
    }

    fn ensure_job_id(&self, value: &Value) -> Result<String, ToolError> {
        self.validation.ensure_string(value, "job_id", true)
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        match action.as_str() {
            "job_list" => self.job_list(&args),
            "job_get" => self.job_get(&args),
            "job_forget" => self.job_forget(&args),
            _ => Err(unknown_action_error("hostops_jobs", &action, JOB_ACTIONS)),
        }
    }

    fn job_list(&self, args: &Value) -> Result<Value, ToolError> {
        let limit = self
            .validation
            .optional_positive_u64(args.get("limit"), "limit")?
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT) as usize;
        let state = self
            .validation
            .ensure_optional_string(args.get("state"), "state", true)?
            .map(|raw| JobState::parse(&raw))
            .transpose()?;
        let host = self
            .validation
            .ensure_optional_string(args.get("host"), "host", true)?;
        let jobs: Vec<Value> = self
            .job_service
            .list(limit, state, host.as_deref())
            .iter()
            .map(public_job_view)
            .collect();
        Ok(serde_json::json!({
            "success": true,
            "jobs": jobs,
            "stats": self.job_service.stats(),
        }))
    }

    fn job_get(&self, args: &Value) -> Result<Value, ToolError> {
        let job_id = self.ensure_job_id(args.get("job_id").unwrap_or(&Value::Null))?;
        let job = self
            .job_service
            .get(&job_id)
            .ok_or_else(|| ToolError::not_found(format!("Job not found: {}", job_id)))?;
        Ok(serde_json::json!({"success": true, "job": public_job_view(&job)}))
    }

    fn job_forget(&self, args: &Value) -> Result<Value, ToolError> {
        let job_id = self.ensure_job_id(args.get("job_id").unwrap_or(&Value::Null))?;
        let forgotten = self.job_service.forget(&job_id);
        if forgotten {
            self.logger.info(
                "Job forgotten",
                Some(&serde_json::json!({"job_id": job_id})),
            );
        }
        Ok(serde_json::json!({"success": true, "job_id": job_id, "forgotten": forgotten}))
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for JobManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.handle_action(args).await
    }
}
