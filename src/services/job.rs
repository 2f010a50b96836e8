use crate::config::{self, HostConcurrency, JobStoreKind};
use crate::errors::ToolError;
use crate::services::artifacts::JobHandle;
use crate::services::classifier::Outcome;
use crate::services::command_builder::{ActionKind, ExclusionClass};
use crate::services::logger::Logger;
use crate::stores::file_job_store::FileJobStore;
use crate::stores::memory_job_store::MemoryJobStore;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Finished,
}

impl JobState {
    pub fn parse(raw: &str) -> Result<Self, ToolError> {
        match raw.trim().to_lowercase().as_str() {
            "running" => Ok(JobState::Running),
            "finished" => Ok(JobState::Finished),
            other => Err(ToolError::invalid_params(format!("Unknown job state: {}", other))
                .with_hint("Use one of: running, finished.")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub host_key: String,
    pub action: ActionKind,
    pub exclusion_class: ExclusionClass,
    pub state: JobState,
    pub log_file_name: String,
    pub pid_file_name: String,
    #[serde(default)]
    pub pid: Option<i64>,
    pub started_at: String,
    pub started_at_ms: i64,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    pub expires_at_ms: i64,
}

impl JobRecord {
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            log_file_name: self.log_file_name.clone(),
            pid_file_name: self.pid_file_name.clone(),
        }
    }
}

/// Registry of detached jobs with a per-host exclusion check.
#[derive(Clone)]
pub struct JobService {
    logger: Logger,
    memory_store: MemoryJobStore,
    file_store: Option<FileJobStore>,
    host_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    concurrency: HostConcurrency,
}

impl JobService {
    pub fn new(logger: Logger) -> Result<Self, ToolError> {
        let kind = config::resolve_job_store_kind();
        let memory_store = MemoryJobStore::new(
            config::resolve_jobs_max(),
            config::resolve_jobs_ttl_ms(),
            match kind {
                JobStoreKind::File => "file",
                JobStoreKind::Memory => "memory",
            },
        );
        let file_store = match kind {
            JobStoreKind::File => Some(FileJobStore::new(
                memory_store.clone(),
                config::resolve_jobs_path(),
            )),
            JobStoreKind::Memory => None,
        };
        Ok(Self::with_stores(
            logger,
            memory_store,
            file_store,
            config::resolve_host_concurrency(),
        ))
    }

    pub fn with_stores(
        logger: Logger,
        memory_store: MemoryJobStore,
        file_store: Option<FileJobStore>,
        concurrency: HostConcurrency,
    ) -> Self {
        let logger = logger.child("jobs");
        if let Some(store) = &file_store {
            match store.load_from_disk() {
                Ok(count) if count > 0 => logger.info(
                    "Loaded job registry",
                    Some(&serde_json::json!({"jobs": count, "path": store.file_path().display().to_string()})),
                ),
                Ok(_) => {}
                Err(err) => logger.warn(
                    "Failed to load job registry",
                    Some(&serde_json::json!({"error": err.message})),
                ),
            }
        }
        Self {
            logger,
            memory_store,
            file_store,
            host_locks: Arc::new(DashMap::new()),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> HostConcurrency {
        self.concurrency
    }

    fn persist(&self) {
        if let Some(store) = &self.file_store {
            if let Err(err) = store.persist() {
                self.logger.warn(
                    "Failed to persist job registry",
                    Some(&serde_json::json!({"error": err.message})),
                );
            }
        }
    }

    fn host_lock(&self, host_key: &str) -> Arc<Mutex<()>> {
        self.host_locks
            .entry(host_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Checks for a conflicting running job on `host_key` and records the
    /// new one, atomically per host.
    pub fn register_launch(
        &self,
        host_key: &str,
        action: ActionKind,
        handle: &JobHandle,
    ) -> Result<JobRecord, ToolError> {
        let class = action.exclusion_class().ok_or_else(|| {
            ToolError::invalid_params(format!("{} does not run as a detached job", action))
        })?;
        let lock = self.host_lock(host_key);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());

        if self.concurrency == HostConcurrency::Exclusive {
            if let Some(existing) = self
                .memory_store
                .running_on_host(host_key)
                .into_iter()
                .find(|job| job.exclusion_class.conflicts_with(class))
            {
                return Err(ToolError::conflict(format!(
                    "{} is still running on {} (job {})",
                    existing.action, host_key, existing.job_id
                ))
                .with_hint("Wait for the running job to finish, or forget it with hostops_jobs job_forget if it was abandoned.")
                .with_details(serde_json::json!({
                    "job_id": existing.job_id,
                    "action": existing.action,
                    "log_file_name": existing.log_file_name,
                    "started_at": existing.started_at,
                })));
            }
        }

        let now = chrono::Utc::now();
        let record = self.memory_store.upsert(JobRecord {
            job_id: uuid::Uuid::new_v4().to_string(),
            host_key: host_key.to_string(),
            action,
            exclusion_class: class,
            state: JobState::Running,
            log_file_name: handle.log_file_name.clone(),
            pid_file_name: handle.pid_file_name.clone(),
            pid: None,
            started_at: now.to_rfc3339(),
            started_at_ms: now.timestamp_millis(),
            ended_at: None,
            outcome: None,
            expires_at_ms: 0,
        });
        self.logger.debug(
            "Registered job",
            Some(&serde_json::json!({"job_id": record.job_id, "host": host_key, "action": action})),
        );
        self.persist();
        Ok(record)
    }

    pub fn attach_pid(&self, job_id: &str, pid: Option<i64>) -> Option<JobRecord> {
        let mut record = self.memory_store.get(job_id)?;
        record.pid = pid;
        let record = self.memory_store.upsert(record);
        self.persist();
        Some(record)
    }

    /// Drops a registration whose launch never reached the host.
    pub fn abandon(&self, job_id: &str) {
        if self.memory_store.forget(job_id) {
            self.persist();
        }
    }

    pub fn complete(&self, job_id: &str, outcome: Option<Outcome>) -> Option<JobRecord> {
        let mut record = self.memory_store.get(job_id)?;
        if record.state == JobState::Finished && record.outcome.is_some() {
            return Some(record);
        }
        record.state = JobState::Finished;
        record.ended_at = Some(chrono::Utc::now().to_rfc3339());
        if outcome.is_some() {
            record.outcome = outcome;
        }
        let record = self.memory_store.upsert(record);
        self.logger.info(
            "Job finished",
            Some(&serde_json::json!({
                "job_id": record.job_id,
                "action": record.action,
                "status": record.outcome.as_ref().map(|o| o.status),
            })),
        );
        self.persist();
        Some(record)
    }

    pub fn find_by_handle(&self, host_key: &str, handle: &JobHandle) -> Option<JobRecord> {
        self.memory_store
            .find_by_log(host_key, &handle.log_file_name)
            .filter(|job| job.pid_file_name == handle.pid_file_name)
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.memory_store.get(job_id)
    }

    pub fn list(&self, limit: usize, state: Option<JobState>, host_key: Option<&str>) -> Vec<JobRecord> {
        self.memory_store.list(limit, state, host_key)
    }

    pub fn forget(&self, job_id: &str) -> bool {
        let existed = self.memory_store.forget(job_id);
        if existed {
            self.persist();
        }
        existed
    }

    pub fn stats(&self) -> Value {
        let mut stats = self.memory_store.stats();
        if let Value::Object(map) = &mut stats {
            map.insert(
                "host_concurrency".to_string(),
                Value::String(
                    match self.concurrency {
                        HostConcurrency::Exclusive => "exclusive",
                        HostConcurrency::Unrestricted => "unrestricted",
                    }
                    .to_string(),
                ),
            );
        }
        stats
    }
}
