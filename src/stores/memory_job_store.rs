use crate::services::job::{JobRecord, JobState};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    max_jobs: usize,
    ttl_ms: u64,
    source: String,
}

impl MemoryJobStore {
    pub fn new(max_jobs: usize, ttl_ms: u64, source: &str) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            max_jobs: max_jobs.max(1),
            ttl_ms,
            source: source.to_string(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.write().unwrap_or_else(|err| err.into_inner())
    }

    /// Stores `record`, refreshing its expiry.
    pub fn upsert(&self, mut record: JobRecord) -> JobRecord {
        record.expires_at_ms = chrono::Utc::now().timestamp_millis() + self.ttl_ms as i64;
        self.write().insert(record.job_id.clone(), record.clone());
        self.purge_expired();
        record
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.purge_expired();
        self.read().get(job_id).cloned()
    }

    pub fn find_by_log(&self, host_key: &str, log_file_name: &str) -> Option<JobRecord> {
        self.purge_expired();
        self.read()
            .values()
            .find(|job| job.host_key == host_key && job.log_file_name == log_file_name)
            .cloned()
    }

    pub fn running_on_host(&self, host_key: &str) -> Vec<JobRecord> {
        self.purge_expired();
        self.read()
            .values()
            .filter(|job| job.host_key == host_key && job.state == JobState::Running)
            .cloned()
            .collect()
    }

    /// Newest first.
    pub fn list(&self, limit: usize, state: Option<JobState>, host_key: Option<&str>) -> Vec<JobRecord> {
        self.purge_expired();
        let mut values: Vec<JobRecord> = self
            .read()
            .values()
            .filter(|job| state.map(|s| job.state == s).unwrap_or(true))
            .filter(|job| host_key.map(|h| job.host_key == h).unwrap_or(true))
            .cloned()
            .collect();
        values.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
        values.truncate(limit);
        values
    }

    pub fn forget(&self, job_id: &str) -> bool {
        self.write().remove(job_id).is_some()
    }

    pub fn load(&self, records: Vec<JobRecord>) {
        {
            let mut jobs = self.write();
            for record in records {
                jobs.insert(record.job_id.clone(), record);
            }
        }
        self.purge_expired();
    }

    /// All records, oldest first.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.read().values().cloned().collect();
        jobs.sort_by_key(|job| job.started_at_ms);
        jobs
    }

    pub fn stats(&self) -> Value {
        let jobs = self.read();
        let running = jobs.values().filter(|job| job.state == JobState::Running).count();
        serde_json::json!({
            "jobs": jobs.len(),
            "running": running,
            "max_jobs": self.max_jobs,
            "ttl_ms": self.ttl_ms,
            "store": self.source,
        })
    }

    /// Drops expired records, then evicts the oldest until under
    /// `max_jobs`, finished records first.
    pub fn purge_expired(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut jobs = self.write();
        jobs.retain(|_, job| job.expires_at_ms > now);
        if jobs.len() <= self.max_jobs {
            return;
        }
        let mut order: Vec<(bool, i64, String)> = jobs
            .values()
            .map(|job| (job.state == JobState::Running, job.started_at_ms, job.job_id.clone()))
            .collect();
        order.sort();
        let excess = jobs.len() - self.max_jobs;
        for (_, _, job_id) in order.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
    }
}
