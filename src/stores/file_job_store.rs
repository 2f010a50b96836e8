use crate::errors::ToolError;
use crate::services::job::JobRecord;
use crate::stores::memory_job_store::MemoryJobStore;
use crate::utils::fs_atomic::atomic_write_text_file;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct JobsDocument<'a> {
    version: u32,
    updated_at: String,
    jobs: &'a [JobRecord],
}

/// Entries stay untyped until each one is checked, so one stale record
/// does not discard the rest.
#[derive(Deserialize)]
struct StoredJobs {
    #[serde(default)]
    jobs: Vec<Value>,
}

/// Mirrors a `MemoryJobStore` to a JSON file so running jobs survive a
/// server restart.
#[derive(Clone)]
pub struct FileJobStore {
    inner: MemoryJobStore,
    file_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileJobStore {
    pub fn new(inner: MemoryJobStore, file_path: PathBuf) -> Self {
        Self {
            inner,
            file_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Loads records into the memory store and returns how many were
    /// accepted. An unreadable file is moved aside so the next persist
    /// does not overwrite it.
    pub fn load_from_disk(&self) -> Result<usize, ToolError> {
        let raw = match std::fs::read_to_string(&self.file_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(ToolError::internal(format!(
                    "Cannot read job registry {}: {}",
                    self.file_path.display(),
                    err
                )))
            }
        };
        let stored: StoredJobs = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                let quarantine = self.file_path.with_extension(format!(
                    "corrupt-{}",
                    chrono::Utc::now().timestamp_millis()
                ));
                let moved = std::fs::rename(&self.file_path, &quarantine).is_ok();
                return Err(ToolError::internal(format!(
                    "Job registry {} is not valid JSON: {}",
                    self.file_path.display(),
                    err
                ))
                .with_details(serde_json::json!({
                    "quarantined_to": moved.then(|| quarantine.display().to_string()),
                })));
            }
        };
        let records: Vec<JobRecord> = stored
            .jobs
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        let accepted = records.len();
        self.inner.load(records);
        Ok(accepted)
    }

    pub fn persist(&self) -> Result<(), ToolError> {
        let jobs = self.inner.snapshot();
        let document = JobsDocument {
            version: FORMAT_VERSION,
            updated_at: chrono::Utc::now().to_rfc3339(),
            jobs: &jobs,
        };
        let mut payload = serde_json::to_string_pretty(&document)
            .map_err(|err| ToolError::internal(format!("Cannot encode job registry: {}", err)))?;
        payload.push('\n');
        let _guard = self.write_lock.lock().unwrap_or_else(|err| err.into_inner());
        atomic_write_text_file(&self.file_path, &payload, 0o600).map_err(|err| {
            ToolError::internal(format!(
                "Cannot write job registry {}: {}",
                self.file_path.display(),
                err
            ))
        })
    }
}
