use crate::constants::{jobs, limits, network};
use crate::errors::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::path::PathBuf;

static ARTIFACT_DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[A-Za-z0-9._/-]*$").expect("artifact dir regex"));

fn read_env(name: &str) -> Option<String> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn read_env_u64(name: &str) -> Option<u64> {
    read_env(name)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostConcurrency {
    Exclusive,
    Unrestricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStoreKind {
    Memory,
    File,
}

pub fn resolve_ssh_ready_timeout_ms() -> u64 {
    read_env_u64("HOSTOPS_SSH_READY_TIMEOUT_MS").unwrap_or(network::TIMEOUT_SSH_READY_MS)
}

pub fn resolve_ssh_exec_timeout_ms() -> Option<u64> {
    read_env_u64("HOSTOPS_SSH_EXEC_TIMEOUT_MS")
}

pub fn resolve_max_capture_bytes() -> usize {
    read_env_u64("HOSTOPS_SSH_MAX_CAPTURE_BYTES")
        .map(|v| v as usize)
        .unwrap_or(limits::MAX_CAPTURE_BYTES)
}

/// Log tail read per poll. Kept below `max_capture_bytes` so the status
/// trailer printed after the tail is never cut off.
pub fn resolve_poll_max_log_bytes(max_capture_bytes: usize) -> usize {
    let requested = read_env_u64("HOSTOPS_POLL_MAX_LOG_BYTES")
        .map(|v| v as usize)
        .unwrap_or(limits::POLL_MAX_LOG_BYTES);
    let ceiling = max_capture_bytes
        .saturating_sub(limits::POLL_TRAILER_RESERVE_BYTES)
        .max(max_capture_bytes / 2);
    requested.min(ceiling).max(1)
}

pub fn resolve_poll_interval_ms() -> u64 {
    read_env_u64("HOSTOPS_POLL_INTERVAL_MS").unwrap_or(jobs::POLL_INTERVAL_MS)
}

pub fn resolve_tool_call_budget_ms() -> u64 {
    read_env_u64("HOSTOPS_TOOL_CALL_TIMEOUT_MS").unwrap_or(network::TIMEOUT_TOOL_CALL_MS)
}

/// Remote directory holding job artifacts. It is interpolated into shell
/// text, so anything outside a plain absolute path is refused.
pub fn resolve_artifact_dir() -> Result<String, ToolError> {
    let Some(raw) = read_env("HOSTOPS_ARTIFACT_DIR") else {
        return Ok(jobs::ARTIFACT_DIR.to_string());
    };
    let trimmed = raw.trim_end_matches('/');
    let normalized = if trimmed.is_empty() { "/" } else { trimmed };
    if !ARTIFACT_DIR_RE.is_match(normalized) || normalized.contains("..") {
        return Err(ToolError::invalid_params(format!(
            "HOSTOPS_ARTIFACT_DIR must be a plain absolute path, got {}",
            raw
        )));
    }
    Ok(normalized.to_string())
}

pub fn resolve_outcome_rules_path() -> Option<PathBuf> {
    read_env("HOSTOPS_OUTCOME_RULES_PATH").map(PathBuf::from)
}

pub fn resolve_host_concurrency() -> HostConcurrency {
    match read_env("HOSTOPS_HOST_CONCURRENCY")
        .map(|v| v.to_lowercase())
        .as_deref()
    {
        Some("unrestricted") | Some("none") | Some("off") => HostConcurrency::Unrestricted,
        _ => HostConcurrency::Exclusive,
    }
}

pub fn resolve_job_store_kind() -> JobStoreKind {
    match read_env("HOSTOPS_JOBS_STORE")
        .map(|v| v.to_lowercase())
        .as_deref()
    {
        Some("file") => JobStoreKind::File,
        _ => JobStoreKind::Memory,
    }
}

pub fn resolve_jobs_max() -> usize {
    read_env_u64("HOSTOPS_JOBS_MAX")
        .map(|v| v as usize)
        .unwrap_or(jobs::MAX_JOBS)
}

pub fn resolve_jobs_ttl_ms() -> u64 {
    read_env_u64("HOSTOPS_JOBS_TTL_MS").unwrap_or(jobs::TTL_MS)
}

fn resolve_state_dir() -> PathBuf {
    if let Some(path) = read_env("XDG_STATE_HOME") {
        return PathBuf::from(path).join("hostops");
    }
    if let Some(home) = read_env("HOME") {
        return PathBuf::from(home).join(".local").join("state").join("hostops");
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".hostops")
}

pub fn resolve_jobs_path() -> PathBuf {
    read_env("HOSTOPS_JOBS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| resolve_state_dir().join("jobs.json"))
}
