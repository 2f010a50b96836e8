mod common;
use common::ENV_LOCK;

use hostops::config::{
    resolve_artifact_dir, resolve_host_concurrency, resolve_job_store_kind, resolve_jobs_path,
    resolve_poll_max_log_bytes, HostConcurrency, JobStoreKind,
};
use std::path::PathBuf;

fn restore_env(key: &str, previous: Option<String>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

#[tokio::test]
async fn artifact_dir_rejects_shell_metacharacters() {
    let _guard = ENV_LOCK.lock().await;
    let prev = std::env::var("HOSTOPS_ARTIFACT_DIR").ok();

    std::env::remove_var("HOSTOPS_ARTIFACT_DIR");
    assert_eq!(resolve_artifact_dir().unwrap(), "/tmp");

    std::env::set_var("HOSTOPS_ARTIFACT_DIR", "/var/tmp/hostops/");
    assert_eq!(resolve_artifact_dir().unwrap(), "/var/tmp/hostops");

    for bad in ["tmp", "/tmp; rm -rf /", "/tmp/$(id)", "/tmp/../etc"] {
        std::env::set_var("HOSTOPS_ARTIFACT_DIR", bad);
        let err = resolve_artifact_dir().unwrap_err();
        assert_eq!(err.code, "INVALID_PARAMS", "{} must be rejected", bad);
    }

    restore_env("HOSTOPS_ARTIFACT_DIR", prev);
}

#[tokio::test]
async fn host_concurrency_defaults_to_exclusive() {
    let _guard = ENV_LOCK.lock().await;
    let prev = std::env::var("HOSTOPS_HOST_CONCURRENCY").ok();

    std::env::remove_var("HOSTOPS_HOST_CONCURRENCY");
    assert_eq!(resolve_host_concurrency(), HostConcurrency::Exclusive);

    std::env::set_var("HOSTOPS_HOST_CONCURRENCY", "Unrestricted");
    assert_eq!(resolve_host_concurrency(), HostConcurrency::Unrestricted);

    std::env::set_var("HOSTOPS_HOST_CONCURRENCY", "whatever");
    assert_eq!(resolve_host_concurrency(), HostConcurrency::Exclusive);

    restore_env("HOSTOPS_HOST_CONCURRENCY", prev);
}

#[tokio::test]
async fn job_store_location_follows_env() {
    let _guard = ENV_LOCK.lock().await;
    let prev_store = std::env::var("HOSTOPS_JOBS_STORE").ok();
    let prev_path = std::env::var("HOSTOPS_JOBS_PATH").ok();
    let prev_state = std::env::var("XDG_STATE_HOME").ok();

    std::env::remove_var("HOSTOPS_JOBS_STORE");
    assert_eq!(resolve_job_store_kind(), JobStoreKind::Memory);
    std::env::set_var("HOSTOPS_JOBS_STORE", "file");
    assert_eq!(resolve_job_store_kind(), JobStoreKind::File);

    std::env::remove_var("HOSTOPS_JOBS_PATH");
    std::env::set_var("XDG_STATE_HOME", "/state");
    assert_eq!(resolve_jobs_path(), PathBuf::from("/state/hostops/jobs.json"));
    std::env::set_var("HOSTOPS_JOBS_PATH", "/custom/jobs.json");
    assert_eq!(resolve_jobs_path(), PathBuf::from("/custom/jobs.json"));

    restore_env("HOSTOPS_JOBS_STORE", prev_store);
    restore_env("HOSTOPS_JOBS_PATH", prev_path);
    restore_env("XDG_STATE_HOME", prev_state);
}

#[tokio::test]
async fn poll_tail_stays_below_the_capture_cap() {
    let _guard = ENV_LOCK.lock().await;
    let prev = std::env::var("HOSTOPS_POLL_MAX_LOG_BYTES").ok();

    std::env::remove_var("HOSTOPS_POLL_MAX_LOG_BYTES");
    assert_eq!(resolve_poll_max_log_bytes(256 * 1024), 192 * 1024);
    assert_eq!(resolve_poll_max_log_bytes(64 * 1024), 60 * 1024);

    std::env::set_var("HOSTOPS_POLL_MAX_LOG_BYTES", (512 * 1024).to_string());
    assert_eq!(resolve_poll_max_log_bytes(256 * 1024), 252 * 1024);

    std::env::set_var("HOSTOPS_POLL_MAX_LOG_BYTES", "1000");
    assert_eq!(resolve_poll_max_log_bytes(256 * 1024), 1000);
    assert_eq!(resolve_poll_max_log_bytes(2048), 1000);
    assert_eq!(resolve_poll_max_log_bytes(1024), 512);

    restore_env("HOSTOPS_POLL_MAX_LOG_BYTES", prev);
}
