pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_READY_MS: u64 = 20_000;
    pub const TIMEOUT_TOOL_CALL_MS: u64 = 55_000;
    pub const TIMEOUT_SSH_EXEC_HARD_GRACE_MS: u64 = 2_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
    pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;
    pub const POLL_MAX_LOG_BYTES: usize = 192 * 1024;
    /// Room left in the capture for the separator and liveness token.
    pub const POLL_TRAILER_RESERVE_BYTES: usize = 4 * 1024;
    pub const COMMAND_LOG_PREVIEW: usize = 120;
}

pub mod jobs {
    pub const ARTIFACT_DIR: &str = "/tmp";
    pub const ARTIFACT_PREFIX: &str = "wo-action-";
    pub const STATUS_SEPARATOR: &str = "---STATUS-SEPARATOR---";
    pub const EXIT_MARKER: &str = "__HOSTOPS_EXIT__=";
    pub const POLL_INTERVAL_MS: u64 = 3_000;
    pub const MAX_JOBS: usize = 500;
    pub const TTL_MS: u64 = 6 * 60 * 60_000;
}
