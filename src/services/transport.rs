use crate::config;
use crate::constants::limits::COMMAND_LOG_PREVIEW;
use crate::constants::network as network_constants;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::utils::redact::redact_text;
use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use ssh2::Session;
use std::fmt;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

#[derive(Clone, PartialEq, Eq)]
pub enum HostSecret {
    Password(String),
    PrivateKey {
        key: String,
        passphrase: Option<String>,
    },
}

impl HostSecret {
    fn values(&self) -> Vec<String> {
        match self {
            HostSecret::Password(password) => vec![password.clone()],
            HostSecret::PrivateKey { key, passphrase } => {
                let mut out = vec![key.clone()];
                out.extend(passphrase.iter().cloned());
                out
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            HostSecret::Password(_) => "password",
            HostSecret::PrivateKey { .. } => "private_key",
        }
    }
}

impl fmt::Debug for HostSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} redacted>", self.kind())
    }
}

/// Connection parameters for one remote host. Received per call, never
/// persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct HostCredential {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: HostSecret,
    /// `SHA256:<base64>` pin; `None` accepts any host key.
    pub host_key_fingerprint: Option<String>,
}

impl fmt::Debug for HostCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &self.secret)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .finish()
    }
}

impl HostCredential {
    pub fn password(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            secret: HostSecret::Password(password.to_string()),
            host_key_fingerprint: None,
        }
    }

    /// Identity used for per-host bookkeeping: `user@host:port`.
    pub fn host_key(&self) -> String {
        format!("{}@{}:{}", self.username, self.host.to_lowercase(), self.port)
    }

    pub fn secret_values(&self) -> Vec<String> {
        self.secret.values()
    }

    /// Remote text with this credential's secrets masked, for logs and
    /// error details.
    pub fn scrub(&self, text: &str) -> String {
        redact_text(text, usize::MAX, Some(self.secret_values().as_slice()))
    }

    pub fn from_value(value: Option<&Value>, validation: &Validation) -> Result<Self, ToolError> {
        let obj = validation.ensure_object(value, "credential")?;
        let host = validation.ensure_string(obj.get("host").unwrap_or(&Value::Null), "credential.host", true)?;
        let port = validation.ensure_port(obj.get("port"), Some(network_constants::SSH_DEFAULT_PORT))?;
        let username = validation.ensure_string(
            obj.get("username")
                .or_else(|| obj.get("user"))
                .unwrap_or(&Value::Null),
            "credential.username",
            true,
        )?;
        let password = validation.ensure_optional_string(obj.get("password"), "credential.password", false)?;
        let private_key =
            validation.ensure_optional_string(obj.get("private_key"), "credential.private_key", false)?;
        let passphrase =
            validation.ensure_optional_string(obj.get("passphrase"), "credential.passphrase", false)?;
        let secret = match (private_key, password) {
            (Some(key), _) => HostSecret::PrivateKey { key, passphrase },
            (None, Some(password)) => HostSecret::Password(password),
            (None, None) => {
                return Err(ToolError::invalid_params(
                    "credential requires password or private_key",
                ))
            }
        };
        let host_key_fingerprint = normalize_fingerprint_sha256(
            obj.get("host_key_fingerprint_sha256")
                .or_else(|| obj.get("host_key_fingerprint")),
        );
        Ok(Self {
            host,
            port,
            username,
            secret,
            host_key_fingerprint,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn new(exit_code: i64, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, the way a terminal would have shown them.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Completed(ExecutionResult),
    /// The command was handed to a detached worker; nothing more is known.
    Accepted,
}

impl ExecuteOutcome {
    pub fn into_completed(self) -> Result<ExecutionResult, ToolError> {
        match self {
            ExecuteOutcome::Completed(result) => Ok(result),
            ExecuteOutcome::Accepted => Err(ToolError::internal(
                "Transport accepted a command that was expected to complete",
            )),
        }
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Runs `command` on the host. A non-zero exit is still `Ok`; only a
    /// failure to run the command at all is an error.
    async fn execute(
        &self,
        credential: &HostCredential,
        command: &str,
        wait_for_output: bool,
    ) -> Result<ExecuteOutcome, ToolError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SshSettings {
    pub ready_timeout_ms: u64,
    pub exec_timeout_ms: Option<u64>,
    pub max_capture_bytes: usize,
    pub keepalive_interval_ms: u64,
}

impl SshSettings {
    pub fn from_env() -> Self {
        Self {
            ready_timeout_ms: config::resolve_ssh_ready_timeout_ms(),
            exec_timeout_ms: config::resolve_ssh_exec_timeout_ms(),
            max_capture_bytes: config::resolve_max_capture_bytes(),
            keepalive_interval_ms: network_constants::KEEPALIVE_INTERVAL_MS,
        }
    }
}

#[derive(Clone)]
pub struct SshTransport {
    logger: Logger,
    settings: SshSettings,
}

impl SshTransport {
    pub fn new(logger: Logger, settings: SshSettings) -> Self {
        Self {
            logger: logger.child("ssh"),
            settings,
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn execute(
        &self,
        credential: &HostCredential,
        command: &str,
        wait_for_output: bool,
    ) -> Result<ExecuteOutcome, ToolError> {
        let secrets = credential.secret_values();
        let preview = redact_text(command, COMMAND_LOG_PREVIEW, Some(secrets.as_slice()));
        let credential = credential.clone();
        let command = command.to_string();
        let settings = self.settings;

        if !wait_for_output {
            let logger = self.logger.clone();
            let host = credential.host_key();
            logger.debug(
                "Dispatching detached SSH command",
                Some(&serde_json::json!({"host": host, "command": preview})),
            );
            // The worker outlives the request that spawned it.
            drop(tokio::task::spawn_blocking(move || {
                match exec_blocking(&credential, &command, &settings) {
                    Ok(result) => logger.info(
                        "Detached SSH command finished",
                        Some(&serde_json::json!({
                            "host": host,
                            "command": preview,
                            "exit_code": result.exit_code,
                        })),
                    ),
                    Err(err) => logger.error(
                        "Detached SSH command failed",
                        Some(&serde_json::json!({
                            "host": host,
                            "command": preview,
                            "code": err.code,
                            "error": err.message,
                        })),
                    ),
                }
            }));
            return Ok(ExecuteOutcome::Accepted);
        }

        let host = credential.host_key();
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            exec_blocking(&credential, &command, &settings)
        })
        .await
        .map_err(|_| ToolError::internal("SSH exec task failed"))?;
        match &result {
            Ok(done) => self.logger.debug(
                "SSH command completed",
                Some(&serde_json::json!({
                    "host": host,
                    "command": preview,
                    "exit_code": done.exit_code,
                    "duration_ms": started.elapsed().as_millis() as u64,
                })),
            ),
            Err(err) => self.logger.warn(
                "SSH command failed",
                Some(&serde_json::json!({
                    "host": host,
                    "command": preview,
                    "code": err.code,
                    "error": err.message,
                })),
            ),
        }
        result.map(ExecuteOutcome::Completed)
    }
}

struct CaptureState {
    captured: usize,
    buffer: Vec<u8>,
    max_capture: usize,
}

impl CaptureState {
    fn new(max_capture: usize) -> Self {
        Self {
            captured: 0,
            buffer: Vec::new(),
            max_capture,
        }
    }

    fn capture(&mut self, chunk: &[u8]) {
        if self.captured >= self.max_capture {
            return;
        }
        let remaining = self.max_capture - self.captured;
        let slice = if chunk.len() > remaining {
            &chunk[..remaining]
        } else {
            chunk
        };
        self.buffer.extend_from_slice(slice);
        self.captured += slice.len();
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}

fn normalize_fingerprint_sha256(value: Option<&Value>) -> Option<String> {
    let value = value.and_then(|v| v.as_str()).unwrap_or("");
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = trimmed.trim_end_matches('=');
    if cleaned.to_lowercase().starts_with("sha256:") {
        return Some(format!("SHA256:{}", cleaned[7..].trim()));
    }
    Some(format!("SHA256:{}", cleaned))
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn resolve_addrs(credential: &HostCredential) -> Result<Vec<SocketAddr>, ToolError> {
    let addrs: Vec<SocketAddr> = (credential.host.as_str(), credential.port)
        .to_socket_addrs()
        .map_err(|err| {
            ToolError::transport(format!(
                "Failed to resolve {}:{}: {}",
                credential.host, credential.port, err
            ))
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ToolError::transport(format!(
            "No address found for {}",
            credential.host
        )));
    }
    Ok(addrs)
}

fn connect_tcp(credential: &HostCredential, timeout: Duration) -> Result<TcpStream, ToolError> {
    let mut last_err: Option<std::io::Error> = None;
    for addr in resolve_addrs(credential)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    let err = last_err.map(|e| (e.kind(), e.to_string()));
    match err {
        Some((std::io::ErrorKind::TimedOut, msg)) => Err(ToolError::transport_timeout(format!(
            "Timed out connecting to {}:{}: {}",
            credential.host, credential.port, msg
        ))),
        Some((_, msg)) => Err(ToolError::transport(format!(
            "Failed to connect to {}:{}: {}",
            credential.host, credential.port, msg
        ))),
        None => Err(ToolError::transport("Failed to connect SSH")),
    }
}

fn connect_session(credential: &HostCredential, settings: &SshSettings) -> Result<Session, ToolError> {
    let ready_timeout = Duration::from_millis(settings.ready_timeout_ms);
    let tcp = connect_tcp(credential, ready_timeout)?;
    tcp.set_read_timeout(Some(ready_timeout)).ok();
    tcp.set_write_timeout(Some(ready_timeout)).ok();

    let mut session =
        Session::new().map_err(|_| ToolError::internal("Failed to create SSH session"))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(settings.ready_timeout_ms.min(u32::MAX as u64) as u32);
    session.handshake().map_err(map_ssh_error)?;

    if let Some(expected) = credential.host_key_fingerprint.as_ref() {
        let observed = fingerprint_host_key_sha256(&session);
        if observed.as_ref() != Some(expected) {
            return Err(ToolError::denied(format!(
                "SSH host key mismatch (expected {}, got {})",
                expected,
                observed.unwrap_or_else(|| "unknown".to_string())
            )));
        }
    }

    let auth = match &credential.secret {
        HostSecret::PrivateKey { key, passphrase } => session.userauth_pubkey_memory(
            &credential.username,
            None,
            key,
            passphrase.as_deref(),
        ),
        HostSecret::Password(password) => {
            session.userauth_password(&credential.username, password)
        }
    };
    if let Err(err) = auth {
        return Err(ToolError::auth_failed(format!(
            "SSH authentication failed for {}: {}",
            credential.username,
            err.message()
        )));
    }
    if !session.authenticated() {
        return Err(ToolError::auth_failed("SSH authentication failed"));
    }

    // Commands may run for a long time with no output.
    session.set_timeout(0);
    let interval = std::cmp::max(1, (settings.keepalive_interval_ms / 1000) as u32);
    session.set_keepalive(true, interval);

    Ok(session)
}

fn exec_blocking(
    credential: &HostCredential,
    command: &str,
    settings: &SshSettings,
) -> Result<ExecutionResult, ToolError> {
    let session = connect_session(credential, settings)?;
    let mut channel = session.channel_session().map_err(map_ssh_error)?;
    channel.exec(command).map_err(map_ssh_error)?;
    session.set_blocking(false);

    let mut stdout_state = CaptureState::new(settings.max_capture_bytes);
    let mut stderr_state = CaptureState::new(settings.max_capture_bytes);
    let mut stderr_stream = channel.stderr();
    let started = Instant::now();
    let mut timed_out = false;

    loop {
        let mut progressed = false;
        let mut buf = [0u8; 8192];
        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout_state.capture(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) => {
                if err.kind() != std::io::ErrorKind::WouldBlock {
                    return Err(ToolError::transport(format!("SSH stdout read failed: {}", err)));
                }
            }
        }
        match stderr_stream.read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr_state.capture(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) => {
                if err.kind() != std::io::ErrorKind::WouldBlock {
                    return Err(ToolError::transport(format!("SSH stderr read failed: {}", err)));
                }
            }
        }

        if channel.eof() {
            break;
        }
        if let Some(timeout) = settings.exec_timeout_ms {
            if started.elapsed().as_millis() as u64 > timeout {
                timed_out = true;
                break;
            }
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    if timed_out {
        let _ = channel.close();
        let grace = network_constants::TIMEOUT_SSH_EXEC_HARD_GRACE_MS;
        let deadline = Instant::now() + Duration::from_millis(grace);
        while Instant::now() < deadline && !channel.eof() {
            std::thread::sleep(Duration::from_millis(20));
        }
        return Err(ToolError::transport_timeout(format!(
            "Remote command exceeded {} ms",
            settings.exec_timeout_ms.unwrap_or_default()
        ))
        .with_details(serde_json::json!({
            "stdout_captured_bytes": stdout_state.captured,
            "stderr_captured_bytes": stderr_state.captured,
        })));
    }

    session.set_blocking(true);
    let _ = channel.wait_close();
    let exit_code = i64::from(channel.exit_status().unwrap_or(-1));

    Ok(collect_result(exit_code, stdout_state, stderr_state))
}

/// Remote output is data for the caller and is returned byte for byte;
/// redaction happens where it is logged or copied into error details.
fn collect_result(exit_code: i64, stdout: CaptureState, stderr: CaptureState) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
    }
}

fn map_ssh_error(err: ssh2::Error) -> ToolError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        std::io::ErrorKind::TimedOut => ToolError::transport_timeout("SSH operation timed out"),
        _ => ToolError::transport(format!("SSH error: {}", io_err)),
    }
}
