use anyhow::Context;
use delivery_engine::settings::{poll_interval_from_secs, Settings, SettingsStore};
use delivery_protocol::control::DEFAULT_CONTROL_ADDR;
use delivery_protocol::{LinkRequest, DEFAULT_API_URL};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HOST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PLATFORM: &str = "oxide";
const DEFAULT_SERVER_IP: &str = "0.0.0.0";

const LEGACY_KEYS: &[&str] = &["ApiToken", "token", "ApiCheckIntervalSeconds", "LogCommandExecutions"];

/// The config file as written, including field names from older releases.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    api_token: Option<String>,
    #[serde(rename = "ApiToken")]
    legacy_api_token: Option<String>,
    #[serde(rename = "token")]
    legacy_token: Option<String>,
    poll_interval_seconds: Option<f64>,
    #[serde(rename = "ApiCheckIntervalSeconds")]
    legacy_poll_interval_seconds: Option<f64>,
    log_command_executions: Option<bool>,
    #[serde(rename = "LogCommandExecutions")]
    legacy_log_command_executions: Option<bool>,
    api_url: Option<String>,
    request_timeout_seconds: Option<u64>,
    control_addr: Option<String>,
    server: Option<ServerConfig>,
    host: Option<HostConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct ServerConfig {
    pub(crate) ip: Option<String>,
    pub(crate) hostname: Option<String>,
    pub(crate) platform: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct HostConfig {
    /// Program and leading arguments; the delivery command is appended.
    pub(crate) command: Option<String>,
    pub(crate) timeout_seconds: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct DaemonConfig {
    pub(crate) api_token: String,
    pub(crate) poll_interval: Duration,
    pub(crate) log_command_executions: bool,
    pub(crate) api_url: String,
    pub(crate) request_timeout: Duration,
    pub(crate) control_addr: String,
    pub(crate) server: ServerConfig,
    pub(crate) host_command: Option<String>,
    pub(crate) host_timeout: Duration,
}

impl DaemonConfig {
    pub(crate) fn settings(&self) -> Settings {
        Settings {
            api_token: self.api_token.clone(),
            poll_interval: self.poll_interval,
            log_command_executions: self.log_command_executions,
        }
    }

    pub(crate) fn link_identity(&self) -> LinkRequest {
        let hostname = self
            .server
            .hostname
            .clone()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|value| !value.is_empty()))
            .or_else(system_hostname)
            .unwrap_or_else(|| "unknown".to_string());
        LinkRequest {
            ip: self
                .server
                .ip
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string()),
            hostname,
            platform: self
                .server
                .platform
                .clone()
                .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Folds legacy field names onto current ones. A legacy value, when present,
/// wins over the current name.
fn normalize(raw: RawConfig) -> anyhow::Result<DaemonConfig> {
    let api_token = raw
        .legacy_api_token
        .or(raw.legacy_token)
        .or(raw.api_token)
        .unwrap_or_default();
    let poll_interval_secs = raw
        .legacy_poll_interval_seconds
        .or(raw.poll_interval_seconds)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let log_command_executions = raw
        .legacy_log_command_executions
        .or(raw.log_command_executions)
        .unwrap_or(true);
    let host = raw.host.unwrap_or_default();
    let request_timeout_secs = raw
        .request_timeout_seconds
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if request_timeout_secs == 0 {
        anyhow::bail!("request_timeout_seconds must be greater than zero");
    }

    Ok(DaemonConfig {
        api_token: api_token.trim().to_string(),
        poll_interval: poll_interval_from_secs(poll_interval_secs)?,
        log_command_executions,
        api_url: raw.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        request_timeout: Duration::from_secs(request_timeout_secs),
        control_addr: raw
            .control_addr
            .unwrap_or_else(|| DEFAULT_CONTROL_ADDR.to_string()),
        server: raw.server.unwrap_or_default(),
        host_command: host.command.filter(|value| !value.trim().is_empty()),
        host_timeout: Duration::from_secs(host.timeout_seconds.unwrap_or(DEFAULT_HOST_TIMEOUT_SECS)),
    })
}

/// Loads the config, falling back to defaults when the file does not exist yet.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<DaemonConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<RawConfig>(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config not found, using defaults");
            RawConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config {}", path.display()))
        }
    };
    normalize(raw)
}

/// Writes runtime settings back into the config file, leaving other keys alone.
pub(crate) struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn persist(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut table = match std::fs::read_to_string(&self.path) {
            Ok(raw) => toml::from_str::<toml::Table>(&raw)
                .with_context(|| format!("failed to parse config {}", self.path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config {}", self.path.display()))
            }
        };
        for key in LEGACY_KEYS {
            table.remove(*key);
        }
        table.insert(
            "api_token".to_string(),
            toml::Value::String(settings.api_token.clone()),
        );
        table.insert(
            "poll_interval_seconds".to_string(),
            toml::Value::Float(settings.poll_interval.as_secs_f64()),
        );
        table.insert(
            "log_command_executions".to_string(),
            toml::Value::Boolean(settings.log_command_executions),
        );
        let payload = toml::to_string_pretty(&table).context("failed to encode config")?;

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, payload)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|byte| *byte == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
