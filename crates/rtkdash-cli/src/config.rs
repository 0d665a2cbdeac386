//! Device configuration – reads/writes `~/.rtkdash/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rtkdash_middleware::BroadcasterConfig;
use rtkdash_types::{DeviceProfile, Role};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted device configuration. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `"rover"` or `"base_station"`.
    #[serde(default)]
    pub role: Role,

    /// Whether a TinkerCharge power board is fitted.
    #[serde(default = "default_power_module")]
    pub power_module: bool,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Most queued events written to a browser with one flush.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,

    /// Reconnect delay suggested to browsers.
    #[serde(default = "default_retry_hint_ms")]
    pub retry_hint_ms: u64,

    /// Feed the store from the built-in simulator instead of real hardware.
    #[serde(default)]
    pub simulate: bool,
}

fn default_power_module() -> bool {
    true
}
fn default_http_port() -> u16 {
    80
}
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_write_timeout_ms() -> u64 {
    2_000
}
fn default_client_buffer() -> usize {
    64
}
fn default_retry_hint_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::default(),
            power_module: default_power_module(),
            http_port: default_http_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            client_buffer: default_client_buffer(),
            retry_hint_ms: default_retry_hint_ms(),
            simulate: false,
        }
    }
}

impl Config {
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile::new(self.role, self.power_module)
    }

    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            client_buffer: self.client_buffer,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            retry_hint: Duration::from_millis(self.retry_hint_ms),
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be greater than zero".into());
        }
        if self.write_timeout_ms == 0 {
            return Err("write_timeout_ms must be greater than zero".into());
        }
        if self.client_buffer == 0 {
            return Err("client_buffer must be greater than zero".into());
        }
        if self.write_timeout_ms >= self.heartbeat_interval_ms {
            warn!(
                write_timeout_ms = self.write_timeout_ms,
                heartbeat_interval_ms = self.heartbeat_interval_ms,
                "write timeout is not shorter than the heartbeat; stalled browsers may survive an extra tick"
            );
        }
        Ok(())
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from an existing file.
    Loaded,
    /// No file existed; defaults were written.
    Created,
}

/// Return the path to `~/.rtkdash/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rtkdash").join("config.toml")
}

/// Load `~/.rtkdash/config.toml`, writing defaults on first run, then apply
/// `RTKDASH_*` overrides and validate.
pub fn load_or_init() -> Result<(Config, ConfigSource), String> {
    load_or_init_at(&config_path(), |key| std::env::var(key).ok())
}

pub(crate) fn load_or_init_at(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(Config, ConfigSource), String> {
    let (mut cfg, source) = match load_from(path)? {
        Some(cfg) => (cfg, ConfigSource::Loaded),
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            (cfg, ConfigSource::Created)
        }
    };
    apply_overrides(&mut cfg, env);
    cfg.validate()?;
    Ok((cfg, source))
}

/// Load the config from `path`. Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))
}

/// Apply `RTKDASH_*` overrides looked up through `env`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RTKDASH_ROLE` | `role` |
/// | `RTKDASH_HTTP_PORT` | `http_port` |
/// | `RTKDASH_POWER_MODULE` | `power_module` |
/// | `RTKDASH_SIMULATE` | `simulate` |
///
/// Unparseable values are logged and ignored.
pub fn apply_overrides(cfg: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("RTKDASH_ROLE") {
        match v.parse::<Role>() {
            Ok(role) => cfg.role = role,
            Err(e) => warn!(value = %v, error = %e, "ignoring RTKDASH_ROLE"),
        }
    }
    if let Some(v) = env("RTKDASH_HTTP_PORT") {
        match v.trim().parse::<u16>() {
            Ok(port) => cfg.http_port = port,
            Err(_) => warn!(value = %v, "ignoring RTKDASH_HTTP_PORT"),
        }
    }
    if let Some(v) = env("RTKDASH_POWER_MODULE")
        && let Some(flag) = parse_flag(&v, "RTKDASH_POWER_MODULE")
    {
        cfg.power_module = flag;
    }
    if let Some(v) = env("RTKDASH_SIMULATE")
        && let Some(flag) = parse_flag(&v, "RTKDASH_SIMULATE")
    {
        cfg.simulate = flag;
    }
}

fn parse_flag(value: &str, var: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(value, var, "ignoring non-boolean override");
            None
        }
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
