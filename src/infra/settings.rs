//! Usage: Persisted application settings (schema + load helpers).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_DB_PATH: &str = "data/modelgate.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_SESSION_TTL_HOURS: u32 = 24;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECONDS: u32 = 10;
pub const DEFAULT_UPSTREAM_REQUEST_TIMEOUT_NON_STREAMING_SECONDS: u32 = 300;
const DEFAULT_ADMIN_SEED_EMAIL: &str = "admin";
const DEFAULT_ADMIN_SEED_PASSWORD: &str = "admin";
const MAX_SESSION_TTL_HOURS: u32 = 24 * 30;
const MAX_UPSTREAM_CONNECT_TIMEOUT_SECONDS: u32 = 5 * 60;
const MAX_UPSTREAM_REQUEST_TIMEOUT_NON_STREAMING_SECONDS: u32 = 24 * 60 * 60;

const CONFIG_PATH_ENV: &str = "MODELGATE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "modelgate.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub schema_version: u32,
    pub bind_address: String,
    pub port: u16,
    pub db_path: String,
    // Directory for rolling log files; empty disables file logging.
    pub log_dir: String,
    pub admin_seed_email: String,
    pub admin_seed_password: String,
    pub session_ttl_hours: u32,
    // 0 disables the corresponding timeout.
    pub upstream_connect_timeout_seconds: u32,
    pub upstream_request_timeout_non_streaming_seconds: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            db_path: DEFAULT_DB_PATH.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            admin_seed_email: DEFAULT_ADMIN_SEED_EMAIL.to_string(),
            admin_seed_password: DEFAULT_ADMIN_SEED_PASSWORD.to_string(),
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            upstream_connect_timeout_seconds: DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECONDS,
            upstream_request_timeout_non_streaming_seconds:
                DEFAULT_UPSTREAM_REQUEST_TIMEOUT_NON_STREAMING_SECONDS,
        }
    }
}

impl AppSettings {
    fn normalized(mut self) -> Self {
        self.schema_version = SCHEMA_VERSION;
        if self.bind_address.trim().is_empty() {
            self.bind_address = DEFAULT_BIND_ADDRESS.to_string();
        }
        if self.db_path.trim().is_empty() {
            self.db_path = DEFAULT_DB_PATH.to_string();
        }
        self.session_ttl_hours = self
            .session_ttl_hours
            .clamp(1, MAX_SESSION_TTL_HOURS);
        self.upstream_connect_timeout_seconds = self
            .upstream_connect_timeout_seconds
            .min(MAX_UPSTREAM_CONNECT_TIMEOUT_SECONDS);
        self.upstream_request_timeout_non_streaming_seconds = self
            .upstream_request_timeout_non_streaming_seconds
            .min(MAX_UPSTREAM_REQUEST_TIMEOUT_NON_STREAMING_SECONDS);
        self
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env_trimmed("MODELGATE_PORT")
            .or_else(|| env_trimmed("PORT"))
            .and_then(|v| v.parse::<u16>().ok())
        {
            self.port = port;
        }
        if let Some(addr) = env_trimmed("MODELGATE_BIND") {
            self.bind_address = addr;
        }
        if let Some(path) = env_trimmed("MODELGATE_DB") {
            self.db_path = path;
        }
        if let Some(email) = env_trimmed("MODELGATE_ADMIN_EMAIL") {
            self.admin_seed_email = email;
        }
        if let Some(password) = env_trimmed("MODELGATE_ADMIN_PASSWORD") {
            self.admin_seed_password = password;
        }
        self
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn config_path() -> PathBuf {
    env_trimmed(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads settings from the config file; a missing file yields defaults.
/// Env overrides are applied after the file is parsed.
pub fn load() -> Result<AppSettings, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<AppSettings, String> {
    let settings = match std::fs::read(path) {
        Ok(raw) => serde_json::from_slice::<AppSettings>(&raw).map_err(|e| {
            format!(
                "SEC_INVALID_INPUT: failed to parse settings at {}: {e}",
                path.display()
            )
        })?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(err) => {
            return Err(format!(
                "SYSTEM_ERROR: failed to read settings at {}: {err}",
                path.display()
            ))
        }
    };

    Ok(settings.with_env_overrides().normalized())
}
