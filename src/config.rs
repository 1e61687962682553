use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::collectors::disk::DriveLetter;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub http_checks: HttpChecksConfig,
    #[serde(default)]
    pub collect_dir: Option<PathBuf>,
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_connect_retry")]
    pub connect_retry: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClockConfig {
    #[serde(default = "default_correct_drift")]
    pub correct_drift: bool,
    #[serde(default = "default_drift_threshold_secs")]
    pub drift_threshold_secs: f64,
    #[serde(default = "default_nudge_ms")]
    pub nudge_ms: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpChecksConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub hostname: String,
    #[serde(default)]
    pub static_ip: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub physical_location: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default = "default_record_source")]
    pub record_creation_source: String,
    #[serde(default)]
    pub drive_check: DriveCheckPolicy,
    #[serde(default)]
    pub health_checks: Vec<HealthCheckConfig>,
    #[serde(default)]
    pub collect_files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriveCheckPolicy {
    #[serde(default = "default_drive_letter")]
    pub drive_letter: String,
    #[serde(default)]
    pub alert_threshold_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    pub port: u16,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_retry: default_connect_retry(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            correct_drift: default_correct_drift(),
            drift_threshold_secs: default_drift_threshold_secs(),
            nudge_ms: default_nudge_ms(),
        }
    }
}

impl Default for HttpChecksConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for DriveCheckPolicy {
    fn default() -> Self {
        Self {
            drive_letter: default_drive_letter(),
            alert_threshold_bytes: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database_url is required".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.api.listen).is_err() {
            return Err(ConfigError::Validation(
                "api.listen must be a valid host:port address".to_string(),
            ));
        }

        validate_ssh(&self.ssh)?;
        validate_clock(&self.clock)?;
        validate_http_checks(&self.http_checks)?;
        validate_systems(&self.systems)?;

        Ok(())
    }

    pub fn drive_policy(&self, hostname: &str) -> DriveCheckPolicy {
        self.system(hostname)
            .map(|s| s.drive_check.clone())
            .unwrap_or_default()
    }

    pub fn system(&self, hostname: &str) -> Option<&SystemConfig> {
        self.systems.iter().find(|s| s.hostname == hostname)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_ssh(cfg: &SshConfig) -> Result<(), ConfigError> {
    if cfg.port == 0 {
        return Err(ConfigError::Validation(
            "ssh.port must be in 1..65535".to_string(),
        ));
    }
    if cfg.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "ssh.connect_timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.command_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "ssh.command_timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_clock(cfg: &ClockConfig) -> Result<(), ConfigError> {
    if !cfg.drift_threshold_secs.is_finite() || cfg.drift_threshold_secs < 0.0 {
        return Err(ConfigError::Validation(
            "clock.drift_threshold_secs must be a non-negative number".to_string(),
        ));
    }
    if cfg.nudge_ms == 0 {
        return Err(ConfigError::Validation(
            "clock.nudge_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_http_checks(cfg: &HttpChecksConfig) -> Result<(), ConfigError> {
    if cfg.scheme != "http" && cfg.scheme != "https" {
        return Err(ConfigError::Validation(format!(
            "http_checks.scheme must be 'http' or 'https', got '{}'",
            cfg.scheme
        )));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "http_checks.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_systems(systems: &[SystemConfig]) -> Result<(), ConfigError> {
    let mut hostnames = HashSet::new();
    for system in systems {
        if system.hostname.trim().is_empty() {
            return Err(ConfigError::Validation(
                "systems[*].hostname must not be empty".to_string(),
            ));
        }
        if !hostnames.insert(system.hostname.clone()) {
            return Err(ConfigError::Validation(format!(
                "system hostname '{}' must be unique",
                system.hostname
            )));
        }
        if system.username.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "system '{}' username must not be empty",
                system.hostname
            )));
        }
        if DriveLetter::parse(&system.drive_check.drive_letter).is_err() {
            return Err(ConfigError::Validation(format!(
                "system '{}' drive_check.drive_letter must be a single letter, got '{}'",
                system.hostname, system.drive_check.drive_letter
            )));
        }
        for check in &system.health_checks {
            if check.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "system '{}' health check port must be in 1..65535",
                    system.hostname
                )));
            }
        }
    }
    Ok(())
}

fn default_encryption_key_env() -> String {
    "FLEETWATCH_ENCRYPTION_KEY".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

const fn default_ssh_port() -> u16 {
    22
}

const fn default_connect_retry() -> u32 {
    2
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_command_timeout_ms() -> u64 {
    5_000
}

const fn default_correct_drift() -> bool {
    true
}

const fn default_drift_threshold_secs() -> f64 {
    10.0
}

const fn default_nudge_ms() -> u32 {
    300
}

fn default_scheme() -> String {
    "http".to_string()
}

const fn default_http_timeout_ms() -> u64 {
    5_000
}

fn default_record_source() -> String {
    "config".to_string()
}

fn default_drive_letter() -> String {
    "c".to_string()
}

const fn default_expected_status() -> u16 {
    200
}
