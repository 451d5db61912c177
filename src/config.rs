//! TOML configuration for the supervisor daemon: which charge points to
//! host and where to put their control sockets.

use std::path::PathBuf;

use serde::Deserialize;

use crate::chargepoint::ChargePointConfig;
use crate::support::errors::FatalError;
use crate::transport::BasicAuth;

#[derive(Debug, Clone, Deserialize)]
pub struct ChargePointEntry {
    pub cp_id: String,
    pub base_url: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_num_connectors")]
    pub num_connectors: u32,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    #[serde(default = "default_history_max_entries")]
    pub history_max_entries: usize,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_vendor() -> String {
    "Simulated".to_string()
}

fn default_model() -> String {
    "Generic".to_string()
}

fn default_num_connectors() -> u32 {
    1
}

fn default_history_max_entries() -> usize {
    1000
}

fn default_event_channel_capacity() -> usize {
    256
}

impl ChargePointEntry {
    pub fn into_chargepoint_config(self) -> ChargePointConfig {
        let auth = match (self.auth_username, self.auth_password) {
            (Some(username), Some(password)) => Some(BasicAuth { username, password }),
            _ => None,
        };
        ChargePointConfig {
            cp_id: self.cp_id,
            base_url: self.base_url,
            vendor: self.vendor,
            model: self.model,
            num_connectors: self.num_connectors,
            auth,
            history_max_entries: self.history_max_entries,
            event_channel_capacity: self.event_channel_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
    /// Directory holding control sockets, PID files, and event logs, one
    /// triple per charge point.
    pub base_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs_next::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cp-simulator")
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(rename = "charge_point", default)]
    pub charge_points: Vec<ChargePointEntry>,
}

impl SimulatorConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, FatalError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| FatalError::ScenarioFileUnreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

/// `~/.config/cp-simulator/config.toml` (or platform equivalent).
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cp-simulator")
        .join("config.toml")
}
