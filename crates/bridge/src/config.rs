//! Bridge configuration, loaded from a YAML file with full defaults.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Registry snapshots land here.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Seconds between discovery cycles.
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
    /// How long a live backend survives failed probes before being marked
    /// offline/stopped.
    #[serde(default = "default_offline_grace")]
    pub offline_grace_secs: u64,
    /// Backends registered at startup.
    #[serde(default)]
    pub backends: Vec<BackendSeed>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_call_secs")]
    pub call_secs: u64,
}

/// A backend declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BackendSeed {
    #[serde(rename = "openapi")]
    OpenApi {
        name: String,
        base_url: String,
        #[serde(default)]
        spec_url: Option<String>,
    },
    #[serde(rename = "tool")]
    Tool {
        name: String,
        endpoint_url: String,
        #[serde(default)]
        launch_command: String,
    },
}

fn default_listen_addr() -> String {
    "127.0.0.1:8100".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_discovery_interval() -> u64 {
    30
}

fn default_offline_grace() -> u64 {
    90
}

fn default_probe_secs() -> u64 {
    5
}

fn default_call_secs() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            call_secs: default_call_secs(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            timeouts: TimeoutConfig::default(),
            discovery_interval_secs: default_discovery_interval(),
            offline_grace_secs: default_offline_grace(),
            backends: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Load from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("read config {}", path.display())),
        };
        serde_yaml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("backends.json")
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.probe_secs)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.call_secs)
    }

    #[must_use]
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    #[must_use]
    pub fn offline_grace(&self) -> Duration {
        Duration::from_secs(self.offline_grace_secs)
    }
}
