//! Daemon configuration
//!
//! The orchestrator reads one TOML file; the entity definitions (nodes,
//! clusters, programs) live in separate JSON files under the configured data
//! directories, see [`crate::jsonload`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the orchestrator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Address the viewer listener binds to
    pub gui_address: String,

    /// Directory of node definition files (`*.json`)
    pub node_path: PathBuf,

    /// Directory of cluster definition files (`*.json`)
    pub cluster_path: PathBuf,

    /// Directory of program definition files (`*.json`)
    pub program_path: PathBuf,

    /// Interval of the tray reconnection scan
    #[serde(with = "duration_millis")]
    pub reconnect_interval: Duration,

    /// How long a process is kept in the registry after reaching a terminal
    /// status
    #[serde(with = "duration_millis")]
    pub process_retention: Duration,

    /// Log file; stdout only when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            gui_address: "0.0.0.0:6280".to_string(),
            node_path: PathBuf::from("data/nodes"),
            cluster_path: PathBuf::from("data/clusters"),
            program_path: PathBuf::from("data/programs"),
            reconnect_interval: Duration::from_millis(2500),
            process_retention: Duration::from_secs(90),
            log_file: None,
        }
    }
}

/// Load the daemon configuration from a TOML file
pub fn load_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("failed to read config: {e}")))?;

    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Serde helper serializing a `Duration` as integer milliseconds
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde helper for `Option<Duration>` as integer milliseconds
pub mod opt_duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
