//! Engine and daemon configuration.
//!
//! Everything the core consumes arrives here as already-resolved values:
//! default retry/timeout budgets, cluster seed addresses, the scheduler
//! tick period. The core never reads the environment directly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, FaultlineError};

/// Top-level configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultlineConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path to the Unix socket for the daemon control API.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            socket_path: default_socket_path(),
        }
    }
}

/// Defaults applied to command execution and task tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry interval used when a CommandSpec leaves it unset (seconds).
    #[serde(default = "default_retry_interval")]
    pub default_retry_interval_secs: u64,
    /// Per-attempt command timeout when a CommandSpec leaves it unset (ms).
    #[serde(default = "default_command_timeout")]
    pub default_command_timeout_ms: u64,
    /// Poll period of the scheduler tick loop (seconds).
    #[serde(default = "default_scheduler_poll")]
    pub scheduler_poll_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retry_interval_secs: default_retry_interval(),
            default_command_timeout_ms: default_command_timeout(),
            scheduler_poll_secs: default_scheduler_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name this node advertises in the membership view.
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Seed addresses of other cluster members.
    #[serde(default)]
    pub seed_members: Vec<String>,
    /// Wait budget for node status convergence (milliseconds).
    #[serde(default = "default_convergence_wait")]
    pub convergence_wait_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            seed_members: Vec::new(),
            convergence_wait_ms: default_convergence_wait(),
        }
    }
}

impl FaultlineConfig {
    /// Default config location: `~/.config/faultline/faultline.toml`.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("faultline").join("faultline.toml"))
    }

    /// Load a TOML configuration file. Without an explicit path, the
    /// default location is used when present, built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, FaultlineError> {
        let resolved;
        let path = match path {
            Some(path) => path,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => {
                    resolved = default;
                    resolved.as_path()
                }
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Err(FaultlineError::with_args(
                ErrorCode::ConfigNotFound,
                [path.display().to_string()],
            ));
        }
        let raw = std::fs::read_to_string(path).map_err(|_| {
            FaultlineError::with_args(ErrorCode::ConfigReadError, [path.display().to_string()])
        })?;
        toml::from_str(&raw).map_err(|e| {
            FaultlineError::with_args(ErrorCode::ConfigParseError, [e.to_string()])
        })
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_socket_path() -> String {
    "/tmp/faultlined.sock".to_string()
}

fn default_retry_interval() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    100_000
}

fn default_scheduler_poll() -> u64 {
    1
}

fn default_node_name() -> String {
    "faultline-node-1".to_string()
}

fn default_convergence_wait() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_path() {
        let config = FaultlineConfig::load(None).unwrap();
        assert_eq!(config.engine.default_retry_interval_secs, 5);
        assert_eq!(config.cluster.convergence_wait_ms, 60_000);
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let err = FaultlineConfig::load(Some(Path::new("/nonexistent/faultline.toml")))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigNotFound);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[engine]\ndefault_retry_interval_secs = 2\n\n[cluster]\nnode_name = \"n-2\""
        )
        .unwrap();
        let config = FaultlineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.default_retry_interval_secs, 2);
        assert_eq!(config.engine.scheduler_poll_secs, 1);
        assert_eq!(config.cluster.node_name, "n-2");
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine\nbroken").unwrap();
        let err = FaultlineConfig::load(Some(file.path())).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigParseError);
    }
}
