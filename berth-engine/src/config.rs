//! Configuration management for the berth engine
//!
//! Settings are resolved from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use crate::cluster::confirm::DeclinePolicy;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    /// Build log settings
    pub build: BuildConfig,
    /// Local cluster settings
    pub cluster: ClusterConfig,
    /// Diagnostic logging settings
    pub logging: LoggingConfig,
}

/// Build log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory holding one `<service>.log` per service
    pub log_dir: PathBuf,
    /// Dump every raw build event into the service logs
    pub verbose: bool,
}

/// Local cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name, also the prefix of every node container
    pub name: String,
    /// Where the bootstrap facility writes the cluster's kubeconfig
    pub kubeconfig: PathBuf,
    /// Extra host directory mounted into every node when it exists
    pub host_mount: Option<PathBuf>,
    /// Not-ready nodes that transitioned more recently than this are "still booting"
    pub freshness_window_secs: u64,
    /// What a declined (or defaulted) redeploy prompt means
    pub decline_policy: DeclinePolicy,
    /// Time a cancelled node command gets between SIGTERM and SIGKILL
    pub termination_grace_secs: u64,
    /// Container engine CLI
    pub container_cli: String,
    /// Cluster bootstrap CLI
    pub bootstrap_cli: String,
    /// Cluster query CLI
    pub kubectl_cli: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            verbose: false,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let kubeconfig = dirs::home_dir()
            .map(|home| home.join(".kube").join("berth-config"))
            .unwrap_or_else(|| PathBuf::from("berth-kubeconfig"));
        Self {
            name: "berth".to_string(),
            kubeconfig,
            host_mount: Some(PathBuf::from("/mnt")),
            freshness_window_secs: 60,
            decline_policy: DeclinePolicy::Proceed,
            termination_grace_secs: 10,
            container_cli: "docker".to_string(),
            bootstrap_cli: "kind".to_string(),
            kubectl_cli: "kubectl".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

impl BerthConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("BERTH_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("./berth.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Build logs
        if let Ok(path) = std::env::var("BERTH_LOG_DIR") {
            self.build.log_dir = PathBuf::from(path);
        }
        if let Ok(verbose) = std::env::var("BERTH_VERBOSE") {
            self.build.verbose = verbose.parse().unwrap_or(false);
        }

        // Cluster
        if let Ok(name) = std::env::var("BERTH_CLUSTER_NAME") {
            self.cluster.name = name;
        }
        if let Ok(path) = std::env::var("BERTH_KUBECONFIG") {
            self.cluster.kubeconfig = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BERTH_HOST_MOUNT") {
            self.cluster.host_mount = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        // Logging
        if let Ok(level) = std::env::var("BERTH_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.name.is_empty() {
            return Err(ConfigError::Validation("Cluster name cannot be empty".to_string()));
        }

        if !self
            .cluster
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::Validation(format!(
                "Cluster name '{}' may only contain lowercase letters, digits and '-'",
                self.cluster.name
            )));
        }

        if self.cluster.freshness_window_secs == 0 {
            return Err(ConfigError::Validation(
                "Freshness window must be at least one second".to_string(),
            ));
        }

        if self.build.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("Log directory cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Config validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for berth_common::Error {
    fn from(err: ConfigError) -> Self {
        berth_common::Error::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BerthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.name, "berth");
        assert_eq!(config.cluster.freshness_window(), Duration::from_secs(60));
        assert_eq!(config.cluster.decline_policy, DeclinePolicy::Proceed);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BerthConfig::from_toml_str(
            r#"
            [build]
            verbose = true

            [cluster]
            name = "dev"
            decline_policy = "fail"
            "#,
        )
        .unwrap();

        assert!(config.build.verbose);
        assert_eq!(config.build.log_dir, PathBuf::from("logs"));
        assert_eq!(config.cluster.name, "dev");
        assert_eq!(config.cluster.decline_policy, DeclinePolicy::Fail);
        assert_eq!(config.cluster.container_cli, "docker");
    }

    #[test]
    fn test_invalid_cluster_name() {
        let mut config = BerthConfig::default();
        config.cluster.name = "Dev Cluster".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parse_error() {
        let err = BerthConfig::from_toml_str("[cluster\nname=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err: berth_common::Error = err.into();
        assert_eq!(err.category(), berth_common::ErrorCategory::Configuration);
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = BerthConfig::generate_sample();
        let parsed = BerthConfig::from_toml_str(&sample).unwrap();
        assert_eq!(parsed.cluster.name, "berth");
    }
}
