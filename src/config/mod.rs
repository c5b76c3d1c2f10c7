//! Configuration Management
//!
//! Provides functionality for:
//! - Loading/saving topology configuration
//! - Configuration validation
//! - Default configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::TopologyError;
use crate::types::{Address, ClusterKind, VersionRange};

/// Wire versions this driver build can speak
pub const SUPPORTED_WIRE_VERSIONS: VersionRange = VersionRange::new(7, 25);

/// Oldest server release matching the minimum supported wire version
pub const MIN_SUPPORTED_SERVER_VERSION: &str = "4.0";

/// How seeds are turned into a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Talk to the single seed only and never discover other members
    Direct,
    /// Follow membership lists reported by the cluster
    #[default]
    Discover,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Initial member addresses
    #[serde(default = "default_seeds")]
    pub seeds: Vec<String>,
    /// Replica-set name, when known up front
    #[serde(default)]
    pub replica_set_name: Option<String>,
    #[serde(default)]
    pub mode: ConnectMode,
    /// Interval between member checks in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Maximum time a selection call waits for a suitable server
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout_ms: u64,
    /// Latency window above the fastest candidate
    #[serde(default = "default_local_threshold")]
    pub local_threshold_ms: u64,
    #[serde(default = "default_wire_versions")]
    pub wire_versions: VersionRange,
    #[serde(default = "default_min_server_version")]
    pub min_server_version: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for JSON log files; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            seeds: default_seeds(),
            replica_set_name: None,
            mode: ConnectMode::default(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            server_selection_timeout_ms: default_server_selection_timeout(),
            local_threshold_ms: default_local_threshold(),
            wire_versions: default_wire_versions(),
            min_server_version: default_min_server_version(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            console: default_true(),
        }
    }
}

// Default value functions
fn default_seeds() -> Vec<String> { vec!["localhost:27017".to_string()] }
fn default_heartbeat_interval() -> u64 { 10 }
fn default_server_selection_timeout() -> u64 { 30_000 }
fn default_local_threshold() -> u64 { 15 }
fn default_wire_versions() -> VersionRange { SUPPORTED_WIRE_VERSIONS }
fn default_min_server_version() -> String { MIN_SUPPORTED_SERVER_VERSION.to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl TopologyConfig {
    /// Config seeded with the given addresses and defaults elsewhere
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, TopologyError> {
        let content = fs::read_to_string(path)
            .map_err(|e| TopologyError::Config(format!("Failed to read config file: {}", e)))?;
        debug!("Loaded topology configuration from {:?}", path);
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, TopologyError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| TopologyError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), TopologyError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| TopologyError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.seeds.is_empty() {
            return Err(TopologyError::config("at least one seed address is required"));
        }
        if self.mode == ConnectMode::Direct && self.seeds.len() != 1 {
            return Err(TopologyError::config(format!(
                "direct connections require exactly one seed, got {}",
                self.seeds.len()
            )));
        }
        if self.wire_versions.min > self.wire_versions.max {
            return Err(TopologyError::config(format!(
                "invalid wire version range {}",
                self.wire_versions
            )));
        }
        Ok(())
    }

    pub fn seed_addresses(&self) -> Vec<Address> {
        let mut seeds: Vec<Address> = self.seeds.iter().map(|s| Address::parse(s)).collect();
        seeds.sort();
        seeds.dedup();
        seeds
    }

    /// Cluster kind before any member has been checked
    pub fn initial_kind(&self) -> ClusterKind {
        match (self.mode, &self.replica_set_name) {
            (ConnectMode::Direct, _) => ClusterKind::Single,
            (ConnectMode::Discover, Some(_)) => ClusterKind::ReplicaSetNoPrimary,
            (ConnectMode::Discover, None) => ClusterKind::Unknown,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.server_selection_timeout_ms)
    }

    pub fn local_threshold(&self) -> Duration {
        Duration::from_millis(self.local_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = TopologyConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.seeds, vec!["localhost:27017"]);
        assert_eq!(config.mode, ConnectMode::Discover);
        assert_eq!(config.server_selection_timeout(), Duration::from_secs(30));
        assert_eq!(config.wire_versions, SUPPORTED_WIRE_VERSIONS);
        assert_eq!(config.initial_kind(), ClusterKind::Unknown);
    }

    #[test]
    fn test_direct_mode_requires_single_seed() {
        let yaml = "seeds: [\"a:1\", \"b:2\"]\nmode: direct\n";
        let err = TopologyConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, TopologyError::Config(_)));
    }

    #[test]
    fn test_replica_set_name_starts_without_primary() {
        let yaml = "seeds: [\"a\"]\nreplica_set_name: rs0\n";
        let config = TopologyConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.initial_kind(), ClusterKind::ReplicaSetNoPrimary);
    }

    #[test]
    fn test_seed_addresses_are_canonical_and_unique() {
        let config = TopologyConfig::with_seeds(["B", "a:27017", "a"]);
        let seeds: Vec<_> = config.seed_addresses().into_iter().map(String::from).collect();
        assert_eq!(seeds, vec!["a:27017", "b:27017"]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/topology.yml");
        let mut config = TopologyConfig::with_seeds(["db1:27017", "db2:27017"]);
        config.replica_set_name = Some("rs0".to_string());
        config.save(&path).unwrap();

        let loaded = TopologyConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.seeds, config.seeds);
        assert_eq!(loaded.replica_set_name.as_deref(), Some("rs0"));
    }
}
