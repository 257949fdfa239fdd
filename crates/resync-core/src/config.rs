//! Harness configuration.
//!
//! Validated at load time so a bad pool or a colliding collector address
//! fails before any node is launched. Defaults describe the reference
//! four-node loopback deployment.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::types::NodeIdentity;

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Path to the timer-service binary.
    #[serde(default = "default_binary_path")]
    pub binary_path: PathBuf,

    /// Arguments placed before the config flag.
    #[serde(default)]
    pub args: Vec<String>,

    /// Flag that precedes the config file path on the node command line.
    #[serde(default = "default_config_flag")]
    pub config_flag: String,

    /// Config file path pattern; `{index}` is replaced by the node index.
    #[serde(default = "default_config_pattern")]
    pub config_pattern: String,

    /// Directory holding one log folder per node port.
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,

    /// Log level written into every node config.
    #[serde(default = "default_log_level")]
    pub log_level: u8,

    /// Pass node stdout/stderr through instead of discarding it.
    #[serde(default)]
    pub inherit_output: bool,

    /// Candidate node pool, in index order.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeIdentity>,

    /// Callback receiver settings.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Settle intervals after state-changing actions.
    #[serde(default)]
    pub settle: SettleConfig,

    /// Timer request parameters.
    #[serde(default)]
    pub timer: TimerConfig,
}

fn default_binary_path() -> PathBuf {
    PathBuf::from("build/bin/chronos")
}

fn default_config_flag() -> String {
    "--config-file".to_string()
}

fn default_config_pattern() -> String {
    "scripts/log/chronos.livetest.conf{index}".to_string()
}

fn default_log_root() -> PathBuf {
    PathBuf::from("scripts/log")
}

fn default_log_level() -> u8 {
    5
}

fn loopback(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
}

fn default_nodes() -> Vec<NodeIdentity> {
    (0..4u8)
        .map(|i| NodeIdentity::new(loopback(11 + i), 7253 + u16::from(i)))
        .collect()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            args: Vec::new(),
            config_flag: default_config_flag(),
            config_pattern: default_config_pattern(),
            log_root: default_log_root(),
            log_level: default_log_level(),
            inherit_output: false,
            nodes: default_nodes(),
            collector: CollectorConfig::default(),
            settle: SettleConfig::default(),
            timer: TimerConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.binary_path.as_os_str().is_empty() {
            return Err(ClusterError::config("binary_path cannot be empty"));
        }
        if !self.config_pattern.contains("{index}") {
            return Err(ClusterError::config(
                "config_pattern must contain an {index} placeholder",
            ));
        }
        if self.nodes.is_empty() {
            return Err(ClusterError::config("node pool cannot be empty"));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.addr()) {
                return Err(ClusterError::config(format!("duplicate node address {node}")));
            }
        }
        if seen.contains(&self.collector.bind) {
            return Err(ClusterError::config(format!(
                "collector address {} collides with a node",
                self.collector.bind
            )));
        }
        if !self.collector.path.starts_with('/') {
            return Err(ClusterError::config("collector path must start with '/'"));
        }

        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClusterError::config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Callback receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Address the receiver binds to.
    #[serde(default = "default_collector_bind")]
    pub bind: SocketAddr,

    /// Path nodes POST timer pops to.
    #[serde(default = "default_collector_path")]
    pub path: String,
}

fn default_collector_bind() -> SocketAddr {
    SocketAddr::new(loopback(10), 5001)
}

fn default_collector_path() -> String {
    "/pop".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind: default_collector_bind(),
            path: default_collector_path(),
        }
    }
}

/// Fixed waits after each state-changing action.
///
/// The timer service exposes no completion event, so these are the only
/// synchronisation the harness has.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Wait after launching a range of nodes.
    #[serde(default = "default_step_settle", with = "humantime_serde")]
    pub start: Duration,

    /// Wait after delivering reload to a range.
    #[serde(default = "default_step_settle", with = "humantime_serde")]
    pub reload: Duration,

    /// Wait after delivering the rebalance trigger to a range.
    #[serde(default = "default_step_settle", with = "humantime_serde")]
    pub rebalance: Duration,

    /// Wait before reading the callback count.
    #[serde(default = "default_final_settle", with = "humantime_serde")]
    pub r#final: Duration,
}

fn default_step_settle() -> Duration {
    Duration::from_secs(2)
}

fn default_final_settle() -> Duration {
    Duration::from_secs(10)
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            start: default_step_settle(),
            reload: default_step_settle(),
            rebalance: default_step_settle(),
            r#final: default_final_settle(),
        }
    }
}

impl SettleConfig {
    /// Uses the same wait for every step. Handy for tests.
    #[must_use]
    pub const fn uniform(wait: Duration) -> Self {
        Self {
            start: wait,
            reload: wait,
            rebalance: wait,
            r#final: wait,
        }
    }
}

/// Timer request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Timer interval, in the service's time units.
    #[serde(default = "default_interval")]
    pub interval: u32,

    /// How long the timer repeats for, in the service's time units.
    #[serde(default = "default_interval")]
    pub repeat_for: u32,

    /// Fixed correlation token. A fresh UUID per batch when unset.
    #[serde(default)]
    pub opaque: Option<String>,
}

fn default_interval() -> u32 {
    10
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            repeat_for: default_interval(),
            opaque: None,
        }
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_pool() {
        let config = HarnessConfig::default();
        assert_eq!(config.nodes.len(), 4);
        assert_eq!(config.nodes[0].to_string(), "127.0.0.11:7253");
        assert_eq!(config.nodes[3].to_string(), "127.0.0.14:7256");
        assert_eq!(config.collector.bind.to_string(), "127.0.0.10:5001");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_settle() {
        let settle = SettleConfig::default();
        assert_eq!(settle.start, Duration::from_secs(2));
        assert_eq!(settle.reload, Duration::from_secs(2));
        assert_eq!(settle.rebalance, Duration::from_secs(2));
        assert_eq!(settle.r#final, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_empty_pool() {
        let config = HarnessConfig {
            nodes: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_node() {
        let mut config = HarnessConfig::default();
        config.nodes.push(config.nodes[0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_collector_collision() {
        let mut config = HarnessConfig::default();
        config.collector.bind = config.nodes[2].addr();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_pattern_without_placeholder() {
        let config = HarnessConfig {
            config_pattern: "node.conf".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"
binary_path = "/opt/chronos/bin/chronos"
nodes = ["10.0.0.1:7253", "10.0.0.2:7253"]

[settle]
start = "500ms"
final = "3s"

[timer]
opaque = "stuff"
"#
        )
        .expect("write");

        let config = HarnessConfig::load(file.path()).expect("load");
        assert_eq!(config.binary_path, PathBuf::from("/opt/chronos/bin/chronos"));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.settle.start, Duration::from_millis(500));
        assert_eq!(config.settle.reload, Duration::from_secs(2));
        assert_eq!(config.settle.r#final, Duration::from_secs(3));
        assert_eq!(config.timer.opaque.as_deref(), Some("stuff"));
        assert_eq!(config.timer.interval, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let result = HarnessConfig::load("/nonexistent/resync.toml");
        assert!(matches!(result, Err(ClusterError::Config(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = HarnessConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let back: HarnessConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(back.nodes, config.nodes);
        assert_eq!(back.settle.r#final, config.settle.r#final);
    }
}
