//! Configuration for natsyncd
//!
//! Two layers:
//! - [`NatIfaceConfig`]: the provider of NAT-eligible interface names the
//!   registry refreshes from. [`StaticNatIfaceConfig`] is an in-memory
//!   provider that can be replaced at runtime.
//! - [`NatsyncConfig`]: daemon settings loaded from TOML.
//!   Default location: /etc/sonic/natsyncd.toml

use crate::error::{NatsyncError, Result};
use crate::registry::IFNAMSIZ;
use crate::types::ConnTimeouts;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/natsyncd.toml";

/// Source of NAT-eligible interface names
#[cfg_attr(test, mockall::automock)]
pub trait NatIfaceConfig: Send + Sync {
    /// Live number of eligible interfaces
    fn nat_iface_count(&self) -> usize;

    /// First `count` eligible interface names
    fn nat_ifaces(&self, count: usize) -> Result<Vec<String>>;
}

/// In-memory eligible-interface list
#[derive(Debug, Default)]
pub struct StaticNatIfaceConfig {
    ifaces: RwLock<Vec<String>>,
}

impl StaticNatIfaceConfig {
    pub fn new(ifaces: Vec<String>) -> Self {
        Self {
            ifaces: RwLock::new(ifaces),
        }
    }

    /// Replace the interface list
    pub fn set_ifaces(&self, ifaces: Vec<String>) {
        *self.ifaces.write() = ifaces;
    }
}

impl NatIfaceConfig for StaticNatIfaceConfig {
    fn nat_iface_count(&self) -> usize {
        self.ifaces.read().len()
    }

    fn nat_ifaces(&self, count: usize) -> Result<Vec<String>> {
        let ifaces = self.ifaces.read();
        if count > ifaces.len() {
            return Err(NatsyncError::Config(format!(
                "requested {} NAT interfaces, {} configured",
                count,
                ifaces.len()
            )));
        }
        Ok(ifaces[..count].to_vec())
    }
}

/// `[nat]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NatSection {
    /// Initial NAT-eligible interfaces
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// `[listener]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// UDP idle sweep period in seconds
    #[serde(default = "default_udp_sweep_interval")]
    pub udp_sweep_interval_secs: u64,

    /// Conntrack timeout poll period in seconds
    #[serde(default = "default_timeout_poll_interval")]
    pub timeout_poll_interval_secs: u64,

    /// Per-protocol conntrack feed queue depth
    #[serde(default = "default_feed_queue_depth")]
    pub feed_queue_depth: usize,
}

impl ListenerConfig {
    pub fn udp_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.udp_sweep_interval_secs)
    }

    pub fn timeout_poll_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_poll_interval_secs)
    }
}

/// `[timeouts]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_tcp_timeout_path")]
    pub tcp_timeout_path: PathBuf,

    #[serde(default = "default_udp_timeout_path")]
    pub udp_timeout_path: PathBuf,

    /// Used until the first successful read
    #[serde(default = "default_tcp_secs")]
    pub default_tcp_secs: u64,

    #[serde(default = "default_udp_secs")]
    pub default_udp_secs: u64,
}

impl TimeoutConfig {
    pub fn defaults(&self) -> ConnTimeouts {
        ConnTimeouts::from_secs(self.default_tcp_secs, self.default_udp_secs)
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete natsyncd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NatsyncConfig {
    #[serde(default)]
    pub nat: NatSection,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_udp_sweep_interval() -> u64 {
    30
}

fn default_timeout_poll_interval() -> u64 {
    60
}

fn default_feed_queue_depth() -> usize {
    1024
}

fn default_tcp_timeout_path() -> PathBuf {
    PathBuf::from("/proc/sys/net/netfilter/nf_conntrack_tcp_timeout_established")
}

fn default_udp_timeout_path() -> PathBuf {
    PathBuf::from("/proc/sys/net/netfilter/nf_conntrack_udp_timeout_stream")
}

fn default_tcp_secs() -> u64 {
    432_000
}

fn default_udp_secs() -> u64 {
    180
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            udp_sweep_interval_secs: default_udp_sweep_interval(),
            timeout_poll_interval_secs: default_timeout_poll_interval(),
            feed_queue_depth: default_feed_queue_depth(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tcp_timeout_path: default_tcp_timeout_path(),
            udp_timeout_path: default_udp_timeout_path(),
            default_tcp_secs: default_tcp_secs(),
            default_udp_secs: default_udp_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NatsyncConfig {
    /// Load configuration from a TOML file, defaults when the file is absent
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listener.udp_sweep_interval_secs == 0 {
            return Err(NatsyncError::Config(
                "udp_sweep_interval_secs must be > 0".to_string(),
            ));
        }
        if self.listener.timeout_poll_interval_secs == 0 {
            return Err(NatsyncError::Config(
                "timeout_poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.listener.feed_queue_depth == 0 {
            return Err(NatsyncError::Config(
                "feed_queue_depth must be > 0".to_string(),
            ));
        }
        for name in &self.nat.interfaces {
            if name.is_empty() || name.len() >= IFNAMSIZ {
                return Err(NatsyncError::Config(format!(
                    "invalid NAT interface name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}
