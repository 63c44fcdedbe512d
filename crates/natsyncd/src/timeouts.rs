//! Conntrack timeout source for the timeout monitor

use crate::error::{NatsyncError, Result};
use crate::types::ConnTimeouts;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provides the kernel's current TCP/UDP conntrack timeouts
#[cfg_attr(test, mockall::automock)]
pub trait TimeoutSource: Send + Sync {
    fn read_timeouts(&self) -> Result<ConnTimeouts>;
}

/// Reads timeouts from procfs sysctl files
#[derive(Debug, Clone)]
pub struct ProcTimeoutSource {
    tcp_path: PathBuf,
    udp_path: PathBuf,
}

impl ProcTimeoutSource {
    pub fn new(tcp_path: impl Into<PathBuf>, udp_path: impl Into<PathBuf>) -> Self {
        Self {
            tcp_path: tcp_path.into(),
            udp_path: udp_path.into(),
        }
    }
}

impl TimeoutSource for ProcTimeoutSource {
    fn read_timeouts(&self) -> Result<ConnTimeouts> {
        Ok(ConnTimeouts {
            tcp: read_secs(&self.tcp_path)?,
            udp: read_secs(&self.udp_path)?,
        })
    }
}

fn read_secs(path: &Path) -> Result<Duration> {
    let contents = fs::read_to_string(path)?;
    let secs = contents.trim().parse::<u64>().map_err(|e| {
        NatsyncError::Config(format!("invalid timeout in {}: {}", path.display(), e))
    })?;
    Ok(Duration::from_secs(secs))
}
