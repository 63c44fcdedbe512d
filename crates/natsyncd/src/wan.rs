//! WAN session state
//!
//! Two states, DOWN (initial) and UP. Activation needs a non-zero public
//! address. Same-state events are filtered by the event dispatch path; the
//! methods here report whether a transition actually happened.

use crate::error::{NatsyncError, Result};
use std::net::Ipv4Addr;
use tracing::info;

/// Currently active WAN uplink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WanSession {
    is_up: bool,
    public_ip: Option<Ipv4Addr>,
    ifname: Option<String>,
}

impl WanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_up(&self) -> bool {
        self.is_up
    }

    pub fn public_ip(&self) -> Option<Ipv4Addr> {
        self.public_ip
    }

    pub fn ifname(&self) -> Option<&str> {
        self.ifname.as_deref()
    }

    /// DOWN -> UP
    ///
    /// Returns `Ok(false)` when already up; the session is left untouched.
    pub fn activate(&mut self, public_ip: Ipv4Addr, ifname: &str) -> Result<bool> {
        if public_ip.is_unspecified() {
            return Err(NatsyncError::InvalidInput(format!(
                "WAN up on {} without public ipv4 address",
                ifname
            )));
        }
        if self.is_up {
            return Ok(false);
        }

        self.is_up = true;
        self.public_ip = Some(public_ip);
        self.ifname = Some(ifname.to_string());
        info!(ifname, public_ip = %public_ip, "WAN session up");
        Ok(true)
    }

    /// UP -> DOWN, returning the recorded public address
    pub fn deactivate(&mut self) -> Option<Ipv4Addr> {
        if !self.is_up {
            return None;
        }

        let public_ip = self.public_ip.take();
        info!(ifname = ?self.ifname, public_ip = ?public_ip, "WAN session down");
        self.is_up = false;
        self.ifname = None;
        public_ip
    }
}
