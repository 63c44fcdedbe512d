//! Core types for conntrack to NAT synchronization
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - NAT interfaces and tracked clients
//! - SC-7: Boundary Protection - Public/private address translation records

use crate::conntrack::ConntrackEvent;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

const IPPROTO_TCP: u8 = libc::IPPROTO_TCP as u8;
const IPPROTO_UDP: u8 = libc::IPPROTO_UDP as u8;

/// Layer-4 protocols handled by the NAT offload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Protocol {
    Tcp,
    Udp,
}

impl L4Protocol {
    /// Map an IPPROTO_* number, `None` for anything but TCP/UDP
    pub fn from_raw(proto: u8) -> Option<Self> {
        match proto {
            IPPROTO_TCP => Some(Self::Tcp),
            IPPROTO_UDP => Some(Self::Udp),
            _ => None,
        }
    }

    /// IPPROTO_* number
    pub fn as_raw(&self) -> u8 {
        match self {
            Self::Tcp => IPPROTO_TCP,
            Self::Udp => IPPROTO_UDP,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family reported with neighbor client events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpType {
    V4,
    V6,
}

/// NAT rule derived from one conntrack event
///
/// All fields are in host byte order. The record is transient: it is built
/// per event and handed to the NAT table, never stored by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NatRule {
    /// Remote endpoint the client intended to reach
    pub target_ip: Ipv4Addr,
    pub target_port: u16,
    /// Private (LAN side) endpoint
    pub private_ip: Ipv4Addr,
    pub private_port: u16,
    /// Port on the public address
    pub public_port: u16,
    /// Raw IPPROTO_* number from the reply tuple
    pub protocol: u8,
    /// Destination NAT was applied to the flow
    pub dst_nat: bool,
}

impl NatRule {
    /// Protocol as an enum, `None` when neither TCP nor UDP
    pub fn l4_protocol(&self) -> Option<L4Protocol> {
        L4Protocol::from_raw(self.protocol)
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proto {} private {}:{} target {}:{} public port {}{}",
            self.protocol,
            self.private_ip,
            self.private_port,
            self.target_ip,
            self.target_port,
            self.public_port,
            if self.dst_nat { " (dnat)" } else { "" }
        )
    }
}

/// Interface up payload (WAN/WLAN/LAN up)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceUpData {
    pub ifname: String,
    pub ipv4_addr: Ipv4Addr,
    pub addr_mask: Ipv4Addr,
}

impl IfaceUpData {
    pub fn new(ifname: impl Into<String>, ipv4_addr: Ipv4Addr, addr_mask: Ipv4Addr) -> Self {
        Self {
            ifname: ifname.into(),
            ipv4_addr,
            addr_mask,
        }
    }
}

/// Neighbor client address add/del payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighIpData {
    pub if_index: u32,
    pub ip_type: IpType,
    pub ipv4_addr: Ipv4Addr,
}

/// Conntrack timeouts applied to offloaded entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnTimeouts {
    /// TCP established timeout
    pub tcp: Duration,
    /// UDP stream timeout
    pub udp: Duration,
}

impl ConnTimeouts {
    pub fn from_secs(tcp: u64, udp: u64) -> Self {
        Self {
            tcp: Duration::from_secs(tcp),
            udp: Duration::from_secs(udp),
        }
    }

    pub fn for_protocol(&self, protocol: L4Protocol) -> Duration {
        match protocol {
            L4Protocol::Tcp => self.tcp,
            L4Protocol::Udp => self.udp,
        }
    }
}

impl Default for ConnTimeouts {
    fn default() -> Self {
        Self::from_secs(432_000, 180)
    }
}

/// Events routed to the sync engine by the event dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    WanUp,
    WanDown,
    WlanUp,
    LanUp,
    NeighIpAdd,
    NeighIpDel,
    ConntrackMessage,
    /// Event ids this engine does not subscribe to
    Other(u32),
}

/// Payloads carried by [`EventId`]s
#[derive(Debug, Clone)]
pub enum EventData {
    /// WAN/WLAN/LAN up
    IfaceUp(IfaceUpData),
    /// WAN down, public address as reported by the event source
    WanDown(Ipv4Addr),
    /// Neighbor client address add/del
    Neigh(NeighIpData),
    /// Conntrack message posted by a listener
    Conntrack(ConntrackEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l4_protocol_from_raw() {
        assert_eq!(L4Protocol::from_raw(6), Some(L4Protocol::Tcp));
        assert_eq!(L4Protocol::from_raw(17), Some(L4Protocol::Udp));
        assert_eq!(L4Protocol::from_raw(1), None);
        assert_eq!(L4Protocol::Udp.as_raw(), 17);
    }

    #[test]
    fn test_nat_rule_display() {
        let rule = NatRule {
            target_ip: Ipv4Addr::new(93, 1, 1, 1),
            target_port: 80,
            private_ip: Ipv4Addr::new(10, 0, 0, 5),
            private_port: 1234,
            public_port: 40000,
            protocol: 6,
            dst_nat: false,
        };
        assert_eq!(
            rule.to_string(),
            "proto 6 private 10.0.0.5:1234 target 93.1.1.1:80 public port 40000"
        );
        assert_eq!(rule.l4_protocol(), Some(L4Protocol::Tcp));
    }

    #[test]
    fn test_conn_timeouts_for_protocol() {
        let timeouts = ConnTimeouts::from_secs(300, 30);
        assert_eq!(timeouts.for_protocol(L4Protocol::Tcp), Duration::from_secs(300));
        assert_eq!(timeouts.for_protocol(L4Protocol::Udp), Duration::from_secs(30));
    }
}
