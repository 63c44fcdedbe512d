//! NAT interface registry
//!
//! Holds the snapshot of NAT-eligible interface names and the bounded set of
//! private IPv4 client addresses seen on those interfaces. Conntrack events
//! are only offloaded when one of their endpoints is in this set.
//!
//! Both containers are fixed capacity and scanned linearly; addresses are
//! stored in the first empty slot and dropped when the set is full.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Track NAT interfaces and their clients
//! - SC-5: Denial of Service Protection - Bounded tracking set

use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Capacity of the tracked-address set
pub const MAX_NAT_IFACES: usize = 50;

/// Kernel interface name buffer size, including the terminating NUL
pub const IFNAMSIZ: usize = 16;

/// Interface name held in a fixed IFNAMSIZ buffer
///
/// Names longer than `IFNAMSIZ - 1` bytes are truncated, the way the kernel
/// would store them, backing off to the previous UTF-8 character boundary. Two names match when their buffers are identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfaceName {
    buf: [u8; IFNAMSIZ],
}

impl IfaceName {
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; IFNAMSIZ];
        let mut len = name.len().min(IFNAMSIZ - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { buf }
    }

    pub fn as_str(&self) -> &str {
        let len = self.buf.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
        std::str::from_utf8(&self.buf[..len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.buf[0] == 0
    }
}

impl fmt::Display for IfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for IfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IfaceName({:?})", self.as_str())
    }
}

/// One occupied slot of the tracked-address set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedAddr {
    pub iface: IfaceName,
    pub addr: Ipv4Addr,
}

/// Result of a registry update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Address stored in the given slot
    Added(usize),
    /// Address already held by the given slot
    AlreadyTracked(usize),
    /// Address cleared from the given slot
    Removed(usize),
    /// Delete for an address that is not tracked
    NotFound,
    /// Set is full, address dropped
    Full,
    /// Interface is not NAT-eligible
    NotNatIface,
    /// Add rejected (zero address or not IPv4)
    Ignored,
}

/// NAT-eligible interfaces and their tracked client addresses
#[derive(Debug)]
pub struct NatIfaceRegistry {
    /// Eligible-interface count seen at the last successful refresh
    cached_count: Option<usize>,
    nat_ifaces: Vec<IfaceName>,
    slots: [Option<TrackedAddr>; MAX_NAT_IFACES],
}

impl Default for NatIfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NatIfaceRegistry {
    pub fn new() -> Self {
        Self {
            cached_count: None,
            nat_ifaces: Vec::new(),
            slots: [None; MAX_NAT_IFACES],
        }
    }

    /// Whether the interface snapshot is stale against the live count
    pub fn needs_refresh(&self, live_count: usize) -> bool {
        self.cached_count != Some(live_count)
    }

    /// Replace the interface snapshot
    pub fn install_snapshot(&mut self, count: usize, names: &[String]) {
        self.nat_ifaces = names.iter().take(count).map(|n| IfaceName::new(n)).collect();
        self.cached_count = Some(count);
        info!(count = self.nat_ifaces.len(), "Updated NAT interface snapshot");
    }

    pub fn nat_ifaces(&self) -> &[IfaceName] {
        &self.nat_ifaces
    }

    /// Whether `name` is a NAT-eligible interface
    pub fn is_nat_iface(&self, name: &IfaceName) -> bool {
        self.nat_ifaces.iter().any(|n| n == name)
    }

    /// Store `addr` for `iface` in the first empty slot
    pub fn track(&mut self, iface: IfaceName, addr: Ipv4Addr) -> TrackOutcome {
        if let Some(idx) = self.position(addr) {
            debug!(ifname = %iface, ip = %addr, slot = idx, "Address already tracked");
            return TrackOutcome::AlreadyTracked(idx);
        }

        match self.slots.iter().position(Option::is_none) {
            Some(idx) => {
                self.slots[idx] = Some(TrackedAddr { iface, addr });
                info!(ifname = %iface, ip = %addr, slot = idx, "Nating connections of interface");
                TrackOutcome::Added(idx)
            }
            None => {
                warn!(ifname = %iface, ip = %addr, "Tracked address set full, dropping address");
                TrackOutcome::Full
            }
        }
    }

    /// Clear the slot holding `addr`
    pub fn untrack(&mut self, addr: Ipv4Addr) -> TrackOutcome {
        match self.position(addr) {
            Some(idx) => {
                if let Some(slot) = self.slots[idx].take() {
                    info!(ifname = %slot.iface, ip = %addr, slot = idx, "Reset ct filters of interface");
                }
                TrackOutcome::Removed(idx)
            }
            None => {
                debug!(ip = %addr, "Address not tracked, nothing to remove");
                TrackOutcome::NotFound
            }
        }
    }

    /// First tracked address equal to either endpoint
    pub fn match_any(&self, private_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Option<Ipv4Addr> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.addr)
            .find(|addr| *addr == private_ip || *addr == target_ip)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedAddr> {
        self.slots.iter().flatten()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked().count()
    }

    /// Raw slot view, in slot order
    pub fn slots(&self) -> &[Option<TrackedAddr>] {
        &self.slots
    }

    fn position(&self, addr: Ipv4Addr) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_some_and(|s| s.addr == addr))
    }
}
