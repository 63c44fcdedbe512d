//! NAT table collaborator
//!
//! [`NatTable`] is the boundary to the hardware/software NAT table: the sync
//! engine only tells it what to add or remove and when. [`SoftNatTable`] is
//! the in-process implementation used when no offload driver is attached.

use crate::types::{ConnTimeouts, IfaceUpData, L4Protocol, NatRule};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// NAT table programming interface
///
/// All calls are fire-and-forget from the sync engine's point of view.
#[cfg_attr(test, mockall::automock)]
pub trait NatTable: Send + Sync {
    /// Create the table for a public address
    fn allocate_table(&self, public_ip: Ipv4Addr);

    /// Tear down the table for a public address
    fn destroy_table(&self, public_ip: Ipv4Addr);

    fn add_entry(&self, rule: &NatRule);

    fn delete_entry(&self, rule: &NatRule);

    /// Flow is still active; refresh the entry's idle time if present
    fn touch_entry(&self, rule: &NatRule);

    /// Exclude local UDP traffic of a newly up WLAN/LAN interface
    fn update_udp_filters(&self, iface: &IfaceUpData);

    /// Exclude local TCP traffic of a newly up WLAN/LAN interface
    fn update_tcp_filters(&self, iface: &IfaceUpData);

    /// Conntrack timeouts changed
    fn update_timeouts(&self, timeouts: ConnTimeouts);

    /// Remove entries of `protocol` idle for longer than `idle_timeout`
    fn expire_idle(&self, protocol: L4Protocol, idle_timeout: Duration) -> Vec<NatRule>;
}

/// 5-tuple key of an offloaded entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NatEntryKey {
    pub private_ip: Ipv4Addr,
    pub private_port: u16,
    pub target_ip: Ipv4Addr,
    pub target_port: u16,
    pub protocol: u8,
}

impl From<&NatRule> for NatEntryKey {
    fn from(rule: &NatRule) -> Self {
        Self {
            private_ip: rule.private_ip,
            private_port: rule.private_port,
            target_ip: rule.target_ip,
            target_port: rule.target_port,
            protocol: rule.protocol,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NatEntry {
    pub rule: NatRule,
    pub created: Instant,
    pub last_used: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NatTableStats {
    pub tables_allocated: u64,
    pub entries_added: u64,
    pub entries_refreshed: u64,
    pub entries_deleted: u64,
    pub entries_expired: u64,
    pub entries_dropped: u64,
}

#[derive(Debug, Default)]
struct SoftNatState {
    public_ip: Option<Ipv4Addr>,
    entries: HashMap<NatEntryKey, NatEntry>,
    udp_filters: Vec<IfaceUpData>,
    tcp_filters: Vec<IfaceUpData>,
    timeouts: ConnTimeouts,
    stats: NatTableStats,
}

/// Software NAT table
#[derive(Debug, Default)]
pub struct SoftNatTable {
    state: Mutex<SoftNatState>,
}

impl SoftNatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_ip(&self) -> Option<Ipv4Addr> {
        self.state.lock().public_ip
    }

    pub fn get_entry(&self, key: &NatEntryKey) -> Option<NatEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, rule: &NatRule) -> bool {
        self.state.lock().entries.contains_key(&NatEntryKey::from(rule))
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn entries(&self) -> Vec<NatRule> {
        self.state.lock().entries.values().map(|e| e.rule).collect()
    }

    pub fn udp_filters(&self) -> Vec<IfaceUpData> {
        self.state.lock().udp_filters.clone()
    }

    pub fn tcp_filters(&self) -> Vec<IfaceUpData> {
        self.state.lock().tcp_filters.clone()
    }

    pub fn timeouts(&self) -> ConnTimeouts {
        self.state.lock().timeouts
    }

    pub fn stats(&self) -> NatTableStats {
        self.state.lock().stats.clone()
    }
}

impl NatTable for SoftNatTable {
    fn allocate_table(&self, public_ip: Ipv4Addr) {
        let mut state = self.state.lock();
        if let Some(old) = state.public_ip.replace(public_ip) {
            warn!(old = %old, new = %public_ip, "Replacing existing NAT table");
            state.entries.clear();
        }
        state.stats.tables_allocated = state.stats.tables_allocated.saturating_add(1);
        info!(public_ip = %public_ip, "Allocated NAT table");
    }

    fn destroy_table(&self, public_ip: Ipv4Addr) {
        let mut state = self.state.lock();
        if state.public_ip != Some(public_ip) {
            warn!(public_ip = %public_ip, "No NAT table for public address");
            return;
        }
        let dropped = state.entries.len();
        state.entries.clear();
        state.public_ip = None;
        info!(public_ip = %public_ip, dropped, "Deleted NAT table");
    }

    fn add_entry(&self, rule: &NatRule) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.public_ip.is_none() {
            state.stats.entries_dropped = state.stats.entries_dropped.saturating_add(1);
            warn!(%rule, "No NAT table allocated, dropping entry");
            return;
        }

        let now = Instant::now();
        match state.entries.get_mut(&NatEntryKey::from(rule)) {
            Some(entry) => {
                entry.last_used = now;
                state.stats.entries_refreshed = state.stats.entries_refreshed.saturating_add(1);
                debug!(%rule, "Refreshed NAT entry");
            }
            None => {
                state.entries.insert(
                    NatEntryKey::from(rule),
                    NatEntry {
                        rule: *rule,
                        created: now,
                        last_used: now,
                    },
                );
                state.stats.entries_added = state.stats.entries_added.saturating_add(1);
                debug!(%rule, "Added NAT entry");
            }
        }
    }

    fn delete_entry(&self, rule: &NatRule) {
        let mut state = self.state.lock();
        if state.entries.remove(&NatEntryKey::from(rule)).is_some() {
            state.stats.entries_deleted = state.stats.entries_deleted.saturating_add(1);
            debug!(%rule, "Deleted NAT entry");
        } else {
            debug!(%rule, "NAT entry not found");
        }
    }

    fn touch_entry(&self, rule: &NatRule) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.entries.get_mut(&NatEntryKey::from(rule)) {
            Some(entry) => {
                entry.last_used = Instant::now();
                state.stats.entries_refreshed = state.stats.entries_refreshed.saturating_add(1);
            }
            None => debug!(%rule, "No NAT entry to refresh"),
        }
    }

    fn update_udp_filters(&self, iface: &IfaceUpData) {
        let mut state = self.state.lock();
        state.udp_filters.retain(|f| f.ifname != iface.ifname);
        state.udp_filters.push(iface.clone());
        info!(ifname = %iface.ifname, ip = %iface.ipv4_addr, "Updated UDP filters");
    }

    fn update_tcp_filters(&self, iface: &IfaceUpData) {
        let mut state = self.state.lock();
        state.tcp_filters.retain(|f| f.ifname != iface.ifname);
        state.tcp_filters.push(iface.clone());
        info!(ifname = %iface.ifname, ip = %iface.ipv4_addr, "Updated TCP filters");
    }

    fn update_timeouts(&self, timeouts: ConnTimeouts) {
        self.state.lock().timeouts = timeouts;
        info!(tcp = ?timeouts.tcp, udp = ?timeouts.udp, "Updated NAT timeouts");
    }

    fn expire_idle(&self, protocol: L4Protocol, idle_timeout: Duration) -> Vec<NatRule> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let raw = protocol.as_raw();

        let expired: Vec<NatEntryKey> = state
            .entries
            .iter()
            .filter(|(key, entry)| {
                key.protocol == raw && now.duration_since(entry.last_used) >= idle_timeout
            })
            .map(|(key, _)| *key)
            .collect();

        let rules: Vec<NatRule> = expired
            .iter()
            .filter_map(|key| state.entries.remove(key))
            .map(|entry| entry.rule)
            .collect();

        state.stats.entries_expired = state
            .stats
            .entries_expired
            .saturating_add(rules.len() as u64);
        if !rules.is_empty() {
            debug!(%protocol, count = rules.len(), "Expired idle NAT entries");
        }
        rules
    }
}
