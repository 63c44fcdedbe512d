//! NatSyncEngine - shared state and the conntrack to NAT pipeline
//!
//! The WAN session, the NAT interface registry and the current conntrack
//! timeouts sit behind a single lock. Conntrack events from every listener
//! task are filtered and applied to the NAT table while holding that lock,
//! so table updates are serialized in arrival order and never interleave
//! with a registry update or a WAN transition.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Conntrack event processing
//! - SC-7: Boundary Protection - Only NAT interface clients are offloaded
//! - AU-12: Audit Record Generation - All table changes logged

use crate::config::NatIfaceConfig;
use crate::conntrack::{self, ConntrackEvent, ConntrackMessage, ConntrackMsgType, TcpConntrackState};
use crate::error::{NatsyncError, Result};
use crate::iface::IfNameResolver;
use crate::nat_table::NatTable;
use crate::registry::{IfaceName, NatIfaceRegistry, TrackOutcome, TrackedAddr};
use crate::timeouts::TimeoutSource;
use crate::types::{ConnTimeouts, IfaceUpData, IpType, L4Protocol, NatRule, NeighIpData};
use crate::wan::WanSession;
use parking_lot::{Mutex, RwLock};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What the pipeline did with one conntrack event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Add-entry issued
    Added(NatRule),
    /// Delete-entry issued
    Deleted(NatRule),
    /// Activity on a known flow, entry idle time refreshed
    Refreshed(NatRule),
    /// Matched a tracked address but the state/type triggers nothing
    Ignored,
    /// No endpoint is a tracked address
    Filtered,
    /// Neither TCP nor UDP
    UnsupportedProtocol,
    /// Aborted, see logs
    Failed,
}

#[derive(Debug, Default)]
struct SharedState {
    wan: WanSession,
    registry: NatIfaceRegistry,
    timeouts: ConnTimeouts,
}

/// Shared state plus the collaborators the pipeline calls into
pub struct NatSyncEngine {
    state: Mutex<SharedState>,
    nat_table: RwLock<Option<Arc<dyn NatTable>>>,
    iface_config: Arc<dyn NatIfaceConfig>,
    resolver: Arc<dyn IfNameResolver>,
}

impl NatSyncEngine {
    pub fn new(
        iface_config: Arc<dyn NatIfaceConfig>,
        resolver: Arc<dyn IfNameResolver>,
        nat_table: Option<Arc<dyn NatTable>>,
        timeouts: ConnTimeouts,
    ) -> Self {
        Self {
            state: Mutex::new(SharedState {
                timeouts,
                ..Default::default()
            }),
            nat_table: RwLock::new(nat_table),
            iface_config,
            resolver,
        }
    }

    /// Attach or detach the NAT table instance
    pub fn set_nat_table(&self, nat_table: Option<Arc<dyn NatTable>>) {
        *self.nat_table.write() = nat_table;
    }

    fn nat_table(&self) -> Result<Arc<dyn NatTable>> {
        self.nat_table
            .read()
            .clone()
            .ok_or(NatsyncError::NatTableUnavailable)
    }

    pub fn is_wan_up(&self) -> bool {
        self.state.lock().wan.is_up()
    }

    pub fn wan_session(&self) -> WanSession {
        self.state.lock().wan.clone()
    }

    pub fn tracked_addresses(&self) -> Vec<TrackedAddr> {
        self.state.lock().registry.tracked().copied().collect()
    }

    pub fn timeouts(&self) -> ConnTimeouts {
        self.state.lock().timeouts
    }

    /// Entry point for one conntrack event
    ///
    /// Only TCP and UDP (by original-direction protocol) are translated.
    pub fn process_ct_event(&self, event: &ConntrackEvent) -> ApplyOutcome {
        event.message.trace_dump();

        let l4proto = event.message.orig_l4_proto();
        let Some(protocol) = L4Protocol::from_raw(l4proto) else {
            debug!(l4proto, "Received unexpected protocol conntrack message");
            return ApplyOutcome::UnsupportedProtocol;
        };

        match self.process_tcp_or_udp(&event.message, event.msg_type, protocol) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, %protocol, "Failed to process conntrack message");
                ApplyOutcome::Failed
            }
        }
    }

    /// Translate, filter and apply one TCP/UDP conntrack message
    #[instrument(skip(self, msg, protocol), fields(protocol = %protocol))]
    pub fn process_tcp_or_udp(
        &self,
        msg: &ConntrackMessage,
        msg_type: ConntrackMsgType,
        protocol: L4Protocol,
    ) -> Result<ApplyOutcome> {
        let rule = conntrack::translate(msg);

        let state = self.state.lock();
        let Some(matched) = state.registry.match_any(rule.private_ip, rule.target_ip) else {
            debug!(private_ip = %rule.private_ip, "Ignoring nat rule with private ip");
            return Ok(ApplyOutcome::Filtered);
        };
        debug!(ip = %matched, %rule, "Nat entry match with ip addr");

        let Some(rule_protocol) = rule.l4_protocol() else {
            debug!(protocol = rule.protocol, ?msg_type, "Ignore protocol");
            return Ok(ApplyOutcome::Ignored);
        };

        let table = self.nat_table()?;
        let outcome = match rule_protocol {
            L4Protocol::Tcp => match msg.tcp_state() {
                TcpConntrackState::Established => {
                    debug!("TCP state ESTABLISHED, adding entry");
                    table.add_entry(&rule);
                    ApplyOutcome::Added(rule)
                }
                TcpConntrackState::FinWait => {
                    debug!("TCP state FIN_WAIT, deleting entry");
                    table.delete_entry(&rule);
                    ApplyOutcome::Deleted(rule)
                }
                tcp_state => {
                    debug!(?tcp_state, ?msg_type, "Ignore tcp state");
                    ApplyOutcome::Ignored
                }
            },
            L4Protocol::Udp => match msg_type {
                ConntrackMsgType::New => {
                    debug!("New UDP connection");
                    table.add_entry(&rule);
                    ApplyOutcome::Added(rule)
                }
                ConntrackMsgType::Destroy => {
                    debug!("UDP connection close");
                    table.delete_entry(&rule);
                    ApplyOutcome::Deleted(rule)
                }
                ConntrackMsgType::Update => {
                    table.touch_entry(&rule);
                    ApplyOutcome::Refreshed(rule)
                }
            },
        };
        drop(state);

        Ok(outcome)
    }

    /// Add or remove a neighbor client address of a NAT interface
    ///
    /// Additions need a non-zero IPv4 address. The interface snapshot is
    /// refreshed when the configured interface count changed since the last
    /// refresh. Nothing in the tracked set changes unless the interface
    /// resolves and is NAT-eligible.
    #[instrument(skip(self))]
    pub fn update_tracked_address(
        &self,
        data: &NeighIpData,
        is_delete: bool,
    ) -> Result<TrackOutcome> {
        if !is_delete && (data.ipv4_addr.is_unspecified() || data.ip_type != IpType::V4) {
            debug!("Ignoring neighbor client ip add event");
            return Ok(TrackOutcome::Ignored);
        }

        let ifname = self.resolver.resolve(data.if_index)?;
        let name = IfaceName::new(&ifname);

        let live_count = self.iface_config.nat_iface_count();
        if self.state.lock().registry.needs_refresh(live_count) {
            let names = self.iface_config.nat_ifaces(live_count)?;
            self.state
                .lock()
                .registry
                .install_snapshot(live_count, &names);
        }

        let mut state = self.state.lock();
        if !state.registry.is_nat_iface(&name) {
            debug!(ifname = %name, "Interface is not a NAT interface");
            return Ok(TrackOutcome::NotNatIface);
        }

        let outcome = if is_delete {
            state.registry.untrack(data.ipv4_addr)
        } else {
            state.registry.track(name, data.ipv4_addr)
        };
        Ok(outcome)
    }

    /// WAN up: record the session and allocate the NAT table
    ///
    /// `Ok(false)` when the WAN was already up.
    #[instrument(skip(self))]
    pub fn wan_up(&self, data: &IfaceUpData) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.wan.activate(data.ipv4_addr, &data.ifname)? {
            return Ok(false);
        }

        match self.nat_table() {
            Ok(table) => table.allocate_table(data.ipv4_addr),
            Err(e) => error!(error = %e, "Unable to allocate NAT table"),
        }
        Ok(true)
    }

    /// WAN down: destroy the table of the recorded public address
    ///
    /// Returns the address torn down, `None` when the WAN was not up.
    #[instrument(skip(self))]
    pub fn wan_down(&self, reported: Ipv4Addr) -> Option<Ipv4Addr> {
        let mut state = self.state.lock();
        if !state.wan.is_up() {
            return None;
        }

        let recorded = state.wan.public_ip();
        if !reported.is_unspecified() && recorded != Some(reported) {
            warn!(reported = %reported, recorded = ?recorded, "WAN down address differs from WAN up");
        }

        if let Some(public_ip) = recorded {
            info!(public_ip = %public_ip, "Deleting ipv4 nat table");
            match self.nat_table() {
                Ok(table) => table.destroy_table(public_ip),
                Err(e) => error!(error = %e, "Unable to delete NAT table"),
            }
        }
        state.wan.deactivate()
    }

    /// Exclude a WLAN/LAN interface's local traffic from offload
    pub fn update_local_filters(&self, data: &IfaceUpData) -> Result<()> {
        let _state = self.state.lock();
        let table = self.nat_table()?;
        table.update_udp_filters(data);
        table.update_tcp_filters(data);
        Ok(())
    }

    /// Expire entries of `protocol` idle past the current timeout
    ///
    /// The table scan runs outside the shared-state lock.
    pub fn sweep_idle(&self, protocol: L4Protocol) -> Result<usize> {
        let idle_timeout = self.state.lock().timeouts.for_protocol(protocol);
        let table = self.nat_table()?;
        let expired = table.expire_idle(protocol, idle_timeout);
        for rule in &expired {
            debug!(%rule, "Expired idle NAT entry");
        }
        Ok(expired.len())
    }

    /// Re-read conntrack timeouts, pushing them to the table on change
    ///
    /// Returns whether the timeouts changed.
    pub fn refresh_timeouts(&self, source: &dyn TimeoutSource) -> Result<bool> {
        let timeouts = source.read_timeouts()?;

        let mut state = self.state.lock();
        if state.timeouts == timeouts {
            return Ok(false);
        }
        state.timeouts = timeouts;
        info!(tcp = ?timeouts.tcp, udp = ?timeouts.udp, "Conntrack timeouts changed");
        self.nat_table()?.update_timeouts(timeouts);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticNatIfaceConfig;
    use crate::conntrack::NatStatus;
    use crate::iface::MockIfNameResolver;
    use crate::nat_table::MockNatTable;
    use crate::timeouts::MockTimeoutSource;
    use std::net::SocketAddrV4;
    use std::time::Duration;

    const PRIVATE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const REMOTE: Ipv4Addr = Ipv4Addr::new(93, 1, 1, 1);
    const PUBLIC: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);

    fn resolver() -> Arc<MockIfNameResolver> {
        let mut resolver = MockIfNameResolver::new();
        resolver.expect_resolve().returning(|idx| match idx {
            5 => Ok("rmnet0".to_string()),
            6 => Ok("eth0".to_string()),
            _ => Err(NatsyncError::InterfaceNotFound(idx)),
        });
        Arc::new(resolver)
    }

    fn engine_with(table: Option<Arc<dyn NatTable>>) -> NatSyncEngine {
        let config = Arc::new(StaticNatIfaceConfig::new(vec!["rmnet0".into()]));
        NatSyncEngine::new(config, resolver(), table, ConnTimeouts::default())
    }

    fn track(engine: &NatSyncEngine, addr: Ipv4Addr) {
        let data = NeighIpData {
            if_index: 5,
            ip_type: IpType::V4,
            ipv4_addr: addr,
        };
        assert!(matches!(
            engine.update_tracked_address(&data, false).unwrap(),
            TrackOutcome::Added(_)
        ));
    }

    fn outbound(proto: u8) -> ConntrackMessage {
        ConntrackMessage::new()
            .with_orig(SocketAddrV4::new(PRIVATE, 1234), SocketAddrV4::new(REMOTE, 80))
            .with_reply(SocketAddrV4::new(REMOTE, 80), SocketAddrV4::new(PUBLIC, 40000))
            .with_protocol(proto)
            .with_status(NatStatus::IPS_SRC_NAT)
    }

    fn tcp_event(state: TcpConntrackState) -> ConntrackEvent {
        ConntrackEvent::new(outbound(6).with_tcp_state(state), ConntrackMsgType::Update)
    }

    #[test]
    fn test_tcp_established_adds_once() {
        let mut table = MockNatTable::new();
        table
            .expect_add_entry()
            .withf(|r| r.private_ip == PRIVATE && r.private_port == 1234 && r.target_port == 80)
            .times(1)
            .return_const(());
        table.expect_delete_entry().never();

        let engine = engine_with(Some(Arc::new(table)));
        track(&engine, PRIVATE);

        let outcome = engine.process_ct_event(&tcp_event(TcpConntrackState::Established));
        assert!(matches!(outcome, ApplyOutcome::Added(_)));
    }

    #[test]
    fn test_tcp_fin_wait_deletes_once() {
        let mut table = MockNatTable::new();
        table.expect_add_entry().never();
        table.expect_delete_entry().times(1).return_const(());

        let engine = engine_with(Some(Arc::new(table)));
        track(&engine, PRIVATE);

        let outcome = engine.process_ct_event(&tcp_event(TcpConntrackState::FinWait));
        assert!(matches!(outcome, ApplyOutcome::Deleted(_)));
    }

    #[test]
    fn test_tcp_other_states_ignored() {
        let mut table = MockNatTable::new();
        table.expect_add_entry().never();
        table.expect_delete_entry().never();

        let engine = engine_with(Some(Arc::new(table)));
        track(&engine, PRIVATE);

        for state in [
            TcpConntrackState::SynSent,
            TcpConntrackState::SynRecv,
            TcpConntrackState::CloseWait,
            TcpConntrackState::TimeWait,
            TcpConntrackState::Close,
        ] {
            assert_eq!(engine.process_ct_event(&tcp_event(state)), ApplyOutcome::Ignored);
        }
    }

    #[test]
    fn test_udp_lifecycle() {
        let mut table = MockNatTable::new();
        table.expect_add_entry().times(1).return_const(());
        table.expect_touch_entry().times(1).return_const(());
        table.expect_delete_entry().times(1).return_const(());

        let engine = engine_with(Some(Arc::new(table)));
        track(&engine, PRIVATE);

        let new = ConntrackEvent::new(outbound(17), ConntrackMsgType::New);
        let update = ConntrackEvent::new(outbound(17), ConntrackMsgType::Update);
        let destroy = ConntrackEvent::new(outbound(17), ConntrackMsgType::Destroy);

        assert!(matches!(engine.process_ct_event(&new), ApplyOutcome::Added(_)));
        assert!(matches!(engine.process_ct_event(&update), ApplyOutcome::Refreshed(_)));
        assert!(matches!(engine.process_ct_event(&destroy), ApplyOutcome::Deleted(_)));
    }

    #[test]
    fn test_untracked_rule_filtered() {
        let mut table = MockNatTable::new();
        table.expect_add_entry().never();

        let engine = engine_with(Some(Arc::new(table)));
        track(&engine, Ipv4Addr::new(10, 0, 0, 9));

        let outcome = engine.process_ct_event(&tcp_event(TcpConntrackState::Established));
        assert_eq!(outcome, ApplyOutcome::Filtered);
    }

    #[test]
    fn test_target_match_forwarded() {
        let mut table = MockNatTable::new();
        table.expect_add_entry().times(1).return_const(());

        let engine = engine_with(Some(Arc::new(table)));
        track(&engine, REMOTE);

        let outcome = engine.process_ct_event(&tcp_event(TcpConntrackState::Established));
        assert!(matches!(outcome, ApplyOutcome::Added(_)));
    }

    #[test]
    fn test_unsupported_protocol_dropped() {
        let engine = engine_with(None);
        track(&engine, PRIVATE);

        let icmp = ConntrackEvent::new(outbound(1), ConntrackMsgType::New);
        assert_eq!(engine.process_ct_event(&icmp), ApplyOutcome::UnsupportedProtocol);
    }

    #[test]
    fn test_missing_nat_table_fails_locally() {
        let engine = engine_with(None);
        track(&engine, PRIVATE);

        let outcome = engine.process_ct_event(&tcp_event(TcpConntrackState::Established));
        assert_eq!(outcome, ApplyOutcome::Failed);
        // Engine remains usable
        assert_eq!(engine.tracked_addresses().len(), 1);
    }

    #[test]
    fn test_update_ignores_zero_and_ipv6_adds() {
        let engine = engine_with(None);
        let zero = NeighIpData {
            if_index: 5,
            ip_type: IpType::V4,
            ipv4_addr: Ipv4Addr::UNSPECIFIED,
        };
        let v6 = NeighIpData {
            if_index: 5,
            ip_type: IpType::V6,
            ipv4_addr: PRIVATE,
        };
        assert_eq!(engine.update_tracked_address(&zero, false).unwrap(), TrackOutcome::Ignored);
        assert_eq!(engine.update_tracked_address(&v6, false).unwrap(), TrackOutcome::Ignored);
        assert!(engine.tracked_addresses().is_empty());
    }

    #[test]
    fn test_update_resolution_failure_aborts() {
        let engine = engine_with(None);
        let data = NeighIpData {
            if_index: 99,
            ip_type: IpType::V4,
            ipv4_addr: PRIVATE,
        };
        assert!(matches!(
            engine.update_tracked_address(&data, false),
            Err(NatsyncError::InterfaceNotFound(99))
        ));
        assert!(engine.tracked_addresses().is_empty());
    }

    #[test]
    fn test_update_non_nat_iface_noop() {
        let engine = engine_with(None);
        let data = NeighIpData {
            if_index: 6,
            ip_type: IpType::V4,
            ipv4_addr: PRIVATE,
        };
        assert_eq!(
            engine.update_tracked_address(&data, false).unwrap(),
            TrackOutcome::NotNatIface
        );
    }

    #[test]
    fn test_update_refreshes_on_count_change() {
        let config = Arc::new(StaticNatIfaceConfig::new(vec!["eth1".into()]));
        let engine = NatSyncEngine::new(config.clone(), resolver(), None, ConnTimeouts::default());
        let data = NeighIpData {
            if_index: 5,
            ip_type: IpType::V4,
            ipv4_addr: PRIVATE,
        };

        assert_eq!(
            engine.update_tracked_address(&data, false).unwrap(),
            TrackOutcome::NotNatIface
        );

        config.set_ifaces(vec!["eth1".into(), "rmnet0".into()]);
        assert_eq!(engine.update_tracked_address(&data, false).unwrap(), TrackOutcome::Added(0));
    }

    #[test]
    fn test_update_config_failure_aborts() {
        let mut config = crate::config::MockNatIfaceConfig::new();
        config.expect_nat_iface_count().return_const(2usize);
        config
            .expect_nat_ifaces()
            .returning(|_| Err(NatsyncError::Config("unavailable".into())));

        let engine = NatSyncEngine::new(Arc::new(config), resolver(), None, ConnTimeouts::default());
        let data = NeighIpData {
            if_index: 5,
            ip_type: IpType::V4,
            ipv4_addr: PRIVATE,
        };
        assert!(matches!(
            engine.update_tracked_address(&data, false),
            Err(NatsyncError::Config(_))
        ));
        assert!(engine.tracked_addresses().is_empty());
    }

    #[test]
    fn test_delete_tracked_address() {
        let engine = engine_with(None);
        track(&engine, PRIVATE);
        let data = NeighIpData {
            if_index: 5,
            ip_type: IpType::V4,
            ipv4_addr: PRIVATE,
        };

        assert_eq!(engine.update_tracked_address(&data, true).unwrap(), TrackOutcome::Removed(0));
        assert_eq!(engine.update_tracked_address(&data, true).unwrap(), TrackOutcome::NotFound);
    }

    #[test]
    fn test_wan_up_allocates_table_once() {
        let mut table = MockNatTable::new();
        table
            .expect_allocate_table()
            .withf(|ip| *ip == PUBLIC)
            .times(1)
            .return_const(());

        let engine = engine_with(Some(Arc::new(table)));
        let up = IfaceUpData::new("rmnet_data0", PUBLIC, Ipv4Addr::new(255, 255, 255, 252));

        assert!(engine.wan_up(&up).unwrap());
        assert!(!engine.wan_up(&up).unwrap());
        assert!(engine.is_wan_up());
    }

    #[test]
    fn test_wan_up_zero_address_rejected() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().never();

        let engine = engine_with(Some(Arc::new(table)));
        let up = IfaceUpData::new("rmnet_data0", Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);

        assert!(engine.wan_up(&up).is_err());
        assert!(!engine.is_wan_up());
    }

    #[test]
    fn test_wan_down_uses_recorded_address() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().return_const(());
        table
            .expect_destroy_table()
            .withf(|ip| *ip == PUBLIC)
            .times(1)
            .return_const(());

        let engine = engine_with(Some(Arc::new(table)));
        assert_eq!(engine.wan_down(PUBLIC), None);

        engine
            .wan_up(&IfaceUpData::new("rmnet_data0", PUBLIC, Ipv4Addr::UNSPECIFIED))
            .unwrap();
        assert_eq!(engine.wan_down(Ipv4Addr::new(198, 51, 100, 1)), Some(PUBLIC));
        assert!(!engine.is_wan_up());
        assert_eq!(engine.wan_session(), WanSession::new());
    }

    #[test]
    fn test_refresh_timeouts_pushes_changes() {
        let mut table = MockNatTable::new();
        table
            .expect_update_timeouts()
            .withf(|t| t.udp == Duration::from_secs(60))
            .times(1)
            .return_const(());

        let mut source = MockTimeoutSource::new();
        source
            .expect_read_timeouts()
            .returning(|| Ok(ConnTimeouts::from_secs(432_000, 60)));

        let engine = engine_with(Some(Arc::new(table)));
        assert!(engine.refresh_timeouts(&source).unwrap());
        assert!(!engine.refresh_timeouts(&source).unwrap());
        assert_eq!(engine.timeouts().udp, Duration::from_secs(60));
    }

    #[test]
    fn test_sweep_idle_uses_protocol_timeout() {
        let mut table = MockNatTable::new();
        table
            .expect_expire_idle()
            .withf(|p, idle| *p == L4Protocol::Udp && *idle == Duration::from_secs(180))
            .times(1)
            .returning(|_, _| Vec::new());

        let engine = engine_with(Some(Arc::new(table)));
        assert_eq!(engine.sweep_idle(L4Protocol::Udp).unwrap(), 0);
    }

    /// Records whether the engine state was lockable during `expire_idle`
    #[derive(Default)]
    struct StateCheckingTable {
        engine: std::sync::OnceLock<std::sync::Weak<NatSyncEngine>>,
        state_free: std::sync::atomic::AtomicBool,
    }

    impl NatTable for StateCheckingTable {
        fn allocate_table(&self, _public_ip: Ipv4Addr) {}
        fn destroy_table(&self, _public_ip: Ipv4Addr) {}
        fn add_entry(&self, _rule: &NatRule) {}
        fn delete_entry(&self, _rule: &NatRule) {}
        fn touch_entry(&self, _rule: &NatRule) {}
        fn update_udp_filters(&self, _iface: &IfaceUpData) {}
        fn update_tcp_filters(&self, _iface: &IfaceUpData) {}
        fn update_timeouts(&self, _timeouts: ConnTimeouts) {}

        fn expire_idle(&self, _protocol: L4Protocol, _idle_timeout: Duration) -> Vec<NatRule> {
            if let Some(engine) = self.engine.get().and_then(|weak| weak.upgrade()) {
                let free = engine.state.try_lock().is_some();
                self.state_free
                    .store(free, std::sync::atomic::Ordering::SeqCst);
            }
            Vec::new()
        }
    }

    #[test]
    fn test_sweep_idle_releases_state_lock() {
        let table = Arc::new(StateCheckingTable::default());
        let engine = Arc::new(engine_with(Some(table.clone())));
        table.engine.set(Arc::downgrade(&engine)).unwrap();

        engine.sweep_idle(L4Protocol::Tcp).unwrap();
        assert!(table.state_free.load(std::sync::atomic::Ordering::SeqCst));
    }
}
