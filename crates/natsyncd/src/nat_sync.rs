//! NatSync - routes platform events to the sync engine
//!
//! Subscribes (conceptually) to WAN up/down, WLAN/LAN up, neighbor client
//! add/del and conntrack message events. WAN up allocates the NAT table and
//! starts the conntrack listener group the first time; the listeners are
//! kept across WAN down and reused on the next WAN up. A group that failed
//! to start or has since stopped is started again on the next WAN up.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AC-4: Information Flow Enforcement - NAT offload of tracked clients
//! - CM-3: Configuration Change Control - WAN transitions logged
//! - SI-4: System Monitoring - Event dispatch

use crate::engine::NatSyncEngine;
use crate::error::Result;
use crate::feed::ConntrackSource;
use crate::listener::{ListenerGroup, ListenerIntervals};
use crate::timeouts::TimeoutSource;
use crate::types::{EventData, EventId, IfaceUpData};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

/// Event dispatcher owning the listener group
pub struct NatSync {
    engine: Arc<NatSyncEngine>,
    source: Arc<dyn ConntrackSource>,
    timeout_source: Arc<dyn TimeoutSource>,
    intervals: ListenerIntervals,
    listeners: AsyncMutex<Option<ListenerGroup>>,
}

impl NatSync {
    pub fn new(
        engine: Arc<NatSyncEngine>,
        source: Arc<dyn ConntrackSource>,
        timeout_source: Arc<dyn TimeoutSource>,
        intervals: ListenerIntervals,
    ) -> Self {
        Self {
            engine,
            source,
            timeout_source,
            intervals,
            listeners: AsyncMutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<NatSyncEngine> {
        &self.engine
    }

    /// Whether a running listener group is registered
    pub async fn is_ct_registered(&self) -> bool {
        self.listeners
            .lock()
            .await
            .as_ref()
            .is_some_and(ListenerGroup::is_running)
    }

    /// Route one event
    ///
    /// Events without a payload are rejected. A payload that does not
    /// belong to the event id is logged and dropped.
    #[instrument(skip(self, data))]
    pub async fn handle_event(&self, evt: EventId, data: Option<EventData>) {
        let Some(data) = data else {
            error!(?evt, "Event without payload");
            return;
        };

        match (evt, data) {
            (EventId::ConntrackMessage, EventData::Conntrack(event)) => {
                self.engine.process_ct_event(&event);
            }
            (EventId::WanUp, EventData::IfaceUp(up)) => {
                info!(ifname = %up.ifname, ipv4 = %up.ipv4_addr, "Received WAN up event");
                if self.engine.is_wan_up() {
                    debug!("WAN already up, ignoring");
                } else {
                    self.trigger_wan_up(&up).await;
                }
            }
            (EventId::WanDown, EventData::WanDown(addr)) => {
                info!(ipv4 = %addr, "Received WAN down event");
                if self.engine.is_wan_up() {
                    self.engine.wan_down(addr);
                } else {
                    debug!("WAN already down, ignoring");
                }
            }
            (EventId::WlanUp | EventId::LanUp, EventData::IfaceUp(up)) => {
                info!(?evt, ifname = %up.ifname, "Received local interface up event");
                if !self.engine.is_wan_up() {
                    debug!("WAN not up, ignoring local interface");
                } else if let Err(e) = self.engine.update_local_filters(&up) {
                    error!(error = %e, ifname = %up.ifname, "Unable to update local filters");
                }
            }
            (EventId::NeighIpAdd | EventId::NeighIpDel, EventData::Neigh(neigh)) => {
                let is_delete = evt == EventId::NeighIpDel;
                match self.engine.update_tracked_address(&neigh, is_delete) {
                    Ok(outcome) => debug!(?outcome, "Tracked address update"),
                    Err(e) => warn!(error = %e, if_index = neigh.if_index, "Tracked address update aborted"),
                }
            }
            (EventId::Other(id), _) => {
                debug!(id, "Ignoring event");
            }
            (evt, data) => {
                warn!(?evt, ?data, "Event payload does not match event");
            }
        }
    }

    async fn trigger_wan_up(&self, up: &IfaceUpData) {
        match self.engine.wan_up(up) {
            Ok(true) => {
                if let Err(e) = self.start_listeners().await {
                    error!(error = %e, "Conntrack listeners not running");
                }
            }
            Ok(false) => debug!("WAN already up"),
            Err(e) => error!(error = %e, "Ignoring WAN up event"),
        }
    }

    /// Start the listener group unless it is already running
    ///
    /// Returns `Ok(false)` when already running. Concurrent callers start at
    /// most one group; the registration is only recorded on success. A
    /// stopped group is reaped and replaced.
    pub async fn start_listeners(&self) -> Result<bool> {
        let mut listeners = self.listeners.lock().await;
        match listeners.take() {
            Some(group) if group.is_running() => {
                debug!("Conntrack listeners already registered");
                *listeners = Some(group);
                return Ok(false);
            }
            Some(group) => {
                warn!(tasks = group.task_count(), "Conntrack listener group stopped, restarting");
                group.shutdown().await;
            }
            None => {}
        }

        let group = ListenerGroup::start(
            self.engine.clone(),
            self.source.as_ref(),
            self.timeout_source.clone(),
            self.intervals,
        )
        .await?;
        *listeners = Some(group);
        Ok(true)
    }

    /// Stop the listener group
    pub async fn shutdown(&self) {
        if let Some(group) = self.listeners.lock().await.take() {
            group.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticNatIfaceConfig;
    use crate::error::NatsyncError;
    use crate::feed::{ChannelConntrackSource, ConntrackFeed, ConntrackInjector};
    use crate::iface::MockIfNameResolver;
    use crate::nat_table::MockNatTable;
    use crate::timeouts::MockTimeoutSource;
    use crate::types::{ConnTimeouts, IpType, L4Protocol, NeighIpData};
    use std::net::Ipv4Addr;
    use crate::conntrack::ConntrackEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PUBLIC: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);

    /// Feed whose producer is already gone
    struct ClosedFeed;

    #[async_trait]
    impl ConntrackFeed for ClosedFeed {
        async fn next_event(&mut self) -> Option<ConntrackEvent> {
            None
        }
    }

    struct CountingSource {
        inner: ChannelConntrackSource,
        _injector: ConntrackInjector,
        subscribes: AtomicUsize,
        udp_failures: AtomicUsize,
        closed_tcp_feeds: AtomicUsize,
    }

    impl ConntrackSource for CountingSource {
        fn subscribe(&self, protocol: L4Protocol) -> Result<Box<dyn ConntrackFeed>> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let consume = |remaining: &AtomicUsize| {
                remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            };
            match protocol {
                L4Protocol::Udp if consume(&self.udp_failures) => {
                    Err(NatsyncError::Feed("unavailable".into()))
                }
                L4Protocol::Tcp if consume(&self.closed_tcp_feeds) => Ok(Box::new(ClosedFeed)),
                _ => self.inner.subscribe(protocol),
            }
        }
    }

    fn faulty_source(udp_failures: usize, closed_tcp_feeds: usize) -> Arc<CountingSource> {
        let (inner, injector) = ChannelConntrackSource::new(8);
        Arc::new(CountingSource {
            inner,
            _injector: injector,
            subscribes: AtomicUsize::new(0),
            udp_failures: AtomicUsize::new(udp_failures),
            closed_tcp_feeds: AtomicUsize::new(closed_tcp_feeds),
        })
    }

    fn source(fail_udp: bool) -> Arc<CountingSource> {
        faulty_source(if fail_udp { usize::MAX } else { 0 }, 0)
    }

    fn timeout_source() -> Arc<MockTimeoutSource> {
        let mut source = MockTimeoutSource::new();
        source
            .expect_read_timeouts()
            .returning(|| Ok(ConnTimeouts::default()));
        Arc::new(source)
    }

    fn nat_sync(mut table: MockNatTable, source: Arc<CountingSource>) -> NatSync {
        // Housekeeping tasks sweep on their first tick
        table.expect_expire_idle().returning(|_, _| Vec::new());

        let mut resolver = MockIfNameResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok("rmnet0".to_string()));
        let engine = Arc::new(NatSyncEngine::new(
            Arc::new(StaticNatIfaceConfig::new(vec!["rmnet0".into()])),
            Arc::new(resolver),
            Some(Arc::new(table)),
            ConnTimeouts::default(),
        ));
        NatSync::new(engine, source, timeout_source(), ListenerIntervals::default())
    }

    fn wan_up() -> Option<EventData> {
        Some(EventData::IfaceUp(IfaceUpData::new(
            "rmnet_data0",
            PUBLIC,
            Ipv4Addr::new(255, 255, 255, 252),
        )))
    }

    #[tokio::test]
    async fn test_missing_payload_rejected() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().never();
        let sync = nat_sync(table, source(false));

        sync.handle_event(EventId::WanUp, None).await;
        assert!(!sync.engine().is_wan_up());
    }

    #[tokio::test]
    async fn test_wan_up_starts_listeners_once() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().times(1).return_const(());
        let source = source(false);
        let sync = nat_sync(table, source.clone());

        sync.handle_event(EventId::WanUp, wan_up()).await;
        sync.handle_event(EventId::WanUp, wan_up()).await;

        assert!(sync.engine().is_wan_up());
        assert!(sync.is_ct_registered().await);
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_listeners_survive_wan_down() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().times(2).return_const(());
        table.expect_destroy_table().times(1).return_const(());
        let source = source(false);
        let sync = nat_sync(table, source.clone());

        sync.handle_event(EventId::WanUp, wan_up()).await;
        sync.handle_event(EventId::WanDown, Some(EventData::WanDown(PUBLIC))).await;
        assert!(!sync.engine().is_wan_up());
        assert!(sync.is_ct_registered().await);

        sync.handle_event(EventId::WanUp, wan_up()).await;
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_listener_failure_not_registered() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().times(1).return_const(());
        let sync = nat_sync(table, source(true));

        sync.handle_event(EventId::WanUp, wan_up()).await;

        assert!(sync.engine().is_wan_up());
        assert!(!sync.is_ct_registered().await);
    }

    #[tokio::test]
    async fn test_listener_start_retried_after_failure() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().times(2).return_const(());
        table.expect_destroy_table().times(1).return_const(());
        let source = faulty_source(1, 0);
        let sync = nat_sync(table, source.clone());

        sync.handle_event(EventId::WanUp, wan_up()).await;
        assert!(!sync.is_ct_registered().await);

        sync.handle_event(EventId::WanDown, Some(EventData::WanDown(PUBLIC))).await;
        sync.handle_event(EventId::WanUp, wan_up()).await;

        // TCP subscribed again after the failed start released it
        assert!(sync.is_ct_registered().await);
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 4);
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_listener_group_restarted() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().times(2).return_const(());
        table.expect_destroy_table().times(1).return_const(());
        let source = faulty_source(0, 1);
        let sync = nat_sync(table, source.clone());

        sync.handle_event(EventId::WanUp, wan_up()).await;
        for _ in 0..200 {
            if !sync.is_ct_registered().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!sync.is_ct_registered().await);

        sync.handle_event(EventId::WanDown, Some(EventData::WanDown(PUBLIC))).await;
        sync.handle_event(EventId::WanUp, wan_up()).await;

        assert!(sync.is_ct_registered().await);
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 4);
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_wan_down_when_down_ignored() {
        let mut table = MockNatTable::new();
        table.expect_destroy_table().never();
        let sync = nat_sync(table, source(false));

        sync.handle_event(EventId::WanDown, Some(EventData::WanDown(PUBLIC))).await;
        assert!(!sync.engine().is_wan_up());
    }

    #[tokio::test]
    async fn test_local_iface_needs_wan() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().return_const(());
        table.expect_update_udp_filters().times(1).return_const(());
        table.expect_update_tcp_filters().times(1).return_const(());
        let sync = nat_sync(table, source(false));

        let wlan = IfaceUpData::new("wlan0", Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(255, 255, 255, 0));
        sync.handle_event(EventId::WlanUp, Some(EventData::IfaceUp(wlan.clone()))).await;

        sync.handle_event(EventId::WanUp, wan_up()).await;
        sync.handle_event(EventId::LanUp, Some(EventData::IfaceUp(wlan))).await;
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_neigh_events_update_registry() {
        let sync = nat_sync(MockNatTable::new(), source(false));
        let neigh = NeighIpData {
            if_index: 5,
            ip_type: IpType::V4,
            ipv4_addr: Ipv4Addr::new(10, 0, 0, 5),
        };

        sync.handle_event(EventId::NeighIpAdd, Some(EventData::Neigh(neigh))).await;
        assert_eq!(sync.engine().tracked_addresses().len(), 1);

        sync.handle_event(EventId::NeighIpDel, Some(EventData::Neigh(neigh))).await;
        assert!(sync.engine().tracked_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_payload_and_unknown_events_ignored() {
        let mut table = MockNatTable::new();
        table.expect_allocate_table().never();
        let sync = nat_sync(table, source(false));

        sync.handle_event(EventId::WanUp, Some(EventData::WanDown(PUBLIC))).await;
        sync.handle_event(EventId::Other(42), wan_up()).await;
        assert!(!sync.engine().is_wan_up());
    }
}
