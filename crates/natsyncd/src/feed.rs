//! Conntrack event feeds
//!
//! The netlink subscription itself lives outside this crate; whatever owns it
//! pushes structured [`ConntrackEvent`]s through a [`ConntrackInjector`] and
//! the listener tasks pull them from per-protocol [`ConntrackFeed`]s.

use crate::conntrack::ConntrackEvent;
use crate::error::{NatsyncError, Result};
use crate::types::L4Protocol;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Stream of conntrack events for one protocol
#[async_trait]
pub trait ConntrackFeed: Send {
    /// Next event, `None` once the feed is closed
    async fn next_event(&mut self) -> Option<ConntrackEvent>;
}

/// Hands out feeds to the listener group
pub trait ConntrackSource: Send + Sync {
    fn subscribe(&self, protocol: L4Protocol) -> Result<Box<dyn ConntrackFeed>>;
}

/// Feed backed by a tokio channel
pub struct ChannelConntrackFeed {
    rx: mpsc::Receiver<ConntrackEvent>,
}

#[async_trait]
impl ConntrackFeed for ChannelConntrackFeed {
    async fn next_event(&mut self) -> Option<ConntrackEvent> {
        self.rx.recv().await
    }
}

/// Current subscriber of each protocol
#[derive(Default)]
struct FeedSlots {
    tcp: Mutex<Option<mpsc::Sender<ConntrackEvent>>>,
    udp: Mutex<Option<mpsc::Sender<ConntrackEvent>>>,
}

impl FeedSlots {
    fn slot(&self, protocol: L4Protocol) -> &Mutex<Option<mpsc::Sender<ConntrackEvent>>> {
        match protocol {
            L4Protocol::Tcp => &self.tcp,
            L4Protocol::Udp => &self.udp,
        }
    }
}

/// Channel-backed source handing out one live feed per protocol
///
/// Every subscription opens a fresh channel. A protocol can be subscribed
/// again once its previous feed has been dropped, so a listener group can
/// be restarted. Feeds close when the last injector is dropped.
pub struct ChannelConntrackSource {
    slots: Weak<FeedSlots>,
    queue_depth: usize,
}

impl ChannelConntrackSource {
    /// Create the source and the injector feeding it
    pub fn new(queue_depth: usize) -> (Self, ConntrackInjector) {
        let slots = Arc::new(FeedSlots::default());
        let source = Self {
            slots: Arc::downgrade(&slots),
            queue_depth: queue_depth.max(1),
        };
        (source, ConntrackInjector { slots })
    }
}

impl ConntrackSource for ChannelConntrackSource {
    fn subscribe(&self, protocol: L4Protocol) -> Result<Box<dyn ConntrackFeed>> {
        let slots = self
            .slots
            .upgrade()
            .ok_or_else(|| NatsyncError::Feed("conntrack injector dropped".to_string()))?;

        let mut slot = slots.slot(protocol).lock();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(NatsyncError::Feed(format!(
                "{} conntrack feed already subscribed",
                protocol
            )));
        }

        let (tx, rx) = mpsc::channel(self.queue_depth);
        *slot = Some(tx);
        debug!(%protocol, "Subscribed to conntrack feed");
        Ok(Box::new(ChannelConntrackFeed { rx }))
    }
}

/// Producer side of a [`ChannelConntrackSource`]
#[derive(Clone)]
pub struct ConntrackInjector {
    slots: Arc<FeedSlots>,
}

impl ConntrackInjector {
    /// Queue an event on the feed for its original-direction protocol
    ///
    /// Events for other protocols are dropped. Fails when no listener is
    /// subscribed to the protocol.
    pub async fn send(&self, event: ConntrackEvent) -> Result<()> {
        let proto = event.message.orig_l4_proto();
        let Some(protocol) = L4Protocol::from_raw(proto) else {
            warn!(proto, "Dropping conntrack event for unsupported protocol");
            return Ok(());
        };

        let tx = self.slots.slot(protocol).lock().clone();
        let tx = tx.ok_or_else(|| {
            NatsyncError::Feed(format!("no {} conntrack listener subscribed", protocol))
        })?;
        tx.send(event)
            .await
            .map_err(|_| NatsyncError::Feed(format!("{} conntrack feed closed", protocol)))
    }
}
