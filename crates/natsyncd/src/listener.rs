//! Conntrack listener tasks
//!
//! A [`ListenerGroup`] runs four tasks on the current tokio runtime:
//! - TCP conntrack feed
//! - UDP conntrack feed
//! - UDP idle entry sweeper
//! - conntrack timeout monitor (also expires idle TCP entries)
//!
//! Startup is all-or-nothing: if any task cannot be created the ones
//! already running are cancelled and awaited before the error is returned.
//! A feed that closes stops the whole group; the owner restarts it.

use crate::config::ListenerConfig;
use crate::engine::NatSyncEngine;
use crate::error::{NatsyncError, Result};
use crate::feed::{ConntrackFeed, ConntrackSource};
use crate::timeouts::TimeoutSource;
use crate::types::L4Protocol;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Tasks in a running group
pub const LISTENER_TASKS: usize = 4;

/// Periods of the housekeeping tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerIntervals {
    pub udp_sweep: Duration,
    pub timeout_poll: Duration,
}

impl Default for ListenerIntervals {
    fn default() -> Self {
        Self::from(&ListenerConfig::default())
    }
}

impl From<&ListenerConfig> for ListenerIntervals {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            udp_sweep: config.udp_sweep_interval(),
            timeout_poll: config.timeout_poll_interval(),
        }
    }
}

/// Running listener tasks
pub struct ListenerGroup {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ListenerGroup {
    /// Subscribe both conntrack feeds and spawn all four tasks
    pub async fn start(
        engine: Arc<NatSyncEngine>,
        source: &dyn ConntrackSource,
        timeout_source: Arc<dyn TimeoutSource>,
        intervals: ListenerIntervals,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| NatsyncError::ListenerStartup(format!("no tokio runtime: {}", e)))?;

        let group = Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        for protocol in [L4Protocol::Tcp, L4Protocol::Udp] {
            let feed = match source.subscribe(protocol) {
                Ok(feed) => feed,
                Err(e) => {
                    error!(%protocol, error = %e, "Unable to create conntrack event listener");
                    group.shutdown().await;
                    return Err(NatsyncError::ListenerStartup(format!(
                        "{} conntrack listener: {}",
                        protocol, e
                    )));
                }
            };
            group.tracker.spawn_on(
                run_feed(engine.clone(), feed, protocol, group.cancel.clone()),
                &handle,
            );
            info!(%protocol, "Created conntrack event listener task");
        }

        group.tracker.spawn_on(
            run_udp_sweeper(engine.clone(), intervals.udp_sweep, group.cancel.clone()),
            &handle,
        );
        group.tracker.spawn_on(
            run_timeout_monitor(
                engine,
                timeout_source,
                intervals.timeout_poll,
                group.cancel.clone(),
            ),
            &handle,
        );
        info!(tasks = group.tracker.len(), "Conntrack listener group started");

        Ok(group)
    }

    /// Number of tasks still running
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    /// Whether all tasks are alive and the group was not cancelled
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tracker.len() == LISTENER_TASKS
    }

    /// Cancel every task and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Conntrack listener group stopped");
    }
}

impl Drop for ListenerGroup {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_feed(
    engine: Arc<NatSyncEngine>,
    mut feed: Box<dyn ConntrackFeed>,
    protocol: L4Protocol,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = feed.next_event() => match event {
                Some(event) => {
                    engine.process_ct_event(&event);
                }
                None => {
                    warn!(%protocol, "Conntrack feed closed, stopping listener group");
                    cancel.cancel();
                    break;
                }
            },
        }
    }
    debug!(%protocol, "Conntrack listener exiting");
}

async fn run_udp_sweeper(engine: Arc<NatSyncEngine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match engine.sweep_idle(L4Protocol::Udp) {
                Ok(0) => {}
                Ok(expired) => debug!(expired, "Expired idle UDP entries"),
                Err(e) => debug!(error = %e, "UDP sweep skipped"),
            },
        }
    }
}

async fn run_timeout_monitor(
    engine: Arc<NatSyncEngine>,
    source: Arc<dyn TimeoutSource>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = engine.refresh_timeouts(source.as_ref()) {
                    warn!(error = %e, "Unable to refresh conntrack timeouts");
                }
                match engine.sweep_idle(L4Protocol::Tcp) {
                    Ok(0) => {}
                    Ok(expired) => debug!(expired, "Expired idle TCP entries"),
                    Err(e) => debug!(error = %e, "TCP sweep skipped"),
                }
            }
        }
    }
}
