//! NAT Synchronization Daemon
//!
//! Main entry point for the natsyncd daemon.
//! Wires the conntrack feeds, NAT table and configuration together and
//! routes platform events until shutdown.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - CM-6: Configuration Settings - TOML configuration
//! - SI-4: System Monitoring - Real-time event processing

use anyhow::Context;
use clap::Parser;
use sonic_natsyncd::config::DEFAULT_CONFIG_PATH;
use sonic_natsyncd::{
    ChannelConntrackSource, ConntrackInjector, EventData, EventId, ListenerIntervals, NatSync,
    NatSyncEngine, NatsyncConfig, ProcTimeoutSource, SoftNatTable, StaticNatIfaceConfig,
    SystemIfNameResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Conntrack to NAT table synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "natsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = NatsyncConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level)?;

    info!(config = %args.config.display(), "natsyncd: Starting NAT synchronization daemon");
    run_daemon(config).await?;
    info!("natsyncd: Daemon exiting normally");
    Ok(())
}

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logger")?;
    Ok(())
}

/// Platform event as delivered by the event adapter
type PlatformEvent = (EventId, Option<EventData>);

/// Producer handles that external adapters attach to
///
/// No platform event or conntrack netlink adapter is bundled with this
/// binary. An adapter takes clones of these handles from
/// [`Daemon::inputs`] before the daemon runs; until one does, the daemon
/// idles until shutdown.
#[derive(Clone)]
struct DaemonInputs {
    events: mpsc::Sender<PlatformEvent>,
    #[allow(dead_code)]
    conntrack: ConntrackInjector,
}

/// Assembled daemon: event dispatcher plus the inputs feeding it
struct Daemon {
    nat_sync: NatSync,
    inputs: DaemonInputs,
    event_rx: mpsc::Receiver<PlatformEvent>,
}

impl Daemon {
    fn build(config: &NatsyncConfig) -> Self {
        let nat_ifaces = Arc::new(StaticNatIfaceConfig::new(config.nat.interfaces.clone()));
        let engine = Arc::new(NatSyncEngine::new(
            nat_ifaces,
            Arc::new(SystemIfNameResolver),
            Some(Arc::new(SoftNatTable::new())),
            config.timeouts.defaults(),
        ));

        let (source, conntrack) = ChannelConntrackSource::new(config.listener.feed_queue_depth);
        let timeout_source = ProcTimeoutSource::new(
            &config.timeouts.tcp_timeout_path,
            &config.timeouts.udp_timeout_path,
        );
        let nat_sync = NatSync::new(
            engine,
            Arc::new(source),
            Arc::new(timeout_source),
            ListenerIntervals::from(&config.listener),
        );

        let (events, event_rx) = mpsc::channel(config.listener.feed_queue_depth.max(1));
        Self {
            nat_sync,
            inputs: DaemonInputs { events, conntrack },
            event_rx,
        }
    }

    fn inputs(&self) -> DaemonInputs {
        self.inputs.clone()
    }

    /// Route platform events until `shutdown` resolves
    async fn run(self, shutdown: impl Future<Output = ()>) {
        let Self {
            nat_sync,
            inputs: _inputs,
            mut event_rx,
        } = self;
        tokio::pin!(shutdown);

        info!("natsyncd: Listening to platform events...");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("natsyncd: Received shutdown signal");
                    break;
                }
                event = event_rx.recv() => match event {
                    Some((evt, data)) => nat_sync.handle_event(evt, data).await,
                    None => {
                        warn!("natsyncd: Event channel closed");
                        break;
                    }
                },
            }
        }

        nat_sync.shutdown().await;
    }
}

/// Main daemon loop
async fn run_daemon(config: NatsyncConfig) -> anyhow::Result<()> {
    let daemon = Daemon::build(&config);
    let inputs = daemon.inputs();
    info!(
        event_queue = inputs.events.max_capacity(),
        "natsyncd: No event adapters bundled, waiting for attached inputs"
    );
    drop(inputs);

    daemon
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "natsyncd: Unable to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
