//! NAT Synchronization Daemon for SONiC
//!
//! This crate provides natsyncd, which listens for kernel connection
//! tracking events for TCP and UDP flows and mirrors the flows of
//! NAT-eligible local clients into a NAT table (IPv4 only).
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-4 | Information Flow Enforcement | Only tracked client flows are offloaded |
//! | AU-3 | Content of Audit Records | Structured logging with flow details |
//! | AU-12 | Audit Record Generation | Table and WAN changes logged |
//! | CM-6 | Configuration Settings | TOML configuration |
//! | CM-8 | System Component Inventory | NAT interface registry |
//! | SC-7 | Boundary Protection | WAN session tracking |
//! | SI-4 | System Monitoring | Conntrack event listeners |
//! | SI-10 | Input Validation | Event payload validation |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────────────┐     ┌─────────────┐
//! │  Linux Kernel   │     │          natsyncd            │     │  NAT table  │
//! │                 │     │                              │     │             │
//! │  conntrack TCP  │────▶│  ListenerGroup ─▶ engine     │────▶│  add/delete │
//! │  conntrack UDP  │     │                   │  filter  │     │  allocate   │
//! │                 │     │  NatSync ────────▶│  apply   │     │  destroy    │
//! └─────────────────┘     │  (WAN/LAN/neigh)  registry   │     └─────────────┘
//!                         └──────────────────────────────┘
//! ```

pub mod config;
pub mod conntrack;
pub mod engine;
pub mod error;
pub mod feed;
pub mod iface;
pub mod listener;
pub mod nat_sync;
pub mod nat_table;
pub mod registry;
pub mod timeouts;
pub mod types;
pub mod wan;

pub use config::{NatIfaceConfig, NatsyncConfig, StaticNatIfaceConfig};
pub use conntrack::{ConntrackEvent, ConntrackMessage, ConntrackMsgType, TcpConntrackState};
pub use engine::{ApplyOutcome, NatSyncEngine};
pub use error::{NatsyncError, Result};
pub use feed::{ChannelConntrackSource, ConntrackFeed, ConntrackInjector, ConntrackSource};
pub use iface::{IfNameResolver, SystemIfNameResolver};
pub use listener::{ListenerGroup, ListenerIntervals};
pub use nat_sync::NatSync;
pub use nat_table::{NatTable, SoftNatTable};
pub use registry::{NatIfaceRegistry, TrackOutcome, TrackedAddr};
pub use timeouts::{ProcTimeoutSource, TimeoutSource};
pub use types::{
    ConnTimeouts, EventData, EventId, IfaceUpData, IpType, L4Protocol, NatRule, NeighIpData,
};
pub use wan::WanSession;
