//! `WireGuard` interface and peer management.
//!
//! wgkeep keeps one authoritative JSON record per interface, renders it
//! into the configuration file `wg-quick` reads, reconciles running
//! interfaces with minimal disruption, and accumulates per-peer traffic
//! totals that survive counter resets.
//!
//! # Example
//!
//! ```rust,no_run
//! use wgkeep::{AddPeer, CreateInterface, ManagerConfig, WgManager};
//!
//! # async fn example() -> wgkeep::Result<()> {
//! let manager = WgManager::from_config(&ManagerConfig::default());
//! manager.create(CreateInterface::new("wg0", "10.0.0.1/24")).await?;
//! let peer = manager.add_peer(AddPeer::new("wg0", "alice")).await?;
//! println!("{} -> {}", peer.name, peer.allowed_ips_string());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod allocator;
pub mod command;
pub mod error;
pub mod keys;
pub mod manager;
pub mod reconcile;
pub mod render;
pub mod request;
pub mod stats;
pub mod store;
pub mod subsystem;
pub mod tunnel;
pub mod types;
pub mod wg;

pub use allocator::AddressAllocator;
pub use error::{ErrorKind, Result, WgkeepError};
pub use keys::{KEY_SIZE, PrivateKey, PublicKey};
pub use manager::{
    BatchReport, InterfaceDetails, InterfaceSummary, ManagerConfig, StatsOutcome, WgManager,
};
pub use reconcile::{ApplyOutcome, ConfigDiff, LinkState, Reconciler};
pub use render::{render_interface, render_peer_export, render_stripped};
pub use request::{AddPeer, CreateInterface, UpdateInterface};
pub use stats::{Accounting, PeerStats, SampleSummary, StatsRecord, StatsReport};
pub use store::{InterfaceLock, RecordStore};
pub use subsystem::{FakeTunnel, TunnelOp, TunnelSubsystem};
pub use tunnel::{LiveInterface, PeerSample};
pub use types::{Hooks, InterfaceRecord, PeerRecord, PeerStatus};
pub use wg::WgTools;
