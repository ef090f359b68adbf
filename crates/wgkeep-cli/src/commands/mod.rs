//! CLI command implementations.
//!
//! Each submodule implements one command group:
//! - [`interface`] - Interface records and lifecycle
//! - [`peer`] - Peer management and export
//! - [`stats`] - Traffic accounting

pub mod interface;
pub mod peer;
pub mod stats;

pub use interface::InterfaceCommand;
pub use peer::PeerCommand;
pub use stats::StatsCommand;
