//! # wgkeep-cli
//!
//! Command-line front end for [`wgkeep`].
//!
//! Provides commands for:
//! - Interface creation, settings and lifecycle
//! - Peer management and client config export
//! - Reset-tolerant traffic accounting
//!
//! Every command runs against a [`wgkeep::WgManager`]; the binary drives the
//! host's `wg` and `wg-quick` tools, while the command handlers are generic
//! over the tunnel subsystem.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, InterfaceCommands, PeerCommands, StatsCommands};
pub use error::CliError;
pub use output::OutputFormat;
