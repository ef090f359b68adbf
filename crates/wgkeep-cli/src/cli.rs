//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use wgkeep::ManagerConfig;
use wgkeep::manager::{DEFAULT_STATE_DIR, DEFAULT_WIREGUARD_DIR};

/// wgkeep - WireGuard interface and peer manager.
#[derive(Parser, Debug, Clone)]
#[command(name = "wgkeep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding interface and stats records.
    #[arg(long, env = "WGKEEP_STATE_DIR", default_value = DEFAULT_STATE_DIR, global = true)]
    pub state_dir: PathBuf,

    /// Directory the rendered `<name>.conf` files are written to.
    #[arg(long, env = "WGKEEP_WIREGUARD_DIR", default_value = DEFAULT_WIREGUARD_DIR, global = true)]
    pub wireguard_dir: PathBuf,

    /// Path of the `wg` tool.
    #[arg(long = "wg", env = "WGKEEP_WG", default_value = "wg", global = true)]
    pub wg_path: String,

    /// Path of the `wg-quick` tool.
    #[arg(long = "wg-quick", env = "WGKEEP_WG_QUICK", default_value = "wg-quick", global = true)]
    pub wg_quick_path: String,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Manager settings assembled from the global flags.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::default()
            .with_state_dir(&self.state_dir)
            .with_wireguard_dir(&self.wireguard_dir)
            .with_wg_path(&self.wg_path)
            .with_wg_quick_path(&self.wg_quick_path)
    }

    /// Default log directive for the requested verbosity.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Interface management commands.
    Interface {
        /// Interface subcommand to execute.
        #[command(subcommand)]
        command: InterfaceCommands,
    },

    /// Peer management commands.
    Peer {
        /// Peer subcommand to execute.
        #[command(subcommand)]
        command: PeerCommands,
    },

    /// Traffic accounting commands.
    Stats {
        /// Stats subcommand to execute.
        #[command(subcommand)]
        command: StatsCommands,
    },
}

/// Lifecycle hook commands shared by create and set.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct HookArgs {
    /// Command run before the interface comes up.
    #[arg(long)]
    pub pre_up: Option<String>,

    /// Command run after the interface comes up.
    #[arg(long)]
    pub post_up: Option<String>,

    /// Command run before the interface goes down.
    #[arg(long)]
    pub pre_down: Option<String>,

    /// Command run after the interface goes down.
    #[arg(long)]
    pub post_down: Option<String>,
}

/// Arguments for creating an interface.
#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Interface name.
    pub name: String,

    /// Interface address with prefix, e.g. 10.0.0.1/24.
    #[arg(short, long)]
    pub address: String,

    /// UDP listen port (default 51820).
    #[arg(short = 'p', long)]
    pub listen_port: Option<u64>,

    /// DNS server handed to peer exports.
    #[arg(long)]
    pub dns: Option<String>,

    /// Public endpoint (host) handed to peer exports.
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Base64 private key to use instead of generating one.
    #[arg(long)]
    pub private_key: Option<String>,

    /// Lifecycle hooks.
    #[command(flatten)]
    pub hooks: HookArgs,
}

/// Arguments for changing interface settings.
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Interface name.
    pub name: String,

    /// New UDP listen port.
    #[arg(short = 'p', long)]
    pub listen_port: Option<u64>,

    /// New DNS value; an empty string clears it.
    #[arg(long)]
    pub dns: Option<String>,

    /// New endpoint; an empty string clears it.
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// New lifecycle hooks; an empty string clears one.
    #[command(flatten)]
    pub hooks: HookArgs,
}

/// Interface subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum InterfaceCommands {
    /// Create an interface and render its configuration file.
    Create(CreateArgs),

    /// Change listen port, DNS, endpoint or hooks.
    Set(SetArgs),

    /// Stop an interface and delete its files.
    Delete {
        /// Interface name.
        name: String,
    },

    /// List all interfaces.
    List,

    /// Show an interface and its peers.
    Show {
        /// Interface name.
        name: String,
    },

    /// Bring an interface up.
    Up {
        /// Interface name.
        name: String,
    },

    /// Bring an interface down.
    Down {
        /// Interface name.
        name: String,
    },

    /// Bring an interface down and up again.
    Restart {
        /// Interface name.
        name: String,
    },

    /// Re-render the configuration file and sync a running interface.
    ///
    /// Peers whose settings did not change keep their sessions.
    Apply {
        /// Interface name.
        name: String,
    },
}

/// Peer subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum PeerCommands {
    /// Add a peer, allocating the next free address unless one is given.
    Add {
        /// Interface name.
        interface: String,

        /// Peer name.
        name: String,

        /// Comma-separated CIDRs instead of an allocated address.
        #[arg(long)]
        allowed_ips: Option<String>,

        /// Public key of a peer that keeps its own private key.
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Remove a peer.
    Remove {
        /// Interface name.
        interface: String,
        /// Peer name.
        name: String,
    },

    /// Put a disabled peer back into the configuration.
    Enable {
        /// Interface name.
        interface: String,
        /// Peer name.
        name: String,
    },

    /// Keep a peer in the record but leave it out of the configuration.
    Disable {
        /// Interface name.
        interface: String,
        /// Peer name.
        name: String,
    },

    /// Print the client configuration of a peer.
    Export {
        /// Interface name.
        interface: String,
        /// Peer name.
        name: String,
    },
}

/// Stats subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum StatsCommands {
    /// Sample running interfaces into their stats records.
    #[command(group(ArgGroup::new("target").required(true).args(["interface", "all"])))]
    Update {
        /// Interface name.
        interface: Option<String>,

        /// Sample every running interface.
        #[arg(long)]
        all: bool,
    },

    /// Show accumulated traffic per peer.
    Show {
        /// Interface name.
        interface: String,
    },

    /// Delete the stats record of an interface.
    Flush {
        /// Interface name.
        interface: String,
    },
}
