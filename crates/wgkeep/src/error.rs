//! Error types for interface, peer and stats operations.
//!
//! Every variant belongs to exactly one [`ErrorKind`], which is what callers
//! (and the CLI's exit codes) dispatch on.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for wgkeep operations.
pub type Result<T> = std::result::Result<T, WgkeepError>;

/// Coarse classification of a [`WgkeepError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: name, address, port, key, missing field.
    Validation,
    /// Interface or peer absent.
    NotFound,
    /// Interface, peer or address already exists.
    Conflict,
    /// No free address left in the subnet.
    Exhaustion,
    /// Record read/write failure.
    Io,
    /// The tunnel subsystem failed or is unavailable.
    Tool,
    /// A stored record or tool output could not be understood.
    Consistency,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::Exhaustion => "exhaustion",
            Self::Io => "io",
            Self::Tool => "tool",
            Self::Consistency => "consistency",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while managing interfaces, peers and stats.
#[derive(Debug, Error)]
pub enum WgkeepError {
    /// Interface or peer name outside `[A-Za-z0-9_-]+`.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Malformed or unusable CIDR / IP address.
    #[error("invalid address '{value}': {reason}")]
    InvalidAddress {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Listen port outside [1, 65535].
    #[error("invalid listen port {0}: must be between 1 and 65535")]
    InvalidPort(u64),

    /// Key material that is not 32 bytes of base64.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A value that cannot be passed on to the tunnel tools.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No record exists for the interface.
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// The interface has no peer with this name.
    #[error("peer '{peer}' not found on interface '{interface}'")]
    PeerNotFound {
        /// Interface name.
        interface: String,
        /// Peer name.
        peer: String,
    },

    /// A record already exists for the interface.
    #[error("interface already exists: {0}")]
    InterfaceExists(String),

    /// The interface already has a peer with this name.
    #[error("peer '{peer}' already exists on interface '{interface}'")]
    PeerExists {
        /// Interface name.
        interface: String,
        /// Peer name.
        peer: String,
    },

    /// Another peer of the interface already uses this public key.
    #[error("public key already used by peer '{peer}' on interface '{interface}'")]
    PublicKeyInUse {
        /// Interface name.
        interface: String,
        /// Peer holding the key.
        peer: String,
    },

    /// The requested address is already assigned on the interface.
    #[error("address {address} already in use on interface '{interface}'")]
    AddressInUse {
        /// Interface name.
        interface: String,
        /// The colliding address.
        address: String,
    },

    /// Every host address of the subnet is taken.
    #[error("no available address in subnet {0}")]
    NoAvailableAddress(String),

    /// Filesystem failure on a record or rendered file.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A tunnel subsystem command exited non-zero.
    #[error("command '{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Process exit code (-1 when killed by a signal).
        exit_code: i32,
        /// Trimmed standard error.
        stderr: String,
    },

    /// A tunnel subsystem tool could not be started at all.
    #[error("tool unavailable: {program}: {message}")]
    ToolUnavailable {
        /// Program name or path.
        program: String,
        /// Launch failure detail.
        message: String,
    },

    /// The operation needs the interface to be up.
    #[error("interface '{0}' is not running")]
    InterfaceNotRunning(String),

    /// Tool output that does not follow the expected format.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A stored record that cannot be decoded or violates an invariant.
    #[error("corrupt record {}: {message}", path.display())]
    Corrupt {
        /// The offending record file.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },
}

impl WgkeepError {
    /// Creates an `InvalidName` error.
    #[must_use]
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidAddress` error.
    #[must_use]
    pub fn invalid_address(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `PeerNotFound` error.
    #[must_use]
    pub fn peer_not_found(interface: impl Into<String>, peer: impl Into<String>) -> Self {
        Self::PeerNotFound {
            interface: interface.into(),
            peer: peer.into(),
        }
    }

    /// Creates a `PeerExists` error.
    #[must_use]
    pub fn peer_exists(interface: impl Into<String>, peer: impl Into<String>) -> Self {
        Self::PeerExists {
            interface: interface.into(),
            peer: peer.into(),
        }
    }

    /// Creates an `Io` error for the given path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a `Corrupt` error for the given record file.
    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    #[must_use]
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Returns the kind this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. }
            | Self::InvalidAddress { .. }
            | Self::InvalidPort(_)
            | Self::InvalidKey(_)
            | Self::MissingField(_)
            | Self::InvalidArgument(_) => ErrorKind::Validation,
            Self::InterfaceNotFound(_) | Self::PeerNotFound { .. } => ErrorKind::NotFound,
            Self::InterfaceExists(_)
            | Self::PeerExists { .. }
            | Self::PublicKeyInUse { .. }
            | Self::AddressInUse { .. } => ErrorKind::Conflict,
            Self::NoAvailableAddress(_) => ErrorKind::Exhaustion,
            Self::Io { .. } => ErrorKind::Io,
            Self::CommandFailed { .. }
            | Self::ToolUnavailable { .. }
            | Self::InterfaceNotRunning(_) => ErrorKind::Tool,
            Self::ParseError(_) | Self::Corrupt { .. } => ErrorKind::Consistency,
        }
    }
}
