//! CLI error types and exit codes.

use std::fmt;

use wgkeep::{ErrorKind, WgkeepError};

/// Exit code for errors without a more specific class.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code when a batch finished but some interfaces failed.
pub const EXIT_PARTIAL_FAILURE: u8 = 10;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// An interface, peer or stats operation failed.
    Operation(WgkeepError),
    /// A batch ran to completion with failures.
    PartialFailure {
        /// Interfaces that failed.
        failed: usize,
        /// Interfaces attempted.
        total: usize,
    },
    /// Output formatting error.
    Format(String),
    /// Writing to standard output failed.
    Io(std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Operation(err) => match err.kind() {
                ErrorKind::Validation => 3,
                ErrorKind::NotFound => 4,
                ErrorKind::Conflict => 5,
                ErrorKind::Exhaustion => 6,
                ErrorKind::Io => 7,
                ErrorKind::Tool => 8,
                ErrorKind::Consistency => 9,
            },
            Self::PartialFailure { .. } => EXIT_PARTIAL_FAILURE,
            Self::Format(_) | Self::Io(_) => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(err) => write!(f, "{err}"),
            Self::PartialFailure { failed, total } => {
                write!(f, "{failed} of {total} interface(s) failed")
            }
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WgkeepError> for CliError {
    fn from(err: WgkeepError) -> Self {
        Self::Operation(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
