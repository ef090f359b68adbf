//! Stats command implementation.
//!
//! Sampling, reporting and flushing of per-peer traffic totals.

use std::io::Write;

use tracing::warn;
use wgkeep::{TunnelSubsystem, WgManager};

use crate::cli::StatsCommands;
use crate::error::CliError;
use crate::output::{ActionResponse, BatchView, OutputFormat};

/// Handler for stats subcommands.
pub struct StatsCommand<'a, T> {
    manager: &'a WgManager<T>,
}

impl<'a, T: TunnelSubsystem> StatsCommand<'a, T> {
    /// Creates a new stats command handler.
    #[must_use]
    pub const fn new(manager: &'a WgManager<T>) -> Self {
        Self { manager }
    }

    /// Executes a stats subcommand.
    ///
    /// # Errors
    ///
    /// Returns the manager's error, an output error, or `PartialFailure`
    /// after printing the report when some interfaces of `update --all`
    /// failed.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        command: &StatsCommands,
    ) -> Result<(), CliError> {
        match command {
            StatsCommands::Update {
                interface: Some(name),
                all: false,
            } => {
                let summary = self.manager.update_stats(name).await?;
                format.write(out, &summary)?;
            }
            StatsCommands::Update { .. } => {
                let report = self.manager.update_all_stats().await?;
                let total = report.outcomes.len();
                let view = BatchView::from(report);
                format.write(out, &view)?;
                if view.failed > 0 {
                    warn!(failed = view.failed, total, "stats update incomplete");
                    return Err(CliError::PartialFailure {
                        failed: view.failed,
                        total,
                    });
                }
            }
            StatsCommands::Show { interface } => {
                let report = self.manager.show_stats(interface).await?;
                format.write(out, &report)?;
            }
            StatsCommands::Flush { interface } => {
                let removed = self.manager.flush_stats(interface).await?;
                let message = if removed {
                    format!("Flushed stats of '{interface}'")
                } else {
                    format!("No stats recorded for '{interface}'")
                };
                format.write(out, &ActionResponse::new(interface, "flush", removed, message))?;
            }
        }
        Ok(())
    }
}
