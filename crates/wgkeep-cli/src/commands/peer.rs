//! Peer command implementation.

use std::io::Write;

use wgkeep::{AddPeer, PeerStatus, TunnelSubsystem, WgManager};

use crate::cli::PeerCommands;
use crate::error::CliError;
use crate::output::{ActionResponse, OutputFormat, PeerExport, PeerView};

/// Handler for peer subcommands.
pub struct PeerCommand<'a, T> {
    manager: &'a WgManager<T>,
}

impl<'a, T: TunnelSubsystem> PeerCommand<'a, T> {
    /// Creates a new peer command handler.
    #[must_use]
    pub const fn new(manager: &'a WgManager<T>) -> Self {
        Self { manager }
    }

    /// Executes a peer subcommand.
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or an output error.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        command: &PeerCommands,
    ) -> Result<(), CliError> {
        match command {
            PeerCommands::Add {
                interface,
                name,
                allowed_ips,
                public_key,
            } => {
                let request = AddPeer {
                    interface: interface.clone(),
                    name: name.clone(),
                    allowed_ips: allowed_ips.clone(),
                    public_key: public_key.clone(),
                };
                let peer = self.manager.add_peer(request).await?;
                format.write(out, &PeerView::new(interface, &peer))?;
            }
            PeerCommands::Remove { interface, name } => {
                self.manager.remove_peer(interface, name).await?;
                let response = ActionResponse::new(
                    interface,
                    "remove-peer",
                    true,
                    format!("Removed peer '{name}' from '{interface}'"),
                );
                format.write(out, &response)?;
            }
            PeerCommands::Enable { interface, name } => {
                self.set_status(out, format, interface, name, PeerStatus::Enabled)
                    .await?;
            }
            PeerCommands::Disable { interface, name } => {
                self.set_status(out, format, interface, name, PeerStatus::Disabled)
                    .await?;
            }
            PeerCommands::Export { interface, name } => {
                let config = self.manager.export_peer(interface, name).await?;
                let export = PeerExport {
                    interface: interface.clone(),
                    peer: name.clone(),
                    config,
                };
                format.write(out, &export)?;
            }
        }
        Ok(())
    }

    async fn set_status<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        interface: &str,
        name: &str,
        status: PeerStatus,
    ) -> Result<(), CliError> {
        self.manager.set_peer_status(interface, name, status).await?;
        let response = ActionResponse::new(
            interface,
            format!("peer-{status}"),
            true,
            format!("Peer '{name}' on '{interface}' is {status}"),
        );
        format.write(out, &response)
    }
}
