//! Interface command implementation.
//!
//! Create, change, delete and inspect interfaces, and drive their lifecycle.

use std::io::Write;

use wgkeep::{CreateInterface, Hooks, TunnelSubsystem, UpdateInterface, WgManager};

use crate::cli::{CreateArgs, InterfaceCommands, SetArgs};
use crate::error::CliError;
use crate::output::{ActionResponse, ApplyResponse, InterfaceList, InterfaceView, OutputFormat};

/// Handler for interface subcommands.
pub struct InterfaceCommand<'a, T> {
    manager: &'a WgManager<T>,
}

impl<'a, T: TunnelSubsystem> InterfaceCommand<'a, T> {
    /// Creates a new interface command handler.
    #[must_use]
    pub const fn new(manager: &'a WgManager<T>) -> Self {
        Self { manager }
    }

    /// Executes an interface subcommand.
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or an output error.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        command: &InterfaceCommands,
    ) -> Result<(), CliError> {
        match command {
            InterfaceCommands::Create(args) => {
                let record = self.manager.create(create_request(args)).await?;
                let response = ActionResponse::new(
                    record.name(),
                    "create",
                    true,
                    format!(
                        "Created interface '{}' ({}, port {})",
                        record.name(),
                        record.interface.address,
                        record.interface.listen_port
                    ),
                );
                format.write(out, &response)?;
            }
            InterfaceCommands::Set(args) => {
                let record = self.manager.update(update_request(args)).await?;
                let response = ActionResponse::new(
                    record.name(),
                    "set",
                    true,
                    format!("Updated interface '{}'", record.name()),
                );
                format.write(out, &response)?;
            }
            InterfaceCommands::Delete { name } => {
                self.manager.delete(name).await?;
                let response = ActionResponse::new(
                    name,
                    "delete",
                    true,
                    format!("Deleted interface '{name}'"),
                );
                format.write(out, &response)?;
            }
            InterfaceCommands::List => {
                let list = InterfaceList {
                    interfaces: self.manager.list().await?,
                };
                format.write(out, &list)?;
            }
            InterfaceCommands::Show { name } => {
                let details = self.manager.show(name).await?;
                format.write(out, &InterfaceView::from(&details))?;
            }
            InterfaceCommands::Up { name } => {
                let changed = self.manager.start(name).await?;
                let message = if changed {
                    format!("Interface '{name}' is up")
                } else {
                    format!("Interface '{name}' was already up")
                };
                format.write(out, &ActionResponse::new(name, "up", changed, message))?;
            }
            InterfaceCommands::Down { name } => {
                let changed = self.manager.stop(name).await?;
                let message = if changed {
                    format!("Interface '{name}' is down")
                } else {
                    format!("Interface '{name}' was already down")
                };
                format.write(out, &ActionResponse::new(name, "down", changed, message))?;
            }
            InterfaceCommands::Restart { name } => {
                self.manager.restart(name).await?;
                let response = ActionResponse::new(
                    name,
                    "restart",
                    true,
                    format!("Interface '{name}' restarted"),
                );
                format.write(out, &response)?;
            }
            InterfaceCommands::Apply { name } => {
                let outcome = self.manager.apply(name).await?;
                let response = ApplyResponse {
                    interface: name.clone(),
                    outcome,
                };
                format.write(out, &response)?;
            }
        }
        Ok(())
    }
}

fn create_request(args: &CreateArgs) -> CreateInterface {
    CreateInterface {
        name: args.name.clone(),
        address: args.address.clone(),
        listen_port: args.listen_port,
        dns: args.dns.clone(),
        endpoint: args.endpoint.clone(),
        hooks: Hooks {
            pre_up: args.hooks.pre_up.clone().unwrap_or_default(),
            post_up: args.hooks.post_up.clone().unwrap_or_default(),
            pre_down: args.hooks.pre_down.clone().unwrap_or_default(),
            post_down: args.hooks.post_down.clone().unwrap_or_default(),
        },
        private_key: args.private_key.clone(),
    }
}

fn update_request(args: &SetArgs) -> UpdateInterface {
    UpdateInterface {
        name: args.name.clone(),
        listen_port: args.listen_port,
        dns: args.dns.clone(),
        endpoint: args.endpoint.clone(),
        pre_up: args.hooks.pre_up.clone(),
        post_up: args.hooks.post_up.clone(),
        pre_down: args.hooks.pre_down.clone(),
        post_down: args.hooks.post_down.clone(),
    }
}
