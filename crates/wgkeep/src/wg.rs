//! [`TunnelSubsystem`] backed by the `wg` and `wg-quick` command-line tools.

use std::path::Path;

use tracing::{debug, info};

use crate::command::{AllowedProgram, ToolCommand};
use crate::error::{Result, WgkeepError};
use crate::keys::{PrivateKey, PublicKey};
use crate::subsystem::TunnelSubsystem;
use crate::tunnel::{LiveInterface, parse_dump};

/// Drives the host's `WireGuard` tools.
#[derive(Debug, Clone, Default)]
pub struct WgTools {
    wg_path: Option<String>,
    wg_quick_path: Option<String>,
}

impl WgTools {
    /// Uses `wg` and `wg-quick` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the `wg` binary.
    #[must_use]
    pub fn with_wg_path(mut self, path: impl Into<String>) -> Self {
        self.wg_path = Some(path.into());
        self
    }

    /// Overrides the `wg-quick` binary.
    #[must_use]
    pub fn with_wg_quick_path(mut self, path: impl Into<String>) -> Self {
        self.wg_quick_path = Some(path.into());
        self
    }

    fn wg(&self) -> ToolCommand {
        let cmd = ToolCommand::new(AllowedProgram::Wg);
        match &self.wg_path {
            Some(path) => cmd.with_program_path(path),
            None => cmd,
        }
    }

    fn wg_quick(&self) -> ToolCommand {
        let cmd = ToolCommand::new(AllowedProgram::WgQuick);
        match &self.wg_quick_path {
            Some(path) => cmd.with_program_path(path),
            None => cmd,
        }
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        WgkeepError::InvalidArgument(format!("non UTF-8 path {}", path.display()))
    })
}

impl TunnelSubsystem for WgTools {
    async fn generate_private_key(&self) -> Result<PrivateKey> {
        let output = self.wg().arg("genkey").execute().await?;
        PrivateKey::from_base64(output.stdout_lossy().trim())
    }

    async fn public_key(&self, private: &PrivateKey) -> Result<PublicKey> {
        let output = self
            .wg()
            .arg("pubkey")
            .stdin(format!("{}\n", private.to_base64()))
            .execute()
            .await?;
        PublicKey::from_base64(output.stdout_lossy().trim())
    }

    async fn active_interfaces(&self) -> Result<Vec<String>> {
        let output = self.wg().args(["show", "interfaces"]).execute().await?;
        Ok(output
            .stdout_lossy()
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    async fn up(&self, name: &str, config_path: &Path) -> Result<()> {
        info!(interface = %name, "bringing interface up");
        self.wg_quick()
            .arg("up")
            .arg(path_arg(config_path)?)
            .execute()
            .await?;
        Ok(())
    }

    async fn down(&self, name: &str, config_path: &Path) -> Result<()> {
        info!(interface = %name, "taking interface down");
        self.wg_quick()
            .arg("down")
            .arg(path_arg(config_path)?)
            .execute()
            .await?;
        Ok(())
    }

    async fn sync(&self, name: &str, stripped_config: &str) -> Result<()> {
        debug!(interface = %name, "syncing live configuration");
        self.wg()
            .args(["syncconf", name, "/dev/stdin"])
            .stdin(stripped_config)
            .execute()
            .await?;
        Ok(())
    }

    async fn dump(&self, name: &str) -> Result<LiveInterface> {
        let output = self.wg().args(["show", name, "dump"]).execute().await?;
        parse_dump(&output.stdout_lossy())
    }
}
