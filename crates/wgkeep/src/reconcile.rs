//! Bringing the running interface in line with its record.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::keys::PublicKey;
use crate::render::{render_interface, render_stripped};
use crate::store::{remove_file, write_atomic};
use crate::subsystem::TunnelSubsystem;
use crate::tunnel::LiveInterface;
use crate::types::InterfaceRecord;

/// Where an interface is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No rendered configuration file.
    Absent,
    /// Rendered but not running.
    Down,
    /// Running.
    Up,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absent => "absent",
            Self::Down => "down",
            Self::Up => "up",
        })
    }
}

/// Difference between a record and the live interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDiff {
    /// Private key or listen port differ.
    pub interface_changed: bool,
    /// Enabled peers not running.
    pub added: Vec<PublicKey>,
    /// Running peers that are no longer enabled.
    pub removed: Vec<PublicKey>,
    /// Peers whose allowed IPs differ.
    pub modified: Vec<PublicKey>,
}

impl ConfigDiff {
    /// Compares the desired state in `record` with `live`.
    #[must_use]
    pub fn compute(record: &InterfaceRecord, live: &LiveInterface) -> Self {
        let desired: BTreeMap<PublicKey, Vec<IpNet>> = record
            .enabled_peers()
            .map(|p| {
                let mut ips = p.allowed_ips.clone();
                ips.sort();
                (p.public_key, ips)
            })
            .collect();
        let running: BTreeMap<PublicKey, Vec<IpNet>> = live
            .peers
            .iter()
            .map(|p| (p.public_key, p.sorted_allowed_ips()))
            .collect();

        let mut diff = Self {
            interface_changed: live.listen_port != record.interface.listen_port
                || live.private_key.as_ref() != Some(&record.interface.private_key),
            ..Self::default()
        };
        for (key, ips) in &desired {
            match running.get(key) {
                None => diff.added.push(*key),
                Some(live_ips) if live_ips != ips => diff.modified.push(*key),
                Some(_) => {}
            }
        }
        diff.removed = running
            .keys()
            .filter(|key| !desired.contains_key(key))
            .copied()
            .collect();
        diff
    }

    /// Returns `true` when the live interface already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.interface_changed
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
    }
}

/// Result of [`Reconciler::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// File written; the interface is not running.
    Written,
    /// File written; the running interface already matched.
    Unchanged,
    /// File written and the running interface reconfigured.
    Synced {
        /// What was out of date.
        diff: ConfigDiff,
    },
}

/// Renders configuration files and drives the tunnel subsystem.
pub struct Reconciler<T> {
    tunnel: T,
    config_dir: PathBuf,
}

impl<T: TunnelSubsystem> Reconciler<T> {
    /// Writes configuration files under `config_dir`.
    pub fn new(tunnel: T, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            tunnel,
            config_dir: config_dir.into(),
        }
    }

    /// The tunnel subsystem.
    pub fn tunnel(&self) -> &T {
        &self.tunnel
    }

    /// Path of the rendered file of `name`.
    #[must_use]
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}.conf"))
    }

    /// State of `name` given the currently active interfaces.
    #[must_use]
    pub fn classify(&self, name: &str, active: &[String]) -> LinkState {
        if active.iter().any(|n| n == name) {
            LinkState::Up
        } else if self.config_path(name).is_file() {
            LinkState::Down
        } else {
            LinkState::Absent
        }
    }

    /// Current state of `name`.
    ///
    /// # Errors
    ///
    /// Returns the subsystem error if the active interfaces cannot be listed.
    pub async fn state(&self, name: &str) -> Result<LinkState> {
        let active = self.tunnel.active_interfaces().await?;
        Ok(self.classify(name, &active))
    }

    fn write_config(&self, record: &InterfaceRecord) -> Result<PathBuf> {
        let path = self.config_path(record.name());
        write_atomic(&path, render_interface(record).as_bytes())?;
        debug!(interface = %record.name(), path = %path.display(), "configuration written");
        Ok(path)
    }

    /// Re-renders the file and, if the interface is up, reconfigures it.
    ///
    /// A running interface is only touched when it differs from the record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written, or the subsystem error.
    pub async fn apply(&self, record: &InterfaceRecord) -> Result<ApplyOutcome> {
        let name = record.name();
        self.write_config(record)?;

        if self.state(name).await? != LinkState::Up {
            return Ok(ApplyOutcome::Written);
        }

        let live = self.tunnel.dump(name).await?;
        let diff = ConfigDiff::compute(record, &live);
        if diff.is_empty() {
            debug!(interface = %name, "live configuration up to date");
            return Ok(ApplyOutcome::Unchanged);
        }

        debug!(
            interface = %name,
            interface_changed = diff.interface_changed,
            added = diff.added.len(),
            removed = diff.removed.len(),
            modified = diff.modified.len(),
            "syncing live configuration"
        );
        self.tunnel.sync(name, &render_stripped(record)).await?;
        info!(interface = %name, "live configuration updated");
        Ok(ApplyOutcome::Synced { diff })
    }

    /// Brings the interface up, rendering its file first if missing.
    ///
    /// Returns `false` if it was already up.
    ///
    /// # Errors
    ///
    /// Returns `Io` or the subsystem error.
    pub async fn start(&self, record: &InterfaceRecord) -> Result<bool> {
        let name = record.name();
        let path = match self.state(name).await? {
            LinkState::Up => return Ok(false),
            LinkState::Down => self.config_path(name),
            LinkState::Absent => self.write_config(record)?,
        };
        self.tunnel.up(name, &path).await?;
        info!(interface = %name, "interface started");
        Ok(true)
    }

    /// Takes the interface down. Returns `false` if it was not up.
    ///
    /// # Errors
    ///
    /// Returns the subsystem error.
    pub async fn stop(&self, name: &str) -> Result<bool> {
        if self.state(name).await? != LinkState::Up {
            return Ok(false);
        }
        self.tunnel.down(name, &self.config_path(name)).await?;
        info!(interface = %name, "interface stopped");
        Ok(true)
    }

    /// Stops then starts the interface.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn restart(&self, record: &InterfaceRecord) -> Result<()> {
        self.stop(record.name()).await?;
        self.start(record).await?;
        Ok(())
    }

    /// Deletes the rendered file of `name`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be removed.
    pub fn remove_config(&self, name: &str) -> Result<bool> {
        remove_file(&self.config_path(name))
    }

    /// Directory rendered files are written to.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}
