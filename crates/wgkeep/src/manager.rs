//! `WgManager`: the operations the command line exposes.
//!
//! Every operation validates its input first, then takes the interface's
//! record lock for the whole load, mutate, save and apply sequence.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use chrono::Utc;
use futures::future::join_all;
use ipnet::{IpNet, Ipv4Net};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::AddressAllocator;
use crate::error::{Result, WgkeepError};
use crate::keys::PublicKey;
use crate::reconcile::{ApplyOutcome, LinkState, Reconciler};
use crate::render::render_peer_export;
use crate::request::{AddPeer, CreateInterface, UpdateInterface};
use crate::stats::{SampleSummary, StatsRecord, StatsReport};
use crate::store::{InterfaceLock, RecordStore};
use crate::subsystem::TunnelSubsystem;
use crate::types::{
    DEFAULT_LISTEN_PORT, InterfaceRecord, InterfaceSection, PeerRecord, PeerStatus,
    validate_peer_name,
};
use crate::wg::WgTools;

/// Default directory for interface and stats records.
pub const DEFAULT_STATE_DIR: &str = "/etc/wgkeep";

/// Default directory for rendered configuration files.
pub const DEFAULT_WIREGUARD_DIR: &str = "/etc/wireguard";

/// Paths and defaults the manager works with.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Where records are stored.
    pub state_dir: PathBuf,
    /// Where `<name>.conf` files are rendered.
    pub wireguard_dir: PathBuf,
    /// `wg` binary.
    pub wg_path: String,
    /// `wg-quick` binary.
    pub wg_quick_path: String,
    /// Listen port for interfaces created without one.
    pub default_listen_port: u16,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            wireguard_dir: PathBuf::from(DEFAULT_WIREGUARD_DIR),
            wg_path: "wg".to_string(),
            wg_quick_path: "wg-quick".to_string(),
            default_listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

impl ManagerConfig {
    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Sets the rendered configuration directory.
    #[must_use]
    pub fn with_wireguard_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wireguard_dir = dir.into();
        self
    }

    /// Sets the `wg` binary.
    #[must_use]
    pub fn with_wg_path(mut self, path: impl Into<String>) -> Self {
        self.wg_path = path.into();
        self
    }

    /// Sets the `wg-quick` binary.
    #[must_use]
    pub fn with_wg_quick_path(mut self, path: impl Into<String>) -> Self {
        self.wg_quick_path = path.into();
        self
    }

    /// Sets the default listen port.
    #[must_use]
    pub fn with_default_listen_port(mut self, port: u16) -> Self {
        self.default_listen_port = port;
        self
    }

    /// The `wg`/`wg-quick` adapter these settings describe.
    #[must_use]
    pub fn tools(&self) -> WgTools {
        WgTools::new()
            .with_wg_path(&self.wg_path)
            .with_wg_quick_path(&self.wg_quick_path)
    }
}

/// One row of the interface listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSummary {
    /// Interface name.
    pub name: String,
    /// Interface address.
    pub address: Ipv4Net,
    /// Listen port.
    pub listen_port: u16,
    /// Interface public key.
    pub public_key: PublicKey,
    /// All peers.
    pub peers: usize,
    /// Enabled peers.
    pub enabled_peers: usize,
    /// Lifecycle state.
    pub state: LinkState,
}

impl InterfaceSummary {
    fn new(record: &InterfaceRecord, state: LinkState) -> Self {
        Self {
            name: record.name().to_string(),
            address: record.interface.address,
            listen_port: record.interface.listen_port,
            public_key: record.interface.public_key,
            peers: record.peers.len(),
            enabled_peers: record.enabled_peers().count(),
            state,
        }
    }
}

/// An interface record together with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDetails {
    /// Lifecycle state.
    pub state: LinkState,
    /// The stored record.
    pub record: InterfaceRecord,
}

/// Outcome of sampling one interface in a batch.
#[derive(Debug)]
pub struct StatsOutcome {
    /// Interface name.
    pub interface: String,
    /// What sampling did, or why it failed.
    pub result: Result<SampleSummary>,
}

/// Outcome of sampling every running interface.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per running interface.
    pub outcomes: Vec<StatsOutcome>,
    /// Recorded interfaces that were not running.
    pub skipped: Vec<String>,
}

impl BatchReport {
    /// Number of failed interfaces.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Returns `true` if every sampled interface succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }
}

/// Interface, peer and stats operations over a record store and a tunnel subsystem.
pub struct WgManager<T> {
    store: RecordStore,
    reconciler: Reconciler<T>,
    default_listen_port: u16,
}

impl WgManager<WgTools> {
    /// A manager driving the host's `wg` tools.
    #[must_use]
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(config, config.tools())
    }
}

impl<T: TunnelSubsystem> WgManager<T> {
    /// A manager using `tunnel` as its subsystem.
    pub fn new(config: &ManagerConfig, tunnel: T) -> Self {
        Self {
            store: RecordStore::new(&config.state_dir),
            reconciler: Reconciler::new(tunnel, &config.wireguard_dir),
            default_listen_port: config.default_listen_port,
        }
    }

    /// The record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// The reconciler.
    pub fn reconciler(&self) -> &Reconciler<T> {
        &self.reconciler
    }

    fn tunnel(&self) -> &T {
        self.reconciler.tunnel()
    }

    async fn lock_existing(&self, name: &str) -> Result<InterfaceLock<'_>> {
        let lock = self.store.lock(name).await?;
        if !lock.exists() {
            return Err(WgkeepError::InterfaceNotFound(name.to_string()));
        }
        Ok(lock)
    }

    // ---- interfaces ----

    /// Creates an interface and renders its configuration file.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `InterfaceExists`, a tool error from key
    /// generation, or `Io`. If rendering or syncing fails the record is
    /// removed again.
    pub async fn create(&self, request: CreateInterface) -> Result<InterfaceRecord> {
        let request = request.validate(self.default_listen_port)?;
        let lock = self.store.lock(&request.name).await?;
        if lock.exists() {
            return Err(WgkeepError::InterfaceExists(request.name));
        }

        let private_key = match request.private_key {
            Some(key) => key,
            None => self.tunnel().generate_private_key().await?,
        };
        let public_key = self.tunnel().public_key(&private_key).await?;

        let record = InterfaceRecord {
            global: request.global,
            interface: InterfaceSection {
                name: request.name,
                private_key,
                public_key,
                listen_port: request.listen_port,
                address: request.address,
                hooks: request.hooks,
            },
            peers: BTreeMap::new(),
        };
        lock.create(&record)?;
        if let Err(e) = self.reconciler.apply(&record).await {
            self.discard_created(&lock);
            return Err(e);
        }
        info!(interface = %record.name(), address = %record.interface.address, "interface created");
        Ok(record)
    }

    /// Removes what a failed `create` left behind, so it can be retried.
    fn discard_created(&self, lock: &InterfaceLock<'_>) {
        let name = lock.name();
        if let Err(e) = self.reconciler.remove_config(name) {
            warn!(interface = %name, error = %e, "failed to remove rendered config");
        }
        if let Err(e) = lock.remove() {
            warn!(interface = %name, error = %e, "failed to remove interface record");
        }
    }

    /// Changes listen port, DNS, endpoint or hooks of an interface.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `InterfaceNotFound`, `Io`, or a tool
    /// error while applying.
    pub async fn update(&self, request: UpdateInterface) -> Result<InterfaceRecord> {
        let mut request = request.validate()?;
        let lock = self.lock_existing(&request.name).await?;
        let (record, ()) = lock.mutate(|record| {
            if let Some(port) = request.listen_port {
                record.interface.listen_port = port;
            }
            if let Some(dns) = request.dns.take() {
                record.global.dns = dns;
            }
            if let Some(endpoint) = request.endpoint.take() {
                record.global.endpoint = endpoint;
            }
            request.apply_hooks(&mut record.interface.hooks);
            Ok(())
        })?;
        self.reconciler.apply(&record).await?;
        info!(interface = %record.name(), "interface updated");
        Ok(record)
    }

    /// Stops the interface and removes its file, stats and record, in that order.
    ///
    /// If stopping fails nothing is removed.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, the tool error from stopping, or `Io`.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lock = self.lock_existing(name).await?;
        self.reconciler.stop(name).await?;
        self.reconciler.remove_config(name)?;
        lock.remove_stats()?;
        lock.remove()?;
        info!(interface = %name, "interface deleted");
        Ok(())
    }

    /// Summaries of every stored interface, by name.
    ///
    /// # Errors
    ///
    /// Returns `Io`, `Corrupt`, or the tool error from listing active interfaces.
    pub async fn list(&self) -> Result<Vec<InterfaceSummary>> {
        let active = self.tunnel().active_interfaces().await?;
        let mut summaries = Vec::new();
        for name in self.store.list()? {
            let record = self.store.load(&name).await?;
            summaries.push(InterfaceSummary::new(
                &record,
                self.reconciler.classify(&name, &active),
            ));
        }
        Ok(summaries)
    }

    /// The record of one interface and its state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName`, `InterfaceNotFound`, `Corrupt`, or a tool error.
    pub async fn show(&self, name: &str) -> Result<InterfaceDetails> {
        let lock = self.store.lock(name).await?;
        let record = lock.load()?;
        let state = self.reconciler.state(name).await?;
        Ok(InterfaceDetails { state, record })
    }

    // ---- lifecycle ----

    /// Brings an interface up. Returns `false` if it already was.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `Io`, or the tool error.
    pub async fn start(&self, name: &str) -> Result<bool> {
        let lock = self.store.lock(name).await?;
        let record = lock.load()?;
        self.reconciler.start(&record).await
    }

    /// Takes an interface down. Returns `false` if it was not up.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound` or the tool error.
    pub async fn stop(&self, name: &str) -> Result<bool> {
        let _lock = self.lock_existing(name).await?;
        self.reconciler.stop(name).await
    }

    /// Takes an interface down and brings it back up.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `Io`, or the tool error.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let lock = self.store.lock(name).await?;
        let record = lock.load()?;
        self.reconciler.restart(&record).await
    }

    /// Re-renders the configuration file and syncs a running interface.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `Io`, or the tool error.
    pub async fn apply(&self, name: &str) -> Result<ApplyOutcome> {
        let lock = self.store.lock(name).await?;
        let record = lock.load()?;
        self.reconciler.apply(&record).await
    }

    // ---- peers ----

    /// Adds a peer, generating its key pair and allocating its address
    /// unless the request supplies them.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `InterfaceNotFound`, `PeerExists`,
    /// `PublicKeyInUse`, `AddressInUse`, `NoAvailableAddress`, a tool error
    /// from key generation, or `Io`.
    pub async fn add_peer(&self, request: AddPeer) -> Result<PeerRecord> {
        let request = request.validate()?;
        let lock = self.store.lock(&request.interface).await?;
        if lock.load()?.peers.contains_key(&request.name) {
            return Err(WgkeepError::peer_exists(&request.interface, &request.name));
        }

        let (private_key, public_key) = match request.public_key {
            Some(public_key) => (None, public_key),
            None => {
                let private_key = self.tunnel().generate_private_key().await?;
                let public_key = self.tunnel().public_key(&private_key).await?;
                (Some(private_key), public_key)
            }
        };

        let (record, peer) = lock.mutate(|record| {
            if let Some(holder) = record.peer_by_public_key(&public_key) {
                return Err(WgkeepError::PublicKeyInUse {
                    interface: record.name().to_string(),
                    peer: holder.name.clone(),
                });
            }
            let allowed_ips = match request.allowed_ips {
                Some(ips) => {
                    check_primary_free(record, &ips)?;
                    ips
                }
                None => vec![IpNet::V4(AddressAllocator::for_record(record).next_free()?)],
            };
            let peer = PeerRecord {
                name: request.name.clone(),
                private_key,
                public_key,
                allowed_ips,
                status: PeerStatus::Enabled,
            };
            record.peers.insert(peer.name.clone(), peer.clone());
            Ok(peer)
        })?;

        self.reconciler.apply(&record).await?;
        info!(
            interface = %record.name(),
            peer = %peer.name,
            allowed_ips = %peer.allowed_ips_string(),
            "peer added"
        );
        Ok(peer)
    }

    /// Removes a peer. Its stats stay until the interface's stats are flushed.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `PeerNotFound`, `Io`, or a tool error.
    pub async fn remove_peer(&self, interface: &str, peer: &str) -> Result<PeerRecord> {
        validate_peer_name(peer)?;
        let lock = self.store.lock(interface).await?;
        let (record, removed) = lock.mutate(|record| {
            record
                .peers
                .remove(peer)
                .ok_or_else(|| WgkeepError::peer_not_found(interface, peer))
        })?;
        self.reconciler.apply(&record).await?;
        info!(interface = %interface, peer = %peer, "peer removed");
        Ok(removed)
    }

    /// Includes a peer in the rendered configuration.
    ///
    /// # Errors
    ///
    /// As [`WgManager::set_peer_status`].
    pub async fn enable_peer(&self, interface: &str, peer: &str) -> Result<PeerRecord> {
        self.set_peer_status(interface, peer, PeerStatus::Enabled)
            .await
    }

    /// Keeps a peer in the record but out of the rendered configuration.
    ///
    /// # Errors
    ///
    /// As [`WgManager::set_peer_status`].
    pub async fn disable_peer(&self, interface: &str, peer: &str) -> Result<PeerRecord> {
        self.set_peer_status(interface, peer, PeerStatus::Disabled)
            .await
    }

    /// Sets a peer's status and applies the result.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `PeerNotFound`, `Io`, or a tool error.
    pub async fn set_peer_status(
        &self,
        interface: &str,
        peer: &str,
        status: PeerStatus,
    ) -> Result<PeerRecord> {
        validate_peer_name(peer)?;
        let lock = self.store.lock(interface).await?;
        let (record, updated) = lock.mutate(|record| {
            let entry = record.peer_mut(peer)?;
            entry.status = status;
            Ok(entry.clone())
        })?;
        self.reconciler.apply(&record).await?;
        info!(interface = %interface, peer = %peer, status = %status, "peer status changed");
        Ok(updated)
    }

    /// The client configuration of a peer.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `PeerNotFound`, or `MissingField` when
    /// the peer has no stored private key or the interface no endpoint.
    pub async fn export_peer(&self, interface: &str, peer: &str) -> Result<String> {
        validate_peer_name(peer)?;
        let record = self.store.load(interface).await?;
        render_peer_export(&record, peer)
    }

    // ---- stats ----

    async fn sample(&self, lock: &InterfaceLock<'_>) -> Result<SampleSummary> {
        let name = lock.name();
        if !self.tunnel().is_up(name).await? {
            return Err(WgkeepError::InterfaceNotRunning(name.to_string()));
        }
        let live = self.tunnel().dump(name).await?;
        let now = Utc::now();
        let mut stats = lock
            .load_stats()?
            .unwrap_or_else(|| StatsRecord::new(name, now));
        let summary = stats.fold(&live, now);
        lock.save_stats(&stats)?;
        debug!(
            interface = %name,
            peers = summary.peers_sampled,
            resets = summary.resets_observed,
            "stats sampled"
        );
        Ok(summary)
    }

    /// Samples a running interface into its stats record.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `InterfaceNotRunning`, a tool or parse
    /// error from the dump, or `Io`.
    pub async fn update_stats(&self, name: &str) -> Result<SampleSummary> {
        let lock = self.lock_existing(name).await?;
        self.sample(&lock).await
    }

    /// Samples every recorded interface that is running, concurrently.
    ///
    /// One interface failing does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the records cannot be listed, or the tool error from
    /// listing active interfaces. Per-interface failures are in the report.
    pub async fn update_all_stats(&self) -> Result<BatchReport> {
        let active = self.tunnel().active_interfaces().await?;
        let (running, skipped): (Vec<String>, Vec<String>) = self
            .store
            .list()?
            .into_iter()
            .partition(|name| active.contains(name));

        let outcomes = join_all(running.into_iter().map(|interface| async move {
            let result = self.update_stats(&interface).await;
            StatsOutcome { interface, result }
        }))
        .await;

        Ok(BatchReport { outcomes, skipped })
    }

    /// Stats of an interface joined with its configured peers.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound`, `Corrupt`, or `Io`.
    pub async fn show_stats(&self, name: &str) -> Result<StatsReport> {
        let lock = self.store.lock(name).await?;
        let record = lock.load()?;
        let stats = lock.load_stats()?;
        Ok(StatsReport::join(&record, stats.as_ref()))
    }

    /// Deletes the stats record of an interface. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound` or `Io`.
    pub async fn flush_stats(&self, name: &str) -> Result<bool> {
        let lock = self.lock_existing(name).await?;
        let removed = lock.remove_stats()?;
        info!(interface = %name, removed, "stats flushed");
        Ok(removed)
    }
}

/// Checks that explicitly requested allowed IPs do not reuse a primary address.
fn check_primary_free(record: &InterfaceRecord, ips: &[IpNet]) -> Result<()> {
    let Some(primary) = ips.first().map(IpNet::addr) else {
        return Err(WgkeepError::MissingField("allowed_ips".to_string()));
    };
    let taken = primary == IpAddr::V4(record.interface.address.addr())
        || record
            .peers
            .values()
            .any(|p| p.primary_address() == Some(primary));
    if taken {
        return Err(WgkeepError::AddressInUse {
            interface: record.name().to_string(),
            address: primary.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystem::{FakeTunnel, TunnelOp};

    fn manager() -> (tempfile::TempDir, FakeTunnel, WgManager<FakeTunnel>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ManagerConfig::default()
            .with_state_dir(dir.path().join("state"))
            .with_wireguard_dir(dir.path().join("wireguard"));
        let fake = FakeTunnel::new();
        let manager = WgManager::new(&config, fake.clone());
        (dir, fake, manager)
    }

    #[tokio::test]
    async fn create_renders_file_and_rejects_duplicates() {
        let (_dir, fake, manager) = manager();
        let record = manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24"))
            .await
            .expect("create");
        assert_eq!(record.interface.listen_port, DEFAULT_LISTEN_PORT);
        assert_eq!(record.interface.public_key, record.interface.private_key.public_key());
        assert!(manager.reconciler().config_path("wg0").is_file());
        assert_eq!(fake.call_count(TunnelOp::GenerateKey, None).await, 1);

        let err = manager
            .create(CreateInterface::new("wg0", "10.1.0.1/24"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, WgkeepError::InterfaceExists(_)));
    }

    #[tokio::test]
    async fn invalid_names_never_touch_the_store() {
        let (dir, _fake, manager) = manager();
        for name in ["wg.0", "wg 0"] {
            let err = manager
                .create(CreateInterface::new(name, "10.0.0.1/24"))
                .await
                .expect_err("invalid");
            assert!(matches!(err, WgkeepError::InvalidName { .. }));
        }
        manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24"))
            .await
            .expect("create");
        let err = manager
            .add_peer(AddPeer::new("wg0", "bad.peer"))
            .await
            .expect_err("invalid");
        assert!(matches!(err, WgkeepError::InvalidName { .. }));
        assert!(!dir.path().join("state").join("interfaces").join("wg.0.json").exists());
    }

    #[tokio::test]
    async fn explicit_address_collisions_conflict() {
        let (_dir, _fake, manager) = manager();
        manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24"))
            .await
            .expect("create");
        manager
            .add_peer(AddPeer::new("wg0", "alice"))
            .await
            .expect("alice");

        for ip in ["10.0.0.2/32", "10.0.0.1/32"] {
            let err = manager
                .add_peer(AddPeer::new("wg0", "bob").with_allowed_ips(ip))
                .await
                .expect_err("collision");
            assert!(matches!(err, WgkeepError::AddressInUse { .. }));
        }

        let err = manager
            .add_peer(AddPeer::new("wg0", "alice"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, WgkeepError::PeerExists { .. }));
    }

    #[tokio::test]
    async fn external_public_key_peer_cannot_export() {
        let (_dir, _fake, manager) = manager();
        manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24").with_endpoint("vpn.example.com"))
            .await
            .expect("create");
        let external = crate::keys::PrivateKey::generate().public_key();
        let peer = manager
            .add_peer(AddPeer::new("wg0", "laptop").with_public_key(external.to_base64()))
            .await
            .expect("add");
        assert!(peer.private_key.is_none());
        assert!(matches!(
            manager.export_peer("wg0", "laptop").await,
            Err(WgkeepError::MissingField(_))
        ));

        let err = manager
            .add_peer(AddPeer::new("wg0", "phone").with_public_key(external.to_base64()))
            .await
            .expect_err("shared key");
        assert!(matches!(err, WgkeepError::PublicKeyInUse { .. }));

        manager
            .add_peer(AddPeer::new("wg0", "desktop"))
            .await
            .expect("generated");
        let text = manager.export_peer("wg0", "desktop").await.expect("export");
        assert!(text.contains("Endpoint = vpn.example.com:51820"));
    }

    #[tokio::test]
    async fn update_changes_settings_and_requires_record() {
        let (_dir, _fake, manager) = manager();
        let err = manager
            .update(UpdateInterface {
                listen_port: Some(51000),
                ..UpdateInterface::new("wg0")
            })
            .await
            .expect_err("missing");
        assert!(matches!(err, WgkeepError::InterfaceNotFound(_)));

        manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24"))
            .await
            .expect("create");
        let record = manager
            .update(UpdateInterface {
                listen_port: Some(51000),
                dns: Some("9.9.9.9".into()),
                post_up: Some("echo up".into()),
                ..UpdateInterface::new("wg0")
            })
            .await
            .expect("update");
        assert_eq!(record.interface.listen_port, 51000);
        assert_eq!(record.global.dns, "9.9.9.9");
        let text = std::fs::read_to_string(manager.reconciler().config_path("wg0")).expect("read");
        assert!(text.contains("ListenPort = 51000"));
        assert!(text.contains("PostUp = echo up"));
    }

    #[tokio::test]
    async fn disable_and_enable_toggle_rendering() {
        let (_dir, _fake, manager) = manager();
        manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24"))
            .await
            .expect("create");
        let peer = manager
            .add_peer(AddPeer::new("wg0", "alice"))
            .await
            .expect("add");
        let path = manager.reconciler().config_path("wg0");
        let key = peer.public_key.to_base64();

        manager.disable_peer("wg0", "alice").await.expect("disable");
        assert!(!std::fs::read_to_string(&path).expect("read").contains(&key));
        manager.enable_peer("wg0", "alice").await.expect("enable");
        assert!(std::fs::read_to_string(&path).expect("read").contains(&key));

        manager.remove_peer("wg0", "alice").await.expect("remove");
        assert!(matches!(
            manager.remove_peer("wg0", "alice").await,
            Err(WgkeepError::PeerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stats_require_running_interface() {
        let (_dir, _fake, manager) = manager();
        manager
            .create(CreateInterface::new("wg0", "10.0.0.1/24"))
            .await
            .expect("create");
        assert!(matches!(
            manager.update_stats("wg0").await,
            Err(WgkeepError::InterfaceNotRunning(_))
        ));
        assert!(matches!(
            manager.update_stats("wg9").await,
            Err(WgkeepError::InterfaceNotFound(_))
        ));
        assert!(!manager.flush_stats("wg0").await.expect("flush"));
    }

    #[tokio::test]
    async fn list_reports_state() {
        let (_dir, _fake, manager) = manager();
        for (name, address) in [("wg0", "10.0.0.1/24"), ("wg1", "10.1.0.1/24")] {
            manager
                .create(CreateInterface::new(name, address))
                .await
                .expect("create");
        }
        manager.start("wg1").await.expect("start");

        let list = manager.list().await.expect("list");
        let states: Vec<_> = list.iter().map(|s| (s.name.as_str(), s.state)).collect();
        assert_eq!(states, vec![("wg0", LinkState::Down), ("wg1", LinkState::Up)]);

        let details = manager.show("wg1").await.expect("show");
        assert_eq!(details.state, LinkState::Up);
    }
}
