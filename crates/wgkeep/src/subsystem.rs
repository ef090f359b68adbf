//! The tunnel subsystem seam.
//!
//! [`TunnelSubsystem`] is everything wgkeep asks of the host: key
//! generation, bringing interfaces up and down, hot-syncing a running
//! interface, and reading its live state. [`FakeTunnel`] implements it in
//! memory for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Result, WgkeepError};
use crate::keys::{PrivateKey, PublicKey};
use crate::tunnel::{LiveInterface, PeerSample, WireConfig, parse_wire_config};

/// Operations against the host tunnel subsystem.
#[allow(async_fn_in_trait)]
pub trait TunnelSubsystem {
    /// Generates a new private key.
    async fn generate_private_key(&self) -> Result<PrivateKey>;

    /// Derives the public key of `private`.
    async fn public_key(&self, private: &PrivateKey) -> Result<PublicKey>;

    /// Names of the interfaces currently up.
    async fn active_interfaces(&self) -> Result<Vec<String>>;

    /// Brings an interface up from its configuration file.
    async fn up(&self, name: &str, config_path: &Path) -> Result<()>;

    /// Takes an interface down.
    async fn down(&self, name: &str, config_path: &Path) -> Result<()>;

    /// Replaces the live peer set of a running interface without
    /// disturbing peers whose configuration is unchanged.
    async fn sync(&self, name: &str, stripped_config: &str) -> Result<()>;

    /// Reads the live state of a running interface.
    async fn dump(&self, name: &str) -> Result<LiveInterface>;

    /// Returns `true` if the interface is currently up.
    async fn is_up(&self, name: &str) -> Result<bool> {
        Ok(self.active_interfaces().await?.iter().any(|n| n == name))
    }
}

/// Operations recorded by [`FakeTunnel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelOp {
    /// `generate_private_key`
    GenerateKey,
    /// `public_key`
    PublicKey,
    /// `active_interfaces`
    ActiveInterfaces,
    /// `up`
    Up,
    /// `down`
    Down,
    /// `sync`
    Sync,
    /// `dump`
    Dump,
}

#[derive(Debug, Clone)]
struct FakeInterface {
    private_key: PrivateKey,
    listen_port: u16,
    peers: BTreeMap<PublicKey, PeerSample>,
}

impl FakeInterface {
    fn from_config(config: WireConfig) -> Self {
        let peers = config
            .peers
            .into_iter()
            .map(|(key, ips)| (key, PeerSample::fresh(key, ips)))
            .collect();
        Self {
            private_key: config.private_key,
            listen_port: config.listen_port.unwrap_or(0),
            peers,
        }
    }

    fn to_live(&self) -> LiveInterface {
        LiveInterface {
            private_key: Some(self.private_key.clone()),
            public_key: Some(self.private_key.public_key()),
            listen_port: self.listen_port,
            peers: self.peers.values().cloned().collect(),
        }
    }

    fn peer_mut(&mut self, interface: &str, key: &PublicKey) -> Result<&mut PeerSample> {
        self.peers
            .get_mut(key)
            .ok_or_else(|| WgkeepError::peer_not_found(interface, key.to_base64()))
    }
}

#[derive(Debug, Default)]
struct FakeState {
    running: HashMap<String, FakeInterface>,
    calls: Vec<(TunnelOp, Option<String>)>,
    failing: HashSet<TunnelOp>,
}

impl FakeState {
    fn record(&mut self, op: TunnelOp, name: Option<&str>) -> Result<()> {
        self.calls.push((op, name.map(str::to_string)));
        if self.failing.contains(&op) {
            return Err(WgkeepError::command_failed(
                format!("fake {op:?} {}", name.unwrap_or_default()),
                1,
                "injected failure",
            ));
        }
        Ok(())
    }

    fn running_mut(&mut self, name: &str) -> Result<&mut FakeInterface> {
        self.running
            .get_mut(name)
            .ok_or_else(|| WgkeepError::InterfaceNotRunning(name.to_string()))
    }
}

/// An in-memory tunnel subsystem for testing.
///
/// `up` reads the configuration file from disk, so the reconciler's
/// rendered output is what ends up "running". Counters and handshakes of
/// peers that survive a `sync` are preserved; a `down`/`up` cycle resets
/// them the way a real interface restart does.
#[derive(Clone, Default)]
pub struct FakeTunnel {
    state: Arc<RwLock<FakeState>>,
}

impl FakeTunnel {
    /// Creates a fake with no running interfaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `op` fail with `CommandFailed`.
    pub async fn fail_on(&self, op: TunnelOp) {
        self.state.write().await.failing.insert(op);
    }

    /// Clears injected failures.
    pub async fn clear_failures(&self) {
        self.state.write().await.failing.clear();
    }

    /// How many times `op` has been invoked, optionally for one interface.
    pub async fn call_count(&self, op: TunnelOp, name: Option<&str>) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|(o, n)| *o == op && (name.is_none() || n.as_deref() == name))
            .count()
    }

    /// Adds traffic to a peer's counters.
    pub async fn simulate_traffic(
        &self,
        interface: &str,
        key: &PublicKey,
        rx_bytes: u64,
        tx_bytes: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let peer = state.running_mut(interface)?.peer_mut(interface, key)?;
        peer.rx_bytes = peer.rx_bytes.saturating_add(rx_bytes);
        peer.tx_bytes = peer.tx_bytes.saturating_add(tx_bytes);
        Ok(())
    }

    /// Records a handshake from `endpoint` at `timestamp`.
    pub async fn simulate_handshake(
        &self,
        interface: &str,
        key: &PublicKey,
        endpoint: &str,
        timestamp: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let peer = state.running_mut(interface)?.peer_mut(interface, key)?;
        peer.latest_handshake = timestamp;
        peer.endpoint = endpoint.to_string();
        Ok(())
    }

    /// Zeroes every peer counter and handshake, as a kernel restart would.
    pub async fn simulate_counter_reset(&self, interface: &str) -> Result<()> {
        let mut state = self.state.write().await;
        for peer in state.running_mut(interface)?.peers.values_mut() {
            *peer = PeerSample::fresh(peer.public_key, peer.allowed_ips.clone());
        }
        Ok(())
    }

    /// Brings an interface up directly from configuration text.
    pub async fn start_from_config(&self, name: &str, config: &str) -> Result<()> {
        let config = parse_wire_config(config)?;
        self.state
            .write()
            .await
            .running
            .insert(name.to_string(), FakeInterface::from_config(config));
        Ok(())
    }
}

impl TunnelSubsystem for FakeTunnel {
    async fn generate_private_key(&self) -> Result<PrivateKey> {
        self.state.write().await.record(TunnelOp::GenerateKey, None)?;
        Ok(PrivateKey::generate())
    }

    async fn public_key(&self, private: &PrivateKey) -> Result<PublicKey> {
        self.state.write().await.record(TunnelOp::PublicKey, None)?;
        Ok(private.public_key())
    }

    async fn active_interfaces(&self) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        state.record(TunnelOp::ActiveInterfaces, None)?;
        let mut names: Vec<String> = state.running.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn up(&self, name: &str, config_path: &Path) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(TunnelOp::Up, Some(name))?;
        if state.running.contains_key(name) {
            return Err(WgkeepError::command_failed(
                format!("fake up {name}"),
                1,
                format!("{name} already exists"),
            ));
        }
        let text = std::fs::read_to_string(config_path)
            .map_err(|e| WgkeepError::io(config_path, e))?;
        let config = parse_wire_config(&text)?;
        state
            .running
            .insert(name.to_string(), FakeInterface::from_config(config));
        Ok(())
    }

    async fn down(&self, name: &str, _config_path: &Path) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(TunnelOp::Down, Some(name))?;
        state
            .running
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WgkeepError::InterfaceNotRunning(name.to_string()))
    }

    async fn sync(&self, name: &str, stripped_config: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(TunnelOp::Sync, Some(name))?;
        let config = parse_wire_config(stripped_config)?;
        let iface = state.running_mut(name)?;

        let mut peers = BTreeMap::new();
        for (key, ips) in config.peers {
            let sample = match iface.peers.remove(&key) {
                Some(mut existing) => {
                    existing.allowed_ips = ips;
                    existing
                }
                None => PeerSample::fresh(key, ips),
            };
            peers.insert(key, sample);
        }
        iface.peers = peers;
        iface.private_key = config.private_key;
        if let Some(port) = config.listen_port {
            iface.listen_port = port;
        }
        Ok(())
    }

    async fn dump(&self, name: &str) -> Result<LiveInterface> {
        let mut state = self.state.write().await;
        state.record(TunnelOp::Dump, Some(name))?;
        Ok(state.running_mut(name)?.to_live())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> PrivateKey {
        PrivateKey::from_bytes_array([seed; 32])
    }

    fn config(peers: &[(u8, &str)]) -> String {
        let mut text = format!(
            "[Interface]\nPrivateKey = {}\nListenPort = 51820\n",
            key(9).to_base64()
        );
        for (seed, ip) in peers {
            text.push_str(&format!(
                "\n[Peer]\nPublicKey = {}\nAllowedIPs = {ip}\n",
                key(*seed).public_key().to_base64()
            ));
        }
        text
    }

    #[tokio::test]
    async fn up_reads_file_and_dump_reports_peers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wg0.conf");
        std::fs::write(&path, config(&[(1, "10.0.0.2/32")])).expect("write");

        let fake = FakeTunnel::new();
        fake.up("wg0", &path).await.expect("up");
        assert!(fake.is_up("wg0").await.expect("active"));

        let live = fake.dump("wg0").await.expect("dump");
        assert_eq!(live.listen_port, 51820);
        assert_eq!(live.public_key, Some(key(9).public_key()));
        assert_eq!(live.peers.len(), 1);
        assert_eq!(fake.call_count(TunnelOp::Up, Some("wg0")).await, 1);
    }

    #[tokio::test]
    async fn sync_preserves_unchanged_peers() {
        let fake = FakeTunnel::new();
        fake.start_from_config("wg0", &config(&[(1, "10.0.0.2/32"), (2, "10.0.0.3/32")]))
            .await
            .expect("start");
        fake.simulate_traffic("wg0", &key(1).public_key(), 100, 200)
            .await
            .expect("traffic");
        fake.simulate_handshake("wg0", &key(1).public_key(), "198.51.100.1:5000", 1_700_000_000)
            .await
            .expect("handshake");

        fake.sync("wg0", &config(&[(1, "10.0.0.2/32"), (3, "10.0.0.4/32")]))
            .await
            .expect("sync");

        let live = fake.dump("wg0").await.expect("dump");
        let kept = live.peer(&key(1).public_key()).expect("peer 1 kept");
        assert_eq!((kept.rx_bytes, kept.tx_bytes), (100, 200));
        assert_eq!(kept.latest_handshake, 1_700_000_000);
        assert!(live.peer(&key(2).public_key()).is_none());
        assert!(live.peer(&key(3).public_key()).is_some());
    }

    #[tokio::test]
    async fn down_then_up_resets_counters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wg0.conf");
        std::fs::write(&path, config(&[(1, "10.0.0.2/32")])).expect("write");

        let fake = FakeTunnel::new();
        fake.up("wg0", &path).await.expect("up");
        fake.simulate_traffic("wg0", &key(1).public_key(), 10, 10)
            .await
            .expect("traffic");
        fake.down("wg0", &path).await.expect("down");
        assert!(!fake.is_up("wg0").await.expect("active"));
        fake.up("wg0", &path).await.expect("up again");

        let live = fake.dump("wg0").await.expect("dump");
        assert_eq!(live.peers[0].rx_bytes, 0);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_tool_errors() {
        let fake = FakeTunnel::new();
        fake.fail_on(TunnelOp::Down).await;
        let err = fake
            .down("wg0", Path::new("/nonexistent"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, WgkeepError::CommandFailed { .. }));

        fake.clear_failures().await;
        assert!(matches!(
            fake.down("wg0", Path::new("/nonexistent")).await,
            Err(WgkeepError::InterfaceNotRunning(_))
        ));
    }

    #[tokio::test]
    async fn dump_of_stopped_interface_fails() {
        let fake = FakeTunnel::new();
        assert!(matches!(
            fake.dump("wg9").await,
            Err(WgkeepError::InterfaceNotRunning(_))
        ));
    }
}
