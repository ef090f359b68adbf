//! Reset-tolerant traffic accounting.
//!
//! The kernel's per-peer byte counters start from zero whenever an
//! interface comes up. [`PeerStats::observe`] folds successive samples into
//! totals that keep growing across those resets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::keys::PublicKey;
use crate::tunnel::{LiveInterface, NONE_SENTINEL, PeerSample};
use crate::types::{InterfaceRecord, PeerStatus};

/// Which rule the latest sample was folded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accounting {
    /// Counters moved forward; the delta was added.
    #[default]
    Normal,
    /// A counter went backwards; the sample itself was added.
    ResetObserved,
}

/// Accumulated stats of one peer, keyed by its public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    /// Allowed IPs at the last sample.
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    /// Last known endpoint, `(none)` until one is seen.
    pub endpoint: String,
    /// Keepalive interval at the last sample.
    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
    /// Raw received counter of the last sample.
    pub transfer_rx: u64,
    /// Raw sent counter of the last sample.
    pub transfer_tx: u64,
    /// Total bytes received.
    pub total_rx: u64,
    /// Total bytes sent.
    pub total_tx: u64,
    /// Epoch seconds of the last known handshake, 0 for never.
    pub latest_handshake: u64,
    /// Rule applied to the last sample.
    #[serde(default)]
    pub accounting: Accounting,
}

impl Default for PeerStats {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            endpoint: NONE_SENTINEL.to_string(),
            persistent_keepalive: None,
            transfer_rx: 0,
            transfer_tx: 0,
            total_rx: 0,
            total_tx: 0,
            latest_handshake: 0,
            accounting: Accounting::Normal,
        }
    }
}

impl PeerStats {
    /// Folds one sample into the totals and returns the rule that was applied.
    pub fn observe(&mut self, sample: &PeerSample) -> Accounting {
        let reset = sample.rx_bytes < self.transfer_rx || sample.tx_bytes < self.transfer_tx;
        if reset {
            self.total_rx = self.total_rx.saturating_add(sample.rx_bytes);
            self.total_tx = self.total_tx.saturating_add(sample.tx_bytes);
            self.accounting = Accounting::ResetObserved;
        } else {
            self.total_rx = self
                .total_rx
                .saturating_add(sample.rx_bytes - self.transfer_rx);
            self.total_tx = self
                .total_tx
                .saturating_add(sample.tx_bytes - self.transfer_tx);
            self.accounting = Accounting::Normal;
        }
        self.transfer_rx = sample.rx_bytes;
        self.transfer_tx = sample.tx_bytes;

        if sample.latest_handshake != 0 {
            self.latest_handshake = sample.latest_handshake;
        }
        if sample.endpoint != NONE_SENTINEL {
            self.endpoint.clone_from(&sample.endpoint);
        }
        self.allowed_ips.clone_from(&sample.allowed_ips);
        self.persistent_keepalive = sample.persistent_keepalive;
        self.accounting
    }
}

/// Interface-level header of a stats record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    /// Interface name.
    pub name: String,
    /// Interface public key at the last sample.
    pub public_key: Option<PublicKey>,
    /// Listen port at the last sample.
    pub listen_port: u16,
    /// First write.
    pub create_at: DateTime<Utc>,
    /// Latest write.
    pub update_at: DateTime<Utc>,
}

/// The stats record of one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Header.
    pub interface: InterfaceStats,
    /// Per-peer stats by public key.
    #[serde(default)]
    pub peers: BTreeMap<PublicKey, PeerStats>,
}

/// What one sampling pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSummary {
    /// Interface name.
    pub interface: String,
    /// Peers present in the dump.
    pub peers_sampled: usize,
    /// Peers seen for the first time.
    pub peers_new: usize,
    /// Peers whose counters had gone backwards.
    pub resets_observed: usize,
}

impl StatsRecord {
    /// An empty record created at `now`.
    #[must_use]
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            interface: InterfaceStats {
                name: name.into(),
                public_key: None,
                listen_port: 0,
                create_at: now,
                update_at: now,
            },
            peers: BTreeMap::new(),
        }
    }

    /// Folds a live dump into the record.
    ///
    /// Peers missing from the dump keep their history.
    pub fn fold(&mut self, live: &LiveInterface, now: DateTime<Utc>) -> SampleSummary {
        let mut summary = SampleSummary {
            interface: self.interface.name.clone(),
            peers_sampled: live.peers.len(),
            peers_new: 0,
            resets_observed: 0,
        };

        if live.public_key.is_some() {
            self.interface.public_key = live.public_key;
        }
        self.interface.listen_port = live.listen_port;

        for sample in &live.peers {
            let stats = self.peers.entry(sample.public_key).or_insert_with(|| {
                summary.peers_new += 1;
                PeerStats::default()
            });
            if stats.observe(sample) == Accounting::ResetObserved {
                summary.resets_observed += 1;
            }
        }
        self.interface.update_at = now;
        summary
    }
}

/// A configured peer joined with its stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerUsage {
    /// Peer name from the configuration record.
    pub name: String,
    /// Public key both records share.
    pub public_key: PublicKey,
    /// Enabled or disabled.
    pub status: PeerStatus,
    /// `None` until the peer has been sampled.
    pub stats: Option<PeerStats>,
}

/// Stats whose public key matches no configured peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedStats {
    /// Public key the stats were recorded under.
    pub public_key: PublicKey,
    /// The stats.
    pub stats: PeerStats,
}

/// Stats of one interface resolved against its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    /// Interface name.
    pub interface: String,
    /// First stats write, if any.
    pub create_at: Option<DateTime<Utc>>,
    /// Last stats write, if any.
    pub update_at: Option<DateTime<Utc>>,
    /// Configured peers in name order.
    pub peers: Vec<PeerUsage>,
    /// Stats for peers that are no longer configured.
    pub orphaned: Vec<OrphanedStats>,
}

impl StatsReport {
    /// Joins stats to configured peers by public key.
    #[must_use]
    pub fn join(record: &InterfaceRecord, stats: Option<&StatsRecord>) -> Self {
        let peers = record
            .peers
            .values()
            .map(|peer| PeerUsage {
                name: peer.name.clone(),
                public_key: peer.public_key,
                status: peer.status,
                stats: stats.and_then(|s| s.peers.get(&peer.public_key)).cloned(),
            })
            .collect();

        let orphaned: Vec<OrphanedStats> = stats
            .map(|s| {
                s.peers
                    .iter()
                    .filter(|(key, _)| record.peer_by_public_key(key).is_none())
                    .map(|(key, stats)| OrphanedStats {
                        public_key: *key,
                        stats: stats.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        for orphan in &orphaned {
            warn!(
                interface = %record.name(),
                public_key = %orphan.public_key.short(),
                "stats entry has no configured peer"
            );
        }

        Self {
            interface: record.name().to_string(),
            create_at: stats.map(|s| s.interface.create_at),
            update_at: stats.map(|s| s.interface.update_at),
            peers,
            orphaned,
        }
    }
}
