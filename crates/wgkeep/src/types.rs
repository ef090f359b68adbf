//! Persisted interface and peer records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WgkeepError};
use crate::keys::{PrivateKey, PublicKey};

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_NAME_LENGTH: usize = 15;

/// Port used when an interface is created without one.
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap_or_else(|_| unreachable!()));

/// Validates a peer name.
///
/// # Errors
///
/// Returns `InvalidName` unless the name is non-empty `[A-Za-z0-9_-]+`.
pub fn validate_peer_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WgkeepError::invalid_name(name, "name is empty"));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(WgkeepError::invalid_name(
            name,
            "only letters, digits, '_' and '-' are allowed",
        ));
    }
    Ok(())
}

/// Validates an interface name: the peer-name charset plus the kernel length limit.
///
/// # Errors
///
/// Returns `InvalidName` if the name is malformed or too long.
pub fn validate_interface_name(name: &str) -> Result<()> {
    validate_peer_name(name)?;
    if name.len() > MAX_INTERFACE_NAME_LENGTH {
        return Err(WgkeepError::invalid_name(
            name,
            format!("longer than {MAX_INTERFACE_NAME_LENGTH} characters"),
        ));
    }
    Ok(())
}

/// Validates a listen port.
///
/// # Errors
///
/// Returns `InvalidPort` for 0 or anything above 65535.
pub fn parse_listen_port(port: u64) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(WgkeepError::InvalidPort(port)),
    }
}

/// Parses a CIDR block. A bare address is taken as a host route.
///
/// # Errors
///
/// Returns `InvalidAddress` when neither form parses.
pub fn parse_cidr(s: &str) -> Result<IpNet> {
    let s = s.trim();
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net);
    }
    s.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|e| WgkeepError::invalid_address(s, e.to_string()))
}

/// Parses a comma-separated list of CIDR blocks.
///
/// # Errors
///
/// Returns `InvalidAddress` for an empty list or any malformed entry.
pub fn parse_cidr_list(s: &str) -> Result<Vec<IpNet>> {
    let nets = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(parse_cidr)
        .collect::<Result<Vec<_>>>()?;
    if nets.is_empty() {
        return Err(WgkeepError::invalid_address(s, "no addresses given"));
    }
    Ok(nets)
}

/// Parses an interface address: an IPv4 host address with its prefix length.
///
/// # Errors
///
/// Returns `InvalidAddress` for IPv6, a missing prefix, or a network/broadcast address.
pub fn parse_interface_address(s: &str) -> Result<Ipv4Net> {
    let net = s
        .trim()
        .parse::<Ipv4Net>()
        .map_err(|e| WgkeepError::invalid_address(s, format!("expected IPv4 CIDR: {e}")))?;
    if net.prefix_len() < 31 && (net.addr() == net.network() || net.addr() == net.broadcast()) {
        return Err(WgkeepError::invalid_address(
            s,
            "address must be a host address, not the network or broadcast address",
        ));
    }
    Ok(net)
}

/// Whether a peer is rendered into the live configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Rendered into the interface configuration.
    #[default]
    Enabled,
    /// Kept in the record but left out of the rendered configuration.
    Disabled,
}

impl PeerStatus {
    /// Returns `true` for [`PeerStatus::Enabled`].
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// Values copied into every peer export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// DNS server(s) handed to clients, empty when unset.
    #[serde(default)]
    pub dns: String,
    /// Public host name or address clients connect to, empty when unset.
    #[serde(default)]
    pub endpoint: String,
}

/// Optional lifecycle hook commands, passed through to `wg-quick` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    /// Run before the interface is brought up.
    #[serde(default)]
    pub pre_up: String,
    /// Run after the interface is brought up.
    #[serde(default)]
    pub post_up: String,
    /// Run before the interface is taken down.
    #[serde(default)]
    pub pre_down: String,
    /// Run after the interface is taken down.
    #[serde(default)]
    pub post_down: String,
}

impl Hooks {
    /// Hooks in wire-format order, paired with their key names.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("PreUp", self.pre_up.as_str()),
            ("PostUp", self.post_up.as_str()),
            ("PreDown", self.pre_down.as_str()),
            ("PostDown", self.post_down.as_str()),
        ]
    }
}

/// The `interface` section of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSection {
    /// Interface name.
    pub name: String,
    /// Interface private key.
    pub private_key: PrivateKey,
    /// Derived from `private_key`, never set directly.
    pub public_key: PublicKey,
    /// UDP listen port.
    pub listen_port: u16,
    /// Host address and prefix; the prefix defines the peer subnet.
    pub address: Ipv4Net,
    /// Lifecycle hooks.
    #[serde(flatten)]
    pub hooks: Hooks,
}

/// A peer entry of an interface record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Peer name, equal to its key in the peers map.
    pub name: String,
    /// Present when the key pair was generated here; needed for export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKey>,
    /// Peer public key. Stats records are keyed by this value.
    pub public_key: PublicKey,
    /// Addresses routed to this peer; the first is its primary address.
    pub allowed_ips: Vec<IpNet>,
    /// Enabled peers are rendered, disabled peers are only stored.
    #[serde(default)]
    pub status: PeerStatus,
}

impl PeerRecord {
    /// The first allowed IP, which the allocator treats as taken.
    #[must_use]
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.allowed_ips.first().map(IpNet::addr)
    }

    /// Allowed IPs joined the way the wire format lists them.
    #[must_use]
    pub fn allowed_ips_string(&self) -> String {
        self.allowed_ips
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The authoritative configuration record for one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    /// Values copied into peer exports.
    #[serde(default)]
    pub global: GlobalSettings,
    /// Interface parameters.
    pub interface: InterfaceSection,
    /// Peers by name.
    #[serde(default)]
    pub peers: BTreeMap<String, PeerRecord>,
}

impl InterfaceRecord {
    /// Interface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.interface.name
    }

    /// Looks up a peer by name.
    ///
    /// # Errors
    ///
    /// Returns `PeerNotFound` if the interface has no such peer.
    pub fn peer(&self, name: &str) -> Result<&PeerRecord> {
        self.peers
            .get(name)
            .ok_or_else(|| WgkeepError::peer_not_found(self.name(), name))
    }

    /// Mutable variant of [`InterfaceRecord::peer`].
    ///
    /// # Errors
    ///
    /// Returns `PeerNotFound` if the interface has no such peer.
    pub fn peer_mut(&mut self, name: &str) -> Result<&mut PeerRecord> {
        let interface = self.interface.name.clone();
        self.peers
            .get_mut(name)
            .ok_or_else(|| WgkeepError::peer_not_found(interface, name))
    }

    /// Finds the peer holding a public key.
    #[must_use]
    pub fn peer_by_public_key(&self, key: &PublicKey) -> Option<&PeerRecord> {
        self.peers.values().find(|p| &p.public_key == key)
    }

    /// Peers that belong in the rendered configuration.
    pub fn enabled_peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values().filter(|p| p.status.is_enabled())
    }

    /// The interface address plus every peer's primary IPv4 address.
    #[must_use]
    pub fn used_addresses(&self) -> HashSet<Ipv4Addr> {
        let mut used = HashSet::with_capacity(self.peers.len() + 1);
        used.insert(self.interface.address.addr());
        for peer in self.peers.values() {
            if let Some(IpAddr::V4(v4)) = peer.primary_address() {
                used.insert(v4);
            }
        }
        used
    }

    /// Replaces the private key and re-derives the public key from it.
    pub fn set_private_key(&mut self, key: PrivateKey) {
        self.interface.public_key = key.public_key();
        self.interface.private_key = key;
    }

    /// Checks every invariant a stored record must satisfy.
    ///
    /// # Errors
    ///
    /// Returns the validation error describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        validate_interface_name(&self.interface.name)?;
        parse_listen_port(u64::from(self.interface.listen_port))?;
        if self.interface.private_key.public_key() != self.interface.public_key {
            return Err(WgkeepError::InvalidKey(format!(
                "public key of interface '{}' does not match its private key",
                self.interface.name
            )));
        }

        let mut primaries: HashSet<IpAddr> = HashSet::new();
        primaries.insert(IpAddr::V4(self.interface.address.addr()));
        let mut keys: HashMap<PublicKey, &str> = HashMap::new();

        for (name, peer) in &self.peers {
            validate_peer_name(name)?;
            if name != &peer.name {
                return Err(WgkeepError::invalid_name(
                    &peer.name,
                    format!("stored under key '{name}'"),
                ));
            }
            if let Some(private) = &peer.private_key {
                if private.public_key() != peer.public_key {
                    return Err(WgkeepError::InvalidKey(format!(
                        "public key of peer '{name}' does not match its private key"
                    )));
                }
            }
            if let Some(holder) = keys.insert(peer.public_key, name) {
                return Err(WgkeepError::PublicKeyInUse {
                    interface: self.interface.name.clone(),
                    peer: holder.to_string(),
                });
            }
            let primary = peer
                .primary_address()
                .ok_or_else(|| WgkeepError::MissingField(format!("allowed_ips of peer '{name}'")))?;
            if !primaries.insert(primary) {
                return Err(WgkeepError::AddressInUse {
                    interface: self.interface.name.clone(),
                    address: primary.to_string(),
                });
            }
        }
        Ok(())
    }
}
