//! Live interface state as reported by the tunnel subsystem.
//!
//! Two text formats are read here: the tab-separated output of
//! `wg show <iface> dump`, and the INI-style configuration this crate
//! renders (read back by the fake subsystem when it "brings up" a file).

use std::collections::BTreeMap;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WgkeepError};
use crate::keys::{PrivateKey, PublicKey};
use crate::types::parse_cidr;

/// Placeholder the tools print for an absent value.
pub const NONE_SENTINEL: &str = "(none)";

/// One peer line of a live dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSample {
    /// Peer public key.
    pub public_key: PublicKey,
    /// Last seen `ip:port`, or [`NONE_SENTINEL`].
    pub endpoint: String,
    /// Allowed IPs currently installed for the peer.
    pub allowed_ips: Vec<IpNet>,
    /// Epoch seconds of the latest handshake, 0 for never.
    pub latest_handshake: u64,
    /// Bytes received since the interface came up.
    pub rx_bytes: u64,
    /// Bytes sent since the interface came up.
    pub tx_bytes: u64,
    /// Keepalive interval in seconds, `None` when off.
    pub persistent_keepalive: Option<u16>,
}

impl PeerSample {
    /// A sample for a peer that has not exchanged any traffic yet.
    #[must_use]
    pub fn fresh(public_key: PublicKey, allowed_ips: Vec<IpNet>) -> Self {
        Self {
            public_key,
            endpoint: NONE_SENTINEL.to_string(),
            allowed_ips,
            latest_handshake: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            persistent_keepalive: None,
        }
    }

    /// Allowed IPs in a canonical (sorted) order for comparisons.
    #[must_use]
    pub fn sorted_allowed_ips(&self) -> Vec<IpNet> {
        let mut ips = self.allowed_ips.clone();
        ips.sort();
        ips
    }
}

/// Snapshot of a running interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterface {
    /// Private key loaded into the interface, if any.
    pub private_key: Option<PrivateKey>,
    /// Public key derived by the subsystem, if a private key is loaded.
    pub public_key: Option<PublicKey>,
    /// UDP port the interface listens on.
    pub listen_port: u16,
    /// Peers in dump order.
    pub peers: Vec<PeerSample>,
}

impl LiveInterface {
    /// Finds a peer by public key.
    #[must_use]
    pub fn peer(&self, key: &PublicKey) -> Option<&PeerSample> {
        self.peers.iter().find(|p| &p.public_key == key)
    }
}

fn parse_u64(field: &str, value: &str, line: usize) -> Result<u64> {
    value
        .parse()
        .map_err(|e| WgkeepError::ParseError(format!("line {line}: bad {field} '{value}': {e}")))
}

fn optional_key<T>(value: &str, parse: impl FnOnce(&str) -> Result<T>) -> Result<Option<T>> {
    if value == NONE_SENTINEL {
        Ok(None)
    } else {
        parse(value).map(Some)
    }
}

fn parse_allowed_ips(value: &str) -> Result<Vec<IpNet>> {
    if value == NONE_SENTINEL {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_cidr)
        .collect()
}

/// Parses the output of `wg show <iface> dump`.
///
/// # Errors
///
/// Returns `ParseError` when a line has the wrong number of fields or a
/// field fails to parse.
pub fn parse_dump(text: &str) -> Result<LiveInterface> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| WgkeepError::ParseError("empty dump".to_string()))?;
    let fields: Vec<&str> = header.split('\t').collect();
    if fields.len() < 3 {
        return Err(WgkeepError::ParseError(format!(
            "line 1: expected interface header, got {} fields",
            fields.len()
        )));
    }
    let private_key = optional_key(fields[0], PrivateKey::from_base64)?;
    let public_key = optional_key(fields[1], PublicKey::from_base64)?;
    let listen_port = u16::try_from(parse_u64("listen port", fields[2], 1)?)
        .map_err(|e| WgkeepError::ParseError(format!("line 1: listen port: {e}")))?;

    let mut peers = Vec::new();
    for (index, line) in lines {
        let line_number = index + 1;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 8 {
            return Err(WgkeepError::ParseError(format!(
                "line {line_number}: expected 8 peer fields, got {}",
                fields.len()
            )));
        }
        let persistent_keepalive = match fields[7] {
            "off" | "0" => None,
            value => Some(
                u16::try_from(parse_u64("keepalive", value, line_number)?).map_err(|e| {
                    WgkeepError::ParseError(format!("line {line_number}: keepalive: {e}"))
                })?,
            ),
        };
        peers.push(PeerSample {
            public_key: PublicKey::from_base64(fields[0])?,
            endpoint: fields[2].to_string(),
            allowed_ips: parse_allowed_ips(fields[3])?,
            latest_handshake: parse_u64("latest handshake", fields[4], line_number)?,
            rx_bytes: parse_u64("transfer rx", fields[5], line_number)?,
            tx_bytes: parse_u64("transfer tx", fields[6], line_number)?,
            persistent_keepalive,
        });
    }

    Ok(LiveInterface {
        private_key,
        public_key,
        listen_port,
        peers,
    })
}

/// The parts of a configuration file the kernel side consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireConfig {
    /// Interface private key.
    pub private_key: PrivateKey,
    /// Listen port, if set.
    pub listen_port: Option<u16>,
    /// Allowed IPs by peer public key.
    pub peers: BTreeMap<PublicKey, Vec<IpNet>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

/// Parses an INI-style configuration file.
///
/// `wg-quick` only keys (`Address`, `DNS`, hooks, ...) are accepted and ignored.
///
/// # Errors
///
/// Returns `ParseError` for unknown sections, malformed lines, a peer without
/// `PublicKey`, or a missing `PrivateKey`.
pub fn parse_wire_config(text: &str) -> Result<WireConfig> {
    let mut section = Section::None;
    let mut private_key = None;
    let mut listen_port = None;
    let mut peers = BTreeMap::new();
    let mut current: Option<(Option<PublicKey>, Vec<IpNet>)> = None;

    let mut finish_peer = |peer: Option<(Option<PublicKey>, Vec<IpNet>)>, line: usize| -> Result<()> {
        if let Some((key, ips)) = peer {
            let key = key.ok_or_else(|| {
                WgkeepError::ParseError(format!("line {line}: [Peer] without PublicKey"))
            })?;
            peers.insert(key, ips);
        }
        Ok(())
    };

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            finish_peer(current.take(), line_number)?;
            section = match name {
                "Interface" => Section::Interface,
                "Peer" => {
                    current = Some((None, Vec::new()));
                    Section::Peer
                }
                other => {
                    return Err(WgkeepError::ParseError(format!(
                        "line {line_number}: unknown section [{other}]"
                    )));
                }
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(WgkeepError::ParseError(format!(
                "line {line_number}: expected 'Key = Value'"
            )));
        };
        let (key, value) = (key.trim(), value.trim());

        match section {
            Section::None => {
                return Err(WgkeepError::ParseError(format!(
                    "line {line_number}: key outside of a section"
                )));
            }
            Section::Interface => match key {
                "PrivateKey" => private_key = Some(PrivateKey::from_base64(value)?),
                "ListenPort" => {
                    let port = u16::try_from(parse_u64("ListenPort", value, line_number)?)
                        .map_err(|e| WgkeepError::ParseError(format!("line {line_number}: {e}")))?;
                    listen_port = Some(port);
                }
                _ => {}
            },
            Section::Peer => {
                if let Some((peer_key, ips)) = current.as_mut() {
                    match key {
                        "PublicKey" => *peer_key = Some(PublicKey::from_base64(value)?),
                        "AllowedIPs" => ips.extend(parse_allowed_ips(value)?),
                        _ => {}
                    }
                }
            }
        }
    }
    let last_line = text.lines().count();
    finish_peer(current.take(), last_line)?;

    let private_key = private_key.ok_or_else(|| {
        WgkeepError::ParseError("missing PrivateKey in [Interface] section".to_string())
    })?;

    Ok(WireConfig {
        private_key,
        listen_port,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> PrivateKey {
        PrivateKey::from_bytes_array([seed; 32])
    }

    #[test]
    fn parses_dump_with_sentinels() {
        let text = format!(
            "{}\t{}\t51820\toff\n\
             {}\t(none)\t203.0.113.5:41414\t10.0.0.2/32\t1700000000\t1024\t2048\t25\n\
             {}\t(none)\t(none)\t(none)\t0\t0\t0\toff\n",
            key(9).to_base64(),
            key(9).public_key().to_base64(),
            key(1).public_key().to_base64(),
            key(2).public_key().to_base64(),
        );
        let live = parse_dump(&text).expect("parse");
        assert_eq!(live.listen_port, 51820);
        assert_eq!(live.public_key, Some(key(9).public_key()));
        assert_eq!(live.peers.len(), 2);

        let first = &live.peers[0];
        assert_eq!(first.endpoint, "203.0.113.5:41414");
        assert_eq!(first.allowed_ips[0].to_string(), "10.0.0.2/32");
        assert_eq!(first.latest_handshake, 1_700_000_000);
        assert_eq!((first.rx_bytes, first.tx_bytes), (1024, 2048));
        assert_eq!(first.persistent_keepalive, Some(25));

        let second = &live.peers[1];
        assert_eq!(second.endpoint, NONE_SENTINEL);
        assert!(second.allowed_ips.is_empty());
        assert_eq!(second.persistent_keepalive, None);
    }

    #[test]
    fn dump_without_private_key() {
        let live = parse_dump("(none)\t(none)\t0\toff\n").expect("parse");
        assert!(live.private_key.is_none());
        assert!(live.peers.is_empty());
    }

    #[test]
    fn dump_rejects_short_peer_line() {
        let text = format!(
            "(none)\t(none)\t51820\toff\n{}\t(none)\t(none)\n",
            key(1).public_key().to_base64()
        );
        assert!(matches!(parse_dump(&text), Err(WgkeepError::ParseError(_))));
        assert!(parse_dump("").is_err());
    }

    #[test]
    fn dump_rejects_bad_counter() {
        let text = format!(
            "(none)\t(none)\t51820\toff\n{}\t(none)\t(none)\t(none)\t0\tlots\t0\toff\n",
            key(1).public_key().to_base64()
        );
        assert!(matches!(parse_dump(&text), Err(WgkeepError::ParseError(_))));
    }

    #[test]
    fn wire_config_ignores_quick_keys() {
        let text = format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             ListenPort = 51821\n\
             Address = 10.0.0.1/24\n\
             PostUp = echo up\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             AllowedIPs = 10.0.0.2/32, 192.168.5.0/24\n",
            key(9).to_base64(),
            key(1).public_key().to_base64(),
        );
        let config = parse_wire_config(&text).expect("parse");
        assert_eq!(config.private_key, key(9));
        assert_eq!(config.listen_port, Some(51821));
        assert_eq!(config.peers[&key(1).public_key()].len(), 2);
    }

    #[test]
    fn wire_config_errors() {
        assert!(parse_wire_config("[Interface]\nListenPort = 1\n").is_err());
        assert!(parse_wire_config("[Bogus]\n").is_err());
        assert!(parse_wire_config("PrivateKey = x\n").is_err());
        let peer_without_key = format!(
            "[Interface]\nPrivateKey = {}\n[Peer]\nAllowedIPs = 10.0.0.2/32\n",
            key(9).to_base64()
        );
        assert!(parse_wire_config(&peer_without_key).is_err());
    }
}
