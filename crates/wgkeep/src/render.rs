//! Wire-format configuration rendering.
//!
//! Everything here is a pure function of an [`InterfaceRecord`]: the same
//! record always renders to byte-identical text, which is what lets the
//! reconciler skip work when nothing changed.

use std::fmt::Write as FmtWrite;

use crate::error::{Result, WgkeepError};
use crate::types::{InterfaceRecord, PeerRecord};

/// Catch-all routes placed in peer exports.
pub const EXPORT_ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// Renders the configuration file `wg-quick` brings the interface up from.
///
/// Only enabled peers are included, and only their public half.
#[must_use]
pub fn render_interface(record: &InterfaceRecord) -> String {
    render(record, true)
}

/// Renders the subset of [`render_interface`] that `wg syncconf` accepts:
/// no `Address` and no hooks.
#[must_use]
pub fn render_stripped(record: &InterfaceRecord) -> String {
    render(record, false)
}

fn render(record: &InterfaceRecord, with_quick_keys: bool) -> String {
    let iface = &record.interface;
    let mut output = String::new();

    output.push_str("[Interface]\n");
    let _ = writeln!(output, "PrivateKey = {}", iface.private_key.to_base64());
    let _ = writeln!(output, "ListenPort = {}", iface.listen_port);

    if with_quick_keys {
        let _ = writeln!(output, "Address = {}", iface.address);
        for (key, command) in iface.hooks.entries() {
            if !command.is_empty() {
                let _ = writeln!(output, "{key} = {command}");
            }
        }
    }

    for peer in record.enabled_peers() {
        output.push('\n');
        write_peer(&mut output, peer);
    }

    output
}

fn write_peer(output: &mut String, peer: &PeerRecord) {
    output.push_str("[Peer]\n");
    let _ = writeln!(output, "PublicKey = {}", peer.public_key.to_base64());
    if !peer.allowed_ips.is_empty() {
        let _ = writeln!(output, "AllowedIPs = {}", peer.allowed_ips_string());
    }
}

/// Renders the client configuration a peer imports to connect to this interface.
///
/// # Errors
///
/// Returns `PeerNotFound` for an unknown peer, and `MissingField` when the
/// peer's private key was never stored or the interface has no endpoint.
pub fn render_peer_export(record: &InterfaceRecord, peer_name: &str) -> Result<String> {
    let peer = record.peer(peer_name)?;
    let private_key = peer.private_key.as_ref().ok_or_else(|| {
        WgkeepError::MissingField(format!(
            "private key of peer '{peer_name}' (added with an external public key)"
        ))
    })?;
    if record.global.endpoint.is_empty() {
        return Err(WgkeepError::MissingField(format!(
            "endpoint of interface '{}'",
            record.name()
        )));
    }
    let address = peer
        .allowed_ips
        .first()
        .ok_or_else(|| WgkeepError::MissingField(format!("allowed_ips of peer '{peer_name}'")))?;

    let mut output = String::new();
    output.push_str("[Interface]\n");
    let _ = writeln!(output, "PrivateKey = {}", private_key.to_base64());
    let _ = writeln!(output, "Address = {address}");
    if !record.global.dns.is_empty() {
        let _ = writeln!(output, "DNS = {}", record.global.dns);
    }

    output.push('\n');
    output.push_str("[Peer]\n");
    let _ = writeln!(output, "PublicKey = {}", record.interface.public_key.to_base64());
    let _ = writeln!(
        output,
        "Endpoint = {}:{}",
        record.global.endpoint, record.interface.listen_port
    );
    let _ = writeln!(output, "AllowedIPs = {EXPORT_ALLOWED_IPS}");

    Ok(output)
}
