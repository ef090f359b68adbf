//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use wgkeep::{
    ApplyOutcome, BatchReport, Hooks, InterfaceDetails, InterfaceSummary, LinkState, PeerRecord,
    PeerStatus, PublicKey, SampleSummary, StatsReport,
};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Result of a command that changes state without returning data.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    /// Interface acted on.
    pub interface: String,
    /// What was done.
    pub action: String,
    /// `false` when the target was already in the requested state.
    pub changed: bool,
    /// Human-readable summary.
    pub message: String,
}

impl ActionResponse {
    /// A response for `action` on `interface`.
    #[must_use]
    pub fn new(
        interface: impl Into<String>,
        action: impl Into<String>,
        changed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            action: action.into(),
            changed,
            message: message.into(),
        }
    }
}

impl TableDisplay for ActionResponse {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let mark = if self.changed { "✓" } else { "-" };
        writeln!(writer, "{mark} {}", self.message)?;
        Ok(())
    }
}

/// Interface listing.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceList {
    /// One row per interface.
    pub interfaces: Vec<InterfaceSummary>,
}

impl TableDisplay for InterfaceList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.interfaces.is_empty() {
            writeln!(writer, "No interfaces")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:<15}  {:<18}  {:>5}  {:<6}  {:>5}  {:<44}",
            "NAME", "ADDRESS", "PORT", "STATE", "PEERS", "PUBLIC KEY"
        )?;
        writeln!(writer, "{}", "─".repeat(102))?;

        for iface in &self.interfaces {
            writeln!(
                writer,
                "{:<15}  {:<18}  {:>5}  {:<6}  {:>5}  {:<44}",
                truncate(&iface.name, 15),
                iface.address.to_string(),
                iface.listen_port,
                iface.state.to_string(),
                format!("{}/{}", iface.enabled_peers, iface.peers),
                iface.public_key.to_string(),
            )?;
        }

        writeln!(writer)?;
        writeln!(writer, "Total: {} interface(s)", self.interfaces.len())?;
        Ok(())
    }
}

/// A peer without its private key.
#[derive(Debug, Clone, Serialize)]
pub struct PeerView {
    /// Interface the peer belongs to.
    pub interface: String,
    /// Peer name.
    pub name: String,
    /// Public key.
    pub public_key: PublicKey,
    /// Comma-separated allowed IPs.
    pub allowed_ips: String,
    /// Enabled or disabled.
    pub status: PeerStatus,
    /// Whether a private key is stored for export.
    pub exportable: bool,
}

impl PeerView {
    /// Projects a stored peer.
    #[must_use]
    pub fn new(interface: &str, peer: &PeerRecord) -> Self {
        Self {
            interface: interface.to_string(),
            name: peer.name.clone(),
            public_key: peer.public_key,
            allowed_ips: peer.allowed_ips_string(),
            status: peer.status,
            exportable: peer.private_key.is_some(),
        }
    }
}

impl TableDisplay for PeerView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Peer: {}", self.name)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Interface:    {}", self.interface)?;
        writeln!(writer, "Public Key:   {}", self.public_key)?;
        writeln!(writer, "Allowed IPs:  {}", self.allowed_ips)?;
        writeln!(writer, "Status:       {}", self.status)?;
        Ok(())
    }
}

/// Interface detail without private keys.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceView {
    /// Interface name.
    pub name: String,
    /// Lifecycle state.
    pub state: LinkState,
    /// Interface address.
    pub address: String,
    /// Listen port.
    pub listen_port: u16,
    /// Interface public key.
    pub public_key: PublicKey,
    /// DNS handed to exports.
    pub dns: String,
    /// Endpoint handed to exports.
    pub endpoint: String,
    /// Lifecycle hooks.
    pub hooks: Hooks,
    /// Peers in name order.
    pub peers: Vec<PeerView>,
}

impl From<&InterfaceDetails> for InterfaceView {
    fn from(details: &InterfaceDetails) -> Self {
        let record = &details.record;
        let name = record.name();
        Self {
            name: name.to_string(),
            state: details.state,
            address: record.interface.address.to_string(),
            listen_port: record.interface.listen_port,
            public_key: record.interface.public_key,
            dns: record.global.dns.clone(),
            endpoint: record.global.endpoint.clone(),
            hooks: record.interface.hooks.clone(),
            peers: record
                .peers
                .values()
                .map(|peer| PeerView::new(name, peer))
                .collect(),
        }
    }
}

impl TableDisplay for InterfaceView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Interface: {}", self.name)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "State:        {}", self.state)?;
        writeln!(writer, "Address:      {}", self.address)?;
        writeln!(writer, "Listen Port:  {}", self.listen_port)?;
        writeln!(writer, "Public Key:   {}", self.public_key)?;
        writeln!(writer, "DNS:          {}", or_dash(&self.dns))?;
        writeln!(writer, "Endpoint:     {}", or_dash(&self.endpoint))?;
        for (key, command) in self.hooks.entries() {
            if !command.is_empty() {
                writeln!(writer, "{:<13} {command}", format!("{key}:"))?;
            }
        }
        writeln!(writer)?;

        if self.peers.is_empty() {
            writeln!(writer, "No peers")?;
            return Ok(());
        }
        writeln!(
            writer,
            "{:<20}  {:<24}  {:<8}  {:<44}",
            "PEER", "ALLOWED IPS", "STATUS", "PUBLIC KEY"
        )?;
        writeln!(writer, "{}", "─".repeat(102))?;
        for peer in &self.peers {
            writeln!(
                writer,
                "{:<20}  {:<24}  {:<8}  {:<44}",
                truncate(&peer.name, 20),
                truncate(&peer.allowed_ips, 24),
                peer.status.to_string(),
                peer.public_key.to_string(),
            )?;
        }
        Ok(())
    }
}

/// Result of `interface apply`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResponse {
    /// Interface name.
    pub interface: String,
    /// What the reconciler did.
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

impl TableDisplay for ApplyResponse {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        match &self.outcome {
            ApplyOutcome::Written => {
                writeln!(writer, "✓ Rendered '{}' (interface is not running)", self.interface)?;
            }
            ApplyOutcome::Unchanged => {
                writeln!(writer, "- '{}' already up to date", self.interface)?;
            }
            ApplyOutcome::Synced { diff } => {
                writeln!(writer, "✓ Synced '{}'", self.interface)?;
                if diff.interface_changed {
                    writeln!(writer, "  interface settings changed")?;
                }
                for (label, keys) in [
                    ("added", &diff.added),
                    ("removed", &diff.removed),
                    ("modified", &diff.modified),
                ] {
                    for key in keys {
                        writeln!(writer, "  {label:<9} {key}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// A peer's client configuration.
#[derive(Debug, Clone, Serialize)]
pub struct PeerExport {
    /// Interface name.
    pub interface: String,
    /// Peer name.
    pub peer: String,
    /// Configuration file text.
    pub config: String,
}

impl TableDisplay for PeerExport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        write!(writer, "{}", self.config)?;
        Ok(())
    }
}

impl TableDisplay for SampleSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "✓ Sampled '{}': {} peer(s), {} new, {} counter reset(s)",
            self.interface, self.peers_sampled, self.peers_new, self.resets_observed
        )?;
        Ok(())
    }
}

impl TableDisplay for StatsReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Stats: {}", self.interface)?;
        writeln!(writer, "══════════════════════════════════")?;
        match self.update_at {
            Some(at) => writeln!(writer, "Last sample:  {}", at.to_rfc3339())?,
            None => {
                writeln!(writer, "Not sampled yet")?;
                return Ok(());
            }
        }
        writeln!(writer)?;

        writeln!(
            writer,
            "{:<20}  {:<8}  {:>10}  {:>10}  {:<21}  {:<25}",
            "PEER", "STATUS", "RX", "TX", "ENDPOINT", "HANDSHAKE"
        )?;
        writeln!(writer, "{}", "─".repeat(102))?;
        for usage in &self.peers {
            let (rx, tx, endpoint, handshake) = match &usage.stats {
                Some(stats) => (
                    format_bytes(stats.total_rx),
                    format_bytes(stats.total_tx),
                    stats.endpoint.clone(),
                    format_handshake(stats.latest_handshake),
                ),
                None => ("-".into(), "-".into(), "-".into(), "-".into()),
            };
            writeln!(
                writer,
                "{:<20}  {:<8}  {:>10}  {:>10}  {:<21}  {:<25}",
                truncate(&usage.name, 20),
                usage.status.to_string(),
                rx,
                tx,
                truncate(&endpoint, 21),
                handshake,
            )?;
        }

        if !self.orphaned.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Unconfigured peers")?;
            for orphan in &self.orphaned {
                writeln!(
                    writer,
                    "  {}  rx {}  tx {}",
                    orphan.public_key,
                    format_bytes(orphan.stats.total_rx),
                    format_bytes(orphan.stats.total_tx),
                )?;
            }
        }
        Ok(())
    }
}

/// One interface of a batch sample.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    /// Interface name.
    pub interface: String,
    /// What sampling did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SampleSummary>,
    /// Why sampling failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `stats update --all`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    /// Running interfaces that were sampled.
    pub interfaces: Vec<BatchEntry>,
    /// Recorded interfaces that were not running.
    pub skipped: Vec<String>,
    /// Number of failed interfaces.
    pub failed: usize,
}

impl From<BatchReport> for BatchView {
    fn from(report: BatchReport) -> Self {
        let failed = report.failures();
        let interfaces = report
            .outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(summary) => BatchEntry {
                    interface: outcome.interface,
                    summary: Some(summary),
                    error: None,
                },
                Err(err) => BatchEntry {
                    interface: outcome.interface,
                    summary: None,
                    error: Some(err.to_string()),
                },
            })
            .collect();
        Self {
            interfaces,
            skipped: report.skipped,
            failed,
        }
    }
}

impl TableDisplay for BatchView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.interfaces.is_empty() {
            writeln!(writer, "No running interfaces")?;
        }
        for entry in &self.interfaces {
            match (&entry.summary, &entry.error) {
                (Some(summary), _) => summary.write_table(writer)?,
                (None, Some(error)) => writeln!(writer, "✗ '{}': {error}", entry.interface)?,
                (None, None) => {}
            }
        }
        for name in &self.skipped {
            writeln!(writer, "- Skipped '{name}' (not running)")?;
        }
        Ok(())
    }
}

/// Human-readable byte count with binary units.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// RFC 3339 time of a handshake, or `never` for zero.
#[must_use]
pub fn format_handshake(timestamp: u64) -> String {
    if timestamp == 0 {
        return "never".to_string();
    }
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map_or_else(|| timestamp.to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgkeep::{PrivateKey, WgkeepError};
    use wgkeep::manager::StatsOutcome;

    fn public_key(seed: u8) -> PublicKey {
        PrivateKey::from_bytes_array([seed; 32]).public_key()
    }

    fn summary(interface: &str) -> SampleSummary {
        SampleSummary {
            interface: interface.to_string(),
            peers_sampled: 2,
            peers_new: 1,
            resets_observed: 0,
        }
    }

    #[test]
    fn output_format_default_is_table() {
        let fmt = OutputFormat::default();
        assert_eq!(fmt.format(), Format::Table);
        assert!(!fmt.is_json());
    }

    #[test]
    fn action_response_table_and_json() {
        let response = ActionResponse::new("wg0", "up", true, "Interface 'wg0' is up");

        let table = OutputFormat::new(Format::Table)
            .to_string(&response)
            .expect("should format");
        assert_eq!(table, "✓ Interface 'wg0' is up\n");

        let json = OutputFormat::new(Format::Json)
            .to_string(&response)
            .expect("should format");
        assert!(json.contains("\"action\": \"up\""));
        assert!(json.contains("\"changed\": true"));
    }

    #[test]
    fn empty_interface_list() {
        let list = InterfaceList { interfaces: vec![] };
        let output = OutputFormat::new(Format::Table)
            .to_string(&list)
            .expect("should format");
        assert!(output.contains("No interfaces"));
    }

    #[test]
    fn interface_list_rows() {
        let list = InterfaceList {
            interfaces: vec![InterfaceSummary {
                name: "wg0".into(),
                address: "10.0.0.1/24".parse().expect("cidr"),
                listen_port: 51820,
                public_key: public_key(1),
                peers: 3,
                enabled_peers: 2,
                state: LinkState::Up,
            }],
        };
        let output = OutputFormat::new(Format::Table)
            .to_string(&list)
            .expect("should format");
        assert!(output.contains("wg0"));
        assert!(output.contains("10.0.0.1/24"));
        assert!(output.contains("2/3"));
        assert!(output.contains("Total: 1 interface(s)"));
    }

    #[test]
    fn peer_view_json_has_no_private_key() {
        let peer = PeerRecord {
            name: "alice".into(),
            private_key: Some(PrivateKey::from_bytes_array([7; 32])),
            public_key: public_key(7),
            allowed_ips: vec!["10.0.0.2/32".parse().expect("cidr")],
            status: PeerStatus::Enabled,
        };
        let view = PeerView::new("wg0", &peer);
        let json = OutputFormat::new(Format::Json)
            .to_string(&view)
            .expect("should format");
        assert!(!json.contains("private_key"));
        assert!(json.contains("\"exportable\": true"));
        assert!(json.contains("10.0.0.2/32"));
    }

    #[test]
    fn apply_response_json_is_flat() {
        let response = ApplyResponse {
            interface: "wg0".into(),
            outcome: ApplyOutcome::Unchanged,
        };
        let json = OutputFormat::new(Format::Json)
            .to_string(&response)
            .expect("should format");
        assert!(json.contains("\"outcome\": \"unchanged\""));
        assert!(json.contains("\"interface\": \"wg0\""));
    }

    #[test]
    fn batch_view_lists_failures_and_skips() {
        let report = BatchReport {
            outcomes: vec![
                StatsOutcome {
                    interface: "wg0".into(),
                    result: Ok(summary("wg0")),
                },
                StatsOutcome {
                    interface: "wg1".into(),
                    result: Err(WgkeepError::ParseError("bad dump".into())),
                },
            ],
            skipped: vec!["wg2".into()],
        };
        let view = BatchView::from(report);
        assert_eq!(view.failed, 1);

        let output = OutputFormat::new(Format::Table)
            .to_string(&view)
            .expect("should format");
        assert!(output.contains("✓ Sampled 'wg0'"));
        assert!(output.contains("✗ 'wg1': parse error: bad dump"));
        assert!(output.contains("Skipped 'wg2'"));
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn format_handshake_never_and_time() {
        assert_eq!(format_handshake(0), "never");
        assert_eq!(format_handshake(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn truncate_long_string() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hello", 3), "hel");
    }
}
