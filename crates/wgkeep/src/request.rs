//! Typed operation inputs.
//!
//! Each request carries raw user input and is validated exactly once,
//! before the manager takes a lock or writes anything.

use ipnet::{IpNet, Ipv4Net};

use crate::error::{Result, WgkeepError};
use crate::keys::{PrivateKey, PublicKey};
use crate::types::{
    GlobalSettings, Hooks, parse_cidr_list, parse_interface_address, parse_listen_port,
    validate_interface_name, validate_peer_name,
};

/// Refuses values that would break the line-oriented configuration file.
fn single_line(field: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(WgkeepError::InvalidArgument(format!(
            "{field} must be a single line"
        )));
    }
    Ok(())
}

fn validate_hooks(hooks: &Hooks) -> Result<()> {
    for (key, command) in hooks.entries() {
        single_line(key, command)?;
    }
    Ok(())
}

/// Input of the create operation.
#[derive(Debug, Clone, Default)]
pub struct CreateInterface {
    /// Required. Interface name.
    pub name: String,
    /// Required. IPv4 host address with prefix, e.g. `10.0.0.1/24`.
    pub address: String,
    /// Optional; the manager default is used when absent.
    pub listen_port: Option<u64>,
    /// Optional DNS handed to peer exports.
    pub dns: Option<String>,
    /// Optional public endpoint handed to peer exports.
    pub endpoint: Option<String>,
    /// Optional lifecycle hooks.
    pub hooks: Hooks,
    /// Optional base64 private key; generated when absent.
    pub private_key: Option<String>,
}

pub(crate) struct ValidCreate {
    pub name: String,
    pub address: Ipv4Net,
    pub listen_port: u16,
    pub global: GlobalSettings,
    pub hooks: Hooks,
    pub private_key: Option<PrivateKey>,
}

impl CreateInterface {
    /// A request with the two required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    /// Sets the listen port.
    #[must_use]
    pub fn with_listen_port(mut self, port: u64) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Sets the DNS field.
    #[must_use]
    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns = Some(dns.into());
        self
    }

    /// Sets the endpoint field.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub(crate) fn validate(self, default_port: u16) -> Result<ValidCreate> {
        validate_interface_name(&self.name)?;
        let address = parse_interface_address(&self.address)?;
        let listen_port = match self.listen_port {
            Some(port) => parse_listen_port(port)?,
            None => default_port,
        };
        let dns = self.dns.unwrap_or_default();
        let endpoint = self.endpoint.unwrap_or_default();
        single_line("dns", &dns)?;
        single_line("endpoint", &endpoint)?;
        validate_hooks(&self.hooks)?;
        let private_key = self
            .private_key
            .as_deref()
            .map(PrivateKey::from_base64)
            .transpose()?;

        Ok(ValidCreate {
            name: self.name,
            address,
            listen_port,
            global: GlobalSettings { dns, endpoint },
            hooks: self.hooks,
            private_key,
        })
    }
}

/// Input of the set operation. `None` fields are left unchanged; an empty
/// string clears a descriptive field or hook.
#[derive(Debug, Clone, Default)]
pub struct UpdateInterface {
    /// Required. Interface name.
    pub name: String,
    /// New listen port.
    pub listen_port: Option<u64>,
    /// New DNS value.
    pub dns: Option<String>,
    /// New endpoint value.
    pub endpoint: Option<String>,
    /// New `PreUp` hook.
    pub pre_up: Option<String>,
    /// New `PostUp` hook.
    pub post_up: Option<String>,
    /// New `PreDown` hook.
    pub pre_down: Option<String>,
    /// New `PostDown` hook.
    pub post_down: Option<String>,
}

pub(crate) struct ValidUpdate {
    pub name: String,
    pub listen_port: Option<u16>,
    pub dns: Option<String>,
    pub endpoint: Option<String>,
    pub hooks: [Option<String>; 4],
}

impl UpdateInterface {
    /// A request that changes nothing yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(self) -> Result<ValidUpdate> {
        validate_interface_name(&self.name)?;
        let listen_port = self.listen_port.map(parse_listen_port).transpose()?;
        let hooks = [self.pre_up, self.post_up, self.pre_down, self.post_down];

        let text_fields = [("dns", &self.dns), ("endpoint", &self.endpoint)]
            .into_iter()
            .chain(
                ["PreUp", "PostUp", "PreDown", "PostDown"]
                    .into_iter()
                    .zip(hooks.iter()),
            );
        let mut any = listen_port.is_some();
        for (field, value) in text_fields {
            if let Some(value) = value {
                single_line(field, value)?;
                any = true;
            }
        }
        if !any {
            return Err(WgkeepError::MissingField(
                "at least one setting to change".to_string(),
            ));
        }

        Ok(ValidUpdate {
            name: self.name,
            listen_port,
            dns: self.dns,
            endpoint: self.endpoint,
            hooks,
        })
    }
}

impl ValidUpdate {
    pub(crate) fn apply_hooks(&mut self, hooks: &mut Hooks) {
        let targets = [
            &mut hooks.pre_up,
            &mut hooks.post_up,
            &mut hooks.pre_down,
            &mut hooks.post_down,
        ];
        for (target, value) in targets.into_iter().zip(self.hooks.iter_mut()) {
            if let Some(value) = value.take() {
                *target = value;
            }
        }
    }
}

/// Input of the peer add operation.
#[derive(Debug, Clone, Default)]
pub struct AddPeer {
    /// Required. Interface the peer joins.
    pub interface: String,
    /// Required. Peer name.
    pub name: String,
    /// Optional comma-separated CIDRs; the next free address is allocated
    /// when absent.
    pub allowed_ips: Option<String>,
    /// Optional base64 public key of a peer that keeps its own private key.
    pub public_key: Option<String>,
}

pub(crate) struct ValidAddPeer {
    pub interface: String,
    pub name: String,
    pub allowed_ips: Option<Vec<IpNet>>,
    pub public_key: Option<PublicKey>,
}

impl AddPeer {
    /// A request with an allocated address and a generated key pair.
    #[must_use]
    pub fn new(interface: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Uses explicit allowed IPs instead of allocating.
    #[must_use]
    pub fn with_allowed_ips(mut self, allowed_ips: impl Into<String>) -> Self {
        self.allowed_ips = Some(allowed_ips.into());
        self
    }

    /// Uses an externally generated public key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    pub(crate) fn validate(self) -> Result<ValidAddPeer> {
        validate_interface_name(&self.interface)?;
        validate_peer_name(&self.name)?;
        let allowed_ips = self.allowed_ips.as_deref().map(parse_cidr_list).transpose()?;
        let public_key = self
            .public_key
            .as_deref()
            .map(PublicKey::from_base64)
            .transpose()?;
        Ok(ValidAddPeer {
            interface: self.interface,
            name: self.name,
            allowed_ips,
            public_key,
        })
    }
}
