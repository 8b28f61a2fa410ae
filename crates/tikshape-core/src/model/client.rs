// ── Client binding domain types ──

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ClientId, PackageId};
use crate::net::Cidr;

fn yes() -> bool {
    true
}

/// A billing customer bound to a package at an address.
///
/// `client_name` doubles as the child queue base name on the router and
/// `ip_cidr` is unique among active bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientBinding {
    pub id: ClientId,
    pub client_name: String,
    pub package_id: PackageId,
    pub ip_cidr: Cidr,
    /// Router interface the point-to-point address is bound on.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default = "yes")]
    pub active: bool,
}

impl ClientBinding {
    pub fn new(id: ClientId, client_name: impl Into<String>, package_id: PackageId, ip_cidr: Cidr) -> Self {
        Self {
            id,
            client_name: client_name.into(),
            package_id,
            ip_cidr,
            interface: None,
            customer_id: None,
            active: true,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}

/// How a caller names a client when asking the billing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLookup {
    Id(ClientId),
    Name(String),
    Ip(Cidr),
}

impl ClientLookup {
    /// Interpret operator input: a number is an id, an address is an IP,
    /// anything else is a name.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Ok(id) = input.parse::<ClientId>() {
            return Self::Id(id);
        }
        if input.contains('.') {
            if let Ok(cidr) = input.parse::<Cidr>() {
                return Self::Ip(cidr);
            }
        }
        Self::Name(input.to_owned())
    }

    pub fn matches(&self, binding: &ClientBinding) -> bool {
        match self {
            Self::Id(id) => binding.id == *id,
            Self::Name(name) => binding.client_name == *name,
            Self::Ip(cidr) => binding.ip_cidr.address() == cidr.address(),
        }
    }
}

impl fmt::Display for ClientLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => f.write_str(name),
            Self::Ip(cidr) => write!(f, "{cidr}"),
        }
    }
}
