// ── IPv4 address arithmetic ──
//
// Dotted-quad <-> u32 packing and the prefix math the engine needs to
// find a point-to-point customer's peer address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Prefix assumed for a bare address with no `/p` suffix.
pub const DEFAULT_PREFIX: u8 = 30;

fn invalid(input: &str) -> CoreError {
    CoreError::InvalidAddress {
        input: input.to_owned(),
    }
}

/// Pack `a.b.c.d` big-endian into a `u32`.
pub fn to_int(ipv4: &str) -> Result<u32, CoreError> {
    let mut octets = ipv4.trim().split('.');
    let mut value = 0u32;
    for _ in 0..4 {
        let octet = octets
            .next()
            .filter(|o| !o.is_empty() && o.len() <= 3 && o.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|o| o.parse::<u8>().ok())
            .ok_or_else(|| invalid(ipv4))?;
        value = (value << 8) | u32::from(octet);
    }
    if octets.next().is_some() {
        return Err(invalid(ipv4));
    }
    Ok(value)
}

pub fn to_ipv4(value: u32) -> String {
    let [a, b, c, d] = value.to_be_bytes();
    format!("{a}.{b}.{c}.{d}")
}

fn mask(prefix: u8) -> Result<u32, CoreError> {
    match prefix {
        0 => Ok(0),
        1..=32 => Ok(u32::MAX << (32 - u32::from(prefix))),
        _ => Err(CoreError::InvalidPrefix {
            prefix: prefix.to_string(),
        }),
    }
}

/// Network address of `ipv4/prefix`.
pub fn network_of(ipv4: &str, prefix: u8) -> Result<u32, CoreError> {
    let mask = mask(prefix)?;
    Ok(to_int(ipv4)? & mask)
}

/// Broadcast address of `ipv4/prefix`.
pub fn broadcast_of(ipv4: &str, prefix: u8) -> Result<u32, CoreError> {
    let mask = mask(prefix)?;
    Ok(to_int(ipv4)? | !mask)
}

/// The far end of a point-to-point link.
///
/// For a /30 the usable hosts are network+1 and network+2; given one,
/// the other is returned. Given the network or broadcast address, the
/// higher usable host (network+2) is returned. Any other prefix yields
/// the input address unchanged.
pub fn peer_of_point_to_point(ipv4: &str, prefix: u8) -> Result<String, CoreError> {
    let ip = to_int(ipv4)?;
    let network = network_of(ipv4, prefix)?;
    if prefix != 30 {
        return Ok(to_ipv4(ip));
    }
    let peer = match ip - network {
        1 => network + 2,
        2 => network + 1,
        _ => {
            tracing::warn!(address = ipv4, "not a usable /30 host, using network+2 as peer");
            network + 2
        }
    };
    Ok(to_ipv4(peer))
}

// ── Cidr ─────────────────────────────────────────────────────────────

/// An IPv4 address with its prefix length, as stored on a client binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    address: u32,
    prefix: u8,
}

impl Cidr {
    pub fn new(address: &str, prefix: u8) -> Result<Self, CoreError> {
        mask(prefix)?;
        Ok(Self {
            address: to_int(address)?,
            prefix,
        })
    }

    /// The host address as written, without prefix.
    pub fn address(&self) -> String {
        to_ipv4(self.address)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn network(&self) -> String {
        to_ipv4(self.address & self.mask())
    }

    pub fn broadcast(&self) -> String {
        to_ipv4(self.address | !self.mask())
    }

    /// See [`peer_of_point_to_point`].
    pub fn peer(&self) -> String {
        match peer_of_point_to_point(&self.address(), self.prefix) {
            Ok(peer) => peer,
            // Both halves were validated on construction.
            Err(_) => self.address(),
        }
    }

    fn mask(&self) -> u32 {
        mask(self.prefix).unwrap_or(u32::MAX)
    }
}

impl FromStr for Cidr {
    type Err = CoreError;

    /// `a.b.c.d/p`, or a bare `a.b.c.d` read as `/30`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((address, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| CoreError::InvalidPrefix {
                        prefix: prefix.to_owned(),
                    })?;
                Self::new(address, prefix)
            }
            None => Self::new(s, DEFAULT_PREFIX),
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", to_ipv4(self.address), self.prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
