// Typed request builders
//
// One struct per mutation kind, with explicit optional fields. Each is
// validated before it is turned into a `Command`, so malformed values never
// reach the router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::command::Command;
use crate::error::Error;

pub(crate) const QUEUE_TREE: &str = "/queue/tree";
pub(crate) const MANGLE: &str = "/ip/firewall/mangle";
pub(crate) const ADDRESS: &str = "/ip/address";

// ── Rate ─────────────────────────────────────────────────────────────

/// Unit suffix of a router rate string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum RateUnit {
    #[strum(serialize = "")]
    Bits,
    #[strum(serialize = "k")]
    Kilo,
    #[strum(serialize = "M")]
    Mega,
    #[strum(serialize = "G")]
    Giga,
}

impl RateUnit {
    fn multiplier(self) -> u64 {
        match self {
            Self::Bits => 1,
            Self::Kilo => 1_000,
            Self::Mega => 1_000_000,
            Self::Giga => 1_000_000_000,
        }
    }
}

/// A bit rate as the router writes it: `10M`, `512k`, `1G`, `64000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    magnitude: u64,
    unit: RateUnit,
}

impl Rate {
    pub const fn new(magnitude: u64, unit: RateUnit) -> Self {
        Self { magnitude, unit }
    }

    pub const fn mega(magnitude: u64) -> Self {
        Self::new(magnitude, RateUnit::Mega)
    }

    pub const fn kilo(magnitude: u64) -> Self {
        Self::new(magnitude, RateUnit::Kilo)
    }

    pub fn magnitude(self) -> u64 {
        self.magnitude
    }

    pub fn unit(self) -> RateUnit {
        self.unit
    }

    /// Floor-divide the magnitude, keeping the unit (`10M / 3 = 3M`).
    pub fn divide(self, parts: u32) -> Self {
        if parts == 0 {
            return self;
        }
        Self {
            magnitude: self.magnitude / u64::from(parts),
            unit: self.unit,
        }
    }

    pub fn bits_per_second(self) -> u64 {
        self.magnitude.saturating_mul(self.unit.multiplier())
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit)
    }
}

/// Rejected rate string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rate '{0}': expected digits with an optional k, M or G suffix")]
pub struct ParseRateError(pub String);

impl FromStr for Rate {
    type Err = ParseRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);
        let magnitude = digits
            .parse::<u64>()
            .map_err(|_| ParseRateError(s.to_owned()))?;
        let unit = match suffix {
            "" => RateUnit::Bits,
            "k" | "K" => RateUnit::Kilo,
            "M" | "m" => RateUnit::Mega,
            "G" | "g" => RateUnit::Giga,
            _ => return Err(ParseRateError(s.to_owned())),
        };
        Ok(Self { magnitude, unit })
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Burst triple for a queue node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burst {
    pub limit: Rate,
    pub threshold: Rate,
    /// Averaging window, e.g. `8s`.
    pub time: String,
}

// ── Validation ───────────────────────────────────────────────────────

fn check_value(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("{field} must not be empty")));
    }
    if value.contains(['\0', '\n', '\r']) {
        return Err(Error::InvalidRequest(format!(
            "{field} contains a control character"
        )));
    }
    Ok(())
}

fn check_opt(field: &str, value: Option<&str>) -> Result<(), Error> {
    value.map_or(Ok(()), |v| check_value(field, v))
}

fn check_priority(priority: Option<u8>) -> Result<(), Error> {
    match priority {
        Some(p) if !(1..=8).contains(&p) => Err(Error::InvalidRequest(format!(
            "priority {p} out of range 1..=8"
        ))),
        _ => Ok(()),
    }
}

fn check_burst(burst: Option<&Burst>) -> Result<(), Error> {
    burst.map_or(Ok(()), |b| check_value("burst-time", &b.time))
}

/// `a.b.c.d` or `a.b.c.d/p` with `p <= 32`.
fn check_address(field: &str, value: &str) -> Result<(), Error> {
    check_value(field, value)?;
    let (ip, prefix) = match value.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (value, None),
    };
    let valid_ip = ip.parse::<std::net::Ipv4Addr>().is_ok();
    let valid_prefix = prefix.is_none_or(|p| p.parse::<u8>().is_ok_and(|p| p <= 32));
    if valid_ip && valid_prefix {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "{field} '{value}' is not an IPv4 address"
        )))
    }
}

// ── Queue tree ───────────────────────────────────────────────────────

/// A new `/queue/tree` node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueTreeSpec {
    pub name: String,
    pub parent: String,
    pub packet_mark: Option<String>,
    pub max_limit: Option<Rate>,
    pub limit_at: Option<Rate>,
    pub queue_type: Option<String>,
    pub priority: Option<u8>,
    pub burst: Option<Burst>,
    pub comment: Option<String>,
}

impl QueueTreeSpec {
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_value("name", &self.name)?;
        check_value("parent", &self.parent)?;
        check_opt("packet-mark", self.packet_mark.as_deref())?;
        check_opt("queue", self.queue_type.as_deref())?;
        check_opt("comment", self.comment.as_deref())?;
        check_priority(self.priority)?;
        check_burst(self.burst.as_ref())
    }

    pub fn to_command(&self) -> Result<Command, Error> {
        self.validate()?;
        let cmd = Command::add(QUEUE_TREE)
            .attr("name", &self.name)
            .attr("parent", &self.parent)
            .attr_opt("packet-mark", self.packet_mark.as_deref())
            .attr_opt("max-limit", self.max_limit)
            .attr_opt("limit-at", self.limit_at)
            .attr_opt("queue", self.queue_type.as_deref())
            .attr_opt("priority", self.priority);
        Ok(with_burst(cmd, self.burst.as_ref()).attr_opt("comment", self.comment.as_deref()))
    }
}

/// In-place change to an existing `/queue/tree` node. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueTreeUpdate {
    pub name: Option<String>,
    pub parent: Option<String>,
    pub packet_mark: Option<String>,
    pub max_limit: Option<Rate>,
    pub limit_at: Option<Rate>,
    pub queue_type: Option<String>,
    pub priority: Option<u8>,
    pub burst: Option<Burst>,
    pub comment: Option<String>,
}

impl QueueTreeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.is_empty() {
            return Err(Error::InvalidRequest("queue update sets no fields".into()));
        }
        check_opt("name", self.name.as_deref())?;
        check_opt("parent", self.parent.as_deref())?;
        check_opt("packet-mark", self.packet_mark.as_deref())?;
        check_opt("queue", self.queue_type.as_deref())?;
        check_opt("comment", self.comment.as_deref())?;
        check_priority(self.priority)?;
        check_burst(self.burst.as_ref())
    }

    pub fn to_command(&self, id: &str) -> Result<Command, Error> {
        check_value(".id", id)?;
        self.validate()?;
        let cmd = Command::set(QUEUE_TREE, id)
            .attr_opt("name", self.name.as_deref())
            .attr_opt("parent", self.parent.as_deref())
            .attr_opt("packet-mark", self.packet_mark.as_deref())
            .attr_opt("max-limit", self.max_limit)
            .attr_opt("limit-at", self.limit_at)
            .attr_opt("queue", self.queue_type.as_deref())
            .attr_opt("priority", self.priority);
        Ok(with_burst(cmd, self.burst.as_ref()).attr_opt("comment", self.comment.as_deref()))
    }
}

fn with_burst(cmd: Command, burst: Option<&Burst>) -> Command {
    match burst {
        Some(b) => cmd
            .attr("burst-limit", b.limit)
            .attr("burst-threshold", b.threshold)
            .attr("burst-time", &b.time),
        None => cmd,
    }
}

// ── Mangle ───────────────────────────────────────────────────────────

/// Firewall chain a marking rule is attached to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Chain {
    Prerouting,
    #[default]
    Forward,
    Postrouting,
}

/// Which address field a marking rule matches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AddressMatch {
    /// `dst-address` (traffic towards the client: download).
    Destination(String),
    /// `src-address` (traffic from the client: upload).
    Source(String),
}

/// A `mark-packet` rule in `/ip/firewall/mangle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MangleRuleSpec {
    pub chain: Chain,
    pub matches: AddressMatch,
    pub new_packet_mark: String,
    pub passthrough: bool,
    pub comment: Option<String>,
}

impl MangleRuleSpec {
    pub fn mark_packets(chain: Chain, matches: AddressMatch, mark: impl Into<String>) -> Self {
        Self {
            chain,
            matches,
            new_packet_mark: mark.into(),
            passthrough: true,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        match &self.matches {
            AddressMatch::Destination(a) => check_address("dst-address", a)?,
            AddressMatch::Source(a) => check_address("src-address", a)?,
        }
        check_value("new-packet-mark", &self.new_packet_mark)?;
        check_opt("comment", self.comment.as_deref())
    }

    pub fn to_command(&self) -> Result<Command, Error> {
        self.validate()?;
        let (field, address) = match &self.matches {
            AddressMatch::Destination(a) => ("dst-address", a),
            AddressMatch::Source(a) => ("src-address", a),
        };
        Ok(Command::add(MANGLE)
            .attr("chain", self.chain)
            .attr("action", "mark-packet")
            .attr(field, address)
            .attr("new-packet-mark", &self.new_packet_mark)
            .attr("passthrough", if self.passthrough { "yes" } else { "no" })
            .attr_opt("comment", self.comment.as_deref()))
    }
}

// ── IP address ───────────────────────────────────────────────────────

/// A new `/ip/address` binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressSpec {
    /// `a.b.c.d/p`
    pub address: String,
    pub interface: String,
    pub comment: Option<String>,
}

impl AddressSpec {
    pub fn validate(&self) -> Result<(), Error> {
        check_address("address", &self.address)?;
        check_value("interface", &self.interface)?;
        check_opt("comment", self.comment.as_deref())
    }

    pub fn to_command(&self) -> Result<Command, Error> {
        self.validate()?;
        Ok(Command::add(ADDRESS)
            .attr("address", &self.address)
            .attr("interface", &self.interface)
            .attr_opt("comment", self.comment.as_deref()))
    }
}

/// In-place change to an existing `/ip/address` binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressUpdate {
    pub address: Option<String>,
    pub interface: Option<String>,
    pub comment: Option<String>,
}

impl AddressUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if *self == Self::default() {
            return Err(Error::InvalidRequest("address update sets no fields".into()));
        }
        if let Some(address) = &self.address {
            check_address("address", address)?;
        }
        check_opt("interface", self.interface.as_deref())?;
        check_opt("comment", self.comment.as_deref())
    }

    pub fn to_command(&self, id: &str) -> Result<Command, Error> {
        check_value(".id", id)?;
        self.validate()?;
        Ok(Command::set(ADDRESS, id)
            .attr_opt("address", self.address.as_deref())
            .attr_opt("interface", self.interface.as_deref())
            .attr_opt("comment", self.comment.as_deref()))
    }
}
