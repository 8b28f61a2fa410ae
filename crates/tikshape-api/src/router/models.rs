// Typed views of router table rows
//
// Rows arrive as loose `=key=value` maps. These structs pick out the
// fields the facade works with; anything else stays on the `Record`.

use serde::Serialize;

use crate::command::Record;

fn owned(record: &Record, key: &str) -> Option<String> {
    record.get_non_empty(key).map(str::to_owned)
}

/// A `/queue/tree` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub id: String,
    pub name: String,
    pub parent: String,
    pub packet_mark: Option<String>,
    pub max_limit: Option<String>,
    pub limit_at: Option<String>,
    pub queue_type: Option<String>,
    pub priority: Option<String>,
    pub comment: Option<String>,
    pub disabled: bool,
}

impl QueueEntry {
    /// `None` for rows missing `.id` or `name`.
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: owned(record, ".id")?,
            name: owned(record, "name")?,
            parent: owned(record, "parent").unwrap_or_default(),
            packet_mark: owned(record, "packet-mark"),
            max_limit: owned(record, "max-limit"),
            limit_at: owned(record, "limit-at"),
            queue_type: owned(record, "queue"),
            priority: owned(record, "priority"),
            comment: owned(record, "comment"),
            disabled: record.flag("disabled"),
        })
    }
}

/// A `/ip/firewall/mangle` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MangleEntry {
    pub id: String,
    pub chain: Option<String>,
    pub action: Option<String>,
    pub src_address: Option<String>,
    pub dst_address: Option<String>,
    pub new_packet_mark: Option<String>,
    pub comment: Option<String>,
    /// Router-managed rules cannot be removed.
    pub dynamic: bool,
}

impl MangleEntry {
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: owned(record, ".id")?,
            chain: owned(record, "chain"),
            action: owned(record, "action"),
            src_address: owned(record, "src-address"),
            dst_address: owned(record, "dst-address"),
            new_packet_mark: owned(record, "new-packet-mark"),
            comment: owned(record, "comment"),
            dynamic: record.flag("dynamic"),
        })
    }
}

/// An `/ip/address` binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressEntry {
    pub id: String,
    /// `a.b.c.d/p`
    pub address: String,
    pub interface: Option<String>,
    pub network: Option<String>,
    pub comment: Option<String>,
    pub dynamic: bool,
    pub disabled: bool,
}

impl AddressEntry {
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: owned(record, ".id")?,
            address: owned(record, "address")?,
            interface: owned(record, "interface"),
            network: owned(record, "network"),
            comment: owned(record, "comment"),
            dynamic: record.flag("dynamic"),
            disabled: record.flag("disabled"),
        })
    }

    /// Host part of `address`.
    pub fn host(&self) -> &str {
        self.address
            .split_once('/')
            .map_or(self.address.as_str(), |(ip, _)| ip)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn queue_entry_requires_id_and_name() {
        let rec: Record = [(".id", "*5"), ("name", "Budi"), ("parent", "PAKET-10"), ("max-limit", "10M")]
            .into_iter()
            .collect();
        let entry = QueueEntry::from_record(&rec).unwrap();
        assert_eq!(entry.max_limit.as_deref(), Some("10M"));
        assert_eq!(entry.limit_at, None);

        let nameless: Record = [(".id", "*6")].into_iter().collect();
        assert!(QueueEntry::from_record(&nameless).is_none());
    }

    #[test]
    fn empty_values_read_as_absent() {
        let rec: Record = [(".id", "*1"), ("address", "10.0.0.1/30"), ("comment", "")]
            .into_iter()
            .collect();
        let entry = AddressEntry::from_record(&rec).unwrap();
        assert_eq!(entry.comment, None);
        assert_eq!(entry.host(), "10.0.0.1");
    }
}
