// Firewall mangle endpoints
//
// Packet-marking rules for one peer address come in pairs: download
// (`dst-address=peer`) and upload (`src-address=peer`). Removal looks the
// rules up three independent ways (comment, address match, mark value) and
// removes the union, so rules left behind by older naming schemes or hand
// edits are still caught.

use std::collections::HashSet;

use tracing::debug;

use crate::command::Command;
use crate::error::Error;
use crate::request::{AddressMatch, MANGLE, MangleRuleSpec};
use crate::router::RouterClient;
use crate::router::models::MangleEntry;

/// Whether `text` mentions `address` as a whole token (so `10.0.0.2` does
/// not match inside `10.0.0.25`).
fn mentions_address(text: &str, address: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .any(|token| token == address)
}

/// `10.0.0.2` and `10.0.0.2/32` name the same host.
fn same_host(field: &str, address: &str) -> bool {
    field == address || field.strip_suffix("/32") == Some(address)
}

/// Ids of removable rules tied to `peer`, deduplicated, in lookup order.
fn rules_for_peer(rules: &[MangleEntry], peer: &str, marks: &[&str]) -> Vec<String> {
    let by_comment = rules.iter().filter(|r| {
        r.comment
            .as_deref()
            .is_some_and(|c| mentions_address(c, peer))
    });
    let by_address = rules.iter().filter(|r| {
        [&r.src_address, &r.dst_address]
            .into_iter()
            .flatten()
            .any(|a| same_host(a, peer))
    });
    let by_mark = rules.iter().filter(|r| {
        r.new_packet_mark
            .as_deref()
            .is_some_and(|m| marks.contains(&m))
    });

    let mut seen = HashSet::new();
    by_comment
        .chain(by_address)
        .chain(by_mark)
        .filter(|r| !r.dynamic)
        .filter(|r| seen.insert(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect()
}

impl RouterClient {
    /// Every mangle rule.
    pub async fn list_mangle_rules(&self) -> Result<Vec<MangleEntry>, Error> {
        let reply = self.lookup(&Command::print(MANGLE)).await?;
        Ok(reply.records().iter().filter_map(MangleEntry::from_record).collect())
    }

    /// Install the download/upload marking pair for `peer`, replacing any
    /// existing rules for it. Returns how many stale rules were removed.
    pub async fn add_mangle_rules(
        &self,
        peer: &str,
        download_mark: &str,
        upload_mark: &str,
        comment: &str,
    ) -> Result<usize, Error> {
        let download = MangleRuleSpec::mark_packets(
            self.mangle_chain,
            AddressMatch::Destination(peer.to_owned()),
            download_mark,
        )
        .with_comment(format!("{comment} download"));
        let upload = MangleRuleSpec::mark_packets(
            self.mangle_chain,
            AddressMatch::Source(peer.to_owned()),
            upload_mark,
        )
        .with_comment(format!("{comment} upload"));
        // Validate both before touching the router.
        let download = download.to_command()?;
        let upload = upload.to_command()?;

        let removed = self
            .remove_mangle_rules(peer, download_mark, upload_mark)
            .await?;
        debug!(peer, download_mark, upload_mark, "adding mangle rules");
        self.mutate(&download).await?;
        self.mutate(&upload).await?;
        Ok(removed)
    }

    /// Remove every rule tied to `peer` by comment, by src/dst address, or
    /// by mark value. Returns how many were removed.
    pub async fn remove_mangle_rules(
        &self,
        peer: &str,
        download_mark: &str,
        upload_mark: &str,
    ) -> Result<usize, Error> {
        let rules = self.list_mangle_rules().await?;
        let ids = rules_for_peer(&rules, peer, &[download_mark, upload_mark]);
        for id in &ids {
            debug!(peer, id, "removing mangle rule");
            self.mutate(&Command::remove(MANGLE, id)).await?;
        }
        Ok(ids.len())
    }
}
