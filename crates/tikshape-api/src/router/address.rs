// IP address endpoints
//
// `/ip/address` bindings for client point-to-point links. Lookups accept
// either `a.b.c.d/p` (exact) or a bare `a.b.c.d` (any prefix).

use tracing::debug;

use crate::command::Command;
use crate::error::Error;
use crate::request::{ADDRESS, AddressSpec, AddressUpdate};
use crate::router::RouterClient;
use crate::router::models::AddressEntry;

fn matches_address(entry: &AddressEntry, address: &str) -> bool {
    if address.contains('/') {
        entry.address == address
    } else {
        entry.host() == address
    }
}

impl RouterClient {
    /// Every address binding.
    pub async fn list_addresses(&self) -> Result<Vec<AddressEntry>, Error> {
        let reply = self.lookup(&Command::print(ADDRESS)).await?;
        Ok(reply.records().iter().filter_map(AddressEntry::from_record).collect())
    }

    pub async fn find_address(&self, address: &str) -> Result<Option<AddressEntry>, Error> {
        Ok(self
            .list_addresses()
            .await?
            .into_iter()
            .find(|e| !e.dynamic && matches_address(e, address)))
    }

    /// Add a binding; returns the id the router assigned.
    pub async fn add_address(&self, spec: &AddressSpec) -> Result<String, Error> {
        let command = spec.to_command()?;
        debug!(address = %spec.address, interface = %spec.interface, "adding address");
        let reply = self.mutate(&command).await?;
        Ok(reply.ret().unwrap_or_default().to_owned())
    }

    pub async fn update_address(&self, id: &str, update: &AddressUpdate) -> Result<(), Error> {
        let command = update.to_command(id)?;
        debug!(id, "updating address");
        self.mutate(&command).await?;
        Ok(())
    }

    /// Remove every static binding for `address`. Absent is not an error;
    /// returns whether anything was removed.
    pub async fn remove_address(&self, address: &str) -> Result<bool, Error> {
        let doomed: Vec<AddressEntry> = self
            .list_addresses()
            .await?
            .into_iter()
            .filter(|e| !e.dynamic && matches_address(e, address))
            .collect();
        if doomed.is_empty() {
            debug!(address, "no address binding to remove");
            return Ok(false);
        }
        for entry in &doomed {
            debug!(address = %entry.address, id = %entry.id, "removing address");
            self.mutate(&Command::remove(ADDRESS, &entry.id)).await?;
        }
        Ok(true)
    }
}
