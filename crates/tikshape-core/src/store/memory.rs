// ── In-memory billing store ──
//
// DashMap-backed tables keyed by billing id. Reads clone `Arc`s out of
// the maps; uniqueness is checked on insert.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::BillingStore;
use crate::error::CoreError;
use crate::model::{BandwidthPackage, ClientBinding, ClientId, ClientLookup, PackageId};

/// Packages and client bindings held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    packages: DashMap<PackageId, Arc<BandwidthPackage>>,
    clients: DashMap<ClientId, Arc<ClientBinding>>,
}

fn sorted_by<T, K: Ord>(mut items: Vec<Arc<T>>, key: impl Fn(&T) -> K) -> Vec<Arc<T>> {
    items.sort_by_key(|item| key(item));
    items
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a package. Names are unique across packages.
    pub fn upsert_package(&self, package: BandwidthPackage) -> Result<(), CoreError> {
        if package.name.trim().is_empty() {
            return Err(CoreError::Validation {
                message: format!("package {} has an empty name", package.id),
            });
        }
        let clash = self
            .packages
            .iter()
            .any(|p| p.id != package.id && p.name == package.name);
        if clash {
            return Err(CoreError::Validation {
                message: format!("package name '{}' is already taken", package.name),
            });
        }
        debug!(id = package.id, name = %package.name, "storing package");
        self.packages.insert(package.id, Arc::new(package));
        Ok(())
    }

    /// Insert or replace a binding. Among active bindings, addresses and
    /// client names are unique.
    pub fn upsert_client(&self, binding: ClientBinding) -> Result<(), CoreError> {
        if binding.client_name.trim().is_empty() {
            return Err(CoreError::Validation {
                message: format!("client {} has an empty name", binding.id),
            });
        }
        if binding.active {
            for other in self.clients.iter().filter(|c| c.active && c.id != binding.id) {
                if other.ip_cidr.address() == binding.ip_cidr.address() {
                    return Err(CoreError::Validation {
                        message: format!(
                            "address {} is already bound to '{}'",
                            binding.ip_cidr, other.client_name
                        ),
                    });
                }
                if other.client_name == binding.client_name {
                    return Err(CoreError::Validation {
                        message: format!("client name '{}' is already taken", binding.client_name),
                    });
                }
            }
        }
        debug!(id = binding.id, name = %binding.client_name, ip = %binding.ip_cidr, "storing client");
        self.clients.insert(binding.id, Arc::new(binding));
        Ok(())
    }

    pub fn remove_package(&self, id: PackageId) -> Option<Arc<BandwidthPackage>> {
        self.packages.remove(&id).map(|(_, p)| p)
    }

    pub fn remove_client(&self, id: ClientId) -> Option<Arc<ClientBinding>> {
        self.clients.remove(&id).map(|(_, c)| c)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn find_package(&self, pred: impl Fn(&BandwidthPackage) -> bool) -> Option<Arc<BandwidthPackage>> {
        self.packages
            .iter()
            .find(|p| pred(p.value()))
            .map(|p| Arc::clone(p.value()))
    }

    fn clients_where(&self, pred: impl Fn(&ClientBinding) -> bool) -> Vec<Arc<ClientBinding>> {
        let found = self
            .clients
            .iter()
            .filter(|c| pred(c.value()))
            .map(|c| Arc::clone(c.value()))
            .collect();
        sorted_by(found, |c| c.id)
    }
}

impl BillingStore for MemoryStore {
    async fn package_by_id(&self, id: PackageId) -> Result<Option<Arc<BandwidthPackage>>, CoreError> {
        Ok(self.packages.get(&id).map(|p| Arc::clone(p.value())))
    }

    async fn package_by_name(&self, name: &str) -> Result<Option<Arc<BandwidthPackage>>, CoreError> {
        Ok(self.find_package(|p| p.name == name))
    }

    async fn client(&self, lookup: &ClientLookup) -> Result<Option<Arc<ClientBinding>>, CoreError> {
        if let ClientLookup::Id(id) = lookup {
            return Ok(self.clients.get(id).map(|c| Arc::clone(c.value())));
        }
        // Prefer the active binding when an inactive one shares the key.
        let mut matches = self.clients_where(|c| lookup.matches(c));
        matches.sort_by_key(|c| !c.active);
        Ok(matches.into_iter().next())
    }

    async fn active_client_count(&self, package_id: PackageId) -> Result<usize, CoreError> {
        Ok(self
            .clients
            .iter()
            .filter(|c| c.active && c.package_id == package_id)
            .count())
    }

    async fn active_clients_for_package(
        &self,
        package_id: PackageId,
    ) -> Result<Vec<Arc<ClientBinding>>, CoreError> {
        Ok(self.clients_where(|c| c.active && c.package_id == package_id))
    }

    async fn packages(&self) -> Result<Vec<Arc<BandwidthPackage>>, CoreError> {
        let all = self.packages.iter().map(|p| Arc::clone(p.value())).collect();
        Ok(sorted_by(all, |p| p.id))
    }

    async fn active_clients(&self) -> Result<Vec<Arc<ClientBinding>>, CoreError> {
        Ok(self.clients_where(|c| c.active))
    }
}
