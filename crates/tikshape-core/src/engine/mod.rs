// ── Reconciliation engine ──
//
// Drives the router's queue tree, marking rules, and address bindings
// towards what the billing store says. There are no device-side
// transactions: every run cleans up whatever could be stale, then
// recreates, so re-running a sync converges.

mod delete;
mod parents;
mod report;
mod sync;

use serde::{Deserialize, Serialize};
use tikshape_api::{Rate, RouterClient};

use crate::config::ShapingConfig;
use crate::model::{ClientBinding, Direction, PackageId};
use crate::store::BillingStore;

pub use report::{
    AddressAction, ChildQueue, CleanupReport, ParentAction, ParentReport, SyncAllReport,
    SyncFailure, SyncReport,
};

/// Optional inputs to a client sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Name the client had before an edit; its queues are removed too.
    pub previous_client_name: Option<String>,
    /// Address the client had before an edit; its binding and marking
    /// rules are removed.
    pub previous_ip_cidr: Option<String>,
    /// Interface for the address binding. Falls back to the binding record.
    pub interface: Option<String>,
    pub download_limit: Option<Rate>,
    pub upload_limit: Option<Rate>,
    pub download_limit_at: Option<Rate>,
    pub upload_limit_at: Option<Rate>,
}

impl SyncOptions {
    pub(crate) fn limit_override(&self, direction: Direction) -> Option<Rate> {
        match direction {
            Direction::Download => self.download_limit,
            Direction::Upload => self.upload_limit,
        }
    }

    pub(crate) fn limit_at_override(&self, direction: Direction) -> Option<Rate> {
        match direction {
            Direction::Download => self.download_limit_at,
            Direction::Upload => self.upload_limit_at,
        }
    }
}

/// One client to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub client_name: String,
    pub package_id: PackageId,
    /// `a.b.c.d/p`; a bare address is read as `/30`.
    pub ip_cidr: String,
    #[serde(default)]
    pub options: SyncOptions,
}

impl SyncRequest {
    pub fn new(client_name: impl Into<String>, package_id: PackageId, ip_cidr: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            package_id,
            ip_cidr: ip_cidr.into(),
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// The request a stored binding describes, interface included.
    pub fn for_binding(binding: &ClientBinding) -> Self {
        Self::new(
            binding.client_name.clone(),
            binding.package_id,
            binding.ip_cidr.to_string(),
        )
        .with_options(SyncOptions {
            interface: binding.interface.clone(),
            ..SyncOptions::default()
        })
    }
}

/// The engine. Holds no state of its own beyond the router handle (and
/// through it the shared session pool) and the billing store.
pub struct Reconciler<S> {
    router: RouterClient,
    store: S,
    config: ShapingConfig,
}

impl<S: BillingStore> Reconciler<S> {
    pub fn new(router: RouterClient, store: S, config: ShapingConfig) -> Self {
        let router = router
            .with_lookup_ttl(config.lookup_ttl)
            .with_mangle_chain(config.mangle_chain);
        Self {
            router,
            store,
            config,
        }
    }

    pub fn router(&self) -> &RouterClient {
        &self.router
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ShapingConfig {
        &self.config
    }
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
