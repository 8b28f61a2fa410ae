// ── Reconciliation outcomes ──
//
// Serializable summaries of what a run did on the router, rendered by
// the CLI as tables or JSON.

use serde::Serialize;
use tikshape_api::Rate;

use crate::error::SyncStep;
use crate::model::Direction;

/// What happened to one package parent node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ParentAction {
    Created { id: String },
    Updated { id: String },
    Renamed { id: String, from: String },
}

impl ParentAction {
    pub fn id(&self) -> &str {
        match self {
            Self::Created { id } | Self::Updated { id } | Self::Renamed { id, .. } => id,
        }
    }
}

/// Both parent nodes of a package after [`ensure_package_parents`].
///
/// [`ensure_package_parents`]: crate::Reconciler::ensure_package_parents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentReport {
    pub package: String,
    pub download: ParentAction,
    pub upload: ParentAction,
}

/// What happened to the client's `/ip/address` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AddressAction {
    Added,
    Updated,
    Unchanged,
    /// No interface known, binding left to the operator.
    Skipped,
}

/// A child queue as created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildQueue {
    pub direction: Direction,
    pub id: String,
    pub name: String,
    pub parent: String,
    pub packet_mark: String,
    pub max_limit: Rate,
    pub limit_at: Option<Rate>,
}

/// Result of a completed client sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub client_name: String,
    pub package: String,
    pub ip_cidr: String,
    pub peer: String,
    pub parents: ParentReport,
    pub address: AddressAction,
    /// Stale queues removed by name or packet mark before re-creation.
    pub queues_removed: usize,
    pub mangle_rules_replaced: usize,
    pub download: ChildQueue,
    pub upload: ChildQueue,
    /// Anomalies tolerated during the run (over-subscription and the like).
    pub warnings: Vec<String>,
}

/// Result of tearing a client binding down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub client_name: String,
    pub ip_cidr: String,
    pub peer: String,
    pub address_removed: bool,
    pub mangle_rules_removed: usize,
    pub queues_removed: usize,
}

impl CleanupReport {
    /// Nothing was found on the router.
    pub fn is_noop(&self) -> bool {
        !self.address_removed && self.mangle_rules_removed == 0 && self.queues_removed == 0
    }
}

/// A binding `sync_all` could not reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub client_name: String,
    pub step: Option<SyncStep>,
    pub error: String,
    pub retryable: bool,
}

/// Outcome of a bulk resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncAllReport {
    pub synced: Vec<SyncReport>,
    pub failed: Vec<SyncFailure>,
}

impl SyncAllReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
