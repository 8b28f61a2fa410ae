// tikshape-core: Bandwidth-queue reconciliation between a billing store and a RouterOS router.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod net;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DEFAULT_ROOT_PARENT, ShapingConfig};
pub use engine::{
    AddressAction, ChildQueue, CleanupReport, ParentAction, ParentReport, Reconciler,
    SyncAllReport, SyncFailure, SyncOptions, SyncReport, SyncRequest,
};
pub use error::{CoreError, SyncStep};
pub use model::{
    BandwidthPackage, ChildLimits, ChildQueueTemplate, ClientBinding, ClientId, ClientLookup,
    Direction, PackageId, fair_share,
};
pub use net::Cidr;
pub use store::{BillingStore, MemoryStore};
