// ── Domain model ──
//
// Billing-side view of packages and client bindings. Router-side rows
// live in `tikshape_api::router::models`.

pub mod client;
pub mod package;

/// Billing store key of a bandwidth package.
pub type PackageId = u64;
/// Billing store key of a client binding.
pub type ClientId = u64;

pub use client::{ClientBinding, ClientLookup};
pub use package::{BandwidthPackage, ChildLimits, ChildQueueTemplate, Direction, fair_share};
