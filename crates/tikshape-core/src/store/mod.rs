// ── Billing store ──
//
// The engine reads packages and client bindings through `BillingStore`;
// the billing database behind it is somebody else's. `MemoryStore` backs
// the CLI inventory file and the tests.

mod memory;

use std::future::Future;
use std::sync::Arc;

use crate::error::CoreError;
use crate::model::{BandwidthPackage, ClientBinding, ClientLookup, PackageId};

pub use memory::MemoryStore;

/// Read access to billing data.
pub trait BillingStore: Send + Sync {
    fn package_by_id(
        &self,
        id: PackageId,
    ) -> impl Future<Output = Result<Option<Arc<BandwidthPackage>>, CoreError>> + Send;

    fn package_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Arc<BandwidthPackage>>, CoreError>> + Send;

    /// Look a binding up by id, name, or address. Inactive bindings are
    /// returned too; callers decide what to do with them.
    fn client(
        &self,
        lookup: &ClientLookup,
    ) -> impl Future<Output = Result<Option<Arc<ClientBinding>>, CoreError>> + Send;

    fn active_client_count(
        &self,
        package_id: PackageId,
    ) -> impl Future<Output = Result<usize, CoreError>> + Send;

    fn active_clients_for_package(
        &self,
        package_id: PackageId,
    ) -> impl Future<Output = Result<Vec<Arc<ClientBinding>>, CoreError>> + Send;

    fn packages(&self) -> impl Future<Output = Result<Vec<Arc<BandwidthPackage>>, CoreError>> + Send;

    fn active_clients(&self) -> impl Future<Output = Result<Vec<Arc<ClientBinding>>, CoreError>> + Send;
}
