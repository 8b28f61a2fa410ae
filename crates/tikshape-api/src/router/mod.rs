// Device command facade
//
// `RouterClient` binds a pooled connection to the narrow set of operations
// the shaping engine needs. Lookups are cached reads; every mutation goes
// through the pool uncached and clears the cache. Endpoint groups live in
// separate files as inherent methods.

mod address;
mod mangle;
pub mod models;
mod queue;
mod system;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::DeviceConnection;
use crate::command::{Command, Reply};
use crate::error::Error;
use crate::pool::{CachePolicy, SessionPool};
use crate::request::Chain;

pub use queue::name_references;

/// How long facade lookups may be answered from the pool cache.
pub const DEFAULT_LOOKUP_TTL: Duration = Duration::from_secs(10);

/// Typed operations against one router.
#[derive(Clone)]
pub struct RouterClient {
    pool: Arc<SessionPool>,
    connection: DeviceConnection,
    lookup_ttl: Duration,
    mangle_chain: Chain,
}

impl RouterClient {
    pub fn new(pool: Arc<SessionPool>, connection: DeviceConnection) -> Self {
        Self {
            pool,
            connection,
            lookup_ttl: DEFAULT_LOOKUP_TTL,
            mangle_chain: Chain::default(),
        }
    }

    pub fn with_lookup_ttl(mut self, ttl: Duration) -> Self {
        self.lookup_ttl = ttl;
        self
    }

    /// Chain the marking rules are attached to (default `forward`).
    pub fn with_mangle_chain(mut self, chain: Chain) -> Self {
        self.mangle_chain = chain;
        self
    }

    pub fn connection(&self) -> &DeviceConnection {
        &self.connection
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Run an arbitrary command through the pool.
    pub async fn execute(&self, command: &Command, cache: CachePolicy) -> Result<Arc<Reply>, Error> {
        self.pool.execute(&self.connection, command, cache).await
    }

    async fn lookup(&self, command: &Command) -> Result<Arc<Reply>, Error> {
        self.execute(command, CachePolicy::Ttl(self.lookup_ttl)).await
    }

    async fn mutate(&self, command: &Command) -> Result<Arc<Reply>, Error> {
        self.execute(command, CachePolicy::Bypass).await
    }
}

impl std::fmt::Debug for RouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterClient")
            .field("connection", &self.connection.to_string())
            .field("lookup_ttl", &self.lookup_ttl)
            .field("mangle_chain", &self.mangle_chain)
            .finish_non_exhaustive()
    }
}
