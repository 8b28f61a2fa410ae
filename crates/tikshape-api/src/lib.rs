// tikshape-api: Async Rust client for the RouterOS API (pooled sessions, typed commands)

pub mod auth;
pub mod command;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod request;
pub mod router;
mod session;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use auth::{ConnectionKey, DEFAULT_PORT, DEFAULT_TLS_PORT, DeviceConnection};
pub use command::{Command, Record, Reply};
pub use error::Error;
pub use pool::{CachePolicy, PoolStats, SessionPool};
pub use request::{
    AddressMatch, AddressSpec, AddressUpdate, Burst, Chain, MangleRuleSpec, ParseRateError,
    QueueTreeSpec, QueueTreeUpdate, Rate, RateUnit,
};
pub use router::models::{AddressEntry, MangleEntry, QueueEntry};
pub use router::{DEFAULT_LOOKUP_TTL, RouterClient, name_references};
pub use transport::{TlsMode, TransportConfig};
