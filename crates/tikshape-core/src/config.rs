// ── Reconciliation settings ──
//
// How the engine lays queues out on the router. These never touch disk;
// tikshape-config builds one from the shaping section of the config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tikshape_api::{Chain, DEFAULT_LOOKUP_TTL};

/// Parent used for package queues with no configured upstream.
pub const DEFAULT_ROOT_PARENT: &str = "global";

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapingConfig {
    /// Root sentinel for package parents without an upstream parent.
    pub root_parent: String,
    /// How long facade lookups may be served from the pool cache.
    pub lookup_ttl: Duration,
    /// Chain the per-client marking rules are installed in.
    pub mangle_chain: Chain,
    /// Queue discipline for child queues whose package names none.
    pub default_queue_type: Option<String>,
    pub default_priority: Option<u8>,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            root_parent: DEFAULT_ROOT_PARENT.into(),
            lookup_ttl: DEFAULT_LOOKUP_TTL,
            mangle_chain: Chain::default(),
            default_queue_type: None,
            default_priority: None,
        }
    }
}
