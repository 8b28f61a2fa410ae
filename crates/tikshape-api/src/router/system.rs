// System endpoints
//
// Reachability probe used by operators before a bulk resync.

use tracing::debug;

use crate::command::Command;
use crate::error::Error;
use crate::pool::CachePolicy;
use crate::router::RouterClient;

impl RouterClient {
    /// The router's system identity.
    ///
    /// `/system/identity/print`, never cached, so it doubles as a liveness
    /// check for the pooled session.
    pub async fn identity(&self) -> Result<String, Error> {
        debug!("fetching system identity");
        let reply = self
            .execute(&Command::print("/system/identity"), CachePolicy::Bypass)
            .await?;
        reply
            .first()
            .and_then(|r| r.get("name"))
            .map(str::to_owned)
            .ok_or_else(|| Error::Protocol("identity reply carried no name".into()))
    }
}
