// Device session pool
//
// One authenticated session per connection identity, opened lazily on
// first use and serialized through an async mutex. Read results can be
// cached per identity and command signature; any write clears the whole
// cache. Reads are retried once on a fresh session after a transport
// failure; writes are never retried. A rejected login is remembered per
// identity and fails fast until the session is closed, so a bad password
// costs one `/login` rather than one per command.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::auth::{ConnectionKey, DeviceConnection};
use crate::command::{Command, Reply};
use crate::error::Error;
use crate::session::Session;
use crate::transport::TransportConfig;

/// Whether a read may be answered from (and stored into) the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Always ask the router; store nothing.
    Bypass,
    /// Reuse a cached result younger than the TTL; store fresh results.
    Ttl(Duration),
}

struct CachedResult {
    reply: Arc<Reply>,
    expires_at: Instant,
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Pool counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Identities with an open session.
    pub sessions: usize,
    /// Cached read results, including expired ones not yet purged.
    pub cache_entries: usize,
}

/// Shared pool of router sessions. Construct once and inject as `Arc`.
pub struct SessionPool {
    transport: TransportConfig,
    sessions: DashMap<ConnectionKey, SessionSlot>,
    cache: DashMap<(ConnectionKey, String), CachedResult>,
    auth_failures: DashMap<ConnectionKey, String>,
}

impl SessionPool {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            sessions: DashMap::new(),
            cache: DashMap::new(),
            auth_failures: DashMap::new(),
        }
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Run `command` on the session for `connection`.
    pub async fn execute(
        &self,
        connection: &DeviceConnection,
        command: &Command,
        cache: CachePolicy,
    ) -> Result<Arc<Reply>, Error> {
        let key = connection.key();
        let is_read = command.is_read();
        let signature = command.signature();

        if is_read && matches!(cache, CachePolicy::Ttl(_)) {
            if let Some(hit) = self.cached(&key, &signature) {
                trace!(path = command.path(), "cache hit");
                return Ok(hit);
            }
        }

        let slot = self.slot(&key);
        let mut guard = slot.lock().await;
        let mut result = self.run(&mut guard, connection, command).await;
        let retry = match &result {
            Err(err) if is_read && err.is_transient() => {
                warn!(%connection, path = command.path(), error = %err, "read failed, retrying on a fresh session");
                true
            }
            _ => false,
        };
        if retry {
            result = self.run(&mut guard, connection, command).await;
        }
        drop(guard);

        if !is_read {
            // Even a failed write may have partially applied.
            self.clear_cache();
        }

        let reply = Arc::new(result?);
        if let (true, CachePolicy::Ttl(ttl)) = (is_read, cache) {
            self.cache.insert(
                (key, signature),
                CachedResult {
                    reply: Arc::clone(&reply),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(reply)
    }

    /// Open the session if needed, then run one command. Poisoned sessions
    /// are dropped so the next call reconnects, and so is a session whose
    /// previous caller was cancelled before its reply was read.
    async fn run(
        &self,
        slot: &mut Option<Session>,
        connection: &DeviceConnection,
        command: &Command,
    ) -> Result<Reply, Error> {
        if slot.as_ref().is_some_and(Session::is_in_flight) {
            warn!(%connection, "discarding session with an unread reply");
            *slot = None;
        }
        if slot.is_none() {
            *slot = Some(self.open(connection).await?);
        }
        let session = slot.as_mut().ok_or(Error::ConnectionClosed)?;
        debug!(%connection, path = command.path(), "executing command");
        let result = session.call(command).await;
        if result.as_ref().is_err_and(|err| err.poisons_session()) {
            debug!(%connection, path = command.path(), "dropping session");
            *slot = None;
        }
        result
    }

    async fn open(&self, connection: &DeviceConnection) -> Result<Session, Error> {
        let key = connection.key();
        if let Some(message) = self.auth_failures.get(&key) {
            trace!(%connection, "login previously rejected");
            return Err(Error::Authentication {
                message: message.value().clone(),
            });
        }
        debug!(%connection, "opening session");
        let result = Session::open(connection, &self.transport).await;
        if let Err(Error::Authentication { message }) = &result {
            warn!(%connection, "login rejected; further commands fail until the session is closed");
            self.auth_failures.insert(key, message.clone());
        }
        result
    }

    fn slot(&self, key: &ConnectionKey) -> SessionSlot {
        Arc::clone(self.sessions.entry(key.clone()).or_default().value())
    }

    fn cached(&self, key: &ConnectionKey, signature: &str) -> Option<Arc<Reply>> {
        let cache_key = (key.clone(), signature.to_owned());
        let entry = self.cache.get(&cache_key)?;
        if entry.expires_at > Instant::now() {
            return Some(Arc::clone(&entry.reply));
        }
        drop(entry);
        self.cache.remove(&cache_key);
        None
    }

    /// Drop every cached result for every identity.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Close sessions that have been idle longer than the configured limit.
    /// Busy sessions are skipped. Returns how many were closed.
    pub fn evict_idle(&self) -> usize {
        let limit = self.transport.idle_timeout;
        let mut closed = 0;
        for entry in &self.sessions {
            let Ok(mut guard) = entry.value().try_lock() else {
                continue;
            };
            if guard.as_ref().is_some_and(|s| s.idle_for() >= limit) {
                *guard = None;
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(closed, "evicted idle sessions");
        }
        closed
    }

    /// Close the session for one identity, waiting for in-flight work.
    /// Also forgets a rejected login so the next call tries again.
    pub async fn close(&self, connection: &DeviceConnection) {
        self.auth_failures.remove(&connection.key());
        let Some(slot) = self
            .sessions
            .get(&connection.key())
            .map(|e| Arc::clone(e.value()))
        else {
            return;
        };
        slot.lock().await.take();
    }

    pub fn stats(&self) -> PoolStats {
        let sessions = self
            .sessions
            .iter()
            .filter(|e| e.value().try_lock().map_or(true, |g| g.is_some()))
            .count();
        PoolStats {
            sessions,
            cache_entries: self.cache.len(),
        }
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use futures_util::FutureExt;
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::*;
    use crate::mock::MockRouter;

    fn pool() -> SessionPool {
        SessionPool::new(TransportConfig::default().with_timeout(Duration::from_secs(5)))
    }

    const TTL: CachePolicy = CachePolicy::Ttl(Duration::from_secs(10));

    fn print_queues() -> Command {
        Command::print("/queue/tree")
    }

    #[tokio::test]
    async fn cached_read_skips_the_router() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();

        pool.execute(&conn, &print_queues(), TTL).await.unwrap();
        let after_first = router.command_count();
        pool.execute(&conn, &print_queues(), TTL).await.unwrap();
        assert_eq!(router.command_count(), after_first);
        assert_eq!(pool.stats().cache_entries, 1);
    }

    #[tokio::test]
    async fn bypass_always_reaches_the_router() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();

        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        assert_eq!(router.command_count(), 2);
        assert_eq!(pool.stats().cache_entries, 0);
    }

    #[tokio::test]
    async fn one_login_per_identity() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();

        for _ in 0..3 {
            pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        }
        assert_eq!(router.login_count(), 1);
        assert_eq!(pool.stats().sessions, 1);
    }

    #[tokio::test]
    async fn write_clears_cache_so_next_read_is_fresh() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();

        let before = pool.execute(&conn, &print_queues(), TTL).await.unwrap();
        assert!(before.is_empty());

        let add = Command::add("/queue/tree")
            .attr("name", "PAKET-10")
            .attr("parent", "global");
        pool.execute(&conn, &add, TTL).await.unwrap();
        assert_eq!(pool.stats().cache_entries, 0);

        let after = pool.execute(&conn, &print_queues(), TTL).await.unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();
        let short = CachePolicy::Ttl(Duration::from_millis(20));

        pool.execute(&conn, &print_queues(), short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        pool.execute(&conn, &print_queues(), short).await.unwrap();
        assert_eq!(router.command_count(), 2);
    }

    #[tokio::test]
    async fn read_is_retried_after_dropped_connection() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();

        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        router.drop_connections();
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        assert_eq!(router.login_count(), 2);
    }

    #[tokio::test]
    async fn write_after_dropped_connection_is_not_retried() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let conn = router.connection();

        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        router.drop_connections();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let add = Command::add("/queue/tree")
            .attr("name", "PAKET-10")
            .attr("parent", "global");
        let err = pool.execute(&conn, &add, CachePolicy::Bypass).await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
        assert!(router.table("/queue/tree").is_empty());

        // The next call reconnects.
        pool.execute(&conn, &add, CachePolicy::Bypass).await.unwrap();
        assert_eq!(router.table("/queue/tree").len(), 1);
    }

    #[tokio::test]
    async fn wrong_password_is_an_auth_error() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let mut conn = router.connection();
        conn.password = SecretString::from("wrong".to_owned());

        let err = pool
            .execute(&conn, &print_queues(), CachePolicy::Bypass)
            .await
            .unwrap_err();
        assert!(err.is_auth(), "got {err:?}");
        assert_eq!(pool.stats().sessions, 0);
    }

    #[tokio::test]
    async fn rejected_login_is_not_repeated() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let mut conn = router.connection();
        conn.password = SecretString::from("wrong".to_owned());

        for _ in 0..3 {
            let err = pool
                .execute(&conn, &print_queues(), CachePolicy::Bypass)
                .await
                .unwrap_err();
            assert!(err.is_auth(), "got {err:?}");
        }
        assert_eq!(router.rejected_login_count(), 1);

        pool.close(&conn).await;
        let err = pool
            .execute(&conn, &print_queues(), CachePolicy::Bypass)
            .await
            .unwrap_err();
        assert!(err.is_auth(), "got {err:?}");
        assert_eq!(router.rejected_login_count(), 2);
    }

    #[tokio::test]
    async fn corrected_password_is_a_new_identity() {
        let router = MockRouter::start().await.unwrap();
        let pool = pool();
        let good = router.connection();
        let mut bad = good.clone();
        bad.password = SecretString::from("wrong".to_owned());

        pool.execute(&bad, &print_queues(), CachePolicy::Bypass)
            .await
            .unwrap_err();
        pool.execute(&good, &print_queues(), CachePolicy::Bypass)
            .await
            .unwrap();
        assert_eq!(router.login_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_call_does_not_leak_its_reply() {
        let router = MockRouter::start().await.unwrap();
        router.insert("/queue/tree", &[("name", "PAKET-10"), ("parent", "global")]);
        router.insert("/queue/tree", &[("name", "Budi"), ("parent", "PAKET-10")]);
        let pool = pool();
        let conn = router.connection();
        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();

        // One poll sends the command; the router task cannot answer before
        // the future is dropped on this single-threaded runtime.
        let identity = Command::print("/system/identity");
        let abandoned = pool
            .execute(&conn, &identity, CachePolicy::Bypass)
            .now_or_never();
        assert!(abandoned.is_none());

        let reply = pool
            .execute(&conn, &print_queues(), CachePolicy::Bypass)
            .await
            .unwrap();
        let names: Vec<_> = reply.records().iter().filter_map(|r| r.get("name")).collect();
        assert_eq!(names, ["PAKET-10", "Budi"]);
        assert_eq!(router.login_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_session() {
        let router = MockRouter::start().await.unwrap();
        router.insert("/queue/tree", &[("name", "PAKET-10"), ("parent", "global")]);
        router.insert("/queue/tree", &[("name", "Budi"), ("parent", "PAKET-10")]);
        router.insert(
            "/ip/address",
            &[("address", "192.168.5.1/30"), ("interface", "ether2")],
        );
        let pool = Arc::new(pool());
        let conn = router.connection();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let conn = conn.clone();
                tokio::spawn(async move {
                    let (menu, rows, key, first) = match i % 3 {
                        0 => ("/queue/tree", 2, "name", "PAKET-10"),
                        1 => ("/system/identity", 1, "name", "MockRouter"),
                        _ => ("/ip/address", 1, "interface", "ether2"),
                    };
                    let reply = pool
                        .execute(&conn, &Command::print(menu), CachePolicy::Bypass)
                        .await
                        .unwrap();
                    assert_eq!(reply.len(), rows, "{menu}");
                    assert_eq!(reply.first().and_then(|r| r.get(key)), Some(first), "{menu}");
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(router.login_count(), 1);
        assert_eq!(router.command_count(), 20);
        assert_eq!(pool.stats().sessions, 1);
    }

    #[tokio::test]
    async fn identities_do_not_share_cache() {
        let router_a = MockRouter::start().await.unwrap();
        let router_b = MockRouter::start().await.unwrap();
        router_b.insert("/queue/tree", &[("name", "PAKET-20"), ("parent", "global")]);
        let pool = pool();

        let a = pool
            .execute(&router_a.connection(), &print_queues(), TTL)
            .await
            .unwrap();
        let b = pool
            .execute(&router_b.connection(), &print_queues(), TTL)
            .await
            .unwrap();
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let router = MockRouter::start().await.unwrap();
        let pool = SessionPool::new(
            TransportConfig::default().with_idle_timeout(Duration::from_millis(10)),
        );
        let conn = router.connection();

        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.evict_idle(), 1);
        assert_eq!(pool.stats().sessions, 0);

        pool.execute(&conn, &print_queues(), CachePolicy::Bypass).await.unwrap();
        assert_eq!(router.login_count(), 2);
    }
}
