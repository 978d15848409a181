use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::lock;
use crate::session::Session;
use crate::transport::Connector;
use crate::transport::ws::WsConnector;

/// Shares one [`Session`] per endpoint among every component that acquires it.
///
/// The first acquire for an endpoint builds the session and starts its
/// transport; the last release tears it down. A later acquire starts over
/// with a fresh session.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

struct PoolEntry {
    session: Session,
    observers: usize,
}

impl SessionPool {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_websocket(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(WsConnector::new()))
    }

    /// Take a reference to the session for `endpoint`, creating and
    /// connecting it if this is the first observer. Must be called from
    /// within a tokio runtime.
    pub fn acquire(&self, endpoint: &str) -> PooledSession {
        let mut entries = lock(&self.inner.entries);
        let entry = entries.entry(endpoint.to_string()).or_insert_with(|| {
            info!(endpoint, "creating pooled session");
            let session = Session::new(
                endpoint,
                self.inner.config.clone(),
                Arc::clone(&self.inner.connector),
            );
            session.open_now();
            PoolEntry {
                session,
                observers: 0,
            }
        });
        entry.observers += 1;
        debug!(endpoint, observers = entry.observers, "session acquired");

        PooledSession {
            session: entry.session.clone(),
            pool: Arc::clone(&self.inner),
            endpoint: endpoint.to_string(),
        }
    }

    /// Current observer count for `endpoint`; zero when no session exists.
    pub fn observers(&self, endpoint: &str) -> usize {
        lock(&self.inner.entries)
            .get(endpoint)
            .map_or(0, |entry| entry.observers)
    }

    /// Number of endpoints with a live session.
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.entries).is_empty()
    }
}

impl PoolInner {
    fn release(&self, endpoint: &str) {
        let discarded = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(endpoint) else {
                return;
            };
            entry.observers = entry.observers.saturating_sub(1);
            debug!(endpoint, observers = entry.observers, "session released");
            if entry.observers > 0 {
                return;
            }
            entries.remove(endpoint)
        };

        if let Some(entry) = discarded {
            info!(endpoint, "last observer gone, closing session");
            entry.session.teardown();
        }
    }
}

/// A counted reference to a pooled [`Session`]. Dropping it releases the
/// reference.
pub struct PooledSession {
    session: Session,
    pool: Arc<PoolInner>,
    endpoint: String,
}

impl PooledSession {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.pool.release(&self.endpoint);
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("endpoint", &self.endpoint)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use crate::transport::TransportCommand;
    use crate::transport::loopback::LoopbackConnector;
    use serde_json::json;

    fn pool() -> (SessionPool, Arc<LoopbackConnector>) {
        let connector = Arc::new(LoopbackConnector::new());
        let pool = SessionPool::new(ClientConfig::default(), connector.clone());
        (pool, connector)
    }

    #[tokio::test]
    async fn observers_share_one_session() {
        let (pool, connector) = pool();
        let first = pool.acquire("loop://a");
        let second = pool.acquire("loop://a");

        assert_eq!(pool.observers("loop://a"), 2);
        let _peer = connector.accept().await.unwrap();
        assert!(connector.try_accept().is_none(), "one transport per endpoint");
        assert_eq!(first.state(), ConnectionState::Connecting);
        assert_eq!(second.endpoint(), "loop://a");

        drop(first);
        assert_eq!(pool.observers("loop://a"), 1);
        assert_eq!(second.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn last_release_tears_down() {
        let (pool, connector) = pool();
        let handle = pool.acquire("loop://a");
        let mut peer = connector.accept().await.unwrap();
        peer.open();
        handle.wait_open().await.unwrap();

        let session = handle.session().clone();
        drop(handle);
        assert!(pool.is_empty());
        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(peer.next_command().await, Some(TransportCommand::Close));
    }

    #[tokio::test]
    async fn reacquire_after_teardown_builds_fresh_session() {
        let (pool, connector) = pool();
        let stale = pool.acquire("loop://a").session().clone();
        let _first_peer = connector.accept().await.unwrap();
        assert!(pool.is_empty());

        let handle = pool.acquire("loop://a");
        let mut peer = connector.accept().await.expect("new transport");
        peer.open();
        handle.wait_open().await.unwrap();
        assert_eq!(stale.state(), ConnectionState::Closed);

        let call = {
            let session = handle.session().clone();
            tokio::spawn(async move { session.send("ECHO", Some(json!(1))).await })
        };
        let request = peer.next_envelope().await.unwrap();
        peer.push_json(&json!({
            "key": "ECHO",
            "payload": 1,
            "transaction_id": request.transaction_id,
        }));
        assert_eq!(call.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn endpoints_are_independent() {
        let (pool, connector) = pool();
        let a = pool.acquire("loop://a");
        let b = pool.acquire("loop://b");
        assert_eq!(pool.len(), 2);

        let first_peer = connector.accept().await.unwrap();
        let second_peer = connector.accept().await.unwrap();
        let mut endpoints = vec![first_peer.endpoint(), second_peer.endpoint()];
        endpoints.sort();
        assert_eq!(endpoints, vec!["loop://a", "loop://b"]);

        drop(a);
        assert_eq!(pool.len(), 1);
        assert_eq!(b.state(), ConnectionState::Connecting);
    }
}
