//! Connection caches
//!
//! One generic cache serves both directions: inbound connections are keyed
//! by the acceptor that produced them, outbound ones by the contact info
//! they were opened for. A connection handed out by `get` is marked busy
//! and is never handed to a second caller until released.

use crate::connection::Connection;
use crate::contact_info::ContactInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Notified when an owned connection closes
pub trait ConnectionOwner: Send + Sync {
    fn connection_closed(&self, connection_id: u64);
}

/// Identity of an acceptor, the key of the inbound cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcceptorId(pub usize);

impl fmt::Display for AcceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acceptor-{}", self.0)
    }
}

pub type InboundConnectionCache = ConnectionCache<AcceptorId>;
pub type OutboundConnectionCache = ConnectionCache<ContactInfo>;

pub struct ConnectionCache<K> {
    name: String,
    entries: Mutex<HashMap<K, Vec<Arc<Connection>>>>,
    idle_timeout: Duration,
    max_reclaim_per_pass: usize,
    weak_self: Weak<Self>,
}

impl<K> ConnectionCache<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, idle_timeout: Duration, max_reclaim_per_pass: usize) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak_self| Self {
            name,
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
            max_reclaim_per_pass,
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// An open, idle connection for `key`, already marked busy
    pub fn get(&self, key: &K) -> Option<Arc<Connection>> {
        let entries = self.entries.lock();
        let connection = entries
            .get(key)?
            .iter()
            .find(|conn| conn.is_open() && conn.try_acquire())?
            .clone();
        connection.touch();
        trace!("{}: reusing connection {} for {:?}", self.name, connection.id(), key);
        Some(connection)
    }

    pub fn put(&self, key: K, connection: Arc<Connection>) {
        let owner: Weak<dyn ConnectionOwner> = self.weak_self.clone();
        connection.set_owner(owner);
        debug!("{}: caching connection {} for {:?}", self.name, connection.id(), key);
        self.entries.lock().entry(key).or_default().push(connection);
    }

    /// Give a connection obtained from `get` back to the cache
    pub fn release(&self, connection: &Connection) {
        connection.release();
    }

    /// Forget a connection without closing it
    pub fn remove(&self, connection: &Connection) -> bool {
        self.remove_by_id(connection.id())
    }

    fn remove_by_id(&self, connection_id: u64) -> bool {
        let mut entries = self.entries.lock();
        let mut removed = false;
        entries.retain(|_, conns| {
            let before = conns.len();
            conns.retain(|conn| conn.id() != connection_id);
            removed |= conns.len() != before;
            !conns.is_empty()
        });
        removed
    }

    /// Close up to `max_reclaim_per_pass` idle connections.
    ///
    /// Busy connections are never touched. Returns whether anything was
    /// closed.
    pub fn reclaim(&self) -> bool {
        let mut victims = Vec::new();
        {
            let mut entries = self.entries.lock();
            entries.retain(|_, conns| {
                conns.retain(|conn| {
                    if conn.is_closed() {
                        return false;
                    }
                    if victims.len() >= self.max_reclaim_per_pass
                        || conn.idle_for() <= self.idle_timeout
                        || conn.has_outstanding_work()
                    {
                        return true;
                    }
                    // Claiming it keeps a concurrent `get` from handing it out
                    if !conn.try_acquire() {
                        return true;
                    }
                    if conn.has_outstanding_work() {
                        conn.release();
                        return true;
                    }
                    victims.push(conn.clone());
                    false
                });
                !conns.is_empty()
            });
        }

        for conn in &victims {
            debug!(
                "{}: reclaiming connection {} idle for {:?}",
                self.name,
                conn.id(),
                conn.idle_for()
            );
            conn.close();
        }
        if !victims.is_empty() {
            info!("{}: reclaimed {} connections", self.name, victims.len());
        }
        !victims.is_empty()
    }

    /// Close every cached connection
    pub fn close_all(&self) {
        let all: Vec<Arc<Connection>> = self
            .entries
            .lock()
            .drain()
            .flat_map(|(_, conns)| conns)
            .collect();
        if !all.is_empty() {
            debug!("{}: closing {} connections", self.name, all.len());
        }
        for conn in all {
            conn.close();
        }
    }

    pub fn number_of_connections(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    pub fn number_of_idle_connections(&self) -> usize {
        self.count(|conn| !conn.is_busy())
    }

    pub fn number_of_busy_connections(&self) -> usize {
        self.count(|conn| conn.is_busy())
    }

    fn count(&self, pred: impl Fn(&Connection) -> bool) -> usize {
        self.entries
            .lock()
            .values()
            .flat_map(|conns| conns.iter())
            .filter(|conn| pred(conn))
            .count()
    }
}

impl<K> ConnectionOwner for ConnectionCache<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn connection_closed(&self, connection_id: u64) {
        if self.remove_by_id(connection_id) {
            trace!("{}: dropped closed connection {}", self.name, connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::endpoint::Endpoint;
    use tokio::io::{duplex, split, DuplexStream};
    use tokio::time::Instant;

    /// Keeps the remote ends alive for the duration of a test
    struct Fixture {
        _remotes: Vec<DuplexStream>,
    }

    fn connection(fixture: &mut Fixture) -> Arc<Connection> {
        let (local, remote) = duplex(1024);
        fixture._remotes.push(remote);
        let (r, w) = split(local);
        let conn = Connection::from_parts(r, w, Endpoint::iiop("127.0.0.1", 2809), ConnectionOptions::client());
        conn.open();
        conn
    }

    fn long_ago() -> Instant {
        Instant::now() - Duration::from_secs(10)
    }

    #[tokio::test]
    async fn test_get_marks_busy() {
        let mut fx = Fixture { _remotes: Vec::new() };
        let cache = InboundConnectionCache::new("inbound", Duration::from_secs(1), 4);
        let conn = connection(&mut fx);
        cache.put(AcceptorId(1), conn.clone());

        let got = cache.get(&AcceptorId(1)).unwrap();
        assert_eq!(got.id(), conn.id());
        assert!(cache.get(&AcceptorId(1)).is_none());
        assert_eq!(cache.number_of_busy_connections(), 1);

        cache.release(&got);
        assert_eq!(cache.number_of_idle_connections(), 1);
        assert!(cache.get(&AcceptorId(2)).is_none());
        assert!(cache.get(&AcceptorId(1)).is_some());
    }

    #[tokio::test]
    async fn test_reclaim_skips_busy_and_recent() {
        let mut fx = Fixture { _remotes: Vec::new() };
        let cache = InboundConnectionCache::new("inbound", Duration::from_secs(1), 16);

        let busy = connection(&mut fx);
        let idle = connection(&mut fx);
        let recent = connection(&mut fx);
        for conn in [&busy, &idle, &recent] {
            cache.put(AcceptorId(1), conn.clone());
        }
        assert!(busy.try_acquire());
        busy.set_last_used(long_ago());
        idle.set_last_used(long_ago());

        assert!(cache.reclaim());
        assert!(idle.is_closed());
        assert!(!busy.is_closed());
        assert!(!recent.is_closed());
        assert_eq!(cache.number_of_connections(), 2);

        assert!(!cache.reclaim());
    }

    #[tokio::test]
    async fn test_reclaim_skips_connection_awaiting_reply() {
        let mut fx = Fixture { _remotes: Vec::new() };
        let cache = InboundConnectionCache::new("inbound", Duration::from_millis(50), 4);
        let conn = connection(&mut fx);
        cache.put(AcceptorId(1), conn.clone());

        // Unclaimed, idle by the clock, but a reply is still expected
        let _pending = conn.register_waiter(9).unwrap();
        conn.set_last_used(long_ago());
        assert!(conn.is_busy());
        assert!(!cache.reclaim());
        assert!(!conn.is_closed());
        // Reclaim must not keep the claim it took
        assert!(conn.try_acquire());
        conn.release();

        assert!(conn.unregister_waiter(9));
        assert!(!conn.is_busy());
        assert!(cache.reclaim());
        assert!(conn.is_closed());
        assert_eq!(cache.number_of_connections(), 0);
    }

    #[tokio::test]
    async fn test_reclaim_is_batched() {
        let mut fx = Fixture { _remotes: Vec::new() };
        let cache = InboundConnectionCache::new("inbound", Duration::from_secs(1), 2);
        let conns: Vec<_> = (0..5).map(|_| connection(&mut fx)).collect();
        for conn in &conns {
            conn.set_last_used(long_ago());
            cache.put(AcceptorId(1), conn.clone());
        }

        assert!(cache.reclaim());
        assert_eq!(cache.number_of_connections(), 3);
        assert!(cache.reclaim());
        assert!(cache.reclaim());
        assert_eq!(cache.number_of_connections(), 0);
        assert!(!cache.reclaim());
    }

    #[tokio::test]
    async fn test_closed_connection_leaves_cache() {
        let mut fx = Fixture { _remotes: Vec::new() };
        let cache = InboundConnectionCache::new("inbound", Duration::from_secs(60), 4);
        let a = connection(&mut fx);
        let b = connection(&mut fx);
        cache.put(AcceptorId(1), a.clone());
        cache.put(AcceptorId(2), b.clone());

        a.close();
        assert_eq!(cache.number_of_connections(), 1);
        assert!(cache.get(&AcceptorId(1)).is_none());

        assert!(cache.remove(&b));
        assert!(!cache.remove(&b));
        assert_eq!(cache.number_of_connections(), 0);
        assert!(!b.is_closed());
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut fx = Fixture { _remotes: Vec::new() };
        let cache = InboundConnectionCache::new("inbound", Duration::from_secs(60), 4);
        let conns: Vec<_> = (0..3).map(|_| connection(&mut fx)).collect();
        for conn in &conns {
            cache.put(AcceptorId(7), conn.clone());
        }
        cache.close_all();
        assert_eq!(cache.number_of_connections(), 0);
        assert!(conns.iter().all(|c| c.is_closed()));
    }
}
