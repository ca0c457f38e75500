//! Connection and in-flight request accounting.
//!
//! Every accepted TCP connection is registered with a small record holding its
//! peer address, age and number of requests currently being processed. The
//! listener consults it for logging and the binary uses it to wait, bounded,
//! for in-flight requests after the server stopped accepting.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::time::sleep;

/// Unique identifier for a connection
pub type ConnectionId = u64;

/// Information about an accepted connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub established_at: Instant,
    active_requests: AtomicU64,
    tracker_requests: Arc<AtomicU64>,
}

impl ConnectionInfo {
    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        self.active_request_count() == 0
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    /// Mark a request as in flight until the returned guard is dropped
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        self.tracker_requests.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            connection: self.clone(),
        }
    }
}

/// Keeps a request counted as in flight while alive
#[derive(Debug)]
pub struct RequestGuard {
    connection: Arc<ConnectionInfo>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.connection
            .active_requests
            .fetch_sub(1, Ordering::Relaxed);
        self.connection
            .tracker_requests
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Tracks open connections and in-flight requests for one listener
#[derive(Debug, Clone)]
pub struct RequestTracker {
    connections: Arc<DashMap<ConnectionId, Arc<ConnectionInfo>>>,
    next_id: Arc<AtomicU64>,
    active_requests: Arc<AtomicU64>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            active_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new connection and return its record
    pub fn register_connection(&self, remote_addr: SocketAddr) -> Arc<ConnectionInfo> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = Arc::new(ConnectionInfo {
            id,
            remote_addr,
            established_at: Instant::now(),
            active_requests: AtomicU64::new(0),
            tracker_requests: self.active_requests.clone(),
        });
        self.connections.insert(id, info.clone());

        tracing::debug!(
            "Connection registered: id={}, remote_addr={}, total_connections={}",
            id,
            remote_addr,
            self.connections.len()
        );
        info
    }

    pub fn unregister_connection(&self, connection_id: ConnectionId) {
        if let Some((_, info)) = self.connections.remove(&connection_id) {
            tracing::debug!(
                "Connection closed: id={}, age={:?}, total_connections={}",
                connection_id,
                info.age(),
                self.connections.len()
            );
        }
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Requests currently being processed across all connections
    pub fn total_active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn has_active_requests(&self) -> bool {
        self.total_active_requests() > 0
    }

    /// Wait until no request is in flight or the timeout elapses.
    ///
    /// Returns whether everything drained in time.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut check_interval = Duration::from_millis(10);

        while start.elapsed() < timeout {
            if !self.has_active_requests() {
                return true;
            }
            tracing::debug!(
                "Waiting for requests to drain: {} remaining, elapsed: {:?}",
                self.total_active_requests(),
                start.elapsed()
            );
            sleep(check_interval).await;
            check_interval = std::cmp::min(check_interval * 2, Duration::from_millis(250));
        }

        let remaining = self.total_active_requests();
        if remaining > 0 {
            tracing::warn!(
                "Drain timeout exceeded: {} requests still in flight after {:?}",
                remaining,
                timeout
            );
        }
        remaining == 0
    }

    pub fn get_stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        for entry in self.connections.iter() {
            let connection = entry.value();
            stats.total_connections += 1;
            if connection.is_idle() {
                stats.idle_connections += 1;
            }
            stats.oldest_connection_age = stats.oldest_connection_age.max(connection.age());
        }
        stats.active_connections = stats.total_connections - stats.idle_connections;
        stats.total_active_requests = self.total_active_requests();
        stats
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about current connections
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_active_requests: u64,
    pub oldest_connection_age: Duration,
}
