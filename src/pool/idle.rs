//! Idle HTTP/1.1 connection pool.
//!
//! Connections released after a complete exchange are parked per
//! [`Address`] and handed out again, most recently used first, until they
//! have been idle longer than the configured limit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::transport::{Address, Connection};

struct IdleEntry {
    connection: Box<dyn Connection>,
    last_used: Instant,
}

impl IdleEntry {
    fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            connection,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, max_idle: Duration) -> bool {
        self.last_used.elapsed() >= max_idle
    }
}

/// Pool of idle connections shared by every call of a client.
///
/// Cloning yields a handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    idle: Arc<RwLock<HashMap<Address, Vec<IdleEntry>>>>,
    max_idle_duration: Duration,
    max_idle_per_host: usize,
}

impl ConnectionPool {
    /// Default maximum idle duration (30 seconds)
    const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(30);

    /// Default maximum idle connections kept per address
    const DEFAULT_MAX_PER_HOST: usize = 5;

    /// Create a new connection pool with default settings
    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_MAX_IDLE, Self::DEFAULT_MAX_PER_HOST)
    }

    /// Create a connection pool with custom configuration.
    ///
    /// A `max_idle_per_host` of zero disables pooling.
    pub fn with_config(max_idle: Duration, max_idle_per_host: usize) -> Self {
        Self {
            idle: Arc::new(RwLock::new(HashMap::new())),
            max_idle_duration: max_idle,
            max_idle_per_host,
        }
    }

    /// Take an idle connection to `address`, skipping expired ones.
    pub async fn get(&self, address: &Address) -> Option<Box<dyn Connection>> {
        let mut pool = self.idle.write().await;
        let entries = pool.get_mut(address)?;
        while let Some(entry) = entries.pop() {
            if !entry.is_expired(self.max_idle_duration) && entry.connection.is_reusable() {
                tracing::debug!(
                    "Pool: reusing connection for {} ({} left idle)",
                    address,
                    entries.len()
                );
                return Some(entry.connection);
            }
            tracing::debug!(
                "Pool: discarding stale connection for {} (idle {:?})",
                address,
                entry.last_used.elapsed()
            );
        }
        None
    }

    /// Park `connection` for reuse. Connections that cannot be reused are
    /// dropped, as is the oldest one when the address is at its limit.
    pub async fn put(&self, connection: Box<dyn Connection>) {
        if !connection.is_reusable() || self.max_idle_per_host == 0 {
            return;
        }
        let address = connection.address().clone();
        let mut pool = self.idle.write().await;
        let entries = pool.entry(address.clone()).or_default();
        if entries.len() >= self.max_idle_per_host {
            entries.remove(0);
        }
        entries.push(IdleEntry::new(connection));
        tracing::debug!(
            "Pool: returned connection for {} (idle: {})",
            address,
            entries.len()
        );
    }

    /// Close every idle connection.
    pub async fn evict_all(&self) {
        let mut pool = self.idle.write().await;
        let count: usize = pool.values().map(Vec::len).sum();
        pool.clear();
        tracing::debug!("Pool: evicted {} idle connections", count);
    }

    /// Remove expired connections.
    pub async fn cleanup(&self) {
        let mut pool = self.idle.write().await;
        for entries in pool.values_mut() {
            entries.retain(|e| !e.is_expired(self.max_idle_duration));
        }
        pool.retain(|_, entries| !entries.is_empty());
    }

    /// Spawn a background cleanup task that runs periodically
    ///
    /// Returns a handle to the spawned task
    pub fn spawn_cleanup_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                pool.cleanup().await;
            }
        })
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.read().await.values().map(Vec::len).sum()
    }

    /// Get current pool statistics (for debugging/monitoring)
    pub async fn stats(&self) -> PoolStats {
        let pool = self.idle.read().await;
        PoolStats {
            idle_connections: pool.values().map(Vec::len).sum(),
            addresses: pool.values().filter(|v| !v.is_empty()).count(),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle_duration", &self.max_idle_duration)
            .field("max_idle_per_host", &self.max_idle_per_host)
            .finish_non_exhaustive()
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
    pub addresses: usize,
}
