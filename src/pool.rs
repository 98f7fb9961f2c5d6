//! Per-destination store of idle HTTP/1.1 connections.
//!
//! Each destination owns a bucket behind its own mutex, so callers for different
//! destinations never contend. The outer map lock is held only long enough to find
//! or create a bucket. Nothing here awaits, so `std::sync` locks are sufficient.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;
use crate::destination::DestinationKey;
use crate::pooled_connection::Connection;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_MAX_IDLE_PER_DESTINATION: usize = 2;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long a parked connection stays eligible for reuse.
    pub idle_timeout: Duration,
    /// Parked connections kept per destination; the oldest is evicted beyond this.
    pub max_idle_per_destination: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_idle_per_destination: DEFAULT_MAX_IDLE_PER_DESTINATION,
        }
    }
}

// Most recently parked at the front.
type Bucket = Arc<Mutex<VecDeque<Connection>>>;

pub struct ConnectionPool {
    config: PoolConfig,
    buckets: RwLock<HashMap<DestinationKey, Bucket>>,
    closed: AtomicBool,
}

impl ConnectionPool {

    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        ConnectionPool {
            config,
            buckets: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Takes the most recently parked live connection for `destination`, together with
    /// how long it sat idle. Expired and stale entries met on the way are closed.
    pub fn acquire(&self, destination: &DestinationKey) -> Option<(Connection, Duration)> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let bucket = self.find_bucket(destination)?;
        let mut idle = lock(&bucket);

        let now = Instant::now();
        self.evict_expired(&mut idle, now);

        while let Some(mut conn) = idle.pop_front() {
            if conn.is_stale() {
                debug!(connection_id = conn.id(), %destination, "discarding stale idle connection");
                conn.close();
                continue;
            }
            let idle_for = conn.idle_for(now);
            conn.unpark();
            return Some((conn, idle_for));
        }
        None
    }

    /// Parks `conn` when `eligible`, closes it otherwise. Returns whether it was parked.
    ///
    /// Parking past the per-destination bound evicts the oldest idle connection, not
    /// the one being released.
    pub fn release(&self, mut conn: Connection, eligible: bool) -> bool {
        if !eligible || !conn.is_reusable() {
            conn.close();
            return false;
        }
        if self.closed.load(Ordering::Acquire) || self.config.max_idle_per_destination == 0 {
            conn.close();
            return false;
        }

        let bucket = self.bucket_or_insert(conn.destination());
        let mut idle = lock(&bucket);

        // shutdown() may have drained this bucket while we waited on it.
        if self.closed.load(Ordering::Acquire) {
            drop(idle);
            conn.close();
            return false;
        }

        conn.park(Instant::now());
        idle.push_front(conn);

        while idle.len() > self.config.max_idle_per_destination {
            if let Some(oldest) = idle.pop_back() {
                debug!(connection_id = oldest.id(), "idle limit reached, evicting oldest connection");
                oldest.close();
            }
        }
        true
    }

    /// Closes every parked connection. Later releases close instead of parking.
    /// Returns how many connections were closed by this call.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let buckets: Vec<Bucket> = {
            let mut map = self.buckets.write().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, bucket)| bucket).collect()
        };

        let mut closed = 0;
        for bucket in buckets {
            for conn in lock(&bucket).drain(..) {
                conn.close();
                closed += 1;
            }
        }
        debug!(closed, "connection pool shut down");
        closed
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self, destination: &DestinationKey) -> usize {
        self.find_bucket(destination)
            .map(|bucket| lock(&bucket).len())
            .unwrap_or(0)
    }

    pub fn total_idle(&self) -> usize {
        let buckets: Vec<Bucket> = self.buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        buckets.iter().map(|bucket| lock(bucket).len()).sum()
    }

    fn evict_expired(&self, idle: &mut VecDeque<Connection>, now: Instant) {
        let timeout = self.config.idle_timeout;
        let mut kept = VecDeque::with_capacity(idle.len());
        for conn in idle.drain(..) {
            if conn.idle_for(now) < timeout {
                kept.push_back(conn);
            } else {
                debug!(connection_id = conn.id(), idle = ?conn.idle_for(now), "idle timeout exceeded");
                conn.close();
            }
        }
        *idle = kept;
    }

    fn find_bucket(&self, destination: &DestinationKey) -> Option<Bucket> {
        self.buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(destination)
            .cloned()
    }

    fn bucket_or_insert(&self, destination: &DestinationKey) -> Bucket {
        if let Some(bucket) = self.find_bucket(destination) {
            return bucket;
        }
        self.buckets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(destination.clone())
            .or_default()
            .clone()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

// A panic while holding a bucket cannot leave it half-updated: every mutation is a
// single push or pop. Recover the guard instead of propagating the poison.
fn lock(bucket: &Bucket) -> MutexGuard<'_, VecDeque<Connection>> {
    bucket.lock().unwrap_or_else(|e| e.into_inner())
}
