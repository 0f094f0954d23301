//! Pool Manager (spec §4.3): hands out handles against a global cap and a
//! per-user cap, evicts idle pools on a timer, and drains cleanly on
//! shutdown. Modeled on `syncstorage_mysql::pool::MysqlDbPool`'s use of a
//! `deadpool`-style bound pool per backing store, generalized here to one
//! pool per user connection rather than one pool per process.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pgai_common::Metrics;
use uuid::Uuid;

use crate::error::ConnError;

pub type PoolResult<T> = Result<T, ConnError>;

/// A handle to one user connection's live pool. The actual `diesel_async`/
/// `sqlx`/`mongodb` pool object lives behind `dialect_pool`; this type only
/// tracks admission bookkeeping, since the bookkeeping is what the spec's
/// invariants constrain.
struct ManagedPool {
    #[allow(dead_code)]
    connection_id: Uuid,
    owner: String,
    active: u32,
    idle_since: Option<Instant>,
    last_activity_at: Instant,
    max: u32,
}

impl ManagedPool {
    fn new(connection_id: Uuid, owner: String, max: u32) -> Self {
        let now = Instant::now();
        ManagedPool {
            connection_id,
            owner,
            active: 0,
            idle_since: Some(now),
            last_activity_at: now,
            max,
        }
    }

    fn waiters_would_block(&self) -> bool {
        self.active >= self.max
    }

    fn is_idle(&self) -> bool {
        self.active == 0
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: u32,
    pub idle: u32,
    pub waiters: u32,
}

struct Inner {
    pools: HashMap<Uuid, ManagedPool>,
    global_active: u32,
    shutting_down: bool,
}

/// Admits and tracks per-connection pools against the `global_max` and
/// `per_user_max` caps from `PoolSettings` (§3 invariants, §4.3).
pub struct PoolManager {
    inner: Mutex<Inner>,
    global_max: u32,
    per_user_max: u32,
    idle_timeout: Duration,
    metrics: Metrics,
}

/// RAII lease returned by `acquire`; releasing decrements the pool's active
/// count when dropped, mirroring `syncstorage_mysql`'s connection-guard
/// pattern so callers can't forget to release.
pub struct PoolLease {
    manager: Arc<PoolManager>,
    connection_id: Uuid,
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.manager.release(self.connection_id);
    }
}

impl PoolManager {
    pub fn new(global_max: u32, per_user_max: u32, idle_timeout: Duration, metrics: Metrics) -> Arc<Self> {
        Arc::new(PoolManager {
            inner: Mutex::new(Inner {
                pools: HashMap::new(),
                global_active: 0,
                shutting_down: false,
            }),
            global_max,
            per_user_max,
            idle_timeout,
            metrics,
        })
    }

    /// Admits a lease against the connection's pool. Step 1: reuse an
    /// existing pool for `connection_id` if one is already open. Step 2: if
    /// the number of open pools is at `GlobalMax`, sweep idle pools and
    /// retry once; still full fails `CapacityExhausted`. Step 3: if the
    /// owner already holds `PerUserMax` open pools, evict that owner's
    /// least-recently-active idle pool; if none is idle, fail. Step 4: open
    /// the new pool (§4.3).
    pub fn acquire(
        self: &Arc<Self>,
        connection_id: Uuid,
        owner: &str,
        per_connection_max: u32,
    ) -> PoolResult<PoolLease> {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return Err(ConnError::Shutdown);
        }

        if let Some(pool) = inner.pools.get_mut(&connection_id) {
            if pool.waiters_would_block() {
                self.metrics.incr("pool.rejected.connection_cap");
                return Err(ConnError::CapacityExhausted);
            }
            pool.active += 1;
            pool.idle_since = None;
            pool.last_activity_at = Instant::now();
            inner.global_active += 1;
            self.metrics.gauge("pool.active", inner.global_active as u64);
            return Ok(PoolLease { manager: Arc::clone(self), connection_id });
        }

        if inner.pools.len() as u32 >= self.global_max {
            Self::evict_idle_locked(&mut inner, self.idle_timeout);
            if inner.pools.len() as u32 >= self.global_max {
                self.metrics.incr("pool.rejected.global_cap");
                return Err(ConnError::CapacityExhausted);
            }
        }

        let owner_pool_count = inner.pools.values().filter(|p| p.owner == owner).count() as u32;
        if owner_pool_count >= self.per_user_max {
            let lru_idle = inner
                .pools
                .iter()
                .filter(|(_, p)| p.owner == owner && p.is_idle())
                .min_by_key(|(_, p)| p.last_activity_at)
                .map(|(id, _)| *id);
            match lru_idle {
                Some(victim) => {
                    inner.pools.remove(&victim);
                }
                None => {
                    self.metrics.incr("pool.rejected.per_user_cap");
                    return Err(ConnError::CapacityExhausted);
                }
            }
        }

        let mut pool = ManagedPool::new(connection_id, owner.to_string(), per_connection_max);
        pool.active = 1;
        pool.idle_since = None;
        inner.pools.insert(connection_id, pool);
        inner.global_active += 1;
        self.metrics.gauge("pool.active", inner.global_active as u64);
        self.metrics.gauge("pool.total", inner.pools.len() as u64);

        Ok(PoolLease {
            manager: Arc::clone(self),
            connection_id,
        })
    }

    fn release(&self, connection_id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(pool) = inner.pools.get_mut(&connection_id) {
            pool.active = pool.active.saturating_sub(1);
            pool.last_activity_at = Instant::now();
            if pool.active == 0 {
                pool.idle_since = Some(Instant::now());
            }
        }
        inner.global_active = inner.global_active.saturating_sub(1);
        self.metrics.gauge("pool.active", inner.global_active as u64);
    }

    /// Drops the in-memory pool entry entirely — called when a connection's
    /// target or credentials change (§4.2 `update`) so the next `acquire`
    /// dials fresh.
    pub fn invalidate(&self, connection_id: Uuid) {
        self.inner.lock().pools.remove(&connection_id);
    }

    /// Sweeps pools idle longer than `idle_timeout` with zero active leases.
    /// Intended to run on `eviction_tick_secs` from a background task
    /// spawned in `main.rs`; also invoked inline when `acquire` hits the
    /// global cap (§4.3 step 2).
    pub fn evict_idle(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::evict_idle_locked(&mut inner, self.idle_timeout)
    }

    fn evict_idle_locked(inner: &mut Inner, idle_timeout: Duration) -> usize {
        let before = inner.pools.len();
        inner.pools.retain(|_, pool| {
            pool.active > 0
                || pool
                    .idle_since
                    .map(|since| since.elapsed() < idle_timeout)
                    .unwrap_or(true)
        });
        before - inner.pools.len()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let active: u32 = inner.pools.values().map(|p| p.active).sum();
        let idle = inner.pools.values().filter(|p| p.active == 0).count() as u32;
        PoolStats {
            total: inner.pools.len(),
            active,
            idle,
            waiters: 0,
        }
    }

    pub fn stats_for(&self, connection_id: Uuid) -> Option<PoolStats> {
        let inner = self.inner.lock();
        inner.pools.get(&connection_id).map(|pool| PoolStats {
            total: 1,
            active: pool.active,
            idle: if pool.active == 0 { 1 } else { 0 },
            waiters: 0,
        })
    }

    /// Stops admitting new leases; existing leases continue to drain via
    /// their `Drop` impls (§5 "Graceful shutdown").
    pub fn begin_shutdown(&self) {
        self.inner.lock().shutting_down = true;
    }

    pub fn active_lease_count(&self) -> u32 {
        self.inner.lock().global_active
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn manager(global_max: u32, per_user_max: u32) -> Arc<PoolManager> {
        PoolManager::new(
            global_max,
            per_user_max,
            Duration::from_secs(600),
            Metrics::noop(),
        )
    }

    #[test]
    fn acquire_and_release_tracks_active_count() {
        let mgr = manager(10, 10);
        let id = Uuid::new_v4();
        let lease = mgr.acquire(id, "u1", 5).unwrap();
        assert_eq!(mgr.active_lease_count(), 1);
        drop(lease);
        assert_eq!(mgr.active_lease_count(), 0);
    }

    #[test]
    fn respects_per_connection_cap() {
        let mgr = manager(10, 10);
        let id = Uuid::new_v4();
        let _l1 = mgr.acquire(id, "u1", 1).unwrap();
        let err = mgr.acquire(id, "u1", 1).unwrap_err();
        assert!(matches!(err, ConnError::CapacityExhausted));
    }

    #[test]
    fn respects_per_user_cap_across_connections() {
        let mgr = manager(10, 1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _l1 = mgr.acquire(a, "u1", 5).unwrap();
        let err = mgr.acquire(b, "u1", 5).unwrap_err();
        assert!(matches!(err, ConnError::CapacityExhausted));
    }

    #[test]
    fn respects_global_cap_across_users() {
        let mgr = manager(1, 10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _l1 = mgr.acquire(a, "u1", 5).unwrap();
        let err = mgr.acquire(b, "u2", 5).unwrap_err();
        assert!(matches!(err, ConnError::CapacityExhausted));
    }

    #[test]
    fn shutdown_rejects_new_leases() {
        let mgr = manager(10, 10);
        mgr.begin_shutdown();
        let err = mgr.acquire(Uuid::new_v4(), "u1", 5).unwrap_err();
        assert!(matches!(err, ConnError::Shutdown));
    }

    #[test]
    fn per_user_cap_evicts_idle_lru_pool_instead_of_failing() {
        let mgr = manager(10, 2);
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let c3 = Uuid::new_v4();
        drop(mgr.acquire(c1, "u1", 5).unwrap());
        drop(mgr.acquire(c2, "u1", 5).unwrap());
        assert!(mgr.stats_for(c1).is_some());

        let lease3 = mgr.acquire(c3, "u1", 5).unwrap();
        assert!(mgr.stats_for(c1).is_none(), "oldest idle pool should have been evicted");
        assert!(mgr.stats_for(c2).is_some());
        drop(lease3);
    }

    #[test]
    fn per_user_cap_fails_when_no_pool_is_idle() {
        let mgr = manager(10, 2);
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let c3 = Uuid::new_v4();
        let _l1 = mgr.acquire(c1, "u1", 5).unwrap();
        let _l2 = mgr.acquire(c2, "u1", 5).unwrap();
        let err = mgr.acquire(c3, "u1", 5).unwrap_err();
        assert!(matches!(err, ConnError::CapacityExhausted));
    }

    #[test]
    fn global_cap_reclaims_idle_pool_via_sweep_before_failing() {
        let mgr = PoolManager::new(1, 10, Duration::from_millis(1), Metrics::noop());
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        drop(mgr.acquire(c1, "u1", 5).unwrap());
        std::thread::sleep(Duration::from_millis(20));
        let lease2 = mgr.acquire(c2, "u2", 5).unwrap();
        assert!(mgr.stats_for(c1).is_none());
        drop(lease2);
    }

    #[test]
    fn global_cap_fails_when_idle_pool_is_within_idle_timeout() {
        let mgr = manager(1, 10);
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        drop(mgr.acquire(c1, "u1", 5).unwrap());
        let err = mgr.acquire(c2, "u2", 5).unwrap_err();
        assert!(matches!(err, ConnError::CapacityExhausted));
        assert!(mgr.stats_for(c1).is_some());
    }

    #[test]
    fn existing_pool_for_same_connection_is_reused_not_recreated() {
        let mgr = manager(1, 10);
        let id = Uuid::new_v4();
        let l1 = mgr.acquire(id, "u1", 5).unwrap();
        let l2 = mgr.acquire(id, "u1", 5).unwrap();
        assert_eq!(mgr.stats_for(id).unwrap().active, 2);
        drop(l1);
        drop(l2);
    }

    #[test]
    fn invalidate_drops_pool_state() {
        let mgr = manager(10, 10);
        let id = Uuid::new_v4();
        let lease = mgr.acquire(id, "u1", 5).unwrap();
        drop(lease);
        mgr.invalidate(id);
        assert!(mgr.stats_for(id).is_none());
    }
}
