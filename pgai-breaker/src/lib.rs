//! Circuit Breaker (spec §4.5): an in-process, per-upstream state machine
//! gating outbound calls. One instance lives per upstream name inside a
//! [`BreakerRegistry`], mirroring the way the gateway keeps one
//! `ServiceConfig` per upstream (§4.6) — state changes are logged via `slog`
//! and counted via `cadence`, same as the rest of this workspace's ambient
//! stack.
#[macro_use]
extern crate slog_scope;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pgai_common::{ErrorKind, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    next_attempt: Option<Instant>,
}

impl Default for Inner {
    fn default() -> Self {
        Inner {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            next_attempt: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerParams {
    fn default() -> Self {
        BreakerParams {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// A single upstream's breaker. `try_admit` must be called before the call
/// is dispatched; the caller reports the outcome with `on_success`/
/// `on_failure` afterwards. Exactly one trial is admitted per `HalfOpen`
/// epoch (§5 "Ordering guarantees").
pub struct CircuitBreaker {
    name: String,
    params: BreakerParams,
    inner: Mutex<Inner>,
    metrics: Metrics,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, params: BreakerParams, metrics: Metrics) -> Self {
        CircuitBreaker {
            name: name.into(),
            params,
            inner: Mutex::new(Inner::default()),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Admits or rejects a call, performing the `Open -> HalfOpen` trial
    /// transition when the reset timeout has elapsed. Returns
    /// `ErrorKind::CircuitOpen` when the breaker is tripped and no trial
    /// slot is available.
    pub fn try_admit(&self) -> Result<(), ErrorKind> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                // A trial is already in flight for this epoch; reject
                // concurrent callers (§5 "single in-flight per upstream").
                Err(ErrorKind::CircuitOpen(self.name.clone()))
            }
            BreakerState::Open => {
                let next_attempt = inner.next_attempt.unwrap_or_else(Instant::now);
                if Instant::now() >= next_attempt {
                    inner.state = BreakerState::HalfOpen;
                    info!("breaker {} Open -> HalfOpen (trial admitted)", self.name);
                    self.metrics
                        .incr_with_tag("breaker.half_open", "upstream", &self.name);
                    Ok(())
                } else {
                    Err(ErrorKind::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                info!("breaker {} HalfOpen -> Closed (trial succeeded)", self.name);
                *inner = Inner::default();
                self.metrics
                    .incr_with_tag("breaker.closed", "upstream", &self.name);
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.params.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            BreakerState::HalfOpen => {
                self.trip(&mut inner);
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.next_attempt = Some(Instant::now() + self.params.reset_timeout);
        warn!("breaker {} tripped -> Open", self.name);
        self.metrics
            .incr_with_tag("breaker.open", "upstream", &self.name);
    }
}

/// Owns one [`CircuitBreaker`] per upstream name, constructed lazily on
/// first use. Generalizes the teacher's module-level singleton pattern (§9
/// "Singletons and module-level global state") into a process-scoped owned
/// component the gateway constructs once at startup and passes to handlers.
#[derive(Clone)]
pub struct BreakerRegistry {
    params: BreakerParams,
    breakers: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
    metrics: Metrics,
}

impl BreakerRegistry {
    pub fn new(params: BreakerParams, metrics: Metrics) -> Self {
        BreakerRegistry {
            params,
            breakers: Arc::new(Mutex::new(HashMap::new())),
            metrics,
        }
    }

    pub fn get(&self, upstream: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(upstream.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    upstream.to_string(),
                    self.params,
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .lock()
            .values()
            .map(|b| (b.name().to_string(), b.state()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread::sleep;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test-upstream",
            BreakerParams {
                failure_threshold: 3,
                reset_timeout: Duration::from_millis(50),
            },
            Metrics::noop(),
        )
    }

    #[test]
    fn closed_admits_until_threshold() {
        let b = breaker();
        for _ in 0..2 {
            assert!(b.try_admit().is_ok());
            b.on_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_admit().is_ok());
        b.on_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn open_rejects_until_reset_timeout() {
        let b = breaker();
        for _ in 0..3 {
            let _ = b.try_admit();
            b.on_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.try_admit().is_err());
        sleep(Duration::from_millis(60));
        assert!(b.try_admit().is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_single_trial() {
        let b = breaker();
        for _ in 0..3 {
            let _ = b.try_admit();
            b.on_failure();
        }
        sleep(Duration::from_millis(60));
        assert!(b.try_admit().is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        // a concurrent caller during the same epoch is rejected
        assert!(b.try_admit().is_err());
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let b = breaker();
        for _ in 0..3 {
            let _ = b.try_admit();
            b.on_failure();
        }
        sleep(Duration::from_millis(60));
        let _ = b.try_admit();
        b.on_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_admit().is_ok());
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker();
        for _ in 0..3 {
            let _ = b.try_admit();
            b.on_failure();
        }
        sleep(Duration::from_millis(60));
        let _ = b.try_admit();
        b.on_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn registry_returns_same_breaker_per_upstream() {
        let registry = BreakerRegistry::new(BreakerParams::default(), Metrics::noop());
        let a = registry.get("connection");
        let b = registry.get("connection");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
