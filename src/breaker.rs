//! Circuit Breaker Registry
//!
//! One three-state breaker per named external dependency. Breakers are the
//! only cross-category coupling in the pool: a scraping task and an
//! embedding task may both depend on `"openai"`.
//!
//! State machine:
//!
//! ```text
//!       failure_count >= threshold
//! closed ───────────────────────────► open
//!   ▲                                   │
//!   │ success_count >= threshold        │ now − opened_at >= timeout
//!   │                                   ▼
//!   └──────────────────── half_open ◄──┐
//!                            │          │ failure
//!                            └──────────┘
//! ```
//!
//! A breaker never leaves `open` on a timer alone; the transition to
//! `half_open` happens lazily on the next admission attempt. In `half_open`
//! at most one probe is in flight; concurrent admitters are denied until
//! the probe resolves.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
// The runtime clock, not the wall clock: the open timeout must move with
// the same time source as backoff sleeps and drain timeouts.
use tokio::time::Instant;
use tracing::info;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunable parameters for one breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub name: String,
    /// Consecutive failures in `closed` before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive probe successes in `half_open` before it closes.
    pub success_threshold: u32,
    /// Minimum time spent `open` before a probe is admitted.
    pub timeout: Duration,
}

impl BreakerConfig {
    pub fn new(name: &str, failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            success_threshold,
            timeout,
        }
    }

    /// Parameters applied to dependencies registered on first use.
    pub fn generic(name: &str) -> Self {
        Self::new(name, 5, 2, Duration::from_secs(30))
    }
}

/// Default breakers for the documentation-ingestion dependencies.
pub fn default_breakers() -> Vec<BreakerConfig> {
    vec![
        BreakerConfig::new("openai", 5, 2, Duration::from_secs(60)),
        BreakerConfig::new("chromadb", 3, 2, Duration::from_secs(30)),
        BreakerConfig::new("playwright", 5, 2, Duration::from_secs(45)),
    ]
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitResult {
    pub allowed: bool,
    /// This call is the single half-open probe; the caller must report its
    /// outcome with `probe = true`.
    pub probe: bool,
    /// State transition performed by this admission, if any.
    pub transition: Option<CircuitState>,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    probe_in_flight: bool,
    opened_at: Option<Instant>,
}

/// Thread-safe breaker for one named dependency. All operations take a
/// single short critical section; independent breakers never synchronize
/// with each other.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                probe_in_flight: false,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Decide whether a call against this dependency may proceed.
    ///
    /// Side-effecting: an `open` breaker past its timeout transitions to
    /// `half_open` here and admits the caller as the probe.
    pub fn admit(&self) -> AdmitResult {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => AdmitResult {
                allowed: true,
                probe: false,
                transition: None,
            },
            CircuitState::Open => {
                let waited_out = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if waited_out {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    info!("breaker '{}': open -> half_open", self.config.name);
                    AdmitResult {
                        allowed: true,
                        probe: true,
                        transition: Some(CircuitState::HalfOpen),
                    }
                } else {
                    AdmitResult {
                        allowed: false,
                        probe: false,
                        transition: None,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    // Single-probe contract: deny until the probe resolves.
                    AdmitResult {
                        allowed: false,
                        probe: false,
                        transition: None,
                    }
                } else {
                    inner.probe_in_flight = true;
                    AdmitResult {
                        allowed: true,
                        probe: true,
                        transition: None,
                    }
                }
            }
        }
    }

    /// Report a successful call. Returns the transition performed, if any.
    pub fn record_success(&self, probe: bool) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        if probe {
            inner.probe_in_flight = false;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    info!("breaker '{}': half_open -> closed", self.config.name);
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            }
            // Stale success from a call admitted before the breaker opened.
            CircuitState::Open => None,
        }
    }

    /// Report a failed call. Returns the transition performed, if any.
    pub fn record_failure(&self, probe: bool) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        if probe {
            inner.probe_in_flight = false;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    info!("breaker '{}': closed -> open", self.config.name);
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens immediately.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
                info!("breaker '{}': half_open -> open", self.config.name);
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Release the half-open probe slot without recording an outcome.
    /// Used when an admitted probe ends in a fatal-classified failure,
    /// which must not count toward the breaker either way.
    pub fn release_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            open_for_ms: inner.opened_at.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

/// Read-only view of one breaker for `stats()`/`health()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_for_ms: Option<u64>,
}

/// Registry of breakers keyed by dependency name.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker. Keeps an existing breaker for the same name so
    /// repeated `start()` calls don't reset live failure state.
    pub fn register(&self, config: BreakerConfig) {
        let mut breakers = self.breakers.write();
        breakers
            .entry(config.name.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config)));
    }

    /// Fetch the breaker for `name`, creating one with generic parameters
    /// for dependencies that were never explicitly registered.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(BreakerConfig::generic(name)))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// True if any registered breaker is currently `open`.
    pub fn any_open(&self) -> bool {
        self.breakers
            .read()
            .values()
            .any(|b| b.state() == CircuitState::Open)
    }

    /// Name -> snapshot map for observability, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::new(
            "test",
            failures,
            successes,
            Duration::from_millis(timeout_ms),
        ))
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 2, 1000);

        cb.record_failure(false);
        cb.record_failure(false);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.admit().allowed);

        let transition = cb.record_failure(false);
        assert_eq!(transition, Some(CircuitState::Open));
        assert!(!cb.admit().allowed);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = breaker(3, 2, 1000);

        cb.record_failure(false);
        cb.record_failure(false);
        cb.record_success(false);
        // The streak restarted; two more failures don't open it.
        cb.record_failure(false);
        cb.record_failure(false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = breaker(1, 2, 10);
        cb.record_failure(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.admit().allowed);

        std::thread::sleep(Duration::from_millis(15));

        let admit = cb.admit();
        assert!(admit.allowed);
        assert!(admit.probe);
        assert_eq!(admit.transition, Some(CircuitState::HalfOpen));
    }

    #[test]
    fn test_single_probe_serialization() {
        let cb = breaker(1, 2, 10);
        cb.record_failure(false);
        std::thread::sleep(Duration::from_millis(15));

        let first = cb.admit();
        assert!(first.allowed && first.probe);

        // Second admitter while the probe is in flight is denied.
        assert!(!cb.admit().allowed);

        // Probe succeeded below the close threshold; the next caller
        // becomes the new probe.
        cb.record_success(true);
        let next = cb.admit();
        assert!(next.allowed && next.probe);
        assert_eq!(next.transition, None);
    }

    #[test]
    fn test_closes_after_success_threshold() {
        let cb = breaker(1, 2, 10);
        cb.record_failure(false);
        std::thread::sleep(Duration::from_millis(15));

        assert!(cb.admit().allowed);
        assert_eq!(cb.record_success(true), None);
        assert!(cb.admit().allowed);
        assert_eq!(cb.record_success(true), Some(CircuitState::Closed));

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.success_count, 0);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let cb = breaker(1, 2, 10);
        cb.record_failure(false);
        std::thread::sleep(Duration::from_millis(15));

        assert!(cb.admit().allowed);
        assert_eq!(cb.record_failure(true), Some(CircuitState::Open));
        // opened_at was reset; the breaker fast-fails again.
        assert!(!cb.admit().allowed);
    }

    #[test]
    fn test_release_probe_frees_slot_without_outcome() {
        let cb = breaker(1, 2, 10);
        cb.record_failure(false);
        std::thread::sleep(Duration::from_millis(15));

        assert!(cb.admit().allowed);
        cb.release_probe();

        // Slot is free again, and nothing was counted.
        let next = cb.admit();
        assert!(next.allowed && next.probe);
        assert_eq!(cb.snapshot().success_count, 0);
    }

    #[test]
    fn test_registry_register_is_idempotent() {
        let registry = BreakerRegistry::new();
        registry.register(BreakerConfig::new("openai", 1, 2, Duration::from_secs(60)));

        registry.get("openai").unwrap().record_failure(false);
        assert!(registry.any_open());

        // Re-registering must not reset live state.
        registry.register(BreakerConfig::new("openai", 1, 2, Duration::from_secs(60)));
        assert!(registry.any_open());
    }

    #[test]
    fn test_registry_creates_generic_on_demand() {
        let registry = BreakerRegistry::new();
        assert!(registry.get("internal-api").is_none());

        let breaker = registry.get_or_create("internal-api");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(registry.get("internal-api").is_some());
    }

    #[test]
    fn test_snapshot_map() {
        let registry = BreakerRegistry::new();
        for config in default_breakers() {
            registry.register(config);
        }

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 3);
        assert!(snap.contains_key("openai"));
        assert!(snap.contains_key("chromadb"));
        assert!(snap.contains_key("playwright"));
        assert!(snap.values().all(|b| b.state == CircuitState::Closed));
    }
}
