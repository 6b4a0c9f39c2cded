//! Reservation ledger.
//!
//! A reservation is a short-lived hold on pool capacity between
//! filter-time and bind-time. The scheduler's view of capacity is
//! eventually consistent with the store; the ledger bridges that gap by
//! letting the planner subtract capacity already promised to in-flight
//! attempts.
//!
//! Operations are infallible by construction: holds and releases always
//! succeed, releasing an unknown attempt is a no-op, and a hold repeated
//! for the same attempt and pool does not double-count.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use strata_types::DiskClass;

use crate::attempt::AttemptKey;

/// Identity of one pool across the cluster: `(node, class)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// The node owning the pool.
    pub node: String,

    /// The pool's disk class.
    pub class: DiskClass,
}

impl PoolKey {
    /// Creates a pool key.
    #[must_use]
    pub fn new(node: impl Into<String>, class: DiskClass) -> Self {
        Self {
            node: node.into(),
            class,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.class.pool_name())
    }
}

/// Configuration for the reservation ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long an attempt's holds survive without a bind or release.
    pub hold_ttl: Duration,

    /// How often the expiry task sweeps for stale attempts.
    pub sweep_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Holds of one attempt: bytes per pool, and when the attempt first held.
#[derive(Debug)]
struct AttemptHolds {
    entries: HashMap<PoolKey, u64>,
    held_since: Instant,
}

#[derive(Debug, Default)]
struct LedgerState {
    by_attempt: HashMap<AttemptKey, AttemptHolds>,
    by_pool: HashMap<PoolKey, u64>,
}

/// Process-local ledger of capacity held by in-flight scheduling attempts.
///
/// Both indices are kept in sync under one mutex; every operation is O(1)
/// amortized in the number of pools an attempt touches. The generation
/// counter advances on every mutation so consumers projecting capacity
/// (the replica planner) can key caches on it.
#[derive(Debug)]
pub struct ReservationLedger {
    state: Mutex<LedgerState>,
    config: LedgerConfig,
    generation: AtomicU64,
}

impl ReservationLedger {
    /// Creates a ledger with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    /// Creates a ledger with custom configuration.
    #[must_use]
    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            config,
            generation: AtomicU64::new(0),
        }
    }

    /// Monotonic counter advanced by every hold or release. Capacity
    /// projections derived from the ledger are valid for one generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Holds `bytes` of a pool's capacity for an attempt.
    ///
    /// Repeating a hold for the same `(attempt, pool)` replaces the
    /// previous amount instead of accumulating, so retried reserve calls
    /// stay idempotent.
    pub fn hold(&self, attempt: &AttemptKey, pool: PoolKey, bytes: u64) {
        let mut state = self.state.lock();

        let holds = state
            .by_attempt
            .entry(attempt.clone())
            .or_insert_with(|| AttemptHolds {
                entries: HashMap::new(),
                held_since: Instant::now(),
            });
        let previous = holds.entries.insert(pool.clone(), bytes).unwrap_or(0);

        let pool_total = state.by_pool.entry(pool.clone()).or_insert(0);
        *pool_total = pool_total.saturating_sub(previous) + bytes;
        drop(state);
        self.generation.fetch_add(1, Ordering::SeqCst);

        debug!(attempt = %attempt, pool = %pool, bytes, previous, "capacity held");
    }

    /// Releases every hold of an attempt. Unknown attempts are a no-op.
    pub fn release(&self, attempt: &AttemptKey) {
        let mut state = self.state.lock();
        let Some(holds) = state.by_attempt.remove(attempt) else {
            debug!(attempt = %attempt, "release for unknown attempt ignored");
            return;
        };
        for (pool, bytes) in holds.entries {
            if let Some(total) = state.by_pool.get_mut(&pool) {
                *total = total.saturating_sub(bytes);
                if *total == 0 {
                    state.by_pool.remove(&pool);
                }
            }
        }
        drop(state);
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(attempt = %attempt, "holds released");
    }

    /// Total bytes currently held on a pool across all attempts.
    #[must_use]
    pub fn held_on(&self, pool: &PoolKey) -> u64 {
        self.state.lock().by_pool.get(pool).copied().unwrap_or(0)
    }

    /// Number of attempts currently holding capacity.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.state.lock().by_attempt.len()
    }

    /// Releases attempts whose holds outlived the TTL. Returns how many
    /// attempts were expired.
    pub fn expire_stale(&self) -> usize {
        let ttl = self.config.hold_ttl;
        let stale: Vec<AttemptKey> = {
            let state = self.state.lock();
            state
                .by_attempt
                .iter()
                .filter(|(_, holds)| holds.held_since.elapsed() >= ttl)
                .map(|(key, _)| key.clone())
                .collect()
        };
        for attempt in &stale {
            warn!(attempt = %attempt, "attempt hold expired without bind, releasing");
            self.release(attempt);
        }
        stale.len()
    }
}

impl Default for ReservationLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for stopping the ledger expiry task.
#[derive(Debug)]
pub struct ExpiryHandle {
    running: Arc<AtomicBool>,
}

impl ExpiryHandle {
    /// True while the expiry task is sweeping.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the expiry task after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Starts the background sweep that expires abandoned attempts.
pub fn spawn_expiry_task(ledger: Arc<ReservationLedger>) -> ExpiryHandle {
    let running = Arc::new(AtomicBool::new(true));
    let task_running = Arc::clone(&running);
    let interval = ledger.config.sweep_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        while task_running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !task_running.load(Ordering::SeqCst) {
                break;
            }
            let expired = ledger.expire_stale();
            if expired > 0 {
                info!(expired, "expired stale reservation holds");
            }
        }
    });

    ExpiryHandle { running }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn attempt(name: &str) -> AttemptKey {
        AttemptKey::from_name(name)
    }

    fn pool(node: &str) -> PoolKey {
        PoolKey::new(node, DiskClass::Hdd)
    }

    // ===================
    // Hold / release
    // ===================

    #[test]
    fn hold_and_release() {
        let ledger = ReservationLedger::new();
        let a = attempt("a");

        ledger.hold(&a, pool("n1"), 40 * GIB);
        assert_eq!(ledger.held_on(&pool("n1")), 40 * GIB);
        assert_eq!(ledger.attempt_count(), 1);

        ledger.release(&a);
        assert_eq!(ledger.held_on(&pool("n1")), 0);
        assert_eq!(ledger.attempt_count(), 0);
    }

    #[test]
    fn hold_is_idempotent_per_attempt_and_pool() {
        let ledger = ReservationLedger::new();
        let a = attempt("a");

        ledger.hold(&a, pool("n1"), 40 * GIB);
        ledger.hold(&a, pool("n1"), 40 * GIB);
        assert_eq!(ledger.held_on(&pool("n1")), 40 * GIB);

        // A retried reserve with a corrected amount replaces, not adds.
        ledger.hold(&a, pool("n1"), 10 * GIB);
        assert_eq!(ledger.held_on(&pool("n1")), 10 * GIB);
    }

    #[test]
    fn holds_accumulate_across_attempts() {
        let ledger = ReservationLedger::new();
        ledger.hold(&attempt("a"), pool("n1"), 10 * GIB);
        ledger.hold(&attempt("b"), pool("n1"), 20 * GIB);
        assert_eq!(ledger.held_on(&pool("n1")), 30 * GIB);

        ledger.release(&attempt("a"));
        assert_eq!(ledger.held_on(&pool("n1")), 20 * GIB);
    }

    #[test]
    fn release_unknown_attempt_is_noop() {
        let ledger = ReservationLedger::new();
        ledger.release(&attempt("never-held"));
        assert_eq!(ledger.attempt_count(), 0);
    }

    #[test]
    fn pools_are_independent() {
        let ledger = ReservationLedger::new();
        let a = attempt("a");
        ledger.hold(&a, PoolKey::new("n1", DiskClass::Hdd), 10 * GIB);
        ledger.hold(&a, PoolKey::new("n1", DiskClass::Ssd), 20 * GIB);

        assert_eq!(ledger.held_on(&PoolKey::new("n1", DiskClass::Hdd)), 10 * GIB);
        assert_eq!(ledger.held_on(&PoolKey::new("n1", DiskClass::Ssd)), 20 * GIB);
        assert_eq!(ledger.held_on(&PoolKey::new("n2", DiskClass::Hdd)), 0);
    }

    // ===================
    // Property: reserve;unreserve restores pre-reserve state
    // ===================

    #[test]
    fn reserve_then_unreserve_restores_state() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(11);
        let ledger = ReservationLedger::new();

        // Background holds that must survive untouched.
        let background = attempt("background");
        ledger.hold(&background, pool("n1"), 5 * GIB);
        ledger.hold(&background, PoolKey::new("n2", DiskClass::Nvme), 7 * GIB);

        for round in 0..100 {
            let before_n1 = ledger.held_on(&pool("n1"));
            let before_n2 = ledger.held_on(&PoolKey::new("n2", DiskClass::Nvme));
            let before_attempts = ledger.attempt_count();

            let a = attempt(&format!("round-{round}"));
            for _ in 0..rng.gen_range(1..6) {
                let node = if rng.gen_bool(0.5) { "n1" } else { "n2" };
                let class = DiskClass::ALL[rng.gen_range(0..3)];
                ledger.hold(&a, PoolKey::new(node, class), GIB * rng.gen_range(1..100));
            }
            ledger.release(&a);

            assert_eq!(ledger.held_on(&pool("n1")), before_n1);
            assert_eq!(
                ledger.held_on(&PoolKey::new("n2", DiskClass::Nvme)),
                before_n2
            );
            assert_eq!(ledger.attempt_count(), before_attempts);
        }
    }

    // ===================
    // Expiry
    // ===================

    #[test]
    fn expire_stale_releases_old_attempts() {
        let ledger = ReservationLedger::with_config(LedgerConfig {
            hold_ttl: Duration::from_millis(0),
            sweep_interval: Duration::from_secs(30),
        });
        ledger.hold(&attempt("a"), pool("n1"), GIB);

        let expired = ledger.expire_stale();
        assert_eq!(expired, 1);
        assert_eq!(ledger.held_on(&pool("n1")), 0);
    }

    #[test]
    fn expire_stale_keeps_fresh_attempts() {
        let ledger = ReservationLedger::with_config(LedgerConfig {
            hold_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
        });
        ledger.hold(&attempt("a"), pool("n1"), GIB);

        assert_eq!(ledger.expire_stale(), 0);
        assert_eq!(ledger.held_on(&pool("n1")), GIB);
    }

    #[tokio::test]
    async fn expiry_task_sweeps() {
        let ledger = Arc::new(ReservationLedger::with_config(LedgerConfig {
            hold_ttl: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(10),
        }));
        ledger.hold(&attempt("a"), pool("n1"), GIB);

        let handle = spawn_expiry_task(Arc::clone(&ledger));
        for _ in 0..200 {
            if ledger.attempt_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ledger.attempt_count(), 0);
        handle.stop();
    }
}
