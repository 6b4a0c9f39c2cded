//! Scheduling attempts.
//!
//! One attempt is one scheduling decision cycle for one workload instance:
//! the unit of reservation. The host plugin contract carries no attempt
//! identifier, so the key is derived deterministically from the pending
//! claim set: the same claims always resolve to the same attempt, which is
//! what makes reserve and unreserve idempotent.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use strata_types::{DiskClass, PendingClaim};

/// Identity of one scheduling attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey(String);

impl AttemptKey {
    /// Derives the attempt key for a pending claim set. Order-insensitive:
    /// the same claims in any order produce the same key.
    #[must_use]
    pub fn from_claims(claims: &[PendingClaim]) -> Self {
        let mut names: Vec<&str> = claims.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        Self(names.join(","))
    }

    /// An explicit attempt key, for hosts that do carry their own ids.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase of a scheduling attempt.
///
/// `Bound` and `Unreserved` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// Attempt observed, nothing decided yet.
    New,

    /// Filter is evaluating nodes.
    Filtering,

    /// Filter finished; `accepted` records the verdict for the last node.
    Filtered {
        /// Whether the last filtered node was accepted.
        accepted: bool,
    },

    /// Score is ranking accepted nodes.
    Scoring,

    /// Capacity is held in the ledger.
    Reserved,

    /// Volumes were created; the attempt succeeded.
    Bound,

    /// The attempt was abandoned and its holds released.
    Unreserved,
}

impl AttemptPhase {
    /// True for phases no attempt leaves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Bound | Self::Unreserved)
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Filtering => write!(f, "Filtering"),
            Self::Filtered { accepted: true } => write!(f, "Filtered(accept)"),
            Self::Filtered { accepted: false } => write!(f, "Filtered(reject)"),
            Self::Scoring => write!(f, "Scoring"),
            Self::Reserved => write!(f, "Reserved"),
            Self::Bound => write!(f, "Bound"),
            Self::Unreserved => write!(f, "Unreserved"),
        }
    }
}

#[derive(Debug)]
struct AttemptRecord {
    id: Uuid,
    phase: AttemptPhase,
    /// Claim name → resolved disk class, cached at filter time so reserve
    /// needs no store round-trip.
    resolved_classes: HashMap<String, DiskClass>,
    started_at: Instant,
}

/// Attempts abandoned without a terminal signal (for example rejected on
/// every node, so the host never reserves) are evicted oldest-first once
/// this many are in flight.
const MAX_TRACKED_ATTEMPTS: usize = 1024;

/// Tracks in-flight attempts: phase transitions for log correlation, and
/// the per-claim class resolution cached between filter and reserve.
#[derive(Debug, Default)]
pub struct AttemptTracker {
    attempts: Mutex<HashMap<AttemptKey, AttemptRecord>>,
}

impl AttemptTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves an attempt to a phase, creating it on first sight. Terminal
    /// phases drop the record. Returns the attempt's correlation id.
    pub fn advance(&self, key: &AttemptKey, phase: AttemptPhase) -> Uuid {
        let mut attempts = self.attempts.lock();
        if attempts.len() >= MAX_TRACKED_ATTEMPTS && !attempts.contains_key(key) {
            if let Some(oldest) = attempts
                .iter()
                .min_by_key(|(_, r)| r.started_at)
                .map(|(k, _)| k.clone())
            {
                attempts.remove(&oldest);
            }
        }
        let record = attempts.entry(key.clone()).or_insert_with(|| AttemptRecord {
            id: Uuid::new_v4(),
            phase: AttemptPhase::New,
            resolved_classes: HashMap::new(),
            started_at: Instant::now(),
        });
        let id = record.id;
        if record.phase != phase {
            debug!(
                attempt = %key,
                attempt_id = %id,
                from = %record.phase,
                to = %phase,
                "attempt phase transition"
            );
            record.phase = phase;
        }
        if phase.is_terminal() {
            let elapsed = record.started_at.elapsed();
            debug!(attempt = %key, attempt_id = %id, elapsed_ms = elapsed.as_millis() as u64, "attempt finished");
            attempts.remove(key);
        }
        id
    }

    /// Caches the resolved class of one claim for later reserve calls.
    pub fn cache_class(&self, key: &AttemptKey, claim: &str, class: DiskClass) {
        let mut attempts = self.attempts.lock();
        if let Some(record) = attempts.get_mut(key) {
            record.resolved_classes.insert(claim.to_string(), class);
        }
    }

    /// The cached class of one claim, if filter resolved it already.
    #[must_use]
    pub fn cached_class(&self, key: &AttemptKey, claim: &str) -> Option<DiskClass> {
        self.attempts
            .lock()
            .get(key)
            .and_then(|r| r.resolved_classes.get(claim).copied())
    }

    /// Number of attempts currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    /// True if no attempt is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.lock().is_empty()
    }
}
