//! Replica planner.
//!
//! Given the synthetic volumes of one scheduling round, the planner
//! answers which nodes could host one replica of *every* volume in the
//! set. The scheduler core then enforces the topology requirement (enough
//! distinct qualifying nodes for the highest replica count) and checks
//! membership of the node currently under evaluation.
//!
//! The host fans filter calls out per node, so the planner memoizes the
//! candidate set per `(pending set, catalog version, ledger generation)`;
//! an N-node round computes candidates once, and any capacity hold or
//! release invalidates the projection.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use strata_catalog::NodeCatalog;
use strata_types::{DiskClass, NodeState, Volume};

use crate::error::{Error, Result};
use crate::ledger::{PoolKey, ReservationLedger};

/// Host-supplied schedulability predicate (taints, cordons, and whatever
/// else the orchestrator knows that this scheduler does not).
pub trait NodeGate: Send + Sync {
    /// True if the host considers the node eligible for new workloads.
    fn is_schedulable(&self, node: &str) -> bool;
}

/// A gate that admits every node; the default when the host supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllNodes;

impl NodeGate for AllowAllNodes {
    fn is_schedulable(&self, _node: &str) -> bool {
        true
    }
}

/// Why one volume does not fit one node's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disqualification {
    /// The node has no pool of the volume's class.
    NoPool {
        /// The missing class.
        class: DiskClass,
    },

    /// The volume requests zero bytes; treated as malformed.
    ZeroCapacity,

    /// Projected free capacity (free minus ledger holds) is insufficient.
    InsufficientCapacity {
        /// Projected free bytes.
        projected_free: u64,
        /// Requested bytes.
        required: u64,
    },

    /// No single disk in the pool can hold the volume.
    ExceedsMaxVolume {
        /// Largest volume the pool can host.
        max_single: u64,
        /// Requested bytes.
        required: u64,
    },

    /// The pool has no volume slots left.
    NoVolumeSlot,
}

impl fmt::Display for Disqualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPool { class } => write!(f, "no {class} pool on node"),
            Self::ZeroCapacity => write!(f, "requested capacity is zero"),
            Self::InsufficientCapacity {
                projected_free,
                required,
            } => write!(
                f,
                "projected free capacity {projected_free} below required {required}"
            ),
            Self::ExceedsMaxVolume { max_single, required } => write!(
                f,
                "required {required} exceeds largest placeable volume {max_single}"
            ),
            Self::NoVolumeSlot => write!(f, "no free volume slots"),
        }
    }
}

#[derive(Debug, Default)]
struct CandidateCache {
    /// `(catalog version, ledger generation)` the entries were computed
    /// under; any change to either invalidates every projection.
    world: (u64, u64),
    entries: HashMap<u64, Arc<Vec<String>>>,
}

/// Plans replica placement for pending volumes.
#[derive(Debug)]
pub struct ReplicaPlanner {
    catalog: Arc<NodeCatalog>,
    ledger: Arc<ReservationLedger>,
    cache: Mutex<CandidateCache>,
}

impl ReplicaPlanner {
    /// Creates a planner reading the given catalog and ledger.
    #[must_use]
    pub fn new(catalog: Arc<NodeCatalog>, ledger: Arc<ReservationLedger>) -> Self {
        Self {
            catalog,
            ledger,
            cache: Mutex::new(CandidateCache::default()),
        }
    }

    /// Checks whether one node's pool can host one replica of a volume.
    ///
    /// # Errors
    ///
    /// Returns the first failed qualification rule.
    pub fn qualify(
        &self,
        volume: &Volume,
        class: DiskClass,
        state: &NodeState,
    ) -> std::result::Result<(), Disqualification> {
        if volume.required_capacity_bytes == 0 {
            return Err(Disqualification::ZeroCapacity);
        }
        let Some(pool) = state.pool(class) else {
            return Err(Disqualification::NoPool { class });
        };

        let held = self.ledger.held_on(&PoolKey::new(&state.name, class));
        let projected_free = pool.free_capacity_bytes.saturating_sub(held);
        if projected_free < volume.required_capacity_bytes {
            return Err(Disqualification::InsufficientCapacity {
                projected_free,
                required: volume.required_capacity_bytes,
            });
        }

        if pool.max_single_volume_bytes < volume.required_capacity_bytes {
            return Err(Disqualification::ExceedsMaxVolume {
                max_single: pool.max_single_volume_bytes,
                required: volume.required_capacity_bytes,
            });
        }

        if pool.free_volume_count < 1 {
            return Err(Disqualification::NoVolumeSlot);
        }

        Ok(())
    }

    /// The nodes on which every volume of the set qualifies, ordered by
    /// descending projected free capacity (ties broken by name).
    ///
    /// Results are memoized per `(volume set, catalog version, ledger
    /// generation)`.
    ///
    /// # Errors
    ///
    /// Returns an error if a volume carries an unparseable pool name.
    pub fn candidates(
        &self,
        volumes: &[Volume],
        gate: &dyn NodeGate,
    ) -> Result<Arc<Vec<String>>> {
        let mut classed = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let class = volume
                .class()
                .map_err(|e| Error::from_params_error(&volume.name, e))?;
            classed.push((class, volume));
        }

        let world = (self.catalog.version(), self.ledger.generation());
        let set_hash = hash_volume_set(volumes);
        {
            let mut cache = self.cache.lock();
            if cache.world != world {
                cache.entries.clear();
                cache.world = world;
            } else if let Some(hit) = cache.entries.get(&set_hash) {
                return Ok(Arc::clone(hit));
            }
        }

        let mut qualifying: Vec<(u64, String)> = Vec::new();
        for node in self.catalog.node_names() {
            if !gate.is_schedulable(&node) {
                debug!(node = %node, "node gated unschedulable");
                continue;
            }
            let Some(state) = self.catalog.get(&node) else {
                continue;
            };

            let mut fits_all = true;
            for (class, volume) in &classed {
                if let Err(reason) = self.qualify(volume, *class, &state) {
                    debug!(node = %node, volume = %volume.name, reason = %reason, "node disqualified");
                    fits_all = false;
                    break;
                }
            }
            if fits_all {
                qualifying.push((self.projected_free(&state, &classed), node));
            }
        }

        qualifying.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let result = Arc::new(qualifying.into_iter().map(|(_, n)| n).collect::<Vec<_>>());

        let mut cache = self.cache.lock();
        if cache.world == world {
            cache.entries.insert(set_hash, Arc::clone(&result));
        }
        Ok(result)
    }

    /// Projected free capacity of a node over the classes the volume set
    /// touches, after ledger holds.
    fn projected_free(&self, state: &NodeState, classed: &[(DiskClass, &Volume)]) -> u64 {
        let mut classes: Vec<DiskClass> = classed.iter().map(|(c, _)| *c).collect();
        classes.sort_unstable();
        classes.dedup();
        classes
            .into_iter()
            .filter_map(|class| {
                state.pool(class).map(|pool| {
                    pool.free_capacity_bytes
                        .saturating_sub(self.ledger.held_on(&PoolKey::new(&state.name, class)))
                })
            })
            .sum()
    }
}

fn hash_volume_set(volumes: &[Volume]) -> u64 {
    let mut keys: Vec<(&str, &str, u64, u32)> = volumes
        .iter()
        .map(|v| {
            (
                v.name.as_str(),
                v.pool_name.as_str(),
                v.required_capacity_bytes,
                v.replica_number,
            )
        })
        .collect();
    keys.sort_unstable();
    let mut hasher = DefaultHasher::new();
    keys.hash(&mut hasher);
    hasher.finish()
}
