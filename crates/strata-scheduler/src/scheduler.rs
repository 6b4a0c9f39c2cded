//! Scheduler core: the filter/score/reserve pipeline.
//!
//! The [`VolumeScheduler`] plugs into a host orchestrator's scheduling
//! pipeline. Per candidate node the host asks *can this node host the
//! workload's volumes?* ([`SchedulerPlugin::filter`]) and *how good is
//! it?* ([`SchedulerPlugin::score`]); once the host picks a node it
//! reserves capacity until binding completes or the attempt is abandoned.
//!
//! Filter and score are in-memory reads plus at most one store lookup per
//! bound volume; neither ever writes to the store.

use std::sync::Arc;

use tracing::{debug, info, warn};

use strata_catalog::NodeCatalog;
use strata_store::ResourceStore;
use strata_types::{DiskClass, NodeState, PendingClaim, Volume};

use crate::attempt::{AttemptKey, AttemptPhase, AttemptTracker};
use crate::error::{Error, Result};
use crate::ledger::{PoolKey, ReservationLedger};
use crate::planner::{AllowAllNodes, NodeGate, ReplicaPlanner};

/// CSI driver name announced to the host scheduler.
pub const DEFAULT_CSI_DRIVER_NAME: &str = "lvm.strata.io";

/// Default score ceiling; hosts supply their own at init.
pub const DEFAULT_MAX_NODE_SCORE: i64 = 100;

/// Configuration for the scheduler core.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// CSI driver name reported to the host.
    pub csi_driver_name: String,

    /// The host's score ceiling; scores land in `[0, max_node_score]`.
    pub max_node_score: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            csi_driver_name: DEFAULT_CSI_DRIVER_NAME.to_string(),
            max_node_score: DEFAULT_MAX_NODE_SCORE,
        }
    }
}

/// The plugin contract the host scheduler drives.
///
/// Within one attempt the host calls `filter` (once per candidate node),
/// then `score` on the survivors, then `reserve` on the chosen node;
/// `unreserve` is the cancellation signal and must be accepted even when
/// `reserve` was never called.
pub trait SchedulerPlugin: Send + Sync {
    /// The CSI driver this scheduler handles claims for.
    fn csi_driver_name(&self) -> &str;

    /// Decides whether `node` can host the given bound volumes and pending
    /// claims. Returns `Ok(false)` when the node merely does not qualify;
    /// hard rejections (immovable bound volume elsewhere, topology
    /// shortage, malformed input) surface as errors.
    ///
    /// # Errors
    ///
    /// See [`Error`] for the taxonomy; none are retried locally.
    fn filter(
        &self,
        volume_names: &[String],
        pending: &[PendingClaim],
        node: &str,
    ) -> Result<bool>;

    /// Scores `node` for the pending claims, in `[0, max_node_score]`.
    /// Higher means a better placement under the configured policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unknown or a claim fails to
    /// resolve.
    fn score(&self, pending: &[PendingClaim], node: &str) -> Result<i64>;

    /// Holds capacity on `node` for every pending claim. Idempotent per
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns an error only if a claim fails to resolve.
    fn reserve(&self, pending: &[PendingClaim], node: &str) -> Result<()>;

    /// Releases the attempt's holds. Idempotent; unknown attempts are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the host contract.
    fn unreserve(&self, pending: &[PendingClaim], node: &str) -> Result<()>;
}

/// Local-volume scheduler core.
pub struct VolumeScheduler<S: ResourceStore> {
    store: Arc<S>,
    catalog: Arc<NodeCatalog>,
    ledger: Arc<ReservationLedger>,
    planner: ReplicaPlanner,
    gate: Arc<dyn NodeGate>,
    tracker: AttemptTracker,
    config: SchedulerConfig,
}

impl<S: ResourceStore> VolumeScheduler<S> {
    /// Creates a scheduler over a store, catalog, and ledger.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        catalog: Arc<NodeCatalog>,
        ledger: Arc<ReservationLedger>,
    ) -> Self {
        let planner = ReplicaPlanner::new(Arc::clone(&catalog), Arc::clone(&ledger));
        Self {
            store,
            catalog,
            ledger,
            planner,
            gate: Arc::new(AllowAllNodes),
            tracker: AttemptTracker::new(),
            config: SchedulerConfig::default(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the host's node schedulability predicate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn NodeGate>) -> Self {
        self.gate = gate;
        self
    }

    /// The reservation ledger this scheduler holds capacity in.
    #[must_use]
    pub fn ledger(&self) -> &Arc<ReservationLedger> {
        &self.ledger
    }

    /// Marks an attempt bound: its volumes were created, so the projected
    /// holds are released and the attempt completes. Hosts that expose a
    /// post-bind hook call this instead of waiting out the ledger TTL.
    pub fn mark_bound(&self, pending: &[PendingClaim]) {
        let key = AttemptKey::from_claims(pending);
        self.ledger.release(&key);
        let attempt_id = self.tracker.advance(&key, AttemptPhase::Bound);
        info!(attempt = %key, attempt_id = %attempt_id, "attempt bound");
    }

    /// Resolves a pending claim to the synthetic volume the planner
    /// evaluates, caching the claim's class for later reserve calls.
    fn resolve_claim(&self, key: &AttemptKey, claim: &PendingClaim) -> Result<Volume> {
        if claim.required_capacity_bytes == 0 {
            return Err(Error::MalformedClaim {
                claim: claim.name.clone(),
                reason: "requested capacity is zero".to_string(),
            });
        }
        let sc_name = claim
            .storage_class
            .as_deref()
            .ok_or_else(|| Error::MissingStorageClass {
                claim: claim.name.clone(),
            })?;
        let storage_class = match self.store.get_storage_class(sc_name) {
            Ok(versioned) => versioned.object,
            Err(strata_store::Error::NotFound { .. }) => {
                return Err(Error::MissingStorageClass {
                    claim: claim.name.clone(),
                })
            }
            Err(e) => return Err(Error::Store(e)),
        };
        let params = storage_class
            .parse_params()
            .map_err(|e| Error::from_params_error(&claim.name, e))?;
        self.tracker.cache_class(key, &claim.name, params.pool_class);
        Ok(Volume::from_claim(claim, &params))
    }

    fn resolve_pending(&self, key: &AttemptKey, claims: &[PendingClaim]) -> Result<Vec<Volume>> {
        claims
            .iter()
            .map(|claim| self.resolve_claim(key, claim))
            .collect()
    }

    /// Bound volumes are physically immovable: the node must already host
    /// one of the volume's replicas.
    fn filter_bound(&self, volume_names: &[String], node: &str) -> Result<()> {
        for name in volume_names {
            let volume = self.store.get_volume(name)?.object;
            let Some(config) = &volume.config else {
                warn!(volume = %name, "bound volume has no placement config yet");
                return Err(Error::VolumeNotReady {
                    volume: name.clone(),
                });
            };
            if !config.has_replica_on(node) {
                debug!(volume = %name, node = %node, "bound volume does not locate on this node");
                return Err(Error::WrongNodeForBoundVolume {
                    volume: name.clone(),
                    node: node.to_string(),
                });
            }
        }
        Ok(())
    }

    fn filter_pending(
        &self,
        key: &AttemptKey,
        pending: &[PendingClaim],
        node: &str,
    ) -> Result<bool> {
        if pending.is_empty() {
            return Ok(true);
        }
        let volumes = self.resolve_pending(key, pending)?;
        let candidates = self.planner.candidates(&volumes, self.gate.as_ref())?;

        let need = volumes.iter().map(|v| v.replica_number).max().unwrap_or(1);
        if (candidates.len() as u32) < need {
            return Err(Error::InsufficientTopology {
                need,
                have: candidates.len(),
            });
        }
        if !candidates.iter().any(|c| c == node) {
            return Err(Error::NodeNotQualifying {
                node: node.to_string(),
            });
        }
        Ok(true)
    }

    fn score_one(&self, volume: &Volume, class: DiskClass, state: &NodeState) -> i64 {
        let free = state.pool(class).map_or(0, |p| p.free_capacity_bytes);
        let required = volume.required_capacity_bytes;

        debug!(
            volume = %volume.name,
            volume_capacity = required,
            node = %state.name,
            node_free_capacity = free,
            "score node for one volume"
        );

        if free == 0 || required >= free {
            return 0;
        }
        ((free - required) as f64 / free as f64 * self.config.max_node_score as f64) as i64
    }
}

impl<S: ResourceStore> SchedulerPlugin for VolumeScheduler<S> {
    fn csi_driver_name(&self) -> &str {
        &self.config.csi_driver_name
    }

    fn filter(
        &self,
        volume_names: &[String],
        pending: &[PendingClaim],
        node: &str,
    ) -> Result<bool> {
        let key = AttemptKey::from_claims(pending);
        let attempt_id = self.tracker.advance(&key, AttemptPhase::Filtering);

        let verdict = self
            .filter_bound(volume_names, node)
            .and_then(|()| self.filter_pending(&key, pending, node));

        match verdict {
            Ok(accepted) => {
                self.tracker
                    .advance(&key, AttemptPhase::Filtered { accepted });
                debug!(attempt_id = %attempt_id, node = %node, accepted, "filter verdict");
                Ok(accepted)
            }
            // Not qualifying is a soft verdict for the host: this node is
            // out, but the attempt as a whole may still place elsewhere.
            Err(Error::NodeNotQualifying { .. }) => {
                self.tracker
                    .advance(&key, AttemptPhase::Filtered { accepted: false });
                debug!(attempt_id = %attempt_id, node = %node, "node not among qualifying candidates");
                Ok(false)
            }
            Err(e) => {
                self.tracker
                    .advance(&key, AttemptPhase::Filtered { accepted: false });
                debug!(attempt_id = %attempt_id, node = %node, error = %e, "filter rejected");
                Err(e)
            }
        }
    }

    fn score(&self, pending: &[PendingClaim], node: &str) -> Result<i64> {
        let key = AttemptKey::from_claims(pending);
        let attempt_id = self.tracker.advance(&key, AttemptPhase::Scoring);

        if pending.is_empty() {
            return Ok(self.config.max_node_score);
        }
        let state = self
            .catalog
            .get(node)
            .ok_or_else(|| Error::NodeNotInCatalog {
                node: node.to_string(),
            })?;

        let mut total: i64 = 0;
        for claim in pending {
            let volume = self.resolve_claim(&key, claim)?;
            let class = volume
                .class()
                .map_err(|e| Error::from_params_error(&claim.name, e))?;
            total += self.score_one(&volume, class, &state);
        }

        let max = self.config.max_node_score as f64;
        let score = (total as f64 / (max * pending.len() as f64) * max) as i64;
        debug!(attempt_id = %attempt_id, node = %node, score, "node scored");
        Ok(score)
    }

    fn reserve(&self, pending: &[PendingClaim], node: &str) -> Result<()> {
        let key = AttemptKey::from_claims(pending);

        for claim in pending {
            let class = match self.tracker.cached_class(&key, &claim.name) {
                Some(class) => class,
                None => {
                    // Host skipped filter for this attempt; resolve now.
                    let volume = self.resolve_claim(&key, claim)?;
                    volume
                        .class()
                        .map_err(|e| Error::from_params_error(&claim.name, e))?
                }
            };
            self.ledger.hold(
                &key,
                PoolKey::new(node, class),
                claim.required_capacity_bytes,
            );
        }
        let attempt_id = self.tracker.advance(&key, AttemptPhase::Reserved);
        info!(attempt = %key, attempt_id = %attempt_id, node = %node, claims = pending.len(), "capacity reserved");
        Ok(())
    }

    fn unreserve(&self, pending: &[PendingClaim], _node: &str) -> Result<()> {
        let key = AttemptKey::from_claims(pending);
        self.ledger.release(&key);
        let attempt_id = self.tracker.advance(&key, AttemptPhase::Unreserved);
        debug!(attempt = %key, attempt_id = %attempt_id, "attempt unreserved");
        Ok(())
    }
}
