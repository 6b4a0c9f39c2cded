//! # Strata Scheduler
//!
//! Local-volume scheduling core for the Strata control plane.
//!
//! This crate answers, for a host orchestrator evaluating candidate nodes
//! against a workload's volume claims: *can this node host the volumes?*
//! and *how good a fit is it?* It composes three pieces:
//!
//! - the [`ReplicaPlanner`], which computes the set of nodes on which
//!   every pending volume could place one replica
//! - the [`VolumeScheduler`], which implements the host's
//!   `Filter → Score → Reserve/Unreserve` pipeline over the planner
//! - the [`ReservationLedger`], a short-lived hold on pool capacity
//!   between filter-time and bind-time
//!
//! # Pipeline
//!
//! ```text
//!  host scheduler                 strata-scheduler
//! ┌──────────────┐   filter    ┌─────────────────────────────┐
//! │ per-node     │────────────▶│ bound volumes pinned?       │
//! │ evaluation   │             │ pending set qualifies?      │
//! │ fan-out      │   score     │ topology satisfied?         │
//! │              │────────────▶│ fit tightness in [0, max]   │
//! │ chosen node  │   reserve   │                             │
//! │              │────────────▶│ ledger holds capacity       │
//! │ abandon      │  unreserve  │                             │
//! │              │────────────▶│ ledger releases             │
//! └──────────────┘             └─────────────────────────────┘
//!                    reads: NodeCatalog ── fed by ─ ResourceStore watch
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_catalog::NodeCatalog;
//! use strata_scheduler::{ReservationLedger, SchedulerPlugin, VolumeScheduler};
//! use strata_store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let catalog = Arc::new(NodeCatalog::new());
//! let ledger = Arc::new(ReservationLedger::new());
//! let scheduler = VolumeScheduler::new(store, catalog, ledger);
//!
//! // A workload with no claims of ours schedules anywhere.
//! assert!(scheduler.filter(&[], &[], "node-1").expect("filter"));
//! assert_eq!(scheduler.score(&[], "node-1").expect("score"), 100);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod error;
pub mod ledger;
pub mod planner;
pub mod scheduler;

pub use attempt::{AttemptKey, AttemptPhase, AttemptTracker};
pub use error::{Error, Result};
pub use ledger::{
    spawn_expiry_task, ExpiryHandle, LedgerConfig, PoolKey, ReservationLedger,
};
pub use planner::{AllowAllNodes, Disqualification, NodeGate, ReplicaPlanner};
pub use scheduler::{
    SchedulerConfig, SchedulerPlugin, VolumeScheduler, DEFAULT_CSI_DRIVER_NAME,
    DEFAULT_MAX_NODE_SCORE,
};
