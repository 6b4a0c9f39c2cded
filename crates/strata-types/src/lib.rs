//! # Strata Types
//!
//! Shared data model for the Strata local-storage control plane.
//!
//! This crate defines the vocabulary every other Strata crate speaks:
//!
//! - **Inventory**: [`Disk`] and [`VolumeReplica`], the raw per-node
//!   resources reported by discovery
//! - **Derived state**: [`Pool`] (per-node, per-class aggregation) and
//!   [`NodeState`] (the rollup pushed to the resource store)
//! - **Volumes**: [`Volume`] with optional placement [`VolumeConfig`], and
//!   the [`PendingClaim`] a workload submits
//! - **Storage classes**: [`StorageClass`] and the typed
//!   [`StorageClassParams`] the scheduler consumes
//!
//! Pools are always rebuilt whole from inventory (see [`Pool::build`]),
//! so their derived fields cannot drift from the disks and replicas they
//! aggregate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod params;
pub mod types;
pub mod volume;

pub use error::{Error, Result};
pub use params::{
    StorageClass, StorageClassParams, PARAM_POOL_CLASS, PARAM_POOL_TYPE, PARAM_REPLICA_NUMBER,
    PARAM_VOLUME_KIND, VOLUME_KIND_LVM,
};
pub use types::{
    Disk, DiskClass, NodeState, Pool, PoolType, VolumeReplica, MAX_VOLUMES_PER_POOL,
    POOL_NAME_PREFIX,
};
pub use volume::{PendingClaim, ReplicaPlacement, Volume, VolumeConfig};
