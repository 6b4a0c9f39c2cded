//! # Strata Registry
//!
//! Per-node storage pool registry for the Strata control plane.
//!
//! Each storage node runs one [`PoolRegistry`]: the in-memory inventory of
//! its local disks and volume replicas, and the per-class pools derived
//! from them. Discovery feeds the registry a stream of
//! [`RegistryEvent`]s; a supervised worker coalesces bursts into single
//! rebuilds and publishes the resulting [`NodeState`](strata_types::NodeState)
//! to the resource store, where the cluster-wide node catalog picks it up.
//!
//! Rebuilds are idempotent and all-or-nothing: the new pool map is built
//! in a local buffer, verified, and swapped in as one reference, so a
//! reader never observes a half-applied rebuild.
//!
//! ## Example
//!
//! ```rust
//! use strata_registry::{PoolRegistry, RegistryEvent};
//! use strata_types::{Disk, DiskClass};
//!
//! let registry = PoolRegistry::new("node-1");
//! registry.apply(RegistryEvent::DiskAdded(Disk::new(
//!     "/dev/sdb",
//!     DiskClass::Ssd,
//!     512 * 1024 * 1024 * 1024,
//! )));
//! registry.rebuild().expect("rebuild");
//!
//! let pools = registry.pools();
//! assert!(pools.contains_key(&DiskClass::Ssd));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod registry;
pub mod worker;

pub use error::{Error, Result};
pub use registry::{PoolRegistry, RegistryEvent};
pub use worker::{publish, register_node, spawn_worker, RegistryConfig, RegistryHandle};
