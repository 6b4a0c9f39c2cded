//! # Strata Store
//!
//! The resource-store contract the Strata control plane reconciles
//! against, plus an in-memory implementation.
//!
//! The store holds three kinds of objects, addressed by name: node storage
//! states, logical volumes, and storage classes. Writes follow optimistic
//! concurrency: every object carries a version token and an update with a
//! stale token fails with [`Error::VersionConflict`] so the caller re-reads
//! and retries. Node changes fan out on a watch stream consumed by the
//! node catalog.
//!
//! ## Example
//!
//! ```rust
//! use strata_store::{MemoryStore, ResourceStore};
//! use strata_types::NodeState;
//!
//! let store = MemoryStore::new();
//! store.create_node(NodeState::new("node-1")).expect("create");
//!
//! // Read-modify-write under optimistic concurrency.
//! let mut node = store.get_node("node-1").expect("get");
//! node.object.total_disk = 4;
//! store.update_node(node).expect("update");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod store;

pub use error::{Error, ResourceKind, Result};
pub use memory::MemoryStore;
pub use store::{NodeEvent, ResourceStore, Versioned};
