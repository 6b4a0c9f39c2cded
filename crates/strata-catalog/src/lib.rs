//! # Strata Catalog
//!
//! Cluster-wide node catalog for the Strata control plane.
//!
//! The catalog is the scheduler's read path: a non-blocking, in-memory
//! view of every node's published storage state, kept current by an
//! informer task consuming the resource store's node watch stream. It
//! holds no authority (node state is written only by each node's pool
//! registry) and reads are allowed to trail a publish briefly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;

pub use catalog::{spawn_informer, InformerHandle, NodeCatalog};
