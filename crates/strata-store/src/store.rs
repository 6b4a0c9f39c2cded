//! The resource-store contract.
//!
//! The store is the declarative source of truth the control plane
//! reconciles against. Objects are addressed by name within a kind, carry
//! an opaque monotonically increasing version token, and updates follow
//! optimistic concurrency: an [`Update`](ResourceStore::update_node) with a
//! stale token fails with a version conflict so the caller can re-read and
//! retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use strata_types::{NodeState, StorageClass, Volume};

use crate::error::Result;

/// An object as read from the store: the payload plus its version token
/// and creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Version token for optimistic concurrency.
    pub resource_version: u64,

    /// When the object was first created.
    pub created_at: DateTime<Utc>,

    /// The object itself.
    pub object: T,
}

impl<T> Versioned<T> {
    /// Replaces the payload, keeping version and timestamp.
    ///
    /// Used by read-modify-write cycles: GET, rewrite the payload, UPDATE
    /// with the version token the GET returned.
    #[must_use]
    pub fn with_object(self, object: T) -> Self {
        Self { object, ..self }
    }
}

/// A change to the store's node collection, as seen on a watch stream.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A node was created or updated; carries the new state.
    Applied(Versioned<NodeState>),

    /// A node was deleted.
    Deleted(String),
}

/// The declarative resource store consumed by the control plane.
///
/// Implementations must be safe to share across threads; every method is
/// a single atomic operation against the store.
pub trait ResourceStore: Send + Sync {
    /// Gets a node's stored state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such node exists, or `Unavailable`.
    fn get_node(&self, name: &str) -> Result<Versioned<NodeState>>;

    /// Lists all nodes.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    fn list_nodes(&self) -> Result<Vec<Versioned<NodeState>>>;

    /// Creates a node object.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the node exists, or `Unavailable`.
    fn create_node(&self, node: NodeState) -> Result<Versioned<NodeState>>;

    /// Updates a node object under optimistic concurrency.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` on a stale token, `NotFound`, or
    /// `Unavailable`.
    fn update_node(&self, node: Versioned<NodeState>) -> Result<Versioned<NodeState>>;

    /// Deletes a node object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such node exists, or `Unavailable`.
    fn delete_node(&self, name: &str) -> Result<()>;

    /// Subscribes to node changes. Events observed after subscription are
    /// delivered in apply order; a lagging subscriber may miss events and
    /// should relist.
    fn watch_nodes(&self) -> broadcast::Receiver<NodeEvent>;

    /// Gets a volume.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such volume exists, or `Unavailable`.
    fn get_volume(&self, name: &str) -> Result<Versioned<Volume>>;

    /// Creates a volume.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the volume exists, or `Unavailable`.
    fn create_volume(&self, volume: Volume) -> Result<Versioned<Volume>>;

    /// Updates a volume under optimistic concurrency.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` on a stale token, `NotFound`, or
    /// `Unavailable`.
    fn update_volume(&self, volume: Versioned<Volume>) -> Result<Versioned<Volume>>;

    /// Deletes a volume.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such volume exists, or `Unavailable`.
    fn delete_volume(&self, name: &str) -> Result<()>;

    /// Gets a storage class.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such class exists, or `Unavailable`.
    fn get_storage_class(&self, name: &str) -> Result<Versioned<StorageClass>>;

    /// Creates or replaces a storage class.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    fn put_storage_class(&self, class: StorageClass) -> Result<Versioned<StorageClass>>;
}
