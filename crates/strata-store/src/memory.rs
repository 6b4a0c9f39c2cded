//! In-memory resource store.
//!
//! Single-process implementation of [`ResourceStore`], used by tests and
//! by deployments where the control plane and store share a process. The
//! version counter is global so every successful write observably advances
//! the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use strata_types::{NodeState, StorageClass, Volume};

use crate::error::{Error, ResourceKind, Result};
use crate::store::{NodeEvent, ResourceStore, Versioned};

const WATCH_CHANNEL_CAPACITY: usize = 256;

/// One kind's objects, keyed by name.
#[derive(Debug)]
struct Table<T> {
    items: HashMap<String, Versioned<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    fn get(&self, kind: ResourceKind, name: &str) -> Result<Versioned<T>> {
        self.items.get(name).cloned().ok_or_else(|| Error::NotFound {
            kind,
            name: name.to_string(),
        })
    }

    fn create(
        &mut self,
        kind: ResourceKind,
        name: &str,
        object: T,
        version: u64,
    ) -> Result<Versioned<T>> {
        if self.items.contains_key(name) {
            return Err(Error::AlreadyExists {
                kind,
                name: name.to_string(),
            });
        }
        let entry = Versioned {
            resource_version: version,
            created_at: Utc::now(),
            object,
        };
        self.items.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    fn update(
        &mut self,
        kind: ResourceKind,
        name: &str,
        incoming: Versioned<T>,
        version: u64,
    ) -> Result<Versioned<T>> {
        let current = self.items.get_mut(name).ok_or_else(|| Error::NotFound {
            kind,
            name: name.to_string(),
        })?;
        if current.resource_version != incoming.resource_version {
            return Err(Error::VersionConflict {
                kind,
                name: name.to_string(),
                expected: incoming.resource_version,
                actual: current.resource_version,
            });
        }
        current.object = incoming.object;
        current.resource_version = version;
        Ok(current.clone())
    }

    fn delete(&mut self, kind: ResourceKind, name: &str) -> Result<Versioned<T>> {
        self.items.remove(name).ok_or_else(|| Error::NotFound {
            kind,
            name: name.to_string(),
        })
    }
}

/// In-memory [`ResourceStore`].
#[derive(Debug)]
pub struct MemoryStore {
    nodes: RwLock<Table<NodeState>>,
    volumes: RwLock<Table<Volume>>,
    storage_classes: RwLock<Table<StorageClass>>,
    node_events: broadcast::Sender<NodeEvent>,
    version: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (node_events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(Table::default()),
            volumes: RwLock::new(Table::default()),
            storage_classes: RwLock::new(Table::default()),
            node_events,
            version: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates a store outage: while set, every operation fails with
    /// `Unavailable`. Used to exercise retry paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable {
                reason: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: NodeEvent) {
        // No subscribers is fine; send only fails then.
        let _ = self.node_events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for MemoryStore {
    fn get_node(&self, name: &str) -> Result<Versioned<NodeState>> {
        self.check_available()?;
        self.nodes.read().get(ResourceKind::Node, name)
    }

    fn list_nodes(&self) -> Result<Vec<Versioned<NodeState>>> {
        self.check_available()?;
        Ok(self.nodes.read().items.values().cloned().collect())
    }

    fn create_node(&self, node: NodeState) -> Result<Versioned<NodeState>> {
        self.check_available()?;
        let version = self.next_version();
        let name = node.name.clone();
        let created = self
            .nodes
            .write()
            .create(ResourceKind::Node, &name, node, version)?;
        debug!(node = %name, version, "node created");
        self.notify(NodeEvent::Applied(created.clone()));
        Ok(created)
    }

    fn update_node(&self, node: Versioned<NodeState>) -> Result<Versioned<NodeState>> {
        self.check_available()?;
        let version = self.next_version();
        let name = node.object.name.clone();
        let updated = self
            .nodes
            .write()
            .update(ResourceKind::Node, &name, node, version)?;
        debug!(node = %name, version, "node updated");
        self.notify(NodeEvent::Applied(updated.clone()));
        Ok(updated)
    }

    fn delete_node(&self, name: &str) -> Result<()> {
        self.check_available()?;
        self.nodes.write().delete(ResourceKind::Node, name)?;
        debug!(node = %name, "node deleted");
        self.notify(NodeEvent::Deleted(name.to_string()));
        Ok(())
    }

    fn watch_nodes(&self) -> broadcast::Receiver<NodeEvent> {
        self.node_events.subscribe()
    }

    fn get_volume(&self, name: &str) -> Result<Versioned<Volume>> {
        self.check_available()?;
        self.volumes.read().get(ResourceKind::Volume, name)
    }

    fn create_volume(&self, volume: Volume) -> Result<Versioned<Volume>> {
        self.check_available()?;
        let version = self.next_version();
        let name = volume.name.clone();
        self.volumes
            .write()
            .create(ResourceKind::Volume, &name, volume, version)
    }

    fn update_volume(&self, volume: Versioned<Volume>) -> Result<Versioned<Volume>> {
        self.check_available()?;
        let version = self.next_version();
        let name = volume.object.name.clone();
        self.volumes
            .write()
            .update(ResourceKind::Volume, &name, volume, version)
    }

    fn delete_volume(&self, name: &str) -> Result<()> {
        self.check_available()?;
        self.volumes.write().delete(ResourceKind::Volume, name)?;
        Ok(())
    }

    fn get_storage_class(&self, name: &str) -> Result<Versioned<StorageClass>> {
        self.check_available()?;
        self.storage_classes
            .read()
            .get(ResourceKind::StorageClass, name)
    }

    fn put_storage_class(&self, class: StorageClass) -> Result<Versioned<StorageClass>> {
        self.check_available()?;
        let version = self.next_version();
        let name = class.name.clone();
        let entry = Versioned {
            resource_version: version,
            created_at: Utc::now(),
            object: class,
        };
        self.storage_classes
            .write()
            .items
            .insert(name, entry.clone());
        Ok(entry)
    }
}
