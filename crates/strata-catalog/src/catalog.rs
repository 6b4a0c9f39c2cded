//! The node catalog and its informer loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use strata_store::{NodeEvent, ResourceStore};
use strata_types::NodeState;

/// Cluster-wide, read-only view of per-node storage state.
///
/// `get` is non-blocking and returns the most recent state observed from
/// the resource store's watch stream. Reads may lag a node's publish by
/// the propagation delay of the informer; consumers treat capacity as
/// advisory and rely on the reservation ledger for the gap.
#[derive(Debug, Default)]
pub struct NodeCatalog {
    nodes: RwLock<HashMap<String, Arc<NodeState>>>,
    version: AtomicU64,
}

impl NodeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent state observed for a node, if any.
    #[must_use]
    pub fn get(&self, node: &str) -> Option<Arc<NodeState>> {
        self.nodes.read().get(node).cloned()
    }

    /// Names of all known nodes.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    /// Number of known nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// True if no node has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Monotonic catalog version; bumped once per applied change. Used to
    /// key caches derived from catalog contents.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Applies one watch event.
    pub fn apply(&self, event: NodeEvent) {
        match event {
            NodeEvent::Applied(versioned) => {
                let name = versioned.object.name.clone();
                self.nodes
                    .write()
                    .insert(name.clone(), Arc::new(versioned.object));
                debug!(node = %name, "catalog updated");
            }
            NodeEvent::Deleted(name) => {
                self.nodes.write().remove(&name);
                debug!(node = %name, "catalog entry removed");
            }
        }
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Seeds the catalog from a full list of nodes.
    pub fn replace_all(&self, nodes: Vec<NodeState>) {
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            map.insert(node.name.clone(), Arc::new(node));
        }
        *self.nodes.write() = map;
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handle for stopping the informer task.
#[derive(Debug)]
pub struct InformerHandle {
    running: Arc<AtomicBool>,
}

impl InformerHandle {
    /// True while the informer is consuming events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the informer after its next event (or lag notice).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Starts the informer: lists current nodes into the catalog, then applies
/// watch events as they arrive. On watch lag the informer relists to
/// resynchronize rather than serving a gap.
pub fn spawn_informer<S: ResourceStore + 'static>(
    catalog: Arc<NodeCatalog>,
    store: Arc<S>,
) -> InformerHandle {
    let running = Arc::new(AtomicBool::new(true));
    let task_running = Arc::clone(&running);

    tokio::spawn(async move {
        let mut events = store.watch_nodes();
        seed(&catalog, store.as_ref());

        while task_running.load(Ordering::SeqCst) {
            match events.recv().await {
                Ok(event) => catalog.apply(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "node watch lagged, relisting");
                    seed(&catalog, store.as_ref());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        task_running.store(false, Ordering::SeqCst);
        info!("node informer stopped");
    });

    InformerHandle { running }
}

fn seed<S: ResourceStore>(catalog: &NodeCatalog, store: &S) {
    match store.list_nodes() {
        Ok(nodes) => {
            catalog.replace_all(nodes.into_iter().map(|v| v.object).collect());
        }
        Err(e) => warn!(error = %e, "node list failed, catalog left as-is"),
    }
}
