//! Registry worker: event loop, publish, supervision.
//!
//! The worker owns the write side of a [`PoolRegistry`]: it drains
//! discovery events (coalescing bursts into one rebuild), pushes the
//! rebuilt node state to the resource store with bounded retries, and on
//! startup registers the node object if it does not exist yet.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use strata_store::ResourceStore;

use crate::error::{Error, Result};
use crate::registry::{PoolRegistry, RegistryEvent};

/// Configuration for the registry worker.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Publish attempts per rebuild before leaving the state dirty.
    pub publish_attempts: u32,

    /// Base backoff between publish attempts; each attempt adds jitter
    /// up to this amount again.
    pub publish_backoff: Duration,

    /// How often a failed publish is retried when no new events arrive.
    pub republish_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(100),
            republish_interval: Duration::from_secs(10),
        }
    }
}

/// Handle for feeding and controlling a registry worker.
#[derive(Debug)]
pub struct RegistryHandle {
    events: mpsc::UnboundedSender<RegistryEvent>,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    restarts: Arc<AtomicU64>,
}

impl RegistryHandle {
    /// Feeds a discovery event to the worker. Events sent after shutdown
    /// are dropped.
    pub fn ingest(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            debug!("registry worker gone, event dropped");
        }
    }

    /// Signals the worker to stop; an in-flight rebuild completes first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// True while the worker (or its supervisor) is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of times the supervisor restarted a panicked worker.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }
}

/// Registers the node object in the store, creating it when absent.
///
/// # Errors
///
/// Returns an error if the store cannot be reached.
pub fn register_node<S: ResourceStore>(registry: &PoolRegistry, store: &S) -> Result<()> {
    let node = registry.node_name();
    match store.get_node(node) {
        Ok(_) => Ok(()),
        Err(strata_store::Error::NotFound { .. }) => {
            store
                .create_node(registry.node_state())
                .map_err(|source| Error::Publish {
                    node: node.to_string(),
                    source,
                })?;
            info!(node = %node, "registered node in store");
            Ok(())
        }
        Err(source) => Err(Error::Publish {
            node: node.to_string(),
            source,
        }),
    }
}

/// Pushes the registry's current node state to the store.
///
/// GETs the node, overwrites its pools and rollups, and UPDATEs under
/// optimistic concurrency. Transient failures (version conflict, store
/// outage) are retried with jittered backoff up to the configured attempt
/// budget; the caller keeps the state dirty beyond that.
///
/// # Errors
///
/// Returns the last store error once the attempt budget is exhausted.
pub async fn publish<S: ResourceStore>(
    registry: &PoolRegistry,
    store: &S,
    config: &RegistryConfig,
) -> Result<()> {
    let node = registry.node_name().to_string();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let source = match publish_once(registry, store) {
            Ok(()) => {
                debug!(node = %node, attempt, "node state published");
                return Ok(());
            }
            Err(e) => e,
        };

        let retryable = source.is_transient()
            || matches!(source, strata_store::Error::AlreadyExists { .. });
        if !retryable || attempt >= config.publish_attempts {
            return Err(Error::Publish { node, source });
        }

        let backoff = jittered(config.publish_backoff);
        warn!(
            node = %node,
            attempt,
            error = %source,
            backoff_ms = backoff.as_millis() as u64,
            "publish attempt failed, backing off"
        );
        tokio::time::sleep(backoff).await;
    }
}

fn publish_once<S: ResourceStore>(
    registry: &PoolRegistry,
    store: &S,
) -> std::result::Result<(), strata_store::Error> {
    let state = registry.node_state();
    match store.get_node(&state.name) {
        Ok(current) => {
            store.update_node(current.with_object(state))?;
            Ok(())
        }
        Err(strata_store::Error::NotFound { .. }) => {
            store.create_node(state)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn jittered(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    base + Duration::from_millis(jitter)
}

/// Spawns a supervised registry worker.
///
/// The worker performs the startup sequence (resync, rebuild, register,
/// publish) and then serves the event loop. A panic inside the worker,
/// meaning an invariant violation during rebuild, is caught by the supervisor,
/// which logs it and starts a replacement; shutdown via the handle exits
/// both.
pub fn spawn_worker<S: ResourceStore + 'static>(
    registry: Arc<PoolRegistry>,
    store: Arc<S>,
    config: RegistryConfig,
) -> RegistryHandle {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = Arc::new(AtomicBool::new(true));
    let restarts = Arc::new(AtomicU64::new(0));

    let event_rx = Arc::new(Mutex::new(event_rx));
    let supervisor_running = Arc::clone(&running);
    let supervisor_restarts = Arc::clone(&restarts);

    tokio::spawn(async move {
        loop {
            let task = tokio::spawn(run_loop(
                Arc::clone(&registry),
                Arc::clone(&store),
                config.clone(),
                Arc::clone(&event_rx),
                shutdown_rx.clone(),
            ));
            match task.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    supervisor_restarts.fetch_add(1, Ordering::SeqCst);
                    warn!(node = %registry.node_name(), "registry worker panicked, restarting");
                }
                Err(_) => break,
            }
        }
        supervisor_running.store(false, Ordering::SeqCst);
        info!(node = %registry.node_name(), "registry worker stopped");
    });

    RegistryHandle {
        events: event_tx,
        shutdown: shutdown_tx,
        running,
        restarts,
    }
}

async fn run_loop<S: ResourceStore>(
    registry: Arc<PoolRegistry>,
    store: Arc<S>,
    config: RegistryConfig,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<RegistryEvent>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut event_rx = event_rx.lock().await;

    // Startup: rebuild from whatever inventory already arrived, make sure
    // the node object exists, push the first state.
    registry.apply(RegistryEvent::Resync);
    rebuild_or_panic(&registry);
    let mut needs_publish = true;
    if let Err(e) = register_node(registry.as_ref(), store.as_ref()) {
        warn!(error = %e, "node registration failed, will retry via publish");
    }
    if try_publish(&registry, store.as_ref(), &config).await {
        needs_publish = false;
    }

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let mut dirty = registry.apply(event);
                // Coalesce whatever queued behind the first event into a
                // single rebuild.
                while let Ok(next) = event_rx.try_recv() {
                    dirty |= registry.apply(next);
                }
                if dirty {
                    rebuild_or_panic(&registry);
                    needs_publish = !try_publish(&registry, store.as_ref(), &config).await;
                }
            }
            () = tokio::time::sleep(config.republish_interval), if needs_publish => {
                rebuild_or_panic(&registry);
                needs_publish = !try_publish(&registry, store.as_ref(), &config).await;
            }
        }
    }
}

/// A failed rebuild means a derived pool contradicts its own inventory;
/// there is no sane state to continue from, so the worker dies and the
/// supervisor starts a fresh one.
fn rebuild_or_panic(registry: &PoolRegistry) {
    if let Err(e) = registry.rebuild() {
        panic!("pool rebuild failed: {e}");
    }
}

async fn try_publish<S: ResourceStore>(
    registry: &PoolRegistry,
    store: &S,
    config: &RegistryConfig,
) -> bool {
    match publish(registry, store, config).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "publish exhausted retries, rescheduling");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemoryStore;
    use strata_types::{Disk, DiskClass, VolumeReplica};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn fast_config() -> RegistryConfig {
        RegistryConfig {
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(5),
            republish_interval: Duration::from_millis(20),
        }
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    // ===================
    // Publish
    // ===================

    #[tokio::test]
    async fn publish_creates_missing_node() {
        let registry = PoolRegistry::new("n1");
        registry.apply(RegistryEvent::DiskAdded(Disk::new(
            "/dev/sdb",
            DiskClass::Hdd,
            100 * GIB,
        )));
        registry.rebuild().expect("rebuild");

        let store = MemoryStore::new();
        publish(&registry, &store, &fast_config())
            .await
            .expect("publish");

        let node = store.get_node("n1").expect("node");
        assert_eq!(node.object.total_capacity_bytes, 100 * GIB);
    }

    #[tokio::test]
    async fn publish_overwrites_stored_pools() {
        let registry = PoolRegistry::new("n1");
        let store = MemoryStore::new();
        register_node(&registry, &store).expect("register");

        registry.apply(RegistryEvent::DiskAdded(Disk::new(
            "/dev/sdb",
            DiskClass::Ssd,
            50 * GIB,
        )));
        registry.apply(RegistryEvent::ReplicaAdded(VolumeReplica::new(
            "r1",
            DiskClass::Ssd,
            20 * GIB,
            "n1",
        )));
        registry.rebuild().expect("rebuild");
        publish(&registry, &store, &fast_config())
            .await
            .expect("publish");

        let node = store.get_node("n1").expect("node");
        let pool = node.object.pool(DiskClass::Ssd).expect("ssd pool");
        assert_eq!(pool.free_capacity_bytes, 30 * GIB);
    }

    #[tokio::test]
    async fn publish_gives_up_after_attempt_budget() {
        let registry = PoolRegistry::new("n1");
        registry.rebuild().expect("rebuild");
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let result = publish(&registry, &store, &fast_config()).await;
        assert!(matches!(result, Err(Error::Publish { .. })));
    }

    // ===================
    // Worker loop
    // ===================

    #[tokio::test]
    async fn worker_publishes_ingested_events() {
        let registry = Arc::new(PoolRegistry::new("n1"));
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_worker(Arc::clone(&registry), Arc::clone(&store), fast_config());

        handle.ingest(RegistryEvent::DiskAdded(Disk::new(
            "/dev/sdb",
            DiskClass::Hdd,
            100 * GIB,
        )));
        handle.ingest(RegistryEvent::ReplicaAdded(VolumeReplica::new(
            "r1",
            DiskClass::Hdd,
            40 * GIB,
            "n1",
        )));

        wait_for("published pool", || {
            store
                .get_node("n1")
                .map(|n| {
                    n.object
                        .pool(DiskClass::Hdd)
                        .is_some_and(|p| p.free_capacity_bytes == 60 * GIB)
                })
                .unwrap_or(false)
        })
        .await;

        handle.shutdown();
        wait_for("worker stop", || !handle.is_running()).await;
    }

    #[tokio::test]
    async fn worker_registers_node_on_startup() {
        let registry = Arc::new(PoolRegistry::new("fresh-node"));
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_worker(Arc::clone(&registry), Arc::clone(&store), fast_config());

        wait_for("node registered", || store.get_node("fresh-node").is_ok()).await;

        handle.shutdown();
        wait_for("worker stop", || !handle.is_running()).await;
    }

    #[tokio::test]
    async fn worker_retries_publish_after_outage() {
        let registry = Arc::new(PoolRegistry::new("n1"));
        let store = Arc::new(MemoryStore::new());
        store.create_node(strata_types::NodeState::new("n1")).expect("seed node");
        store.set_unavailable(true);

        let handle = spawn_worker(Arc::clone(&registry), Arc::clone(&store), fast_config());
        handle.ingest(RegistryEvent::DiskAdded(Disk::new(
            "/dev/sdb",
            DiskClass::Nvme,
            10 * GIB,
        )));

        // Let the publish budget burn down, then restore the store.
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.set_unavailable(false);

        wait_for("republish after outage", || {
            store
                .get_node("n1")
                .map(|n| n.object.pool(DiskClass::Nvme).is_some())
                .unwrap_or(false)
        })
        .await;

        handle.shutdown();
        wait_for("worker stop", || !handle.is_running()).await;
    }

    #[tokio::test]
    async fn worker_coalesces_event_bursts() {
        let registry = Arc::new(PoolRegistry::new("n1"));
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_worker(Arc::clone(&registry), Arc::clone(&store), fast_config());

        for i in 0..32 {
            handle.ingest(RegistryEvent::DiskAdded(Disk::new(
                format!("/dev/sd{i}"),
                DiskClass::Hdd,
                GIB,
            )));
        }

        wait_for("all disks visible", || {
            store
                .get_node("n1")
                .map(|n| n.object.total_disk == 32)
                .unwrap_or(false)
        })
        .await;

        handle.shutdown();
        wait_for("worker stop", || !handle.is_running()).await;
    }
}
