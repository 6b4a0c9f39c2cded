//! Per-node inventory and derived pool state.
//!
//! The [`PoolRegistry`] holds the raw disk and replica lists received from
//! discovery and the per-class pools derived from them. Pools are never
//! mutated in place: [`PoolRegistry::rebuild`] constructs the whole map in
//! a local buffer and swaps a single shared reference, so readers always
//! observe a complete, internally consistent snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use strata_types::{Disk, DiskClass, NodeState, Pool, VolumeReplica};

use crate::error::{Error, Result};

/// A discovery event feeding the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A disk appeared on the node.
    DiskAdded(Disk),

    /// A disk left the node, addressed by device path.
    DiskRemoved(String),

    /// A volume replica was realized on the node.
    ReplicaAdded(VolumeReplica),

    /// A volume replica was removed, addressed by name.
    ReplicaRemoved(String),

    /// Force a rebuild from the current inventory.
    Resync,
}

/// Raw per-node inventory as reported by discovery.
#[derive(Debug, Default)]
struct Inventory {
    /// Disks keyed by device path.
    disks: HashMap<String, Disk>,

    /// Replicas keyed by replica name.
    replicas: HashMap<String, VolumeReplica>,
}

/// Per-node pool registry.
///
/// One writer (the registry worker) applies events and rebuilds; any
/// number of readers take cheap snapshots of the derived pool map.
#[derive(Debug)]
pub struct PoolRegistry {
    node_name: String,
    inventory: RwLock<Inventory>,
    pools: RwLock<Arc<BTreeMap<DiskClass, Pool>>>,
    dropped_events: AtomicU64,
}

impl PoolRegistry {
    /// Creates an empty registry for a node.
    #[must_use]
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            inventory: RwLock::new(Inventory::default()),
            pools: RwLock::new(Arc::new(BTreeMap::new())),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// The node this registry describes.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Applies one discovery event to the raw inventory.
    ///
    /// Returns `true` if a rebuild is warranted. Malformed events (empty
    /// device path or replica name, zero-capacity disk, replica reported
    /// for another node) are dropped and counted.
    pub fn apply(&self, event: RegistryEvent) -> bool {
        match event {
            RegistryEvent::DiskAdded(disk) => {
                if let Err(e) = disk.validate() {
                    warn!(node = %self.node_name, error = %e, "dropping malformed disk event");
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                let mut inventory = self.inventory.write();
                let replaced = inventory.disks.insert(disk.dev_path.clone(), disk);
                debug!(node = %self.node_name, replaced = replaced.is_some(), "disk added");
                true
            }
            RegistryEvent::DiskRemoved(dev_path) => {
                let mut inventory = self.inventory.write();
                let removed = inventory.disks.remove(&dev_path).is_some();
                if !removed {
                    debug!(node = %self.node_name, dev_path = %dev_path, "disk removal for unknown disk");
                }
                removed
            }
            RegistryEvent::ReplicaAdded(replica) => {
                if let Err(e) = replica.validate() {
                    warn!(node = %self.node_name, error = %e, "dropping malformed replica event");
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                if replica.node_name != self.node_name {
                    warn!(
                        node = %self.node_name,
                        replica = %replica.name,
                        reported_node = %replica.node_name,
                        "dropping replica event for another node"
                    );
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                let mut inventory = self.inventory.write();
                inventory.replicas.insert(replica.name.clone(), replica);
                true
            }
            RegistryEvent::ReplicaRemoved(name) => {
                let mut inventory = self.inventory.write();
                inventory.replicas.remove(&name).is_some()
            }
            RegistryEvent::Resync => true,
        }
    }

    /// Rebuilds the derived pool map from the current inventory.
    ///
    /// Reads the inventory under a shared lock into local buffers, derives
    /// one pool per class that has disks or replicas, verifies each, and
    /// swaps the map in one exclusive-lock write. A class whose replicas
    /// outlive its disks gets a zero free capacity and a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if a derived pool fails its
    /// consistency check; callers treat this as fatal to the worker.
    pub fn rebuild(&self) -> Result<()> {
        let (disks, replicas) = {
            let inventory = self.inventory.read();
            (
                inventory.disks.values().cloned().collect::<Vec<_>>(),
                inventory.replicas.values().cloned().collect::<Vec<_>>(),
            )
        };

        let mut pools = BTreeMap::new();
        for class in DiskClass::ALL {
            let mut class_disks: Vec<Disk> =
                disks.iter().filter(|d| d.class == class).cloned().collect();
            class_disks.sort_by(|a, b| a.dev_path.cmp(&b.dev_path));
            let class_replicas: Vec<VolumeReplica> = replicas
                .iter()
                .filter(|r| r.class == class)
                .cloned()
                .collect();

            if class_disks.is_empty() && class_replicas.is_empty() {
                continue;
            }

            let pool = Pool::build(class, class_disks, &class_replicas);
            if pool.is_overcommitted() {
                warn!(
                    node = %self.node_name,
                    pool = %pool.name(),
                    used = pool.used_capacity_bytes,
                    total = pool.total_capacity_bytes,
                    "pool overcommitted, free capacity clamped to zero"
                );
            }
            pool.verify().map_err(|source| Error::InvariantViolation {
                node: self.node_name.clone(),
                source,
            })?;
            pools.insert(class, pool);
        }

        *self.pools.write() = Arc::new(pools);
        debug!(node = %self.node_name, "pool map rebuilt");
        Ok(())
    }

    /// A snapshot of the derived pool map.
    #[must_use]
    pub fn pools(&self) -> Arc<BTreeMap<DiskClass, Pool>> {
        Arc::clone(&self.pools.read())
    }

    /// Materializes the node state (pools plus rollups) for publishing.
    #[must_use]
    pub fn node_state(&self) -> NodeState {
        let pools = self.pools();
        NodeState::from_pools(self.node_name.clone(), (*pools).clone())
    }

    /// Number of malformed events dropped so far.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn registry_with(events: Vec<RegistryEvent>) -> PoolRegistry {
        let registry = PoolRegistry::new("n1");
        for event in events {
            registry.apply(event);
        }
        registry.rebuild().expect("rebuild");
        registry
    }

    // ===================
    // Event application
    // ===================

    #[test]
    fn apply_disk_add_remove() {
        let registry = PoolRegistry::new("n1");
        assert!(registry.apply(RegistryEvent::DiskAdded(Disk::new(
            "/dev/sdb",
            DiskClass::Hdd,
            100 * GIB
        ))));
        assert!(registry.apply(RegistryEvent::DiskRemoved("/dev/sdb".to_string())));
        // Removing again is not dirty.
        assert!(!registry.apply(RegistryEvent::DiskRemoved("/dev/sdb".to_string())));
    }

    #[test]
    fn apply_drops_malformed_events() {
        let registry = PoolRegistry::new("n1");
        assert!(!registry.apply(RegistryEvent::DiskAdded(Disk::new("", DiskClass::Hdd, GIB))));
        assert!(!registry.apply(RegistryEvent::DiskAdded(Disk::new(
            "/dev/sdb",
            DiskClass::Hdd,
            0
        ))));
        assert!(!registry.apply(RegistryEvent::ReplicaAdded(VolumeReplica::new(
            "",
            DiskClass::Hdd,
            GIB,
            "n1"
        ))));
        assert_eq!(registry.dropped_events(), 3);
    }

    #[test]
    fn apply_drops_foreign_replica() {
        let registry = PoolRegistry::new("n1");
        assert!(!registry.apply(RegistryEvent::ReplicaAdded(VolumeReplica::new(
            "r1",
            DiskClass::Hdd,
            GIB,
            "some-other-node"
        ))));
        assert_eq!(registry.dropped_events(), 1);
    }

    #[test]
    fn resync_is_always_dirty() {
        let registry = PoolRegistry::new("n1");
        assert!(registry.apply(RegistryEvent::Resync));
    }

    // ===================
    // Rebuild semantics
    // ===================

    #[test]
    fn rebuild_reference_numbers() {
        // Disks [(HDD,100),(HDD,200)], replicas [(HDD,30),(HDD,40)].
        let registry = registry_with(vec![
            RegistryEvent::DiskAdded(Disk::new("/dev/sdb", DiskClass::Hdd, 100 * GIB)),
            RegistryEvent::DiskAdded(Disk::new("/dev/sdc", DiskClass::Hdd, 200 * GIB)),
            RegistryEvent::ReplicaAdded(VolumeReplica::new("r1", DiskClass::Hdd, 30 * GIB, "n1")),
            RegistryEvent::ReplicaAdded(VolumeReplica::new("r2", DiskClass::Hdd, 40 * GIB, "n1")),
        ]);

        let pools = registry.pools();
        let pool = pools.get(&DiskClass::Hdd).expect("hdd pool");
        assert_eq!(pool.total_capacity_bytes, 300 * GIB);
        assert_eq!(pool.used_capacity_bytes, 70 * GIB);
        assert_eq!(pool.free_capacity_bytes, 230 * GIB);
        assert_eq!(pool.max_single_volume_bytes, 200 * GIB);
        assert_eq!(pool.used_volume_count, 2);
    }

    #[test]
    fn rebuild_omits_empty_classes() {
        let registry = registry_with(vec![RegistryEvent::DiskAdded(Disk::new(
            "/dev/nvme0n1",
            DiskClass::Nvme,
            100 * GIB,
        ))]);

        let pools = registry.pools();
        assert!(pools.contains_key(&DiskClass::Nvme));
        assert!(!pools.contains_key(&DiskClass::Hdd));
        assert!(!pools.contains_key(&DiskClass::Ssd));
    }

    #[test]
    fn rebuild_materializes_drained_pool_clamped() {
        // Replicas of a class with no disks: pool exists, free clamped to 0.
        let registry = registry_with(vec![RegistryEvent::ReplicaAdded(VolumeReplica::new(
            "r1",
            DiskClass::Ssd,
            10 * GIB,
            "n1",
        ))]);

        let pools = registry.pools();
        let pool = pools.get(&DiskClass::Ssd).expect("ssd pool");
        assert_eq!(pool.total_capacity_bytes, 0);
        assert_eq!(pool.free_capacity_bytes, 0);
        assert!(pool.is_overcommitted());
    }

    #[test]
    fn rebuild_is_idempotent() {
        let registry = registry_with(vec![
            RegistryEvent::DiskAdded(Disk::new("/dev/sdb", DiskClass::Hdd, 100 * GIB)),
            RegistryEvent::DiskAdded(Disk::new("/dev/sdc", DiskClass::Ssd, 50 * GIB)),
            RegistryEvent::ReplicaAdded(VolumeReplica::new("r1", DiskClass::Hdd, 30 * GIB, "n1")),
        ]);

        let first = serde_json::to_string(&registry.node_state()).expect("encode");
        registry.rebuild().expect("second rebuild");
        let second = serde_json::to_string(&registry.node_state()).expect("encode");
        assert_eq!(first, second);
    }

    #[test]
    fn node_state_rollups_after_rebuild() {
        let registry = registry_with(vec![
            RegistryEvent::DiskAdded(Disk::new("/dev/sdb", DiskClass::Hdd, 100 * GIB)),
            RegistryEvent::DiskAdded(Disk::new("/dev/nvme0n1", DiskClass::Nvme, 200 * GIB)),
            RegistryEvent::ReplicaAdded(VolumeReplica::new("r1", DiskClass::Hdd, 25 * GIB, "n1")),
        ]);

        let state = registry.node_state();
        assert_eq!(state.name, "n1");
        assert_eq!(state.total_disk, 2);
        assert_eq!(state.total_capacity_bytes, 300 * GIB);
        assert_eq!(state.free_capacity_bytes, 275 * GIB);
    }

    // ===================
    // Property: random event sequences keep invariants
    // ===================

    #[test]
    fn random_event_sequences_uphold_pool_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let classes = DiskClass::ALL;

        for round in 0..50 {
            let registry = PoolRegistry::new("n1");
            let event_count = rng.gen_range(0..60);
            for i in 0..event_count {
                let class = classes[rng.gen_range(0..classes.len())];
                match rng.gen_range(0..5) {
                    0 => {
                        registry.apply(RegistryEvent::DiskAdded(Disk::new(
                            format!("/dev/sd{i}"),
                            class,
                            GIB * rng.gen_range(1..512),
                        )));
                    }
                    1 => {
                        let target = rng.gen_range(0..event_count.max(1));
                        registry.apply(RegistryEvent::DiskRemoved(format!("/dev/sd{target}")));
                    }
                    2 => {
                        registry.apply(RegistryEvent::ReplicaAdded(VolumeReplica::new(
                            format!("r{i}"),
                            class,
                            GIB * rng.gen_range(1..256),
                            "n1",
                        )));
                    }
                    3 => {
                        let target = rng.gen_range(0..event_count.max(1));
                        registry.apply(RegistryEvent::ReplicaRemoved(format!("r{target}")));
                    }
                    _ => {
                        registry.apply(RegistryEvent::Resync);
                    }
                }
            }
            registry.rebuild().expect("rebuild");

            for (class, pool) in registry.pools().iter() {
                pool.verify()
                    .unwrap_or_else(|e| panic!("round {round}: {class} pool inconsistent: {e}"));
                assert_eq!(
                    pool.free_capacity_bytes,
                    pool.total_capacity_bytes
                        .saturating_sub(pool.used_capacity_bytes),
                    "round {round}: free capacity drifted"
                );
                assert!(pool.max_single_volume_bytes <= pool.total_capacity_bytes);
                assert!(!pool.disks.is_empty() || !pool.volumes.is_empty());
            }
        }
    }
}
