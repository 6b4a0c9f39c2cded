//! Core types for local-storage pools.
//!
//! This module defines the inventory-side data model:
//! - [`DiskClass`]: the class of a backing disk (HDD, SSD, NVMe)
//! - [`Disk`]: one physical disk attached to a node
//! - [`VolumeReplica`]: one physical copy of a logical volume on a node
//! - [`Pool`]: the derived per-node, per-class aggregation of both
//! - [`NodeState`]: the per-node rollup pushed to the resource store

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on volumes hosted by a single pool.
pub const MAX_VOLUMES_PER_POOL: u64 = 1000;

/// Prefix shared by every storage pool name.
pub const POOL_NAME_PREFIX: &str = "LocalStorage_Pool";

/// Class of the disks backing a storage pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum DiskClass {
    /// Rotational disks.
    #[serde(rename = "HDD")]
    Hdd,

    /// SATA/SAS solid-state disks.
    #[serde(rename = "SSD")]
    Ssd,

    /// NVMe solid-state disks.
    #[serde(rename = "NVMe")]
    Nvme,
}

impl DiskClass {
    /// All known disk classes, in pool-rebuild order.
    pub const ALL: [Self; 3] = [Self::Hdd, Self::Ssd, Self::Nvme];

    /// Parses the wire form used by storage-class parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not `HDD`, `SSD`, or `NVMe`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "HDD" => Ok(Self::Hdd),
            "SSD" => Ok(Self::Ssd),
            "NVMe" => Ok(Self::Nvme),
            _ => Err(Error::UnknownDiskClass {
                value: value.to_string(),
            }),
        }
    }

    /// The name of the regular pool backed by this class,
    /// e.g. `LocalStorage_PoolHDD`.
    #[must_use]
    pub fn pool_name(&self) -> String {
        format!("{POOL_NAME_PREFIX}{self}")
    }

    /// Recovers the disk class from a pool name produced by
    /// [`DiskClass::pool_name`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name does not follow the pool naming scheme.
    pub fn from_pool_name(name: &str) -> Result<Self> {
        let class = name
            .strip_prefix(POOL_NAME_PREFIX)
            .ok_or_else(|| Error::InvalidPoolName {
                name: name.to_string(),
            })?;
        Self::parse(class).map_err(|_| Error::InvalidPoolName {
            name: name.to_string(),
        })
    }
}

impl fmt::Display for DiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hdd => write!(f, "HDD"),
            Self::Ssd => write!(f, "SSD"),
            Self::Nvme => write!(f, "NVMe"),
        }
    }
}

/// Type of a storage pool. Only regular pools exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PoolType {
    /// A pool aggregating whole local disks.
    #[default]
    #[serde(rename = "REGULAR")]
    Regular,
}

impl PoolType {
    /// Parses the wire form used by storage-class parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not `REGULAR`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "REGULAR" => Ok(Self::Regular),
            _ => Err(Error::UnknownPoolType {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "REGULAR"),
        }
    }
}

/// One physical disk attached to a node.
///
/// Disks are immutable while registered; discovery removes and re-adds a
/// disk rather than mutating it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Device path on the node, e.g. `/dev/sdb`.
    pub dev_path: String,

    /// Class of the disk.
    pub class: DiskClass,

    /// Raw capacity in bytes.
    pub capacity_bytes: u64,
}

impl Disk {
    /// Creates a new disk record.
    #[must_use]
    pub fn new(dev_path: impl Into<String>, class: DiskClass, capacity_bytes: u64) -> Self {
        Self {
            dev_path: dev_path.into(),
            class,
            capacity_bytes,
        }
    }

    /// Validates the disk record.
    ///
    /// # Errors
    ///
    /// Returns an error if the device path is empty or the capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.dev_path.is_empty() {
            return Err(Error::InvalidName {
                reason: "disk device path cannot be empty".to_string(),
            });
        }
        if self.capacity_bytes == 0 {
            return Err(Error::InvalidCapacity {
                reason: format!("disk {} has zero capacity", self.dev_path),
            });
        }
        Ok(())
    }
}

/// One physical copy of a logical volume residing on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReplica {
    /// Replica name, unique within the node.
    pub name: String,

    /// Class of the pool the replica lives in.
    pub class: DiskClass,

    /// Allocated capacity in bytes.
    pub capacity_bytes: u64,

    /// The node hosting this replica.
    pub node_name: String,
}

impl VolumeReplica {
    /// Creates a new replica record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        class: DiskClass,
        capacity_bytes: u64,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            capacity_bytes,
            node_name: node_name.into(),
        }
    }

    /// Validates the replica record.
    ///
    /// # Errors
    ///
    /// Returns an error if the replica name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidName {
                reason: "replica name cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Derived per-node, per-class aggregation of disks and the replicas
/// residing on them.
///
/// A pool's identity is `(node, class)`. Pools are rebuilt whole from the
/// current disk and replica inventory; none of the fields here are ever
/// mutated incrementally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Class of the backing disks.
    pub class: DiskClass,

    /// Pool type.
    pub pool_type: PoolType,

    /// The disks aggregated into this pool.
    pub disks: Vec<Disk>,

    /// Names of the replicas placed in this pool.
    pub volumes: Vec<String>,

    /// Sum of disk capacities.
    pub total_capacity_bytes: u64,

    /// Sum of replica capacities.
    pub used_capacity_bytes: u64,

    /// `total - used`, clamped at zero.
    pub free_capacity_bytes: u64,

    /// Upper bound on volumes in this pool.
    pub total_volume_count: u64,

    /// Number of replicas currently placed.
    pub used_volume_count: u64,

    /// Remaining volume slots.
    pub free_volume_count: u64,

    /// Largest single volume this pool can host (capacity of its biggest
    /// disk); a volume larger than this cannot be placed here.
    pub max_single_volume_bytes: u64,
}

impl Pool {
    /// Builds a pool from the current inventory of one class.
    ///
    /// Derivation rules:
    /// - `total_capacity_bytes` = Σ disk capacities
    /// - `max_single_volume_bytes` = max disk capacity
    /// - `used_capacity_bytes` = Σ replica capacities
    /// - `free_capacity_bytes` = `total - used`, clamped at zero
    ///
    /// The clamp covers replicas of a class whose disks have all been
    /// drained away; [`Pool::is_overcommitted`] reports that condition.
    #[must_use]
    pub fn build(class: DiskClass, disks: Vec<Disk>, replicas: &[VolumeReplica]) -> Self {
        let total_capacity_bytes: u64 = disks.iter().map(|d| d.capacity_bytes).sum();
        let max_single_volume_bytes = disks.iter().map(|d| d.capacity_bytes).max().unwrap_or(0);
        let used_capacity_bytes: u64 = replicas.iter().map(|r| r.capacity_bytes).sum();
        let mut volumes: Vec<String> = replicas.iter().map(|r| r.name.clone()).collect();
        volumes.sort_unstable();
        let used_volume_count = volumes.len() as u64;

        Self {
            class,
            pool_type: PoolType::Regular,
            disks,
            volumes,
            total_capacity_bytes,
            used_capacity_bytes,
            free_capacity_bytes: total_capacity_bytes.saturating_sub(used_capacity_bytes),
            total_volume_count: MAX_VOLUMES_PER_POOL,
            used_volume_count,
            free_volume_count: MAX_VOLUMES_PER_POOL.saturating_sub(used_volume_count),
            max_single_volume_bytes,
        }
    }

    /// The pool's name, e.g. `LocalStorage_PoolSSD`.
    #[must_use]
    pub fn name(&self) -> String {
        self.class.pool_name()
    }

    /// True if replicas consume more capacity than the pool's disks supply.
    ///
    /// Happens transiently when disks of a class are removed while replicas
    /// of that class still exist; `free_capacity_bytes` reads zero then.
    #[must_use]
    pub fn is_overcommitted(&self) -> bool {
        self.used_capacity_bytes > self.total_capacity_bytes
    }

    /// Checks the internal consistency of a built pool.
    ///
    /// # Errors
    ///
    /// Returns an error if a derivation rule was violated; callers treat
    /// this as fatal because pools are never hand-assembled.
    pub fn verify(&self) -> Result<()> {
        if !self.is_overcommitted()
            && self.free_capacity_bytes
                != self.total_capacity_bytes - self.used_capacity_bytes
        {
            return Err(Error::InvalidCapacity {
                reason: format!(
                    "pool {}: free {} != total {} - used {}",
                    self.name(),
                    self.free_capacity_bytes,
                    self.total_capacity_bytes,
                    self.used_capacity_bytes
                ),
            });
        }
        if self.used_volume_count != self.volumes.len() as u64 {
            return Err(Error::InvalidCapacity {
                reason: format!(
                    "pool {}: volume count {} != {} entries",
                    self.name(),
                    self.used_volume_count,
                    self.volumes.len()
                ),
            });
        }
        let max_disk = self.disks.iter().map(|d| d.capacity_bytes).max().unwrap_or(0);
        if self.max_single_volume_bytes > max_disk {
            return Err(Error::InvalidCapacity {
                reason: format!(
                    "pool {}: max single volume {} exceeds largest disk {}",
                    self.name(),
                    self.max_single_volume_bytes,
                    max_disk
                ),
            });
        }
        Ok(())
    }
}

/// Per-node storage state, materialized from the pool registry and pushed
/// to the resource store on every rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Node name.
    pub name: String,

    /// Pools keyed by disk class. Classes with neither disks nor replicas
    /// are absent.
    pub pools: BTreeMap<DiskClass, Pool>,

    /// Total number of disks across all pools.
    pub total_disk: u64,

    /// Total capacity across all pools, in bytes.
    pub total_capacity_bytes: u64,

    /// Free capacity across all pools, in bytes.
    pub free_capacity_bytes: u64,
}

impl NodeState {
    /// Creates an empty node state (a freshly registered node).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pools: BTreeMap::new(),
            total_disk: 0,
            total_capacity_bytes: 0,
            free_capacity_bytes: 0,
        }
    }

    /// Builds a node state from a set of pools, computing the rollups.
    #[must_use]
    pub fn from_pools(name: impl Into<String>, pools: BTreeMap<DiskClass, Pool>) -> Self {
        let mut state = Self {
            name: name.into(),
            pools,
            total_disk: 0,
            total_capacity_bytes: 0,
            free_capacity_bytes: 0,
        };
        state.recompute_rollups();
        state
    }

    /// Recomputes the per-node rollups from the pool map.
    pub fn recompute_rollups(&mut self) {
        self.total_disk = self.pools.values().map(|p| p.disks.len() as u64).sum();
        self.total_capacity_bytes = self.pools.values().map(|p| p.total_capacity_bytes).sum();
        self.free_capacity_bytes = self.pools.values().map(|p| p.free_capacity_bytes).sum();
    }

    /// Looks up the regular pool of a class.
    #[must_use]
    pub fn pool(&self, class: DiskClass) -> Option<&Pool> {
        self.pools.get(&class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    // ===================
    // DiskClass
    // ===================

    #[test]
    fn disk_class_parse_round_trip() {
        for class in DiskClass::ALL {
            let parsed = DiskClass::parse(&class.to_string()).expect("parse");
            assert_eq!(parsed, class);
        }
    }

    #[test]
    fn disk_class_parse_unknown() {
        let result = DiskClass::parse("TAPE");
        assert!(matches!(result, Err(Error::UnknownDiskClass { .. })));
    }

    #[test]
    fn disk_class_parse_is_case_sensitive() {
        assert!(DiskClass::parse("hdd").is_err());
        assert!(DiskClass::parse("nvme").is_err());
    }

    #[test]
    fn disk_class_pool_names() {
        assert_eq!(DiskClass::Hdd.pool_name(), "LocalStorage_PoolHDD");
        assert_eq!(DiskClass::Ssd.pool_name(), "LocalStorage_PoolSSD");
        assert_eq!(DiskClass::Nvme.pool_name(), "LocalStorage_PoolNVMe");
    }

    #[test]
    fn disk_class_from_pool_name() {
        let class = DiskClass::from_pool_name("LocalStorage_PoolNVMe").expect("parse");
        assert_eq!(class, DiskClass::Nvme);

        assert!(DiskClass::from_pool_name("LocalStorage_PoolTAPE").is_err());
        assert!(DiskClass::from_pool_name("SomethingElse").is_err());
    }

    #[test]
    fn pool_type_parse() {
        assert_eq!(PoolType::parse("REGULAR").expect("parse"), PoolType::Regular);
        assert!(matches!(
            PoolType::parse("CACHE"),
            Err(Error::UnknownPoolType { .. })
        ));
    }

    // ===================
    // Disk / VolumeReplica validation
    // ===================

    #[test]
    fn disk_validate() {
        assert!(Disk::new("/dev/sdb", DiskClass::Hdd, GIB).validate().is_ok());
        assert!(Disk::new("", DiskClass::Hdd, GIB).validate().is_err());
        assert!(Disk::new("/dev/sdb", DiskClass::Hdd, 0).validate().is_err());
    }

    #[test]
    fn replica_validate() {
        assert!(VolumeReplica::new("r1", DiskClass::Ssd, GIB, "n1")
            .validate()
            .is_ok());
        assert!(VolumeReplica::new("", DiskClass::Ssd, GIB, "n1")
            .validate()
            .is_err());
    }

    // ===================
    // Pool derivation
    // ===================

    #[test]
    fn pool_build_derives_capacities() {
        let disks = vec![
            Disk::new("/dev/sdb", DiskClass::Hdd, 100 * GIB),
            Disk::new("/dev/sdc", DiskClass::Hdd, 200 * GIB),
        ];
        let replicas = vec![
            VolumeReplica::new("r1", DiskClass::Hdd, 30 * GIB, "n1"),
            VolumeReplica::new("r2", DiskClass::Hdd, 40 * GIB, "n1"),
        ];

        let pool = Pool::build(DiskClass::Hdd, disks, &replicas);
        assert_eq!(pool.total_capacity_bytes, 300 * GIB);
        assert_eq!(pool.used_capacity_bytes, 70 * GIB);
        assert_eq!(pool.free_capacity_bytes, 230 * GIB);
        assert_eq!(pool.max_single_volume_bytes, 200 * GIB);
        assert_eq!(pool.used_volume_count, 2);
        assert_eq!(pool.free_volume_count, MAX_VOLUMES_PER_POOL - 2);
        assert_eq!(pool.total_volume_count, MAX_VOLUMES_PER_POOL);
        pool.verify().expect("derived pool is consistent");
    }

    #[test]
    fn pool_build_clamps_free_capacity() {
        // Replicas remain but every disk of the class is gone.
        let replicas = vec![VolumeReplica::new("r1", DiskClass::Ssd, 10 * GIB, "n1")];
        let pool = Pool::build(DiskClass::Ssd, Vec::new(), &replicas);

        assert_eq!(pool.total_capacity_bytes, 0);
        assert_eq!(pool.used_capacity_bytes, 10 * GIB);
        assert_eq!(pool.free_capacity_bytes, 0);
        assert!(pool.is_overcommitted());
        pool.verify().expect("clamped pool is still consistent");
    }

    #[test]
    fn pool_build_empty() {
        let pool = Pool::build(DiskClass::Nvme, Vec::new(), &[]);
        assert_eq!(pool.total_capacity_bytes, 0);
        assert_eq!(pool.max_single_volume_bytes, 0);
        assert_eq!(pool.free_volume_count, MAX_VOLUMES_PER_POOL);
        assert!(!pool.is_overcommitted());
    }

    #[test]
    fn pool_verify_catches_tampering() {
        let disks = vec![Disk::new("/dev/sdb", DiskClass::Hdd, 100 * GIB)];
        let mut pool = Pool::build(DiskClass::Hdd, disks, &[]);
        pool.free_capacity_bytes = 999 * GIB;
        assert!(pool.verify().is_err());
    }

    // ===================
    // NodeState rollups
    // ===================

    #[test]
    fn node_state_rollups() {
        let hdd = Pool::build(
            DiskClass::Hdd,
            vec![Disk::new("/dev/sdb", DiskClass::Hdd, 100 * GIB)],
            &[VolumeReplica::new("r1", DiskClass::Hdd, 20 * GIB, "n1")],
        );
        let ssd = Pool::build(
            DiskClass::Ssd,
            vec![Disk::new("/dev/nvme0n1", DiskClass::Ssd, 50 * GIB)],
            &[],
        );

        let mut pools = BTreeMap::new();
        pools.insert(DiskClass::Hdd, hdd);
        pools.insert(DiskClass::Ssd, ssd);

        let state = NodeState::from_pools("n1", pools);
        assert_eq!(state.total_disk, 2);
        assert_eq!(state.total_capacity_bytes, 150 * GIB);
        assert_eq!(state.free_capacity_bytes, 130 * GIB);
        assert!(state.pool(DiskClass::Hdd).is_some());
        assert!(state.pool(DiskClass::Nvme).is_none());
    }

    #[test]
    fn node_state_serde_round_trip() {
        let pool = Pool::build(
            DiskClass::Nvme,
            vec![Disk::new("/dev/nvme0n1", DiskClass::Nvme, 100 * GIB)],
            &[],
        );
        let mut pools = BTreeMap::new();
        pools.insert(DiskClass::Nvme, pool);
        let state = NodeState::from_pools("n1", pools);

        let encoded = serde_json::to_string(&state).expect("encode");
        assert!(encoded.contains("NVMe"));
        let decoded: NodeState = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, state);
    }
}
