//! Logical volumes and the claims that request them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::StorageClassParams;
use crate::types::DiskClass;

/// Placement of one replica of a provisioned volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaPlacement {
    /// The node hosting the replica.
    pub hostname: String,
}

/// Placement configuration of a provisioned volume.
///
/// Present iff the volume has been provisioned; `replicas` enumerates the
/// current physical placement, one entry per replica on a distinct node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Current replica placements.
    pub replicas: Vec<ReplicaPlacement>,
}

impl VolumeConfig {
    /// True if any replica is placed on the given node.
    #[must_use]
    pub fn has_replica_on(&self, node: &str) -> bool {
        self.replicas.iter().any(|r| r.hostname == node)
    }
}

/// A logical volume.
///
/// `pool_name` pins the volume to one `(class, type)` pool on whichever
/// nodes end up hosting its replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name, cluster-unique.
    pub name: String,

    /// Name of the claim that requested this volume.
    pub pvc_ref: String,

    /// Name of the pool the volume is placed in, e.g. `LocalStorage_PoolSSD`.
    pub pool_name: String,

    /// Requested capacity in bytes.
    pub required_capacity_bytes: u64,

    /// Number of replicas the volume must keep on distinct nodes.
    pub replica_number: u32,

    /// Placement configuration; present iff provisioned.
    pub config: Option<VolumeConfig>,
}

impl Volume {
    /// Builds the synthetic volume the scheduler evaluates for a claim that
    /// has no volume yet, from the claim's resolved storage-class
    /// parameters.
    #[must_use]
    pub fn from_claim(claim: &PendingClaim, params: &StorageClassParams) -> Self {
        Self {
            name: claim.name.clone(),
            pvc_ref: claim.name.clone(),
            pool_name: params.pool_class.pool_name(),
            required_capacity_bytes: claim.required_capacity_bytes,
            replica_number: params.replica_number,
            config: None,
        }
    }

    /// The disk class this volume is pinned to.
    ///
    /// # Errors
    ///
    /// Returns an error if `pool_name` does not follow the pool naming
    /// scheme.
    pub fn class(&self) -> Result<DiskClass> {
        DiskClass::from_pool_name(&self.pool_name)
    }

    /// True if the volume has been provisioned (placement is known).
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.config.is_some()
    }

    /// Validates the volume, including placement consistency when
    /// provisioned: replica count matches `replica_number` and hostnames
    /// are distinct.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty name, a malformed pool name, or an
    /// inconsistent placement config.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidName {
                reason: "volume name cannot be empty".to_string(),
            });
        }
        self.class()?;

        if let Some(config) = &self.config {
            if config.replicas.len() != self.replica_number as usize {
                return Err(Error::InvalidReplicaConfig {
                    volume: self.name.clone(),
                    reason: format!(
                        "{} replica placements, expected {}",
                        config.replicas.len(),
                        self.replica_number
                    ),
                });
            }
            let mut hostnames: Vec<&str> =
                config.replicas.iter().map(|r| r.hostname.as_str()).collect();
            hostnames.sort_unstable();
            hostnames.dedup();
            if hostnames.len() != config.replicas.len() {
                return Err(Error::InvalidReplicaConfig {
                    volume: self.name.clone(),
                    reason: "replica hostnames are not distinct".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A workload's request for a volume, as handed to the scheduler by the
/// host orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    /// Claim name.
    pub name: String,

    /// Name of the storage class the claim references.
    pub storage_class: Option<String>,

    /// Requested capacity in bytes.
    pub required_capacity_bytes: u64,
}

impl PendingClaim {
    /// Creates a new pending claim.
    #[must_use]
    pub fn new(name: impl Into<String>, required_capacity_bytes: u64) -> Self {
        Self {
            name: name.into(),
            storage_class: None,
            required_capacity_bytes,
        }
    }

    /// Sets the storage class.
    #[must_use]
    pub fn with_storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StorageClass;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn provisioned_volume(hostnames: &[&str]) -> Volume {
        Volume {
            name: "vol-1".to_string(),
            pvc_ref: "claim-1".to_string(),
            pool_name: DiskClass::Hdd.pool_name(),
            required_capacity_bytes: 10 * GIB,
            replica_number: hostnames.len() as u32,
            config: Some(VolumeConfig {
                replicas: hostnames
                    .iter()
                    .map(|h| ReplicaPlacement {
                        hostname: (*h).to_string(),
                    })
                    .collect(),
            }),
        }
    }

    #[test]
    fn volume_class_from_pool_name() {
        let volume = provisioned_volume(&["n1"]);
        assert_eq!(volume.class().expect("class"), DiskClass::Hdd);
    }

    #[test]
    fn volume_config_has_replica_on() {
        let volume = provisioned_volume(&["n1", "n2"]);
        let config = volume.config.expect("config");
        assert!(config.has_replica_on("n1"));
        assert!(config.has_replica_on("n2"));
        assert!(!config.has_replica_on("n3"));
    }

    #[test]
    fn volume_validate_provisioned() {
        assert!(provisioned_volume(&["n1", "n2"]).validate().is_ok());
    }

    #[test]
    fn volume_validate_replica_count_mismatch() {
        let mut volume = provisioned_volume(&["n1", "n2"]);
        volume.replica_number = 3;
        assert!(matches!(
            volume.validate(),
            Err(Error::InvalidReplicaConfig { .. })
        ));
    }

    #[test]
    fn volume_validate_duplicate_hostnames() {
        let volume = provisioned_volume(&["n1", "n1"]);
        assert!(matches!(
            volume.validate(),
            Err(Error::InvalidReplicaConfig { .. })
        ));
    }

    #[test]
    fn volume_validate_bad_pool_name() {
        let mut volume = provisioned_volume(&["n1"]);
        volume.pool_name = "NotAPool".to_string();
        assert!(volume.validate().is_err());
    }

    #[test]
    fn volume_from_claim() {
        let claim = PendingClaim::new("claim-1", 10 * GIB).with_storage_class("ssd-3x");
        let sc = StorageClass::new("ssd-3x")
            .with_param("poolClass", "SSD")
            .with_param("poolType", "REGULAR")
            .with_param("replicaNumber", "3");
        let params = sc.parse_params().expect("params");

        let volume = Volume::from_claim(&claim, &params);
        assert_eq!(volume.name, "claim-1");
        assert_eq!(volume.pool_name, "LocalStorage_PoolSSD");
        assert_eq!(volume.required_capacity_bytes, 10 * GIB);
        assert_eq!(volume.replica_number, 3);
        assert!(!volume.is_provisioned());
    }
}
