//! Storage classes and their scheduler-facing parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DiskClass, PoolType};

/// Parameter key selecting the class of backing disks.
pub const PARAM_POOL_CLASS: &str = "poolClass";

/// Parameter key selecting the pool type.
pub const PARAM_POOL_TYPE: &str = "poolType";

/// Parameter key carrying the required replica count.
pub const PARAM_REPLICA_NUMBER: &str = "replicaNumber";

/// Parameter key selecting the volume kind.
pub const PARAM_VOLUME_KIND: &str = "volumeKind";

/// The volume kind handled by this scheduler.
pub const VOLUME_KIND_LVM: &str = "LVM";

/// A storage class: a named tier of storage described by a string map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClass {
    /// Storage class name.
    pub name: String,

    /// Raw parameters.
    pub params: BTreeMap<String, String>,
}

impl StorageClass {
    /// Creates a storage class with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parses the raw parameter map into typed scheduler parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or a value fails to
    /// parse.
    pub fn parse_params(&self) -> Result<StorageClassParams> {
        StorageClassParams::parse(&self.params)
    }
}

/// Typed view of the storage-class parameters the scheduler consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageClassParams {
    /// Class of backing disks.
    pub pool_class: DiskClass,

    /// Pool type.
    pub pool_type: PoolType,

    /// Required replica count, ≥ 1.
    pub replica_number: u32,
}

impl StorageClassParams {
    /// Parses a raw string map.
    ///
    /// `poolClass` and `replicaNumber` are required. `poolType` defaults to
    /// `REGULAR`; `volumeKind` defaults to `LVM` and any other kind is
    /// rejected, since claims of other kinds belong to other schedulers.
    ///
    /// # Errors
    ///
    /// Returns an error on a missing key, an unknown class/type/kind, or a
    /// replica number that is not a positive integer.
    pub fn parse(params: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(kind) = params.get(PARAM_VOLUME_KIND) {
            if kind != VOLUME_KIND_LVM {
                return Err(Error::UnknownVolumeKind { value: kind.clone() });
            }
        }

        let class_value = params
            .get(PARAM_POOL_CLASS)
            .ok_or_else(|| Error::MissingParameter {
                key: PARAM_POOL_CLASS.to_string(),
            })?;
        let pool_class = DiskClass::parse(class_value)?;

        let pool_type = match params.get(PARAM_POOL_TYPE) {
            Some(value) => PoolType::parse(value)?,
            None => PoolType::Regular,
        };

        let replica_value =
            params
                .get(PARAM_REPLICA_NUMBER)
                .ok_or_else(|| Error::MissingParameter {
                    key: PARAM_REPLICA_NUMBER.to_string(),
                })?;
        let replica_number: u32 =
            replica_value
                .parse()
                .map_err(|_| Error::InvalidReplicaNumber {
                    value: replica_value.clone(),
                })?;
        if replica_number == 0 {
            return Err(Error::InvalidReplicaNumber {
                value: replica_value.clone(),
            });
        }

        Ok(Self {
            pool_class,
            pool_type,
            replica_number,
        })
    }
}
