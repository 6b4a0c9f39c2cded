//! Error types for scheduling operations.
//!
//! Filter and score surface these directly to the host scheduler; none of
//! them are retried locally. Transient store errors pass through as
//! [`Error::Store`].

use thiserror::Error;

/// Result type alias for scheduling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while filtering, scoring, or reserving.
#[derive(Debug, Error)]
pub enum Error {
    /// The claim itself is unusable (for example zero requested capacity).
    #[error("malformed claim {claim}: {reason}")]
    MalformedClaim {
        /// The claim name.
        claim: String,
        /// Why the claim is unusable.
        reason: String,
    },

    /// The claim's storage class names an unknown pool class, type, or
    /// volume kind.
    #[error("unknown class for claim {claim}: {source}")]
    UnknownClass {
        /// The claim name.
        claim: String,
        /// The underlying parse error.
        #[source]
        source: strata_types::Error,
    },

    /// The claim references no storage class, or the referenced class does
    /// not exist.
    #[error("no storage class for claim {claim}")]
    MissingStorageClass {
        /// The claim name.
        claim: String,
    },

    /// Fewer nodes qualify than the volume needs replicas.
    #[error("need {need} node(s) to place volume, but only {have} node(s) meet the requirements")]
    InsufficientTopology {
        /// Replicas required.
        need: u32,
        /// Qualifying nodes found.
        have: usize,
    },

    /// The evaluated node is not among the qualifying nodes.
    #[error("node {node} does not qualify for the pending claims")]
    NodeNotQualifying {
        /// The evaluated node.
        node: String,
    },

    /// A bound volume has no replica on the evaluated node; bound volumes
    /// are immovable at scheduling time.
    #[error("bound volume {volume} has no replica on node {node}")]
    WrongNodeForBoundVolume {
        /// The bound volume.
        volume: String,
        /// The evaluated node.
        node: String,
    },

    /// A bound volume exists but carries no placement config yet.
    #[error("volume {volume} is not ready: no replica placement config")]
    VolumeNotReady {
        /// The pending volume.
        volume: String,
    },

    /// The evaluated node has not been observed by the catalog.
    #[error("node {node} not found in catalog")]
    NodeNotInCatalog {
        /// The missing node.
        node: String,
    },

    /// A resource-store operation failed.
    #[error(transparent)]
    Store(#[from] strata_store::Error),
}

impl Error {
    /// Maps a storage-class parameter parse failure onto the scheduler's
    /// error taxonomy for one claim.
    #[must_use]
    pub fn from_params_error(claim: &str, source: strata_types::Error) -> Self {
        match source {
            strata_types::Error::UnknownDiskClass { .. }
            | strata_types::Error::UnknownPoolType { .. }
            | strata_types::Error::UnknownVolumeKind { .. }
            | strata_types::Error::InvalidPoolName { .. } => Self::UnknownClass {
                claim: claim.to_string(),
                source,
            },
            other => Self::MalformedClaim {
                claim: claim.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_insufficient_topology() {
        let err = Error::InsufficientTopology { need: 3, have: 2 };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn test_params_error_mapping() {
        let err = Error::from_params_error(
            "c1",
            strata_types::Error::UnknownDiskClass {
                value: "TAPE".to_string(),
            },
        );
        assert!(matches!(err, Error::UnknownClass { .. }));

        let err = Error::from_params_error(
            "c1",
            strata_types::Error::InvalidReplicaNumber {
                value: "0".to_string(),
            },
        );
        assert!(matches!(err, Error::MalformedClaim { .. }));
    }
}
