//! Error types for resource-store operations.

use std::fmt;

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of objects the store addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A node's storage state.
    Node,
    /// A logical volume.
    Volume,
    /// A storage class.
    StorageClass,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "Node"),
            Self::Volume => write!(f, "Volume"),
            Self::StorageClass => write!(f, "StorageClass"),
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The addressed object does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// The kind of the missing object.
        kind: ResourceKind,
        /// The name of the missing object.
        name: String,
    },

    /// The addressed object already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// The kind of the conflicting object.
        kind: ResourceKind,
        /// The name of the conflicting object.
        name: String,
    },

    /// An update carried a stale version token; re-read and retry.
    #[error("version conflict updating {kind} {name}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// The kind of the object.
        kind: ResourceKind,
        /// The name of the object.
        name: String,
        /// The version the caller presented.
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },

    /// The store cannot be reached; retry later.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// The reason the store is unavailable.
        reason: String,
    },
}

impl Error {
    /// True for errors a caller may retry after a backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::VersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound {
            kind: ResourceKind::Node,
            name: "n1".to_string(),
        };
        assert!(err.to_string().contains("Node"));
        assert!(err.to_string().contains("n1"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Unavailable {
            reason: "down".to_string()
        }
        .is_transient());
        assert!(Error::VersionConflict {
            kind: ResourceKind::Volume,
            name: "v".to_string(),
            expected: 1,
            actual: 2,
        }
        .is_transient());
        assert!(!Error::NotFound {
            kind: ResourceKind::Volume,
            name: "v".to_string(),
        }
        .is_transient());
    }
}
