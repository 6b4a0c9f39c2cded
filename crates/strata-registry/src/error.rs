//! Error types for the pool registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A rebuilt pool failed its consistency check. Fatal to the registry
    /// worker; the supervisor restarts it.
    #[error("pool invariant violation on node {node}: {source}")]
    InvariantViolation {
        /// The node whose rebuild failed.
        node: String,
        /// The underlying consistency error.
        #[source]
        source: strata_types::Error,
    },

    /// Publishing node state to the resource store failed.
    #[error("publish failed for node {node}: {source}")]
    Publish {
        /// The node whose publish failed.
        node: String,
        /// The store error.
        #[source]
        source: strata_store::Error,
    },
}
