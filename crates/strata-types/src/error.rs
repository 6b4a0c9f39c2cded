//! Error types for the data model.

use thiserror::Error;

/// Result type alias for data-model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or validating model objects.
#[derive(Debug, Error)]
pub enum Error {
    /// The disk class string is not one of HDD, SSD, NVMe.
    #[error("unknown disk class: {value}")]
    UnknownDiskClass {
        /// The value that failed to parse.
        value: String,
    },

    /// The pool type string is not a recognized pool type.
    #[error("unknown pool type: {value}")]
    UnknownPoolType {
        /// The value that failed to parse.
        value: String,
    },

    /// The volume kind string is not a recognized volume kind.
    #[error("unknown volume kind: {value}")]
    UnknownVolumeKind {
        /// The value that failed to parse.
        value: String,
    },

    /// The pool name does not follow the `LocalStorage_Pool<CLASS>` scheme.
    #[error("invalid pool name: {name}")]
    InvalidPoolName {
        /// The name that failed to parse.
        name: String,
    },

    /// The replica number is missing, non-numeric, or not positive.
    #[error("invalid replica number: {value}")]
    InvalidReplicaNumber {
        /// The value that failed to parse.
        value: String,
    },

    /// A required storage-class parameter is absent.
    #[error("missing storage class parameter: {key}")]
    MissingParameter {
        /// The parameter key that was missing.
        key: String,
    },

    /// A capacity value is unusable.
    #[error("invalid capacity: {reason}")]
    InvalidCapacity {
        /// The reason the capacity is invalid.
        reason: String,
    },

    /// An object name is unusable.
    #[error("invalid name: {reason}")]
    InvalidName {
        /// The reason the name is invalid.
        reason: String,
    },

    /// A provisioned volume's replica placement contradicts its declared
    /// replica count or places two replicas on one node.
    #[error("invalid replica config for volume {volume}: {reason}")]
    InvalidReplicaConfig {
        /// The volume whose config is inconsistent.
        volume: String,
        /// The reason the config is inconsistent.
        reason: String,
    },
}
