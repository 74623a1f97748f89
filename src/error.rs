//! Error types for the observe bridge.

use crate::model::ModelKind;
use thiserror::Error;

/// Errors reported by a [`DataStore`](crate::datastore::DataStore) implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by backend: {0}")]
    Rejected(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: ModelKind, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Main error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Subscription for {key} failed: {reason}")]
    Subscription { key: String, reason: String },

    #[error("{op} of {id} failed: {source}")]
    Mutation {
        op: &'static str,
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Refusing to delete protected record: {0}")]
    ProtectedRecord(String),

    #[error("Invalid view state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Bridge is shut down")]
    Shutdown,
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
