//! Error types for the document store and its listeners.

use crate::types::{MutationKind, Phase, TypeName};
use thiserror::Error;

/// Error produced by a listener callback.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for database and listener operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Listener failed in {phase}-{kind} of {type_name}: {source}")]
    Listener {
        phase: Phase,
        kind: MutationKind,
        type_name: TypeName,
        #[source]
        source: ListenerError,
    },

    #[error("Invalid listener filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Listener view mismatch: expected {expected}, got {got}")]
    ViewMismatch { expected: String, got: TypeName },

    #[error("Database is closed")]
    Closed,

    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DbError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        DbError::KeyEncoding(e.to_string())
    }
}

impl DbError {
    /// Whether this error came out of a listener callback.
    pub fn is_listener(&self) -> bool {
        matches!(self, DbError::Listener { .. })
    }
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
