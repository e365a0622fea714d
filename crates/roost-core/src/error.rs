//! Unified error types for the Roost core crate.
//!
//! Framework-level errors (room setup, plugin lifecycle) are defined in
//! `roost-framework`.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The client is not logged in or the connection is gone.
    #[error("transport is not connected")]
    NotConnected,

    /// The remote side rejected the request.
    #[error("request rejected ({code}): {message}")]
    Rejected {
        /// Protocol-level error code.
        code: String,
        /// Human-readable reason.
        message: String,
    },

    /// The room is not known to the local room state.
    #[error("room '{0}' is not known")]
    UnknownRoom(String),

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The request timed out.
    #[error("transport request timed out")]
    Timeout,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors raised by a [`Store`](crate::store::Store) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error.
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Embedded migration failed.
    #[cfg(feature = "sqlite")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A compare-and-swap write lost against a concurrent writer.
    #[error("stale revision for room '{room_id}'")]
    Conflict {
        /// Room whose record was modified concurrently.
        room_id: String,
    },

    /// Stored value could not be decoded.
    #[error("corrupt value for '{key}': {reason}")]
    Corrupt {
        /// Key of the offending value.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

// =============================================================================
// ACL Errors
// =============================================================================

/// Errors raised while loading or committing a room ACL.
#[derive(Debug, Error)]
pub enum AclError {
    /// Underlying persistence error.
    #[error(transparent)]
    Store(StoreError),

    /// The persisted blob is not a valid ACL document.
    #[error("invalid ACL blob for room '{room_id}': {source}")]
    Codec {
        /// Room owning the blob.
        room_id: String,
        /// JSON error.
        source: serde_json::Error,
    },

    /// Another scope committed first; the working copy was discarded.
    #[error("ACL for room '{room_id}' was changed concurrently, try again")]
    Conflict {
        /// Room whose ACL changed.
        room_id: String,
    },
}

impl From<StoreError> for AclError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { room_id } => Self::Conflict { room_id },
            other => Self::Store(other),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for ACL operations.
pub type AclResult<T> = Result<T, AclError>;
