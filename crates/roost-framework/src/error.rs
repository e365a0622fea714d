//! Error types for the Roost framework.

use roost_core::{AclError, StoreError, TransportError};
use thiserror::Error;

/// Error type returned by plugin code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while setting up or tracking rooms.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// Transport call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Persistence call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// ACL load or commit failed.
    #[error(transparent)]
    Acl(#[from] AclError),

    /// Stored value could not be encoded or decoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An interaction room needs an inviter to own its config room.
    #[error("room '{room_id}' has other members but no known inviter")]
    UnknownInviter {
        /// Room being classified.
        room_id: String,
    },

    /// A freshly created room never showed up in local room state.
    #[error("created room '{room_id}' did not become visible in time")]
    RoomNotVisible {
        /// Room returned by the transport.
        room_id: String,
    },

    /// The room tracker was dropped while a room still referenced it.
    #[error("room tracker is no longer running")]
    TrackerGone,
}

/// Result type for framework operations.
pub type FrameworkResult<T> = Result<T, FrameworkError>;
