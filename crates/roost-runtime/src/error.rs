//! Runtime error types.

use roost_core::{StoreError, TransportError};
use roost_framework::FrameworkError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop the runtime from starting or running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport failed, e.g. while listing occupied rooms at startup.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The persistence backend could not be opened.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Room orchestration failed.
    #[error(transparent)]
    Framework(#[from] FrameworkError),

    /// The configured storage backend was compiled out.
    #[error("Storage backend '{0}' is not enabled in this build")]
    BackendDisabled(&'static str),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
