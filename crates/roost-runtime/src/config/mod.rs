//! Configuration for the Roost runtime.
//!
//! Layered loading with figment (defaults, files, `ROOST_*` environment
//! variables, programmatic overrides) plus validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    BotConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, RoostConfig,
    SpanEventConfig, StorageBackend, StorageConfig, TimeoutConfig,
};
pub use validation::validate_config;
