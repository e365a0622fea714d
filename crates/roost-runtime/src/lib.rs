//! Roost Runtime - process orchestration for Roost bots.
//!
//! This crate provides:
//! - Layered configuration (`ConfigLoader`, `RoostConfig`)
//! - Logging setup (`LoggingBuilder`)
//! - Event routing from the transport into tracked rooms (`EventDispatcher`)
//! - Startup, the event loop and shutdown (`RoostRuntime`, `Bot`)
//!
//! ```ignore
//! use roost_runtime::RoostRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = RoostRuntime::builder().build()?;
//!     runtime.register_plugin(MY_PLUGIN);
//!
//!     // The transport delivers its events through an mpsc channel.
//!     let (transport, events) = connect().await?;
//!     let store = runtime.open_store().await?;
//!
//!     // Run until the channel closes or Ctrl+C
//!     runtime.run(transport, store, events).await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use bot::{Bot, StopReason};
pub use config::{BotConfig, ConfigError, ConfigLoader, ConfigResult, Profile, RoostConfig};
pub use dispatcher::{EventDispatcher, InvitePolicy};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingError, SpanEvents};
pub use runtime::{RoostRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
