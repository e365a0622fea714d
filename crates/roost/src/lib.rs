//! # Roost
//!
//! Room and plugin orchestration for chat bots.
//!
//! ## Overview
//!
//! Roost sits between a chat transport and a set of plugins.  Every room the
//! bot occupies is classified once and remembers its mode:
//!
//! - **Interaction** rooms run the plugins their members activated
//! - **Config** rooms (usually a private room with one user) run the
//!   built-in `config` plugin and reconfigure their linked interaction rooms
//! - **Disabled** rooms run nothing
//!
//! ```text
//! ┌───────────┐     ┌────────────┐     ┌─────────────┐     ┌──────────────────────────┐
//! │ Transport │────▶│ Dispatcher │────▶│ RoomTracker │────▶│ Room ──▶ RoomModule(s)    │
//! └───────────┘     └────────────┘     └─────────────┘     │   └── RoomAcl             │
//!                                                          └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use roost::prelude::*;
//!
//! struct Echo {
//!     api: PluginApi,
//! }
//!
//! #[async_trait]
//! impl Plugin for Echo {
//!     async fn setup(&self) -> Result<bool, BoxError> {
//!         let api = self.api.clone();
//!         self.api.add_command_handler("echo", move |_message, args| {
//!             let api = api.clone();
//!             async move {
//!                 api.send_text(&args).await?;
//!                 Ok::<(), BoxError>(())
//!             }
//!         });
//!         Ok(true)
//!     }
//! }
//!
//! fn create_echo(api: PluginApi) -> Arc<dyn Plugin> {
//!     Arc::new(Echo { api })
//! }
//!
//! static ECHO: PluginDescriptor =
//!     PluginDescriptor::interaction("echo", "Repeat a message", create_echo);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = RoostRuntime::builder().build()?;
//!     runtime.register_plugin(ECHO);
//!
//!     let (transport, events) = connect().await?;
//!     let store = runtime.open_store().await?;
//!     runtime.run(transport, store, events).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `sqlite`: SQLite persistence (default)
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use roost_core as core;
pub use roost_framework as framework;
pub use roost_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use roost::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use roost_runtime::{RoostConfig, RoostRuntime};

    // Plugin contract
    pub use roost_framework::{
        BoxError, Plugin, PluginApi, PluginDescriptor, PluginType, async_trait,
    };

    // Events
    pub use roost_core::{EventKind, Membership, RoomEvent, TextKind, TextMessage};

    // Seams for custom transports and stores
    pub use roost_core::{BoxedStore, BoxedTransport, Store, Transport};

    pub use std::sync::Arc;
}
