//! Plugin system for the Roost framework.
//!
//! # Architecture
//!
//! A plugin is compiled in and registered by name at process start.  Each
//! room that activates it gets its own instance:
//!
//! - A [`PluginDescriptor`] is the *static, `Copy` handle* to a plugin.  It
//!   carries metadata and a factory function pointer.
//! - The factory receives a [`PluginApi`] bound to one (room, plugin) pair and
//!   returns the live [`Plugin`].
//! - [`RoomModule`](crate::RoomModule) drives the instance through
//!   `setup` → `init` → `destroy`.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use roost::prelude::*;
//!
//! struct Echo { api: PluginApi }
//!
//! #[async_trait]
//! impl Plugin for Echo {
//!     fn about(&self) -> String {
//!         "Repeats what you say".into()
//!     }
//!
//!     async fn setup(&self) -> Result<bool, BoxError> {
//!         let api = self.api.clone();
//!         self.api.add_command_handler("echo", move |msg, args| {
//!             let api = api.clone();
//!             async move { Ok(api.send_text(&args).await?) }
//!         });
//!         Ok(true)
//!     }
//! }
//!
//! pub static ECHO: PluginDescriptor =
//!     PluginDescriptor::interaction("echo", "Repeats what you say", |api| Arc::new(Echo { api }));
//! ```

// ─── Submodules ──────────────────────────────────────────────────────────────
pub mod api;
pub mod builtin;
pub mod descriptor;
pub mod registry;

// ─── Re-exports from submodules ──────────────────────────────────────────────
pub use api::{PluginApi, ScopedKv};
pub use builtin::{CONFIG_PLUGIN, CONFIG_PLUGIN_NAME};
pub use descriptor::{PluginDescriptor, PluginType};
pub use registry::PluginRegistry;

use async_trait::async_trait;
use clap::{ArgMatches, Command};

use crate::error::BoxError;

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// One live plugin instance in one room.
///
/// Every hook has a default so plugins only implement what they need.  Errors
/// and panics from any hook are caught by the owning module and logged.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Short human-readable description.
    fn about(&self) -> String {
        String::new()
    }

    /// Registers handlers and tasks.
    ///
    /// Returning `Ok(false)` declines the load without it being an error.
    async fn setup(&self) -> Result<bool, BoxError> {
        Ok(true)
    }

    /// Runs once every room has finished loading its plugins.
    async fn init(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after every task the plugin registered has stopped.
    async fn destroy(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Sub-parser for `config plugin <name> ...`.
    ///
    /// The command name is replaced by the plugin name before parsing.
    fn config_command(&self) -> Option<Command> {
        None
    }

    /// Applies a parsed `config plugin <name> ...` invocation.
    ///
    /// The returned text is sent back to the config room.
    async fn configure(&self, _matches: &ArgMatches) -> Result<String, BoxError> {
        Ok("This plugin has no configuration".to_string())
    }
}
