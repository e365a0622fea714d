//! Built-in plugins shipped with the Roost framework.
//!
//! | Plugin | Type | Description |
//! |--------|------|-------------|
//! | [`CONFIG_PLUGIN`] | config | Room configuration commands |
//!
//! Built-ins are registered by [`PluginRegistry::new`](super::PluginRegistry::new)
//! and are loaded by rooms automatically; they cannot be activated by name.

pub mod config;

pub use config::{CONFIG_PLUGIN, CONFIG_PLUGIN_NAME};
