//! # Roost Framework
//!
//! Room and plugin orchestration.
//!
//! This layer provides:
//! - [`RoomTracker`]: registry of occupied rooms, private config rooms and
//!   membership bookkeeping
//! - [`Room`]: per-room mode classification, config links and plugin set
//! - [`RoomModule`]: failure-isolated lifecycle of one plugin instance
//! - The [`Plugin`] contract, [`PluginRegistry`] and the per-room [`PluginApi`]
//! - [`broadcast`]: bounded concurrent fan-out
//! - The built-in `config` plugin
//!
//! ```text
//! RoomTracker ──► Room ──► RoomModule ──► Plugin
//!      │           │            │
//!      │           └── RoomAcl  └── PluginApi ──► Transport / Store
//!      └── private config rooms
//! ```

pub mod command;
pub mod context;
pub mod error;
pub mod fanout;
pub mod module;
pub mod plugin;
pub mod room;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use command::{parse_args, shell_split};
pub use context::{FrameworkContext, FrameworkSettings, Timeouts};
pub use error::{BoxError, FrameworkError, FrameworkResult};
pub use fanout::{BroadcastReport, broadcast};
pub use module::{ModuleState, RoomModule};
pub use plugin::{
    CONFIG_PLUGIN, CONFIG_PLUGIN_NAME, Plugin, PluginApi, PluginDescriptor, PluginRegistry,
    PluginType, ScopedKv,
};
pub use room::{ActivationOutcome, RemovalOutcome, Room, SetupOptions};
pub use tracker::{InitReport, RoomTracker};

/// Re-exported so plugins can implement [`Plugin`] without a direct dependency.
pub use async_trait::async_trait;
/// Re-exported so plugins can build config sub-parsers.
pub use clap;
