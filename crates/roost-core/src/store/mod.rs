//! Persistence contract.
//!
//! The orchestration layer only depends on the [`Store`] trait.  Two backends
//! ship with the crate:
//!
//! | Backend | Feature | Use |
//! |---------|---------|-----|
//! | [`MemoryStore`] | always | tests, throwaway bots |
//! | [`SqliteStore`] | `sqlite` | persistent deployments |
//!
//! Every operation is an individual statement; there is no transaction
//! spanning several calls.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Shared store handle.
pub type BoxedStore = Arc<dyn Store>;

/// Key-value scope.
///
/// Plugins may only assume exclusivity of key names inside their own
/// [`Plugin`](Scope::Plugin) or [`RoomPlugin`](Scope::RoomPlugin) scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Shared by everything in one room.
    Room(String),
    /// Shared by every instance of one plugin.
    Plugin(String),
    /// One plugin in one room.
    RoomPlugin {
        /// Room id.
        room: String,
        /// Plugin name.
        plugin: String,
    },
    /// Process-wide.
    Global,
}

impl Scope {
    /// Room scope.
    pub fn room(room_id: impl Into<String>) -> Self {
        Self::Room(room_id.into())
    }

    /// Plugin scope.
    pub fn plugin(name: impl Into<String>) -> Self {
        Self::Plugin(name.into())
    }

    /// Room×plugin scope.
    pub fn room_plugin(room_id: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self::RoomPlugin {
            room: room_id.into(),
            plugin: plugin.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(room) => write!(f, "room:{room}"),
            Self::Plugin(plugin) => write!(f, "plugin:{plugin}"),
            Self::RoomPlugin { room, plugin } => write!(f, "room:{room}/plugin:{plugin}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// A persisted ACL document together with its revision counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRecord {
    /// Serialized ACL snapshot.
    pub blob: String,
    /// Incremented on every successful write.
    pub revision: u64,
}

/// Read/write contract over the persistence tables.
///
/// | Table | Methods |
/// |-------|---------|
/// | `room_data`, `plugin_data`, `room_plugin_data`, `global_data` | [`get`](Store::get), [`set`](Store::set), [`delete`](Store::delete), [`keys`](Store::keys) |
/// | `room_plugins` | [`active_plugins`](Store::active_plugins), [`add_active_plugin`](Store::add_active_plugin), [`remove_active_plugin`](Store::remove_active_plugin) |
/// | `config_room` | [`add_config_link`](Store::add_config_link), [`remove_config_link`](Store::remove_config_link), [`config_targets`](Store::config_targets), [`config_sources`](Store::config_sources) |
/// | `config_acl` | [`load_acl`](Store::load_acl), [`save_acl`](Store::save_acl) |
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Reads one value.
    async fn get(&self, scope: &Scope, key: &str) -> StoreResult<Option<String>>;

    /// Writes one value, replacing any previous one.
    async fn set(&self, scope: &Scope, key: &str, value: &str) -> StoreResult<()>;

    /// Deletes one value; deleting a missing key is not an error.
    async fn delete(&self, scope: &Scope, key: &str) -> StoreResult<()>;

    /// Lists the keys present in a scope, sorted.
    async fn keys(&self, scope: &Scope) -> StoreResult<Vec<String>>;

    /// Plugins persisted as active in a room, sorted by name.
    async fn active_plugins(&self, room_id: &str) -> StoreResult<Vec<String>>;

    /// Marks a plugin active in a room (idempotent).
    async fn add_active_plugin(&self, room_id: &str, plugin: &str) -> StoreResult<()>;

    /// Removes a plugin from a room's activation set (idempotent).
    async fn remove_active_plugin(&self, room_id: &str, plugin: &str) -> StoreResult<()>;

    /// Records that `source` configures `target` (idempotent).
    async fn add_config_link(&self, source: &str, target: &str) -> StoreResult<()>;

    /// Removes a config link (idempotent).
    async fn remove_config_link(&self, source: &str, target: &str) -> StoreResult<()>;

    /// Rooms configured by `source`.
    async fn config_targets(&self, source: &str) -> StoreResult<Vec<String>>;

    /// Config rooms that configure `target`.
    async fn config_sources(&self, target: &str) -> StoreResult<Vec<String>>;

    /// Loads the ACL document of a room.
    async fn load_acl(&self, room_id: &str) -> StoreResult<Option<AclRecord>>;

    /// Stores the ACL document of a room.
    ///
    /// `expected` is the revision the caller loaded (`None` when no document
    /// existed).  The write only happens when the stored revision still
    /// matches; otherwise [`StoreError::Conflict`](crate::StoreError::Conflict)
    /// is returned.  Returns the new revision.
    async fn save_acl(&self, room_id: &str, blob: &str, expected: Option<u64>)
    -> StoreResult<u64>;
}
