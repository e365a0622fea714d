//! Shared handles and settings used by every room.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use roost_core::{BoxedStore, BoxedTransport, RoomAcl};

use crate::plugin::PluginRegistry;

/// Time budgets applied by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Shared budget for delivering one text message to every module of a room.
    pub broadcast: Duration,
    /// Shared budget for destroying every module of a room the bot left.
    pub leave: Duration,
    /// How long to wait for one plugin task to stop after cancellation.
    pub task_join: Duration,
    /// How long to wait for a created room to appear in local room state.
    pub room_visible: Duration,
    /// Budget for one plugin's `setup()` or `init()` hook.
    pub setup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            broadcast: Duration::from_secs(20),
            leave: Duration::from_secs(5),
            task_join: Duration::from_secs(10),
            room_visible: Duration::from_secs(30),
            setup: Duration::from_secs(30),
        }
    }
}

/// Bot-level behaviour knobs.
#[derive(Debug, Clone)]
pub struct FrameworkSettings {
    /// Users that pass every ACL check.
    pub admins: Arc<BTreeSet<String>>,
    /// Prefix of chat commands, e.g. `!`.
    pub command_prefix: String,
    /// Name given to auto-created private config rooms.
    pub config_room_name: String,
    /// Time budgets.
    pub timeouts: Timeouts,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            admins: Arc::new(BTreeSet::new()),
            command_prefix: "!".to_string(),
            config_room_name: "Bot configuration".to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl FrameworkSettings {
    /// Returns `true` if `user_id` is a bot admin.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }
}

/// Collaborators shared by the tracker, every room and every plugin facade.
pub struct FrameworkContext {
    /// Outbound chat surface.
    pub transport: BoxedTransport,
    /// Persistence backend.
    pub store: BoxedStore,
    /// Plugins that can be loaded.
    pub registry: Arc<PluginRegistry>,
    /// Behaviour knobs.
    pub settings: FrameworkSettings,
}

impl FrameworkContext {
    /// Bundles the collaborators.
    pub fn new(
        transport: BoxedTransport,
        store: BoxedStore,
        registry: Arc<PluginRegistry>,
        settings: FrameworkSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            store,
            registry,
            settings,
        })
    }

    /// The bot's own user id.
    pub fn bot_id(&self) -> &str {
        self.transport.bot_id()
    }

    /// ACL handle for `room_id`.
    pub fn acl(&self, room_id: &str) -> RoomAcl {
        RoomAcl::new(
            room_id,
            Arc::clone(&self.store),
            Arc::clone(&self.settings.admins),
        )
    }
}
