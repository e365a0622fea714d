//! Per-room state machine.
//!
//! # Classification
//!
//! ```text
//!                        ┌──► Disabled              (nobody else present)
//!                        │
//! Unclassified ─setup()──┼──► Config                (one other member, a config
//!                        │                           target or a private config
//!                        │                           room requested)
//!                        │
//!                        └──► Interaction           (several other members;
//!                                                    needs a known inviter)
//! ```
//!
//! The mode is decided on the first [`Room::setup`] and persisted under
//! [`RoomMode::STORAGE_KEY`].  Later setups (including after restarts) read it
//! back and never rewrite it.
//!
//! Classifying an interaction room touches several records: the inviter's
//! `config` grant, the inviter's private config room and the config link.
//! Each write is idempotent and the mode is written last, so an interrupted
//! classification is simply redone on the next setup.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::RwLock;
use roost_core::{CONFIG_ROLE, RoomAcl, RoomMode, Scope, StoreError, TextMessage};
use tracing::{debug, error, info, warn};

use crate::plugin::builtin::CONFIG_PLUGIN_NAME;
use crate::context::FrameworkContext;
use crate::error::{BoxError, FrameworkError, FrameworkResult};
use crate::fanout::{BroadcastReport, broadcast};
use crate::module::RoomModule;
use crate::plugin::{PluginDescriptor, PluginType};
use crate::tracker::RoomTracker;

// =============================================================================
// Setup options and outcomes
// =============================================================================

/// Context for [`Room::setup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupOptions {
    /// User who brought the bot into the room.
    pub invited_by: Option<String>,
    /// Room that this room should configure.
    pub config_room_for: Option<String>,
    /// Classify as a config room whatever the member list says.
    pub as_config: bool,
}

impl SetupOptions {
    /// Options for a room the bot was invited into by `user_id`.
    pub fn invited_by(user_id: impl Into<String>) -> Self {
        Self {
            invited_by: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Options for a private config room created for `user_id`.
    ///
    /// The invite may not be reflected in the member list yet, so the member
    /// count cannot be relied on.
    pub fn private_config(user_id: impl Into<String>) -> Self {
        Self {
            invited_by: Some(user_id.into()),
            as_config: true,
            ..Self::default()
        }
    }

    /// Options for a room created to configure `target`.
    pub fn config_room_for(target: impl Into<String>) -> Self {
        Self {
            config_room_for: Some(target.into()),
            ..Self::default()
        }
    }
}

/// Result of [`Room::activate_plugin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Loaded, initialized and persisted.
    Activated,
    /// A module of that name is already loaded; nothing changed.
    AlreadyLoaded,
    /// No interaction plugin of that name is registered.
    NotFound,
    /// The plugin could not be loaded.
    Failed(String),
}

impl fmt::Display for ActivationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activated => f.write_str("activated"),
            Self::AlreadyLoaded => f.write_str("already loaded"),
            Self::NotFound => f.write_str("not found"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of [`Room::remove_plugin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Destroyed and removed from the activation set.
    Removed,
    /// No module of that name is loaded.
    NotLoaded,
    /// Destroyed and unloaded, but the activation set could not be updated.
    Failed(String),
}

impl fmt::Display for RemovalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed => f.write_str("removed"),
            Self::NotLoaded => f.write_str("not loaded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

// =============================================================================
// Room
// =============================================================================

/// One room the bot occupies.
pub struct Room {
    room_id: String,
    ctx: Arc<FrameworkContext>,
    tracker: Weak<RoomTracker>,
    mode: RwLock<Option<RoomMode>>,
    modules: RwLock<BTreeMap<&'static str, Arc<RoomModule>>>,
    acl: RoomAcl,
    /// Serializes activation and removal.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Room {
    /// Creates an unclassified room.
    pub fn new(room_id: &str, ctx: Arc<FrameworkContext>, tracker: Weak<RoomTracker>) -> Self {
        let acl = ctx.acl(room_id);
        Self {
            room_id: room_id.to_string(),
            ctx,
            tracker,
            mode: RwLock::new(None),
            modules: RwLock::new(BTreeMap::new()),
            acl,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Room id.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Mode, once set up.
    pub fn mode(&self) -> Option<RoomMode> {
        *self.mode.read()
    }

    /// ACL handle.
    pub fn acl(&self) -> &RoomAcl {
        &self.acl
    }

    /// Names of the loaded modules, sorted.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.read().keys().copied().collect()
    }

    /// A loaded module.
    pub fn module(&self, name: &str) -> Option<Arc<RoomModule>> {
        self.modules.read().get(name).cloned()
    }

    /// Returns `true` if a module of that name is loaded.
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }

    /// Sends a plain-text message to this room.
    pub async fn send_text(&self, body: &str) -> FrameworkResult<()> {
        Ok(self.ctx.transport.send_text(&self.room_id, body).await?)
    }

    /// Rooms this room configures.
    pub async fn config_targets(&self) -> FrameworkResult<Vec<String>> {
        Ok(self.ctx.store.config_targets(&self.room_id).await?)
    }

    /// Config rooms that configure this room.
    pub async fn config_sources(&self) -> FrameworkResult<Vec<String>> {
        Ok(self.ctx.store.config_sources(&self.room_id).await?)
    }

    fn tracker(&self) -> FrameworkResult<Arc<RoomTracker>> {
        self.tracker.upgrade().ok_or(FrameworkError::TrackerGone)
    }

    // ─── Setup ───────────────────────────────────────────────────────────────

    /// Classifies the room if needed, prunes stale config links and loads
    /// the room's plugins.
    ///
    /// Modules are loaded but not initialized; see
    /// [`init_modules`](Self::init_modules).
    pub async fn setup(&self, options: &SetupOptions) -> FrameworkResult<RoomMode> {
        let mode = match self.stored_mode().await? {
            Some(mode) => mode,
            None => self.setup_new(options).await?,
        };
        *self.mode.write() = Some(mode);

        if mode.is_config() {
            self.prune_config_targets().await?;
            if let Some(config) = self.ctx.registry.get_typed(CONFIG_PLUGIN_NAME, PluginType::Config) {
                self.load_module(config).await;
            }
        }

        if mode.is_interaction() {
            self.prune_config_sources().await?;
            for name in self.ctx.store.active_plugins(&self.room_id).await? {
                match self.ctx.registry.get_typed(&name, PluginType::Interaction) {
                    Some(descriptor) => {
                        self.load_module(descriptor).await;
                    }
                    None => {
                        warn!(room_id = %self.room_id, plugin = %name, "Active plugin is not registered, skipping");
                    }
                }
            }
        }

        debug!(room_id = %self.room_id, %mode, modules = ?self.module_names(), "Room set up");
        Ok(mode)
    }

    async fn stored_mode(&self) -> FrameworkResult<Option<RoomMode>> {
        let raw = self
            .ctx
            .store
            .get(&Scope::room(&self.room_id), RoomMode::STORAGE_KEY)
            .await?;
        match raw {
            Some(raw) => raw.parse().map(Some).map_err(|reason| {
                StoreError::Corrupt {
                    key: format!("{}/{}", Scope::room(&self.room_id), RoomMode::STORAGE_KEY),
                    reason,
                }
                .into()
            }),
            None => Ok(None),
        }
    }

    async fn setup_new(&self, options: &SetupOptions) -> FrameworkResult<RoomMode> {
        let bot_id = self.ctx.bot_id();
        let others: Vec<String> = self
            .ctx
            .transport
            .room_members(&self.room_id)
            .await?
            .into_iter()
            .filter(|member| member != bot_id)
            .collect();

        let mode = if options.as_config || options.config_room_for.is_some() || others.len() == 1 {
            if let Some(target) = &options.config_room_for {
                self.ctx.store.add_config_link(&self.room_id, target).await?;
            }
            RoomMode::Config
        } else if others.is_empty() {
            RoomMode::Disabled
        } else {
            let inviter = options
                .invited_by
                .as_deref()
                .ok_or_else(|| FrameworkError::UnknownInviter {
                    room_id: self.room_id.clone(),
                })?;
            self.setup_interaction(inviter).await?;
            RoomMode::Interaction
        };

        self.ctx
            .store
            .set(
                &Scope::room(&self.room_id),
                RoomMode::STORAGE_KEY,
                mode.as_str(),
            )
            .await?;
        info!(room_id = %self.room_id, %mode, members = others.len(), "Room classified");
        Ok(mode)
    }

    async fn setup_interaction(&self, inviter: &str) -> FrameworkResult<()> {
        let mut scope = self.acl.scope().await?;
        scope.user_role_add(inviter, CONFIG_ROLE);
        scope.commit().await?;

        let tracker = self.tracker()?;
        let config_room = tracker.get_private_room_with_user(inviter, None).await?;
        self.ctx
            .store
            .add_config_link(config_room.room_id(), &self.room_id)
            .await?;

        let prefix = &self.ctx.settings.command_prefix;
        let notice = format!(
            "I joined {room}. You can configure it from here, \
             e.g. `{prefix}config plugins --room {room}`.",
            room = self.room_id,
        );
        if let Err(e) = config_room.send_text(&notice).await {
            warn!(room_id = %config_room.room_id(), error = %e, "Failed to notify config room");
        }
        Ok(())
    }

    async fn prune_config_targets(&self) -> FrameworkResult<()> {
        let joined: HashSet<String> = self.ctx.transport.joined_rooms().await?.into_iter().collect();
        for target in self.ctx.store.config_targets(&self.room_id).await? {
            if !joined.contains(&target) {
                info!(room_id = %self.room_id, %target, "Pruning link to a room the bot left");
                self.ctx
                    .store
                    .remove_config_link(&self.room_id, &target)
                    .await?;
            }
        }
        Ok(())
    }

    async fn prune_config_sources(&self) -> FrameworkResult<()> {
        let joined: HashSet<String> = self.ctx.transport.joined_rooms().await?.into_iter().collect();
        for source in self.ctx.store.config_sources(&self.room_id).await? {
            if !joined.contains(&source) {
                info!(room_id = %self.room_id, %source, "Pruning link from a config room the bot left");
                self.ctx
                    .store
                    .remove_config_link(&source, &self.room_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn load_module(&self, descriptor: PluginDescriptor) -> bool {
        if self.has_module(descriptor.name) {
            return true;
        }
        let module = Arc::new(RoomModule::new(
            descriptor,
            &self.room_id,
            Arc::clone(&self.ctx),
            self.tracker.clone(),
        ));
        if !module.load().await {
            return false;
        }
        self.modules.write().insert(descriptor.name, module);
        true
    }

    /// Runs `init()` on every loaded module that has not run it yet.
    ///
    /// Modules whose `init()` fails are destroyed and unloaded; they stay in
    /// the persisted activation set.
    pub async fn init_modules(&self) {
        let modules: Vec<Arc<RoomModule>> = self.modules.read().values().cloned().collect();
        for module in modules {
            if !module.init().await {
                module.destroy().await;
                self.modules.write().remove(module.name());
            }
        }
    }

    // ─── Plugin management ───────────────────────────────────────────────────

    /// Loads, initializes and persists an interaction plugin.
    pub async fn activate_plugin(&self, name: &str) -> ActivationOutcome {
        let _guard = self.lifecycle.lock().await;

        if self.has_module(name) {
            return ActivationOutcome::AlreadyLoaded;
        }
        let Some(descriptor) = self.ctx.registry.get_typed(name, PluginType::Interaction) else {
            return ActivationOutcome::NotFound;
        };

        let module = Arc::new(RoomModule::new(
            descriptor,
            &self.room_id,
            Arc::clone(&self.ctx),
            self.tracker.clone(),
        ));
        if !module.load().await {
            return ActivationOutcome::Failed("setup failed".to_string());
        }
        if !module.init().await {
            module.destroy().await;
            return ActivationOutcome::Failed("init failed".to_string());
        }
        if let Err(e) = self.ctx.store.add_active_plugin(&self.room_id, name).await {
            error!(room_id = %self.room_id, plugin = name, error = %e, "Failed to persist activation");
            module.destroy().await;
            return ActivationOutcome::Failed(e.to_string());
        }

        self.modules.write().insert(descriptor.name, module);
        info!(room_id = %self.room_id, plugin = name, "Plugin activated");
        ActivationOutcome::Activated
    }

    /// Destroys a loaded plugin and removes it from the activation set.
    pub async fn remove_plugin(&self, name: &str) -> RemovalOutcome {
        let _guard = self.lifecycle.lock().await;

        let Some(module) = self.module(name) else {
            return RemovalOutcome::NotLoaded;
        };
        module.destroy().await;
        self.modules.write().remove(name);

        if let Err(e) = self.ctx.store.remove_active_plugin(&self.room_id, name).await {
            error!(room_id = %self.room_id, plugin = name, error = %e, "Failed to persist removal");
            return RemovalOutcome::Failed(e.to_string());
        }
        info!(room_id = %self.room_id, plugin = name, "Plugin removed");
        RemovalOutcome::Removed
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Delivers a text message to every loaded module concurrently.
    pub async fn on_text_event(&self, message: TextMessage) -> BroadcastReport {
        let message = Arc::new(message);
        let recipients = self
            .modules
            .read()
            .iter()
            .map(|(name, module)| {
                let module = Arc::clone(module);
                let message = Arc::clone(&message);
                let fut = async move { module.on_text_message(&message).await }.boxed();
                (name.to_string(), fut)
            })
            .collect();

        broadcast(
            "text",
            &self.room_id,
            self.ctx.settings.timeouts.broadcast,
            recipients,
        )
        .await
    }

    /// Destroys every loaded module after the bot left the room.
    pub async fn on_bot_leave(&self, removed_by: Option<&str>) -> BroadcastReport {
        info!(room_id = %self.room_id, removed_by, "Tearing down room");
        self.teardown().await
    }

    pub(crate) async fn teardown(&self) -> BroadcastReport {
        let modules = std::mem::take(&mut *self.modules.write());
        let recipients = modules
            .into_iter()
            .map(|(name, module)| {
                let fut = async move {
                    module.destroy().await;
                    Ok::<(), BoxError>(())
                }
                .boxed();
                (name.to_string(), fut)
            })
            .collect();

        broadcast(
            "destroy",
            &self.room_id,
            self.ctx.settings.timeouts.leave,
            recipients,
        )
        .await
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("room_id", &self.room_id)
            .field("mode", &self.mode())
            .field("modules", &self.module_names())
            .finish()
    }
}
