//! Process-wide registry of rooms.
//!
//! [`RoomTracker`] owns every [`Room`] the bot occupies.  It:
//!
//! - Runs the two-phase startup: every room is set up and its plugins loaded
//!   (pass 1) before any plugin's `init()` runs (pass 2).
//! - Keeps a `user → rooms` membership index fed by membership events.
//! - Resolves and caches private config rooms per user, creating them on
//!   demand through [`create_room`](RoomTracker::create_room).
//! - Tears a room down when the bot leaves it.
//!
//! Rooms hold a weak handle back to the tracker, so the tracker is always
//! constructed inside an `Arc` ([`RoomTracker::new`]).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use roost_core::{CreateRoomOptions, HistoryVisibility, RoomPreset};
use tracing::{debug, error, info, warn};

use crate::context::FrameworkContext;
use crate::error::{FrameworkError, FrameworkResult};
use crate::room::{Room, SetupOptions};

const VISIBILITY_POLL: Duration = Duration::from_millis(250);

/// Summary of [`RoomTracker::init`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// Rooms that were set up and registered.
    pub tracked: Vec<String>,
    /// Rooms whose setup failed, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Registry of every room the bot occupies.
pub struct RoomTracker {
    ctx: Arc<FrameworkContext>,
    weak_self: Weak<RoomTracker>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    /// user id → rooms the user is in.
    members: RwLock<HashMap<String, HashSet<String>>>,
    /// user id → private config room.
    private_rooms: RwLock<HashMap<String, String>>,
    initialized: AtomicBool,
}

impl RoomTracker {
    /// Creates an empty tracker.
    pub fn new(ctx: Arc<FrameworkContext>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            ctx,
            weak_self: weak_self.clone(),
            rooms: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            private_rooms: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Shared collaborators.
    pub fn context(&self) -> &Arc<FrameworkContext> {
        &self.ctx
    }

    /// Returns `true` once startup finished.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    // ─── Startup ─────────────────────────────────────────────────────────────

    /// Sets up every occupied room, then initializes every loaded module.
    ///
    /// A room whose setup fails is logged and left untracked.
    pub async fn init(&self, occupied_rooms: Vec<String>) -> InitReport {
        let mut report = InitReport::default();

        for room_id in occupied_rooms {
            match self.setup_room(&room_id, SetupOptions::default()).await {
                Ok(_) => report.tracked.push(room_id),
                Err(e) => {
                    error!(%room_id, error = %e, "Room setup failed, room stays untracked");
                    report.skipped.push((room_id, e.to_string()));
                }
            }
        }

        // Rooms created during pass 1 (private config rooms) are included.
        for room in self.rooms() {
            room.init_modules().await;
        }
        self.initialized.store(true, Ordering::Release);

        info!(
            tracked = report.tracked.len(),
            skipped = report.skipped.len(),
            "Room tracker initialized"
        );
        report
    }

    /// Sets up a room the bot just joined.
    pub async fn setup_joined_room(
        &self,
        room_id: &str,
        invited_by: Option<&str>,
    ) -> FrameworkResult<Arc<Room>> {
        let options = SetupOptions {
            invited_by: invited_by.map(str::to_string),
            ..SetupOptions::default()
        };
        self.setup_room(room_id, options).await
    }

    /// Sets up and registers a room; returns the tracked room if it already
    /// exists.
    pub async fn setup_room(
        &self,
        room_id: &str,
        options: SetupOptions,
    ) -> FrameworkResult<Arc<Room>> {
        if let Some(room) = self.get(room_id) {
            return Ok(room);
        }

        let room = Arc::new(Room::new(
            room_id,
            Arc::clone(&self.ctx),
            self.weak_self.clone(),
        ));
        if let Err(e) = room.setup(&options).await {
            room.teardown().await;
            return Err(e);
        }

        let tracked = self.add(Arc::clone(&room));
        if !Arc::ptr_eq(&tracked, &room) {
            debug!(%room_id, "Room was registered concurrently, dropping duplicate");
            room.teardown().await;
            return Ok(tracked);
        }

        match self.ctx.transport.room_members(room_id).await {
            Ok(members) => {
                let mut index = self.members.write();
                for member in members {
                    index.entry(member).or_default().insert(room_id.to_string());
                }
            }
            Err(e) => warn!(%room_id, error = %e, "Could not seed membership index"),
        }

        if self.is_initialized() {
            room.init_modules().await;
        }
        Ok(room)
    }

    // ─── Registry ────────────────────────────────────────────────────────────

    /// Registers a room unless one with the same id is tracked.
    ///
    /// Returns the tracked room.
    pub fn add(&self, room: Arc<Room>) -> Arc<Room> {
        Arc::clone(
            self.rooms
                .write()
                .entry(room.room_id().to_string())
                .or_insert(room),
        )
    }

    /// Looks up a tracked room.
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().get(room_id).cloned()
    }

    /// Every tracked room.
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().values().cloned().collect()
    }

    /// Number of tracked rooms.
    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    /// Returns `true` if no room is tracked.
    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }

    /// Rooms the membership index places `user_id` in.
    pub fn rooms_of(&self, user_id: &str) -> Vec<String> {
        self.members
            .read()
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ─── Membership ──────────────────────────────────────────────────────────

    /// Records that `user_id` joined `room_id`.
    pub fn on_room_join(&self, room_id: &str, user_id: &str, sender: &str) {
        debug!(%room_id, %user_id, %sender, "Member joined");
        self.members
            .write()
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());
    }

    /// Records that `user_id` left `room_id`; tears the room down if the
    /// bot itself left.
    pub async fn on_room_leave(&self, room_id: &str, user_id: &str, sender: &str) {
        debug!(%room_id, %user_id, %sender, "Member left");
        {
            let mut index = self.members.write();
            if let Some(rooms) = index.get_mut(user_id) {
                rooms.remove(room_id);
                if rooms.is_empty() {
                    index.remove(user_id);
                }
            }
        }

        if user_id != self.ctx.bot_id() {
            return;
        }

        let Some(room) = self.rooms.write().remove(room_id) else {
            return;
        };
        self.forget_room(room_id);

        let removed_by = (sender != user_id).then_some(sender);
        let report = room.on_bot_leave(removed_by).await;
        info!(%room_id, destroyed = report.total(), "Room evicted");
    }

    fn forget_room(&self, room_id: &str) {
        self.private_rooms.write().retain(|_, room| room != room_id);
        let mut index = self.members.write();
        index.retain(|_, rooms| {
            rooms.remove(room_id);
            !rooms.is_empty()
        });
    }

    /// Returns `true` iff the room's members are exactly `{user_id, bot}`.
    pub async fn is_dm_room(&self, user_id: &str, room_id: &str) -> FrameworkResult<bool> {
        let members = self.ctx.transport.room_members(room_id).await?;
        let bot_id = self.ctx.bot_id();
        Ok(members.len() == 2
            && user_id != bot_id
            && members.iter().any(|m| m == user_id)
            && members.iter().any(|m| m == bot_id))
    }

    // ─── Room creation ───────────────────────────────────────────────────────

    /// Creates a room, waits for it to show up in local room state and sets
    /// it up exactly as if `creator` had invited the bot.
    ///
    /// Boxed because room setup can itself create a room.
    pub fn create_room<'a>(
        &'a self,
        creator: &'a str,
        options: CreateRoomOptions,
    ) -> BoxFuture<'a, FrameworkResult<Arc<Room>>> {
        self.create_room_with(creator, options, SetupOptions::invited_by(creator))
    }

    fn create_room_with<'a>(
        &'a self,
        creator: &'a str,
        options: CreateRoomOptions,
        setup: SetupOptions,
    ) -> BoxFuture<'a, FrameworkResult<Arc<Room>>> {
        Box::pin(async move {
            let room_id = self.ctx.transport.create_room(options).await?;
            info!(%room_id, %creator, "Room created");
            self.wait_until_visible(&room_id).await?;
            self.setup_room(&room_id, setup).await
        })
    }

    async fn wait_until_visible(&self, room_id: &str) -> FrameworkResult<()> {
        let deadline = tokio::time::Instant::now() + self.ctx.settings.timeouts.room_visible;
        loop {
            if self
                .ctx
                .transport
                .joined_rooms()
                .await?
                .iter()
                .any(|r| r == room_id)
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FrameworkError::RoomNotVisible {
                    room_id: room_id.to_string(),
                });
            }
            tokio::time::sleep(VISIBILITY_POLL).await;
        }
    }

    /// Returns the private config room shared with `user_id`, creating it if
    /// none exists.
    pub async fn get_private_room_with_user(
        &self,
        user_id: &str,
        name: Option<&str>,
    ) -> FrameworkResult<Arc<Room>> {
        let cached = self.private_rooms.read().get(user_id).cloned();
        if let Some(room_id) = cached
            && let Some(room) = self.get(&room_id)
            && self.is_dm_room(user_id, &room_id).await?
        {
            return Ok(room);
        }

        for room_id in self.rooms_of(user_id) {
            let Some(room) = self.get(&room_id) else {
                continue;
            };
            if room.mode().is_some_and(|m| m.is_config())
                && self.is_dm_room(user_id, &room_id).await?
            {
                self.private_rooms
                    .write()
                    .insert(user_id.to_string(), room_id);
                return Ok(room);
            }
        }

        let options = CreateRoomOptions {
            name: Some(
                name.unwrap_or(&self.ctx.settings.config_room_name)
                    .to_string(),
            ),
            topic: None,
            invite: vec![user_id.to_string()],
            preset: RoomPreset::TrustedPrivateChat,
            encrypted: true,
            history_visibility: HistoryVisibility::Invited,
            is_direct: true,
        };
        let room = self
            .create_room_with(user_id, options, SetupOptions::private_config(user_id))
            .await?;
        self.private_rooms
            .write()
            .insert(user_id.to_string(), room.room_id().to_string());
        Ok(room)
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Destroys every module in every room and forgets all rooms.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.write().drain().map(|(_, room)| room).collect();
        info!(rooms = rooms.len(), "Shutting down rooms");
        join_all(rooms.iter().map(|room| room.teardown())).await;
        self.private_rooms.write().clear();
        self.members.write().clear();
        self.initialized.store(false, Ordering::Release);
    }
}
