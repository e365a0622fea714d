//! Transport abstraction consumed by the orchestration layer.
//!
//! A [`Transport`] is the only way the core talks to the chat service.  It
//! covers outbound room operations and the two pieces of local room state the
//! core needs (occupied rooms and member lists).  Login, sync, encryption and
//! the wire protocol all live behind it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportResult;

/// Boxed transport shared across the tracker, rooms and plugin facades.
pub type BoxedTransport = Arc<dyn Transport>;

/// Room preset applied on creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPreset {
    /// Invite-only, history shared with members.
    #[default]
    PrivateChat,
    /// Like `PrivateChat` but every invitee gets the creator's power level.
    TrustedPrivateChat,
    /// Publicly joinable.
    PublicChat,
}

/// Who may read room history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryVisibility {
    /// Anyone, including non-members.
    WorldReadable,
    /// Members, including history from before they joined.
    #[default]
    Shared,
    /// Members, from the point they were invited.
    Invited,
    /// Members, from the point they joined.
    Joined,
}

/// Options for [`Transport::create_room`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomOptions {
    /// Display name.
    pub name: Option<String>,
    /// Room topic.
    pub topic: Option<String>,
    /// Users invited at creation.
    pub invite: Vec<String>,
    /// Creation preset.
    pub preset: RoomPreset,
    /// Whether end-to-end encryption is enabled.
    pub encrypted: bool,
    /// History visibility state event.
    pub history_visibility: HistoryVisibility,
    /// Mark the room as a direct chat.
    pub is_direct: bool,
}

/// Normalized transport surface.
///
/// Implementations must be cheap to share (`Arc<dyn Transport>`) and safe to
/// call concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The bot's own user id.
    fn bot_id(&self) -> &str;

    /// Sends a plain-text message.
    async fn send_text(&self, room_id: &str, body: &str) -> TransportResult<()>;

    /// Sends a formatted message with a plain-text fallback.
    async fn send_html(&self, room_id: &str, body: &str, html: &str) -> TransportResult<()>;

    /// Invites a user into a room.
    async fn invite(&self, room_id: &str, user_id: &str) -> TransportResult<()>;

    /// Creates a room and returns its id.
    async fn create_room(&self, options: CreateRoomOptions) -> TransportResult<String>;

    /// Joins a room (also accepts a pending invite).
    async fn join(&self, room_id: &str) -> TransportResult<()>;

    /// Leaves a room (also rejects a pending invite).
    async fn leave(&self, room_id: &str) -> TransportResult<()>;

    /// Power level of `user_id` in `room_id`.
    async fn get_power_level(&self, room_id: &str, user_id: &str) -> TransportResult<i64>;

    /// Rooms the bot currently occupies according to local state.
    async fn joined_rooms(&self) -> TransportResult<Vec<String>>;

    /// Joined and invited members of a room according to local state.
    async fn room_members(&self, room_id: &str) -> TransportResult<Vec<String>>;
}
