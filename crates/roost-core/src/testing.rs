//! In-memory transport for tests.
//!
//! [`MockTransport`] keeps a tiny model of room state (occupied rooms, member
//! lists, power levels) and records every outbound message so tests can assert
//! on what the bot said.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{TransportError, TransportResult};
use crate::transport::{CreateRoomOptions, Transport};

/// A message recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination room.
    pub room_id: String,
    /// Plain-text body.
    pub body: String,
    /// Formatted body, if sent through `send_html`.
    pub html: Option<String>,
}

#[derive(Default)]
struct MockState {
    joined: BTreeSet<String>,
    members: HashMap<String, BTreeSet<String>>,
    power_levels: HashMap<(String, String), i64>,
    sent: Vec<SentMessage>,
    invites: Vec<(String, String)>,
    created: Vec<CreateRoomOptions>,
    next_room: u64,
    fail_sends: bool,
    fail_joined_rooms: bool,
    hide_created_rooms: bool,
    lagging_invites: bool,
}

/// Scriptable [`Transport`] backed by local state only.
pub struct MockTransport {
    bot_id: String,
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Creates a transport for the bot `bot_id` occupying no rooms.
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Wraps `self` in an `Arc`.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Adds a room the bot occupies, with the given other members.
    pub fn with_room<I, S>(self, room_id: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_room(room_id, members);
        self
    }

    /// Adds a room the bot occupies, with the given other members.
    pub fn add_room<I, S>(&self, room_id: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        state.joined.insert(room_id.to_string());
        let entry = state.members.entry(room_id.to_string()).or_default();
        entry.insert(self.bot_id.clone());
        entry.extend(members.into_iter().map(Into::into));
    }

    /// Adds a member to a room's member list.
    pub fn add_member(&self, room_id: &str, user_id: &str) {
        self.state
            .lock()
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// Removes a member from a room's member list.
    pub fn remove_member(&self, room_id: &str, user_id: &str) {
        if let Some(members) = self.state.lock().members.get_mut(room_id) {
            members.remove(user_id);
        }
    }

    /// Sets the power level of a user in a room.
    pub fn set_power_level(&self, room_id: &str, user_id: &str, level: i64) {
        self.state
            .lock()
            .power_levels
            .insert((room_id.to_string(), user_id.to_string()), level);
    }

    /// Makes every send fail with [`TransportError::SendFailed`].
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Makes `joined_rooms` fail with [`TransportError::NotConnected`].
    pub fn fail_joined_rooms(&self, fail: bool) {
        self.state.lock().fail_joined_rooms = fail;
    }

    /// Keeps newly created rooms out of `joined_rooms`.
    pub fn hide_created_rooms(&self, hide: bool) {
        self.state.lock().hide_created_rooms = hide;
    }

    /// Leaves invitees out of the member list of newly created rooms, as if
    /// the invites had not synced yet.
    pub fn lag_created_invites(&self, lag: bool) {
        self.state.lock().lagging_invites = lag;
    }

    /// All messages sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    /// Bodies of the messages sent to `room_id`.
    pub fn sent_to(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|m| m.room_id == room_id)
            .map(|m| m.body.clone())
            .collect()
    }

    /// `(room, user)` pairs invited so far.
    pub fn invites(&self) -> Vec<(String, String)> {
        self.state.lock().invites.clone()
    }

    /// Options of every room created so far.
    pub fn created_rooms(&self) -> Vec<CreateRoomOptions> {
        self.state.lock().created.clone()
    }

    /// Returns `true` if the bot occupies `room_id`.
    pub fn is_joined(&self, room_id: &str) -> bool {
        self.state.lock().joined.contains(room_id)
    }

    fn record(&self, room_id: &str, body: &str, html: Option<&str>) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }
        state.sent.push(SentMessage {
            room_id: room_id.to_string(),
            body: body.to_string(),
            html: html.map(str::to_string),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn bot_id(&self) -> &str {
        &self.bot_id
    }

    async fn send_text(&self, room_id: &str, body: &str) -> TransportResult<()> {
        self.record(room_id, body, None)
    }

    async fn send_html(&self, room_id: &str, body: &str, html: &str) -> TransportResult<()> {
        self.record(room_id, body, Some(html))
    }

    async fn invite(&self, room_id: &str, user_id: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        state
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        state
            .invites
            .push((room_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn create_room(&self, options: CreateRoomOptions) -> TransportResult<String> {
        let mut state = self.state.lock();
        state.next_room += 1;
        let room_id = format!("!created{}:mock", state.next_room);

        let mut members = BTreeSet::from([self.bot_id.clone()]);
        if !state.lagging_invites {
            members.extend(options.invite.iter().cloned());
        }
        state.members.insert(room_id.clone(), members);
        if !state.hide_created_rooms {
            state.joined.insert(room_id.clone());
        }
        state.created.push(options);
        Ok(room_id)
    }

    async fn join(&self, room_id: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.joined.insert(room_id.to_string());
        state
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(self.bot_id.clone());
        Ok(())
    }

    async fn leave(&self, room_id: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.joined.remove(room_id);
        if let Some(members) = state.members.get_mut(room_id) {
            members.remove(&self.bot_id);
        }
        Ok(())
    }

    async fn get_power_level(&self, room_id: &str, user_id: &str) -> TransportResult<i64> {
        Ok(self
            .state
            .lock()
            .power_levels
            .get(&(room_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn joined_rooms(&self) -> TransportResult<Vec<String>> {
        let state = self.state.lock();
        if state.fail_joined_rooms {
            return Err(TransportError::NotConnected);
        }
        Ok(state.joined.iter().cloned().collect())
    }

    async fn room_members(&self, room_id: &str) -> TransportResult<Vec<String>> {
        self.state
            .lock()
            .members
            .get(room_id)
            .map(|m| m.iter().cloned().collect())
            .ok_or_else(|| TransportError::UnknownRoom(room_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_created_room_contains_invitees() {
        let transport = MockTransport::new("@bot:x");
        let room = transport
            .create_room(CreateRoomOptions {
                invite: vec!["@a:x".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(transport.joined_rooms().await.unwrap().contains(&room));
        assert_eq!(
            transport.room_members(&room).await.unwrap(),
            vec!["@a:x", "@bot:x"]
        );
    }

    #[tokio::test]
    async fn test_send_failure_hook() {
        let transport = MockTransport::new("@bot:x");
        transport.send_text("!r", "one").await.unwrap();
        transport.fail_sends(true);
        assert!(transport.send_text("!r", "two").await.is_err());
        assert_eq!(transport.sent_to("!r"), vec!["one"]);
    }
}
