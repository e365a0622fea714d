//! Bot-level event dispatch.
//!
//! Every inbound [`RoomEvent`] becomes its own spawned task with a fixed
//! budget.  Errors, panics and timeouts inside that task are logged and go no
//! further, so a stuck handler never delays the next event.
//!
//! | Event | Route |
//! |-------|-------|
//! | invite | [`InvitePolicy`], then join and [`RoomTracker::setup_joined_room`], or leave |
//! | text | [`Room::on_text_event`](roost_framework::Room::on_text_event) |
//! | membership | [`RoomTracker::on_room_join`] / [`RoomTracker::on_room_leave`] |
//! | reaction, redaction, key request | acknowledged, nothing else |
//! | unknown | logged and dropped |

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use roost_core::{EventKind, Membership, RoomEvent};
use roost_framework::{FrameworkResult, RoomTracker};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Who may bring the bot into a room.
#[derive(Debug, Clone, Default)]
pub struct InvitePolicy {
    admins: Arc<BTreeSet<String>>,
    allowed_rooms: BTreeSet<String>,
}

impl InvitePolicy {
    /// Admins may invite the bot anywhere; everyone else only into
    /// `allowed_rooms`.
    pub fn new(admins: Arc<BTreeSet<String>>, allowed_rooms: BTreeSet<String>) -> Self {
        Self {
            admins,
            allowed_rooms,
        }
    }

    /// Returns `true` if an invite from `inviter` into `room_id` is accepted.
    pub fn allows(&self, room_id: &str, inviter: &str) -> bool {
        self.admins.contains(inviter) || self.allowed_rooms.contains(room_id)
    }
}

/// Routes transport events to the room tracker.
#[derive(Clone)]
pub struct EventDispatcher {
    tracker: Arc<RoomTracker>,
    policy: Arc<InvitePolicy>,
    budget: Duration,
}

impl EventDispatcher {
    pub fn new(tracker: Arc<RoomTracker>, policy: InvitePolicy, budget: Duration) -> Self {
        Self {
            tracker,
            policy: Arc::new(policy),
            budget,
        }
    }

    pub fn tracker(&self) -> &Arc<RoomTracker> {
        &self.tracker
    }

    /// Handles `event` on its own task, bounded by the event budget.
    pub fn dispatch(&self, event: RoomEvent) -> JoinHandle<()> {
        let span = info_span!(
            "dispatch",
            room_id = %event.room_id,
            event_kind = event.kind_name(),
            sender = %event.sender,
        );
        let this = self.clone();
        tokio::spawn(
            async move {
                let budget = this.budget;
                let handling = AssertUnwindSafe(this.handle(event)).catch_unwind();
                match tokio::time::timeout(budget, handling).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => error!(error = %e, "Event handling failed"),
                    Ok(Err(_)) => error!("Event handling panicked"),
                    Err(_) => warn!(?budget, "Event handling timed out, abandoned"),
                }
            }
            .instrument(span),
        )
    }

    /// Routes one event without any budget.
    pub async fn handle(&self, event: RoomEvent) -> FrameworkResult<()> {
        let RoomEvent {
            room_id,
            sender,
            kind,
            ..
        } = event;

        match kind {
            EventKind::Invite => self.on_invite(&room_id, &sender).await,
            EventKind::Text { body, msgtype } => {
                if sender == self.tracker.context().bot_id() {
                    return Ok(());
                }
                let Some(room) = self.tracker.get(&room_id) else {
                    debug!(%room_id, "Message in an untracked room, ignored");
                    return Ok(());
                };
                let mut message = roost_core::TextMessage::new(room_id, sender, body);
                message.msgtype = msgtype;
                let report = room.on_text_event(message).await;
                if !report.is_clean() {
                    debug!(
                        failed = report.failed.len(),
                        timed_out = report.timed_out.len(),
                        "Some modules did not handle the message"
                    );
                }
                Ok(())
            }
            EventKind::Membership {
                user_id,
                membership,
            } => {
                match membership {
                    Membership::Join => self.tracker.on_room_join(&room_id, &user_id, &sender),
                    m if m.is_departure() => {
                        self.tracker
                            .on_room_leave(&room_id, &user_id, &sender)
                            .await;
                    }
                    other => debug!(%user_id, membership = ?other, "Membership change ignored"),
                }
                Ok(())
            }
            EventKind::Reaction { .. } | EventKind::Redaction { .. } | EventKind::KeyRequest => {
                debug!("Event acknowledged");
                Ok(())
            }
            EventKind::Unknown { event_type } => {
                debug!(%event_type, "Unknown event dropped");
                Ok(())
            }
        }
    }

    async fn on_invite(&self, room_id: &str, inviter: &str) -> FrameworkResult<()> {
        let transport = &self.tracker.context().transport;
        if !self.policy.allows(room_id, inviter) {
            warn!(%room_id, %inviter, "Rejecting invite");
            transport.leave(room_id).await?;
            return Ok(());
        }

        info!(%room_id, %inviter, "Accepting invite");
        transport.join(room_id).await?;
        self.tracker.setup_joined_room(room_id, Some(inviter)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("policy", &self.policy)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roost_core::testing::MockTransport;
    use roost_core::{MemoryStore, RoomMode, Scope, Store, Transport};
    use roost_framework::{
        BoxError, FrameworkContext, FrameworkSettings, Plugin, PluginApi, PluginDescriptor,
        PluginRegistry, Timeouts,
    };

    const BOT: &str = "@bot:test";
    const ADMIN: &str = "@admin:test";
    const ALICE: &str = "@alice:test";
    const BOB: &str = "@bob:test";

    static PING: PluginDescriptor = PluginDescriptor::interaction("ping", "Answers !ping", Ping::create);
    static STUCK: PluginDescriptor =
        PluginDescriptor::interaction("stuck", "Never answers", Stuck::create);
    static CLOCK: PluginDescriptor =
        PluginDescriptor::interaction("clock", "Ticks every second", Clock::create);

    struct Ping {
        api: PluginApi,
    }

    impl Ping {
        fn create(api: PluginApi) -> Arc<dyn Plugin> {
            Arc::new(Self { api })
        }
    }

    #[async_trait]
    impl Plugin for Ping {
        async fn setup(&self) -> Result<bool, BoxError> {
            let api = self.api.clone();
            self.api.add_command_handler("ping", move |_, _| {
                let api = api.clone();
                async move { Ok::<(), BoxError>(api.send_text("pong").await?) }
            });
            Ok(true)
        }
    }

    struct Stuck;

    impl Stuck {
        fn create(_api: PluginApi) -> Arc<dyn Plugin> {
            Arc::new(Self)
        }
    }

    #[async_trait]
    impl Plugin for Stuck {
        async fn setup(&self) -> Result<bool, BoxError> {
            futures::future::pending::<()>().await;
            Ok(true)
        }
    }

    struct Clock {
        api: PluginApi,
    }

    impl Clock {
        fn create(api: PluginApi) -> Arc<dyn Plugin> {
            Arc::new(Self { api })
        }

        async fn bump(api: &PluginApi, key: &str) -> Result<(), BoxError> {
            let kv = api.local_kv();
            let next = kv.get_json::<u64>(key).await?.unwrap_or(0) + 1;
            kv.set_json(key, &next).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl Plugin for Clock {
        async fn setup(&self) -> Result<bool, BoxError> {
            let api = self.api.clone();
            self.api.add_task("tick", Duration::from_secs(1), move || {
                let api = api.clone();
                async move { Clock::bump(&api, "ticks").await }
            });
            Ok(true)
        }

        async fn destroy(&self) -> Result<(), BoxError> {
            Clock::bump(&self.api, "destroyed").await
        }
    }

    async fn count(dispatcher: &EventDispatcher, room_id: &str, plugin: &str, key: &str) -> u64 {
        dispatcher
            .tracker()
            .context()
            .store
            .get(&Scope::room_plugin(room_id, plugin), key)
            .await
            .unwrap()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn dispatcher(transport: MockTransport, allowed: &[&str]) -> (Arc<MockTransport>, EventDispatcher) {
        let transport = Arc::new(transport);
        let registry = Arc::new(PluginRegistry::new());
        registry.register(PING);
        registry.register(STUCK);
        registry.register(CLOCK);
        let admins = Arc::new(BTreeSet::from([ADMIN.to_string()]));
        // Long enough that the event budget gives up on a stuck setup first.
        let timeouts = Timeouts {
            setup: Duration::from_secs(120),
            ..Timeouts::default()
        };
        let settings = FrameworkSettings {
            admins: Arc::clone(&admins),
            timeouts,
            ..FrameworkSettings::default()
        };
        let ctx = FrameworkContext::new(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            registry,
            settings,
        );
        let policy = InvitePolicy::new(admins, allowed.iter().map(|r| r.to_string()).collect());
        let dispatcher = EventDispatcher::new(RoomTracker::new(ctx), policy, Duration::from_secs(60));
        (transport, dispatcher)
    }

    fn text(room_id: &str, sender: &str, body: &str) -> RoomEvent {
        RoomEvent::new(
            room_id,
            sender,
            EventKind::Text {
                body: body.to_string(),
                msgtype: Default::default(),
            },
        )
    }

    #[test]
    fn test_invite_policy() {
        let policy = InvitePolicy::new(
            Arc::new(BTreeSet::from([ADMIN.to_string()])),
            BTreeSet::from(["!open:test".to_string()]),
        );
        assert!(policy.allows("!any:test", ADMIN));
        assert!(policy.allows("!open:test", ALICE));
        assert!(!policy.allows("!any:test", ALICE));
    }

    #[tokio::test]
    async fn test_rejected_invite_leaves() {
        let (transport, dispatcher) =
            dispatcher(MockTransport::new(BOT).with_room("!room:test", [ALICE, BOB]), &[]);

        dispatcher
            .handle(RoomEvent::new("!room:test", ALICE, EventKind::Invite))
            .await
            .unwrap();

        assert!(!transport.is_joined("!room:test"));
        assert!(dispatcher.tracker().get("!room:test").is_none());
    }

    #[tokio::test]
    async fn test_admin_invite_sets_up_room() {
        let (transport, dispatcher) =
            dispatcher(MockTransport::new(BOT).with_room("!room:test", [ADMIN, BOB]), &[]);
        transport.leave("!room:test").await.unwrap();

        dispatcher
            .handle(RoomEvent::new("!room:test", ADMIN, EventKind::Invite))
            .await
            .unwrap();

        assert!(transport.is_joined("!room:test"));
        let room = dispatcher.tracker().get("!room:test").unwrap();
        assert_eq!(room.mode(), Some(RoomMode::Interaction));
        assert_eq!(transport.created_rooms()[0].invite, vec![ADMIN.to_string()]);
    }

    #[tokio::test]
    async fn test_text_reaches_modules_but_not_own_messages() {
        let (transport, dispatcher) = dispatcher(
            MockTransport::new(BOT).with_room("!room:test", [ALICE, BOB]),
            &["!room:test"],
        );
        dispatcher
            .handle(RoomEvent::new("!room:test", ALICE, EventKind::Invite))
            .await
            .unwrap();
        let room = dispatcher.tracker().get("!room:test").unwrap();
        room.activate_plugin("ping").await;

        dispatcher.handle(text("!room:test", BOB, "!ping")).await.unwrap();
        dispatcher.handle(text("!room:test", BOT, "!ping")).await.unwrap();
        dispatcher.handle(text("!unknown:test", BOB, "!ping")).await.unwrap();

        assert_eq!(transport.sent_to("!room:test"), vec!["pong"]);
    }

    #[tokio::test]
    async fn test_membership_routes_to_tracker() {
        let (transport, dispatcher) = dispatcher(
            MockTransport::new(BOT).with_room("!room:test", [ALICE]),
            &["!room:test"],
        );
        dispatcher
            .handle(RoomEvent::new("!room:test", ALICE, EventKind::Invite))
            .await
            .unwrap();
        let membership = |user: &str, membership| {
            RoomEvent::new(
                "!room:test",
                user,
                EventKind::Membership {
                    user_id: user.to_string(),
                    membership,
                },
            )
        };

        dispatcher.handle(membership(BOB, Membership::Join)).await.unwrap();
        assert_eq!(dispatcher.tracker().rooms_of(BOB), vec!["!room:test"]);

        transport.leave("!room:test").await.unwrap();
        dispatcher.handle(membership(BOT, Membership::Leave)).await.unwrap();
        assert!(dispatcher.tracker().get("!room:test").is_none());
    }

    #[tokio::test]
    async fn test_ignored_events() {
        let (transport, dispatcher) = dispatcher(MockTransport::new(BOT), &[]);
        for kind in [
            EventKind::KeyRequest,
            EventKind::Redaction {
                redacts: "$event".to_string(),
            },
            EventKind::Unknown {
                event_type: "m.custom".to_string(),
            },
        ] {
            dispatcher
                .handle(RoomEvent::new("!room:test", ALICE, kind))
                .await
                .unwrap();
        }
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_event_is_abandoned() {
        let (transport, dispatcher) = dispatcher(
            MockTransport::new(BOT).with_room("!room:test", [ALICE, BOB]),
            &["!room:test", "!slow:test"],
        );
        dispatcher
            .handle(RoomEvent::new("!room:test", ALICE, EventKind::Invite))
            .await
            .unwrap();
        let room = dispatcher.tracker().get("!room:test").unwrap();
        room.activate_plugin("ping").await;

        // A second invite into a fresh room whose plugin setup never returns.
        transport.add_room("!slow:test", [ALICE, BOB]);
        let store = &dispatcher.tracker().context().store;
        store.add_active_plugin("!slow:test", "stuck").await.unwrap();
        store
            .set(&Scope::room("!slow:test"), RoomMode::STORAGE_KEY, "interaction")
            .await
            .unwrap();

        let stuck = dispatcher.dispatch(RoomEvent::new("!slow:test", ALICE, EventKind::Invite));
        let ping = dispatcher.dispatch(text("!room:test", BOB, "!ping"));

        ping.await.unwrap();
        assert_eq!(transport.sent_to("!room:test"), vec!["pong"]);
        stuck.await.unwrap();
        assert!(dispatcher.tracker().get("!slow:test").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_setup_stops_module_tasks() {
        let (transport, dispatcher) = dispatcher(MockTransport::new(BOT), &["!slow:test"]);
        transport.add_room("!slow:test", [ALICE, BOB]);
        let store = &dispatcher.tracker().context().store;
        store
            .set(&Scope::room("!slow:test"), RoomMode::STORAGE_KEY, "interaction")
            .await
            .unwrap();
        store.add_active_plugin("!slow:test", "clock").await.unwrap();
        store.add_active_plugin("!slow:test", "stuck").await.unwrap();

        dispatcher
            .dispatch(RoomEvent::new("!slow:test", ALICE, EventKind::Invite))
            .await
            .unwrap();
        assert!(dispatcher.tracker().get("!slow:test").is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let ticks = count(&dispatcher, "!slow:test", "clock", "ticks").await;
        assert!(ticks > 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count(&dispatcher, "!slow:test", "clock", "ticks").await, ticks);
        assert_eq!(count(&dispatcher, "!slow:test", "clock", "destroyed").await, 1);
    }
}
