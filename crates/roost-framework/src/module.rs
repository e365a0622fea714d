//! Isolation wrapper around one plugin instance in one room.
//!
//! ```text
//! new() ──► Created ──load()──► Loaded ──init()──► Initialized
//!              │                  │                   │
//!              └──────────────────┴──── destroy() ────┴──► Destroyed
//! ```
//!
//! Errors and panics raised by plugin hooks are caught here and never reach
//! the owning [`Room`](crate::Room).

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use clap::ArgMatches;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use roost_core::TextMessage;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::context::FrameworkContext;
use crate::error::BoxError;
use crate::plugin::{Plugin, PluginApi, PluginDescriptor};
use crate::tracker::RoomTracker;

/// Lifecycle position of a [`RoomModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Constructed, plugin not instantiated yet.
    Created,
    /// `setup()` succeeded.
    Loaded,
    /// `init()` ran.
    Initialized,
    /// `destroy()` ran; the module is inert.
    Destroyed,
}

/// One loaded plugin instance scoped to exactly one room.
pub struct RoomModule {
    descriptor: PluginDescriptor,
    api: PluginApi,
    plugin: RwLock<Option<Arc<dyn Plugin>>>,
    state: Mutex<ModuleState>,
    ctx: Arc<FrameworkContext>,
}

impl RoomModule {
    /// Creates an unloaded module for `descriptor` in `room_id`.
    pub fn new(
        descriptor: PluginDescriptor,
        room_id: &str,
        ctx: Arc<FrameworkContext>,
        tracker: Weak<RoomTracker>,
    ) -> Self {
        let api = PluginApi::new(room_id, descriptor.name, Arc::clone(&ctx), tracker);
        Self {
            descriptor,
            api,
            plugin: RwLock::new(None),
            state: Mutex::new(ModuleState::Created),
            ctx,
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Room the module lives in.
    pub fn room_id(&self) -> &str {
        self.api.room_id()
    }

    /// Static descriptor.
    pub fn descriptor(&self) -> PluginDescriptor {
        self.descriptor
    }

    /// Current lifecycle position.
    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    /// The facade handed to the plugin.
    pub fn api(&self) -> &PluginApi {
        &self.api
    }

    fn instance(&self) -> Option<Arc<dyn Plugin>> {
        self.plugin.read().clone()
    }

    /// The plugin's `about()` text, or its static description when unloaded.
    pub fn about(&self) -> String {
        match self.instance() {
            Some(plugin) => {
                let about = plugin.about();
                if about.is_empty() {
                    self.descriptor.desc.to_string()
                } else {
                    about
                }
            }
            None => self.descriptor.desc.to_string(),
        }
    }

    /// Instantiates the plugin and runs its `setup()`.
    ///
    /// Returns `false` if instantiation or setup failed, panicked, or
    /// declined.  Any tasks registered before the failure are stopped.
    pub async fn load(&self) -> bool {
        if self.state() != ModuleState::Created {
            warn!(room_id = %self.room_id(), plugin = self.name(), "Module already loaded");
            return self.state() != ModuleState::Destroyed;
        }

        let create = self.descriptor.create;
        let api = self.api.clone();
        let plugin = match std::panic::catch_unwind(AssertUnwindSafe(move || create(api))) {
            Ok(plugin) => plugin,
            Err(_) => {
                error!(room_id = %self.room_id(), plugin = self.name(), "Plugin constructor panicked");
                self.abandon().await;
                return false;
            }
        };

        let budget = self.ctx.settings.timeouts.setup;
        let outcome = timeout(budget, AssertUnwindSafe(plugin.setup()).catch_unwind()).await;
        let reason = match outcome {
            Ok(Ok(Ok(true))) => {
                *self.plugin.write() = Some(plugin);
                *self.state.lock() = ModuleState::Loaded;
                debug!(room_id = %self.room_id(), plugin = self.name(), "Plugin loaded");
                return true;
            }
            Ok(Ok(Ok(false))) => "setup declined".to_string(),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(_)) => "setup panicked".to_string(),
            Err(_) => format!("setup did not finish within {budget:?}"),
        };

        error!(room_id = %self.room_id(), plugin = self.name(), %reason, "Failed to load plugin");
        self.abandon().await;
        false
    }

    /// Runs the plugin's `init()`.
    ///
    /// Returns `false` if the hook failed or panicked, or the module was never
    /// loaded.  Calling it again after a successful run is a no-op.
    pub async fn init(&self) -> bool {
        match self.state() {
            ModuleState::Loaded => {}
            ModuleState::Initialized => return true,
            ModuleState::Created | ModuleState::Destroyed => return false,
        }
        let Some(plugin) = self.instance() else {
            return false;
        };

        let budget = self.ctx.settings.timeouts.setup;
        let outcome = timeout(budget, AssertUnwindSafe(plugin.init()).catch_unwind()).await;
        match outcome {
            Ok(Ok(Ok(()))) => {
                *self.state.lock() = ModuleState::Initialized;
                true
            }
            Ok(Ok(Err(e))) => {
                error!(room_id = %self.room_id(), plugin = self.name(), error = %e, "Plugin init failed");
                false
            }
            Ok(Err(_)) => {
                error!(room_id = %self.room_id(), plugin = self.name(), "Plugin init panicked");
                false
            }
            Err(_) => {
                error!(room_id = %self.room_id(), plugin = self.name(), ?budget, "Plugin init timed out");
                false
            }
        }
    }

    /// Runs every registered text handler whose predicate matches.
    ///
    /// All matching handlers run in registration order; the first error stops
    /// the remaining ones and is returned.
    pub async fn on_text_message(&self, message: &TextMessage) -> Result<(), BoxError> {
        if !matches!(self.state(), ModuleState::Loaded | ModuleState::Initialized) {
            return Ok(());
        }
        for handler in self.api.handlers() {
            if handler.matches(message) {
                handler.call(message.clone()).await?;
            }
        }
        Ok(())
    }

    /// The plugin's config sub-parser, if any.
    pub fn config_command(&self) -> Option<clap::Command> {
        self.instance()?.config_command()
    }

    /// Forwards a parsed config invocation to the plugin.
    pub async fn configure(&self, matches: &ArgMatches) -> Result<String, BoxError> {
        let Some(plugin) = self.instance() else {
            return Err(format!("plugin '{}' is not loaded", self.name()).into());
        };
        let outcome = AssertUnwindSafe(plugin.configure(matches))
            .catch_unwind()
            .await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(format!("plugin '{}' panicked while configuring", self.name()).into()),
        }
    }

    /// Stops the plugin's tasks, then runs its `destroy()` hook.
    ///
    /// Idempotent.  Hook failures are logged, never returned.
    pub async fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if *state == ModuleState::Destroyed {
                return;
            }
            *state = ModuleState::Destroyed;
        }

        self.api
            .shutdown(self.ctx.settings.timeouts.task_join)
            .await;

        let Some(plugin) = self.plugin.write().take() else {
            return;
        };
        run_destroy_hook(plugin, self.room_id(), self.name()).await;
    }

    async fn abandon(&self) {
        *self.state.lock() = ModuleState::Destroyed;
        self.api
            .shutdown(self.ctx.settings.timeouts.task_join)
            .await;
    }
}

/// A module dropped while still live (e.g. its room's setup was abandoned)
/// stops its tasks at once and finishes `destroy()` on a background task.
impl Drop for RoomModule {
    fn drop(&mut self) {
        if *self.state.get_mut() == ModuleState::Destroyed {
            return;
        }
        *self.state.get_mut() = ModuleState::Destroyed;
        self.api.cancel_tasks();

        let api = self.api.clone();
        let plugin = self.plugin.get_mut().take();
        let join_timeout = self.ctx.settings.timeouts.task_join;
        warn!(room_id = %api.room_id(), plugin = api.plugin_name(), "Module dropped while live, destroying");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    api.shutdown(join_timeout).await;
                    if let Some(plugin) = plugin {
                        run_destroy_hook(plugin, api.room_id(), api.plugin_name()).await;
                    }
                });
            }
            Err(_) => {
                warn!(room_id = %api.room_id(), plugin = api.plugin_name(), "No runtime, destroy hook skipped");
            }
        }
    }
}

async fn run_destroy_hook(plugin: Arc<dyn Plugin>, room_id: &str, name: &str) {
    let outcome = AssertUnwindSafe(plugin.destroy()).catch_unwind().await;
    match outcome {
        Ok(Ok(())) => info!(room_id, plugin = name, "Plugin destroyed"),
        Ok(Err(e)) => error!(room_id, plugin = name, error = %e, "Plugin destroy failed"),
        Err(_) => error!(room_id, plugin = name, "Plugin destroy panicked"),
    }
}

impl std::fmt::Debug for RoomModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomModule")
            .field("room_id", &self.room_id())
            .field("plugin", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Timeouts;
    use crate::test_support::*;
    use async_trait::async_trait;
    use roost_core::testing::MockTransport;
    use std::time::Duration;

    const ROOM: &str = "!room:test";

    fn module(h: &Harness, descriptor: PluginDescriptor) -> RoomModule {
        RoomModule::new(
            descriptor,
            ROOM,
            Arc::clone(h.tracker.context()),
            Arc::downgrade(&h.tracker),
        )
    }

    fn harness() -> Harness {
        Harness::new(MockTransport::new(BOT).with_room(ROOM, [ALICE, BOB]))
    }

    /// Two handlers on every message; the first always fails.
    static CHAIN: PluginDescriptor =
        PluginDescriptor::interaction("chain", "Failing handler chain", Chain::create);

    struct Chain {
        api: PluginApi,
    }

    impl Chain {
        fn create(api: PluginApi) -> Arc<dyn Plugin> {
            Arc::new(Self { api })
        }
    }

    #[async_trait]
    impl Plugin for Chain {
        async fn setup(&self) -> Result<bool, BoxError> {
            self.api
                .add_text_handler(|_| true, |_| async { Err::<(), BoxError>("first".into()) });
            let api = self.api.clone();
            self.api.add_text_handler(
                |_| true,
                move |_| {
                    let api = api.clone();
                    async move { Ok::<(), BoxError>(api.send_text("second").await?) }
                },
            );
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let h = harness();
        let module = module(&h, ECHO);
        assert_eq!(module.state(), ModuleState::Created);
        assert!(!module.init().await);

        assert!(module.load().await);
        assert_eq!(module.state(), ModuleState::Loaded);
        assert_eq!(module.about(), "Echoes messages");

        assert!(module.init().await);
        assert!(module.init().await);
        assert_eq!(module.state(), ModuleState::Initialized);
        assert_eq!(h.count(ROOM, "echo", "init").await, 1);

        module.destroy().await;
        module.destroy().await;
        assert_eq!(module.state(), ModuleState::Destroyed);
        assert_eq!(h.count(ROOM, "echo", "destroyed").await, 1);
        assert_eq!(module.about(), "Repeats what you say");
    }

    #[tokio::test]
    async fn test_failed_loads_are_contained() {
        let h = harness();

        let broken = module(&h, BROKEN);
        assert!(!broken.load().await);
        assert_eq!(broken.state(), ModuleState::Destroyed);

        let panicky = module(&h, PANICKY);
        assert!(!panicky.load().await);
        assert_eq!(panicky.state(), ModuleState::Destroyed);
        assert!(panicky.config_command().is_none());
    }

    #[tokio::test]
    async fn test_handler_error_stops_later_handlers() {
        let h = harness();
        let module = module(&h, CHAIN);
        assert!(module.load().await);

        let result = module
            .on_text_message(&TextMessage::new(ROOM, ALICE, "anything"))
            .await;

        assert_eq!(result.unwrap_err().to_string(), "first");
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_destroyed_module_ignores_messages() {
        let h = harness();
        let module = module(&h, ECHO);
        assert!(module.load().await);
        module.destroy().await;

        module
            .on_text_message(&TextMessage::new(ROOM, ALICE, "!echo hi"))
            .await
            .unwrap();
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_stop_on_destroy() {
        let h = harness();
        let module = module(&h, TICKER);
        assert!(module.load().await);
        assert_eq!(module.api().task_names(), vec!["tick"]);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let ticks = h.count(ROOM, "ticker", "ticks").await;
        assert!(ticks >= 3);

        module.destroy().await;
        assert_eq!(h.count(ROOM, "ticker", "cleaned").await, 1);
        assert!(module.api().task_names().is_empty());
        assert!(!module.api().add_task("late", Duration::from_secs(1), || async {
            Ok::<(), BoxError>(())
        }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.count(ROOM, "ticker", "ticks").await, ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_setup_times_out() {
        let h = harness();
        let module = module(&h, HANGING);

        let started = tokio::time::Instant::now();
        assert!(!module.load().await);
        assert!(started.elapsed() >= Timeouts::default().setup);
        assert_eq!(module.state(), ModuleState::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_live_module_is_destroyed() {
        let h = harness();
        let echo = module(&h, ECHO);
        let ticker = module(&h, TICKER);
        assert!(echo.load().await);
        assert!(ticker.load().await);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let ticks = h.count(ROOM, "ticker", "ticks").await;
        assert!(ticks >= 2);

        drop(echo);
        drop(ticker);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.count(ROOM, "echo", "destroyed").await, 1);
        assert_eq!(h.count(ROOM, "ticker", "cleaned").await, 1);
        assert_eq!(h.count(ROOM, "ticker", "ticks").await, ticks);
    }

    #[tokio::test]
    async fn test_configure_forwards_to_plugin() {
        let h = harness();
        let module = module(&h, ECHO);
        assert!(module.load().await);

        let command = module.config_command().unwrap();
        let matches = command.try_get_matches_from(["echo", "hello"]).unwrap();
        assert_eq!(module.configure(&matches).await.unwrap(), "greeting set to hello");
    }
}
