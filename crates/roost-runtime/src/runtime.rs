//! Process-level orchestration.
//!
//! ```rust,ignore
//! use roost_runtime::RoostRuntime;
//!
//! let runtime = RoostRuntime::builder()
//!     .config_file("roost.toml")
//!     .build()?;
//! runtime.register_plugin(MY_PLUGIN);
//!
//! let store = runtime.open_store().await?;
//! runtime.run(transport, store, events).await?;
//! ```
//!
//! Startup lists the occupied rooms (a transport failure here is fatal),
//! sets every room up and loads its plugins, then initializes every loaded
//! plugin.  The event loop ends when the transport closes its channel or on
//! Ctrl+C / SIGTERM; every module is destroyed before [`RoostRuntime::run`]
//! returns.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use roost_core::{BoxedStore, BoxedTransport, MemoryStore, RoomEvent};
use roost_framework::{FrameworkContext, PluginDescriptor, PluginRegistry, RoomTracker};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::config::{ConfigLoader, ConfigResult, RoostConfig, StorageBackend, validate_config};
use crate::dispatcher::{EventDispatcher, InvitePolicy};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Configuration plus the plugin registry; starts bots.
pub struct RoostRuntime {
    config: RoostConfig,
    registry: Arc<PluginRegistry>,
}

impl RoostRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded configuration and installs logging.
    pub fn from_config(config: RoostConfig) -> Self {
        if let Err(e) = logging::init_from_config(&config.logging) {
            debug!(error = %e, "Logging already initialized");
        }
        info!(
            log_level = %config.logging.level,
            storage = ?config.storage.backend,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            registry: Arc::new(PluginRegistry::new()),
        }
    }

    pub fn config(&self) -> &RoostConfig {
        &self.config
    }

    /// Plugins rooms can load; holds the built-in `config` plugin from the start.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Makes a plugin available to every room.
    pub fn register_plugin(&self, descriptor: PluginDescriptor) {
        self.registry.register(descriptor);
    }

    /// Opens the configured persistence backend.
    pub async fn open_store(&self) -> RuntimeResult<BoxedStore> {
        match self.config.storage.backend {
            StorageBackend::Memory => {
                warn!("Using in-memory storage, nothing survives a restart");
                Ok(Arc::new(MemoryStore::new()))
            }
            StorageBackend::Sqlite => self.open_sqlite().await,
        }
    }

    #[cfg(feature = "sqlite")]
    async fn open_sqlite(&self) -> RuntimeResult<BoxedStore> {
        let path = self
            .config
            .storage
            .path
            .as_deref()
            .ok_or_else(|| crate::config::ConfigError::missing_field("storage.path"))?;
        info!(%path, "Opening SQLite store");
        Ok(Arc::new(roost_core::SqliteStore::connect(path).await?))
    }

    #[cfg(not(feature = "sqlite"))]
    async fn open_sqlite(&self) -> RuntimeResult<BoxedStore> {
        Err(RuntimeError::BackendDisabled("sqlite"))
    }

    /// Sets up every occupied room and returns the ready bot.
    pub async fn start(&self, transport: BoxedTransport, store: BoxedStore) -> RuntimeResult<Bot> {
        let occupied = transport.joined_rooms().await.map_err(RuntimeError::Transport)?;
        info!(bot_id = %transport.bot_id(), rooms = occupied.len(), "Starting bot");

        let settings = self.config.framework_settings();
        let policy = InvitePolicy::new(
            Arc::clone(&settings.admins),
            self.config.bot.allowed_invite_rooms.clone(),
        );
        let ctx = FrameworkContext::new(transport, store, Arc::clone(&self.registry), settings);
        let tracker = RoomTracker::new(ctx);

        let report = tracker.init(occupied).await;
        for (room_id, reason) in &report.skipped {
            warn!(%room_id, %reason, "Room left untracked");
        }

        let dispatcher = EventDispatcher::new(tracker, policy, self.config.timeouts.event());
        Ok(Bot::new(dispatcher, report))
    }

    /// Runs until the event channel closes or a shutdown signal arrives.
    pub async fn run(
        &self,
        transport: BoxedTransport,
        store: BoxedStore,
        events: mpsc::Receiver<RoomEvent>,
    ) -> RuntimeResult<()> {
        self.run_until(transport, store, events, wait_for_shutdown())
            .await
    }

    /// Like [`run`](Self::run) with a custom shutdown future.
    pub async fn run_until<F>(
        &self,
        transport: BoxedTransport,
        store: BoxedStore,
        events: mpsc::Receiver<RoomEvent>,
        shutdown: F,
    ) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let bot = self.start(transport, store).await?;
        info!(rooms = bot.tracker().len(), "Roost is now running");

        bot.serve(events, shutdown).await;
        bot.shutdown().await;
        info!("Runtime stopped");
        Ok(())
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C, running until the event channel closes");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`RoostRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Reads `ROOST_*` environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers `config` below files and environment variables.
    pub fn merge(mut self, config: RoostConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads, validates and builds.
    pub fn build(self) -> ConfigResult<RoostRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(RoostRuntime::from_config(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::testing::MockTransport;
    use roost_core::{EventKind, RoomMode, Scope, Store, TextKind};
    use std::time::Duration;

    const BOT: &str = "@bot:test";
    const ALICE: &str = "@alice:test";
    const BOB: &str = "@bob:test";

    fn runtime() -> RoostRuntime {
        RoostRuntime::builder()
            .search_path("/nonexistent/roost")
            .without_env()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_joined_rooms_failure_is_fatal() {
        let transport = MockTransport::new(BOT);
        transport.fail_joined_rooms(true);

        let result = runtime()
            .start(Arc::new(transport), Arc::new(MemoryStore::new()))
            .await;
        assert!(matches!(result, Err(RuntimeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_start_restores_rooms() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&Scope::room("!room:test"), RoomMode::STORAGE_KEY, "interaction")
            .await
            .unwrap();
        let transport = MockTransport::new(BOT)
            .with_room("!room:test", [ALICE, BOB])
            .with_room("!fresh:test", [ALICE, BOB]);

        let bot = runtime().start(Arc::new(transport), store).await.unwrap();

        assert_eq!(bot.init_report().tracked, vec!["!room:test"]);
        assert_eq!(bot.init_report().skipped.len(), 1);
        assert!(bot.tracker().is_initialized());
        bot.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_until_channel_closes() {
        let transport = Arc::new(MockTransport::new(BOT).with_room("!dm:test", [ALICE]));
        let (tx, rx) = mpsc::channel(8);
        tx.send(RoomEvent::new(
            "!dm:test",
            ALICE,
            EventKind::Text {
                body: "!config rooms".to_string(),
                msgtype: TextKind::Text,
            },
        ))
        .await
        .unwrap();
        drop(tx);

        let runtime = runtime();
        let store = runtime.open_store().await.unwrap();
        runtime
            .run_until(transport.clone(), store, rx, std::future::pending())
            .await
            .unwrap();

        let replies = transport.sent_to("!dm:test");
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("Rooms configured from here"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_stops_on_shutdown() {
        let transport = Arc::new(MockTransport::new(BOT));
        let bot = runtime()
            .start(transport, Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let (_tx, rx) = mpsc::channel(8);

        let reason = bot
            .serve(rx, tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert_eq!(reason, crate::bot::StopReason::Shutdown);
    }
}
