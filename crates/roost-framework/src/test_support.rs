//! Shared fixtures for the framework's unit tests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roost_core::testing::MockTransport;
use roost_core::{MemoryStore, Scope, Store};

use crate::context::{FrameworkContext, FrameworkSettings};
use crate::error::BoxError;
use crate::plugin::{Plugin, PluginApi, PluginDescriptor, PluginRegistry};
use crate::tracker::RoomTracker;

pub(crate) const BOT: &str = "@bot:test";
pub(crate) const ADMIN: &str = "@admin:test";
pub(crate) const ALICE: &str = "@alice:test";
pub(crate) const BOB: &str = "@bob:test";

pub(crate) struct Harness {
    pub transport: Arc<MockTransport>,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<PluginRegistry>,
    pub tracker: Arc<RoomTracker>,
}

impl Harness {
    pub fn new(transport: MockTransport) -> Self {
        Self::with_store(Arc::new(transport), Arc::new(MemoryStore::new()))
    }

    /// A fresh tracker over existing state, as after a restart.
    pub fn with_store(transport: Arc<MockTransport>, store: Arc<MemoryStore>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        for descriptor in [ECHO, FAULTY, SLOW, BROKEN, PANICKY, HANGING, TICKER, CENSUS] {
            registry.register(descriptor);
        }
        let settings = FrameworkSettings {
            admins: Arc::new(BTreeSet::from([ADMIN.to_string()])),
            ..FrameworkSettings::default()
        };
        let ctx = FrameworkContext::new(
            transport.clone(),
            store.clone(),
            Arc::clone(&registry),
            settings,
        );
        let tracker = RoomTracker::new(ctx);
        Self {
            transport,
            store,
            registry,
            tracker,
        }
    }

    /// Reads a counter written by the fixture plugins.
    pub async fn count(&self, room_id: &str, plugin: &str, key: &str) -> u64 {
        self.store
            .get(&Scope::room_plugin(room_id, plugin), key)
            .await
            .unwrap()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

async fn bump(api: &PluginApi, key: &str) -> Result<u64, BoxError> {
    let kv = api.local_kv();
    let next = kv.get_json::<u64>(key).await?.unwrap_or(0) + 1;
    kv.set_json(key, &next).await?;
    Ok(next)
}

// ─── Fixture plugins──────────────────────────────────────────────────────────

/// Replies to `!echo <text>`; counts destroys.
pub(crate) static ECHO: PluginDescriptor =
    PluginDescriptor::interaction("echo", "Repeats what you say", Echo::create);

struct Echo {
    api: PluginApi,
}

impl Echo {
    fn create(api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self { api })
    }
}

#[async_trait]
impl Plugin for Echo {
    fn about(&self) -> String {
        "Echoes messages".into()
    }

    async fn setup(&self) -> Result<bool, BoxError> {
        let api = self.api.clone();
        self.api.add_command_handler("echo", move |_, args| {
            let api = api.clone();
            async move { Ok::<(), BoxError>(api.send_text(&args).await?) }
        });
        Ok(true)
    }

    async fn init(&self) -> Result<(), BoxError> {
        bump(&self.api, "init").await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), BoxError> {
        bump(&self.api, "destroyed").await?;
        Ok(())
    }

    fn config_command(&self) -> Option<clap::Command> {
        Some(clap::Command::new("echo").arg(clap::Arg::new("greeting").required(true)))
    }

    async fn configure(&self, matches: &clap::ArgMatches) -> Result<String, BoxError> {
        let greeting = matches
            .get_one::<String>("greeting")
            .cloned()
            .unwrap_or_default();
        self.api.local_kv().set("greeting", &greeting).await?;
        Ok(format!("greeting set to {greeting}"))
    }
}

/// Destroy hook fails after counting.
pub(crate) static FAULTY: PluginDescriptor =
    PluginDescriptor::interaction("faulty", "Fails to shut down", Faulty::create);

struct Faulty {
    api: PluginApi,
}

impl Faulty {
    fn create(api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self { api })
    }
}

#[async_trait]
impl Plugin for Faulty {
    async fn destroy(&self) -> Result<(), BoxError> {
        bump(&self.api, "destroyed").await?;
        Err("destroy exploded".into())
    }
}

/// Every text message takes a minute to handle.
pub(crate) static SLOW: PluginDescriptor =
    PluginDescriptor::interaction("slow", "Takes its time", Slow::create);

struct Slow {
    api: PluginApi,
}

impl Slow {
    fn create(api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self { api })
    }
}

#[async_trait]
impl Plugin for Slow {
    async fn setup(&self) -> Result<bool, BoxError> {
        self.api.add_text_handler(
            |_| true,
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), BoxError>(())
            },
        );
        Ok(true)
    }
}

/// Setup always fails.
pub(crate) static BROKEN: PluginDescriptor =
    PluginDescriptor::interaction("broken", "Never loads", Broken::create);

struct Broken;

impl Broken {
    fn create(_api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Plugin for Broken {
    async fn setup(&self) -> Result<bool, BoxError> {
        Err("missing configuration".into())
    }
}

/// Constructor panics.
pub(crate) static PANICKY: PluginDescriptor =
    PluginDescriptor::interaction("panicky", "Panics on construction", panicky_create);

fn panicky_create(_api: PluginApi) -> Arc<dyn Plugin> {
    panic!("constructor bug")
}

/// Setup never returns.
pub(crate) static HANGING: PluginDescriptor =
    PluginDescriptor::interaction("hanging", "Never finishes setup", Hanging::create);

struct Hanging;

impl Hanging {
    fn create(_api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Plugin for Hanging {
    async fn setup(&self) -> Result<bool, BoxError> {
        futures::future::pending::<()>().await;
        Ok(true)
    }
}

/// Counts ticks of a one-second task; cleanup marks `cleaned`.
pub(crate) static TICKER: PluginDescriptor =
    PluginDescriptor::interaction("ticker", "Ticks every second", Ticker::create);

struct Ticker {
    api: PluginApi,
}

impl Ticker {
    fn create(api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self { api })
    }
}

#[async_trait]
impl Plugin for Ticker {
    async fn setup(&self) -> Result<bool, BoxError> {
        let job_api = self.api.clone();
        let cleanup_api = self.api.clone();
        self.api.add_task_with_cleanup(
            "tick",
            Duration::from_secs(1),
            move || {
                let api = job_api.clone();
                async move {
                    bump(&api, "ticks").await?;
                    Ok::<(), BoxError>(())
                }
            },
            move || async move {
                let _ = bump(&cleanup_api, "cleaned").await;
            },
        );
        Ok(true)
    }
}

/// On init, records how many tracked rooms have this plugin loaded.
pub(crate) static CENSUS: PluginDescriptor =
    PluginDescriptor::interaction("census", "Counts its siblings", Census::create);

struct Census {
    api: PluginApi,
}

impl Census {
    fn create(api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self { api })
    }
}

#[async_trait]
impl Plugin for Census {
    async fn init(&self) -> Result<(), BoxError> {
        let tracker = self.api.tracker().ok_or("tracker gone")?;
        let seen = tracker
            .rooms()
            .iter()
            .filter(|room| room.has_module("census"))
            .count() as u64;
        self.api.local_kv().set_json("seen", &seen).await?;
        Ok(())
    }
}
