//! Per-(room, plugin) facade handed to plugin instances.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use roost_core::{
    BoxedStore, RoomAcl, Scope, StoreError, StoreResult, TextMessage, TransportResult,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::PluginRegistry;
use crate::context::{FrameworkContext, FrameworkSettings};
use crate::error::BoxError;
use crate::room::Room;
use crate::tracker::RoomTracker;

type Predicate = Box<dyn Fn(&TextMessage) -> bool + Send + Sync>;
type Action = Box<dyn Fn(TextMessage) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A predicate + action pair registered through [`PluginApi::add_text_handler`].
pub(crate) struct TextHandler {
    predicate: Predicate,
    action: Action,
}

impl TextHandler {
    pub(crate) fn matches(&self, message: &TextMessage) -> bool {
        (self.predicate)(message)
    }

    pub(crate) fn call(&self, message: TextMessage) -> BoxFuture<'static, Result<(), BoxError>> {
        (self.action)(message)
    }
}

struct TaskEntry {
    name: String,
    handle: JoinHandle<()>,
    cleanup: Option<Cleanup>,
}

struct ApiInner {
    room_id: String,
    plugin: &'static str,
    ctx: Arc<FrameworkContext>,
    tracker: Weak<RoomTracker>,
    acl: RoomAcl,
    handlers: RwLock<Vec<Arc<TextHandler>>>,
    tasks: Mutex<Vec<TaskEntry>>,
    cancel: CancellationToken,
}

/// Everything a plugin instance may touch, bound to its room.
///
/// Cheap to clone; clones share handlers and tasks.
#[derive(Clone)]
pub struct PluginApi {
    inner: Arc<ApiInner>,
}

impl PluginApi {
    pub(crate) fn new(
        room_id: &str,
        plugin: &'static str,
        ctx: Arc<FrameworkContext>,
        tracker: Weak<RoomTracker>,
    ) -> Self {
        let acl = ctx.acl(room_id);
        Self {
            inner: Arc::new(ApiInner {
                room_id: room_id.to_string(),
                plugin,
                ctx,
                tracker,
                acl,
                handlers: RwLock::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ─── Identity ────────────────────────────────────────────────────────────

    /// Room this instance lives in.
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    /// Name of the plugin.
    pub fn plugin_name(&self) -> &'static str {
        self.inner.plugin
    }

    /// The bot's own user id.
    pub fn bot_id(&self) -> &str {
        self.inner.ctx.bot_id()
    }

    /// Bot-level settings.
    pub fn settings(&self) -> &FrameworkSettings {
        &self.inner.ctx.settings
    }

    /// Every plugin known to the process.
    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.ctx.registry
    }

    /// The room tracker, while it is alive.
    pub fn tracker(&self) -> Option<Arc<RoomTracker>> {
        self.inner.tracker.upgrade()
    }

    /// The tracked room this instance lives in.
    pub fn room(&self) -> Option<Arc<Room>> {
        self.tracker()?.get(self.room_id())
    }

    /// ACL of this room.
    pub fn acl(&self) -> &RoomAcl {
        &self.inner.acl
    }

    // ─── Transport ───────────────────────────────────────────────────────────

    /// Sends a plain-text message to this room.
    pub async fn send_text(&self, body: &str) -> TransportResult<()> {
        self.inner.ctx.transport.send_text(self.room_id(), body).await
    }

    /// Sends a formatted message to this room.
    pub async fn send_html(&self, body: &str, html: &str) -> TransportResult<()> {
        self.inner
            .ctx
            .transport
            .send_html(self.room_id(), body, html)
            .await
    }

    /// Invites a user into this room.
    pub async fn invite(&self, user_id: &str) -> TransportResult<()> {
        self.inner.ctx.transport.invite(self.room_id(), user_id).await
    }

    /// Power level of a user in this room.
    pub async fn power_level(&self, user_id: &str) -> TransportResult<i64> {
        self.inner
            .ctx
            .transport
            .get_power_level(self.room_id(), user_id)
            .await
    }

    /// Power level of a user in another room.
    pub async fn power_level_in(&self, room_id: &str, user_id: &str) -> TransportResult<i64> {
        self.inner
            .ctx
            .transport
            .get_power_level(room_id, user_id)
            .await
    }

    // ─── Storage ─────────────────────────────────────────────────────────────

    /// Values shared by everything in this room.
    pub fn room_kv(&self) -> ScopedKv {
        self.kv(Scope::room(self.room_id()))
    }

    /// Values shared by every instance of this plugin.
    pub fn plugin_kv(&self) -> ScopedKv {
        self.kv(Scope::plugin(self.plugin_name()))
    }

    /// Values private to this instance.
    pub fn local_kv(&self) -> ScopedKv {
        self.kv(Scope::room_plugin(self.room_id(), self.plugin_name()))
    }

    /// Process-wide values.
    pub fn global_kv(&self) -> ScopedKv {
        self.kv(Scope::Global)
    }

    fn kv(&self, scope: Scope) -> ScopedKv {
        ScopedKv {
            store: Arc::clone(&self.inner.ctx.store),
            scope,
        }
    }

    // ─── Handlers ────────────────────────────────────────────────────────────

    /// Registers a text handler.
    ///
    /// For every message delivered to the module, each handler whose
    /// predicate matches runs, in registration order.
    pub fn add_text_handler<P, F, Fut>(&self, predicate: P, action: F)
    where
        P: Fn(&TextMessage) -> bool + Send + Sync + 'static,
        F: Fn(TextMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler = TextHandler {
            predicate: Box::new(predicate),
            action: Box::new(move |message| action(message).boxed()),
        };
        self.inner.handlers.write().push(Arc::new(handler));
    }

    /// Registers a handler for `<prefix><command> [args]`.
    ///
    /// The action receives the message and the trimmed argument string.
    pub fn add_command_handler<F, Fut>(&self, command: &str, action: F)
    where
        F: Fn(TextMessage, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let command = format!("{}{}", self.settings().command_prefix, command);
        let matcher = command.clone();
        self.add_text_handler(
            move |message| message.command_args(&matcher).is_some(),
            move |message| {
                let args = message
                    .command_args(&command)
                    .unwrap_or_default()
                    .to_string();
                action(message, args)
            },
        );
    }

    pub(crate) fn handlers(&self) -> Vec<Arc<TextHandler>> {
        self.inner.handlers.read().clone()
    }

    // ─── Tasks ───────────────────────────────────────────────────────────────

    /// Starts a repeating background task owned by this instance.
    ///
    /// `job` runs every `interval` until the instance is destroyed.  Returns
    /// `false` if the instance is already shutting down.
    pub fn add_task<J, Fut>(&self, name: &str, interval: Duration, job: J) -> bool
    where
        J: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.spawn_task(name, interval, job, None)
    }

    /// Like [`add_task`](Self::add_task), with a callback that runs once the
    /// task has stopped.
    pub fn add_task_with_cleanup<J, Fut, C, CFut>(
        &self,
        name: &str,
        interval: Duration,
        job: J,
        cleanup: C,
    ) -> bool
    where
        J: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        C: FnOnce() -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let cleanup: Cleanup = Box::new(move || cleanup().boxed());
        self.spawn_task(name, interval, job, Some(cleanup))
    }

    /// Names of the tasks currently owned by this instance.
    pub fn task_names(&self) -> Vec<String> {
        self.inner
            .tasks
            .lock()
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    fn spawn_task<J, Fut>(
        &self,
        name: &str,
        interval: Duration,
        job: J,
        cleanup: Option<Cleanup>,
    ) -> bool
    where
        J: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let mut tasks = self.inner.tasks.lock();
        if self.inner.cancel.is_cancelled() {
            warn!(
                room_id = %self.room_id(),
                plugin = self.plugin_name(),
                task = name,
                "Task not started: plugin is shutting down"
            );
            return false;
        }

        let token = self.inner.cancel.child_token();
        let room_id = self.room_id().to_string();
        let plugin = self.plugin_name();
        let task = name.to_string();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = job() => {
                        if let Err(e) = result {
                            warn!(%room_id, plugin, %task, error = %e, "Plugin task iteration failed");
                        }
                    }
                }
            }
        });

        tasks.push(TaskEntry {
            name: name.to_string(),
            handle,
            cleanup,
        });
        debug!(room_id = %self.room_id(), plugin, task = name, "Plugin task started");
        true
    }

    /// Signals every task to stop without waiting for it.
    pub(crate) fn cancel_tasks(&self) {
        self.inner.cancel.cancel();
    }

    /// Stops every task and drops every handler.
    ///
    /// Each task gets `join_timeout` to finish after cancellation before it is
    /// aborted.  Cleanup callbacks run after their task has stopped.
    pub(crate) async fn shutdown(&self, join_timeout: Duration) {
        self.inner.cancel.cancel();
        self.inner.handlers.write().clear();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());

        for mut entry in tasks {
            match tokio::time::timeout(join_timeout, &mut entry.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        room_id = %self.room_id(),
                        plugin = self.plugin_name(),
                        task = %entry.name,
                        error = %e,
                        "Plugin task ended abnormally"
                    );
                }
                Err(_) => {
                    warn!(
                        room_id = %self.room_id(),
                        plugin = self.plugin_name(),
                        task = %entry.name,
                        "Plugin task did not stop in time, aborting"
                    );
                    entry.handle.abort();
                    let _ = entry.handle.await;
                }
            }

            if let Some(cleanup) = entry.cleanup
                && AssertUnwindSafe(cleanup()).catch_unwind().await.is_err()
            {
                error!(
                    room_id = %self.room_id(),
                    plugin = self.plugin_name(),
                    task = %entry.name,
                    "Plugin task cleanup panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginApi")
            .field("room_id", &self.inner.room_id)
            .field("plugin", &self.inner.plugin)
            .finish_non_exhaustive()
    }
}

// ─── ScopedKv ─────────────────────────────────────────────────────────────────

/// Key-value access restricted to one [`Scope`].
#[derive(Clone)]
pub struct ScopedKv {
    store: BoxedStore,
    scope: Scope,
}

impl ScopedKv {
    /// The scope this handle writes to.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Reads a raw value.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.store.get(&self.scope, key).await
    }

    /// Writes a raw value.
    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.store.set(&self.scope, key, value).await
    }

    /// Deletes a value.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.store.delete(&self.scope, key).await
    }

    /// Lists keys, sorted.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        self.store.keys(&self.scope).await
    }

    /// Reads and decodes a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: format!("{}/{key}", self.scope),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Encodes and writes a JSON value.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            key: format!("{}/{key}", self.scope),
            reason: e.to_string(),
        })?;
        self.set(key, &raw).await
    }
}
