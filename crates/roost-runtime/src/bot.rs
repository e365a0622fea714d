//! A started bot: tracked rooms plus the event loop feeding them.

use std::future::Future;
use std::sync::Arc;

use roost_core::RoomEvent;
use roost_framework::{InitReport, RoomTracker};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::dispatcher::EventDispatcher;

/// Why [`Bot::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The transport closed its event channel.
    ChannelClosed,
    /// The shutdown future completed.
    Shutdown,
}

/// Rooms set up and ready for events.
///
/// Returned by [`RoostRuntime::start`](crate::RoostRuntime::start).
pub struct Bot {
    dispatcher: EventDispatcher,
    init_report: InitReport,
}

impl Bot {
    pub(crate) fn new(dispatcher: EventDispatcher, init_report: InitReport) -> Self {
        Self {
            dispatcher,
            init_report,
        }
    }

    /// The room registry.
    pub fn tracker(&self) -> &Arc<RoomTracker> {
        self.dispatcher.tracker()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Outcome of startup room setup.
    pub fn init_report(&self) -> &InitReport {
        &self.init_report
    }

    /// Dispatches events until the channel closes or `shutdown` completes.
    ///
    /// Events already dispatched are awaited before returning; each is
    /// bounded by the event budget.
    pub async fn serve<F>(&self, mut events: mpsc::Receiver<RoomEvent>, shutdown: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => break StopReason::Shutdown,
                event = events.recv() => match event {
                    Some(event) => {
                        let handle = self.dispatcher.dispatch(event);
                        in_flight.spawn(async move {
                            let _ = handle.await;
                        });
                    }
                    None => break StopReason::ChannelClosed,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        };

        if !in_flight.is_empty() {
            debug!(pending = in_flight.len(), "Waiting for in-flight events");
        }
        while in_flight.join_next().await.is_some() {}
        info!(?reason, "Event loop stopped");
        reason
    }

    /// Destroys every module in every room.
    pub async fn shutdown(self) {
        self.tracker().shutdown().await;
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("rooms", &self.tracker().len())
            .field("init_report", &self.init_report)
            .finish()
    }
}
