//! Bounded, failure-isolated concurrent delivery.
//!
//! Every recipient runs as its own task.  All tasks share one deadline; a
//! recipient that errors, panics or misses the deadline is logged and
//! reported, and never affects the others.

use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio::time::{Instant, timeout_at};
use tracing::{error, warn};

use crate::error::BoxError;

/// Outcome of one [`broadcast`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that finished successfully.
    pub delivered: Vec<String>,
    /// Recipients that returned an error or panicked, with the reason.
    pub failed: Vec<(String, String)>,
    /// Recipients abandoned at the deadline.
    pub timed_out: Vec<String>,
}

impl BroadcastReport {
    /// Returns `true` if every recipient succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }

    /// Total number of recipients.
    pub fn total(&self) -> usize {
        self.delivered.len() + self.failed.len() + self.timed_out.len()
    }
}

/// Runs every `(name, future)` concurrently under one shared `budget`.
///
/// `what` and `room_id` only label log lines.
pub async fn broadcast(
    what: &str,
    room_id: &str,
    budget: Duration,
    recipients: Vec<(String, BoxFuture<'static, Result<(), BoxError>>)>,
) -> BroadcastReport {
    let deadline = Instant::now() + budget;

    let waits = recipients.into_iter().map(|(name, fut)| {
        let mut handle = tokio::spawn(fut);
        async move {
            let outcome = timeout_at(deadline, &mut handle).await;
            if outcome.is_err() {
                handle.abort();
            }
            (name, outcome)
        }
    });

    let mut report = BroadcastReport::default();
    for (name, outcome) in join_all(waits).await {
        match outcome {
            Ok(Ok(Ok(()))) => report.delivered.push(name),
            Ok(Ok(Err(e))) => {
                error!(room_id, recipient = %name, what, error = %e, "Recipient failed");
                report.failed.push((name, e.to_string()));
            }
            Ok(Err(join_error)) => {
                error!(room_id, recipient = %name, what, error = %join_error, "Recipient panicked");
                report.failed.push((name, join_error.to_string()));
            }
            Err(_) => {
                warn!(room_id, recipient = %name, what, ?budget, "Recipient timed out");
                report.timed_out.push(name);
            }
        }
    }
    report
}
