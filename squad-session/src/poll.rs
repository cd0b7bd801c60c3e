//! One tick of the status polling loop.
//!
//! Each active instance is probed on its own blocking thread under a time
//! budget, so a hung tmux or git call only delays that instance. An instance
//! still locked by a previous, slower tick is skipped.

use std::sync::TryLockError;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use squad_core::{SquadError, Status};

use crate::instance::Instance;
use crate::registry::{PollTarget, SharedInstance};

/// Update one instance from a single probe.
///
/// Changed output marks it `Running`. Unchanged output with a confirmation
/// prompt on screen is auto-confirmed (auto-yes only) and keeps its status.
/// Otherwise it is `Ready`. Diff stats are refreshed every time; a diff
/// failure is logged and does not fail the poll.
pub fn poll_instance(instance: &mut Instance) -> Result<(), SquadError> {
    if !instance.is_active() {
        return Ok(());
    }
    let probe = instance.has_updated();
    match probe {
        Ok((true, _)) => instance.set_status(Status::Running),
        Ok((false, true)) => {
            if let Err(err) = instance.tap_enter() {
                warn!(title = %instance.title(), error = %err, "auto-confirm failed");
            }
        }
        Ok((false, false)) => instance.set_status(Status::Ready),
        Err(_) => {}
    }
    if let Err(err) = instance.update_diff_stats() {
        warn!(title = %instance.title(), error = %err, "failed to update diff stats");
    }
    probe.map(|_| ())
}

/// What happened to each instance during one [`poll_all`] tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub polled: Vec<String>,
    /// Paused, dormant, or otherwise not active.
    pub idle: Vec<String>,
    /// Still locked by an earlier tick or a lifecycle operation.
    pub busy: Vec<String>,
    pub timed_out: Vec<String>,
    pub failed: Vec<String>,
}

enum Outcome {
    Polled,
    Idle,
    Busy,
    TimedOut,
    Failed,
}

fn poll_shared(instance: &SharedInstance) -> Outcome {
    let mut guard = match instance.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return Outcome::Busy,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    if !guard.is_active() {
        return Outcome::Idle;
    }
    match poll_instance(&mut guard) {
        Ok(()) => Outcome::Polled,
        Err(err) => {
            warn!(title = %guard.title(), error = %err, "probe failed");
            Outcome::Failed
        }
    }
}

/// Poll every target concurrently, giving each at most `budget`.
pub async fn poll_all(targets: Vec<PollTarget>, budget: Duration) -> PollReport {
    let mut set = JoinSet::new();
    for target in targets {
        set.spawn(async move {
            let PollTarget { title, instance } = target;
            let work = tokio::task::spawn_blocking(move || poll_shared(&instance));
            let outcome = match tokio::time::timeout(budget, work).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    warn!(title = %title, error = %err, "poll worker panicked");
                    Outcome::Failed
                }
                Err(_) => {
                    warn!(title = %title, budget_ms = budget.as_millis() as u64, "probe exceeded its budget");
                    Outcome::TimedOut
                }
            };
            (title, outcome)
        });
    }

    let mut report = PollReport::default();
    while let Some(joined) = set.join_next().await {
        let (title, outcome) = match joined {
            Ok(done) => done,
            Err(err) => {
                warn!(error = %err, "poll task failed");
                continue;
            }
        };
        match outcome {
            Outcome::Polled => report.polled.push(title),
            Outcome::Idle => report.idle.push(title),
            Outcome::Busy => report.busy.push(title),
            Outcome::TimedOut => report.timed_out.push(title),
            Outcome::Failed => report.failed.push(title),
        }
    }
    for list in [
        &mut report.polled,
        &mut report.idle,
        &mut report.busy,
        &mut report.timed_out,
        &mut report.failed,
    ] {
        list.sort();
    }
    debug!(
        polled = report.polled.len(),
        busy = report.busy.len(),
        timed_out = report.timed_out.len(),
        "poll tick complete"
    );
    report
}
