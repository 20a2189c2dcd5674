//! Daemon status values and the notification channel towards the presentation layer.
use std::sync::{Mutex, mpsc::Sender};
use strum_macros::{AsRefStr, Display};

use crate::descriptor::DaemonKind;

/// Lifecycle status of a single daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DaemonStatus {
    Stopped,
    Starting,
    Running,
    Failed,
}

/// A single state transition, delivered to [`StatusObserver`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub kind: DaemonKind,
    pub status: DaemonStatus,
    /// Exit code of the process, when its termination was observed.
    pub exit_code: Option<i32>,
    /// Failure description for `Failed` transitions.
    pub error: Option<String>,
}

/// Read-only copy of one daemon's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonSnapshot {
    pub kind: DaemonKind,
    pub status: DaemonStatus,
    pub pid: Option<u32>,
    pub last_exit_code: Option<i32>,
}

/// Receives every status transition performed by the supervisor.
///
/// Observers are called from the thread that performed the transition, which may be a
/// background exit-watcher thread. They must not call `start`/`stop` on the same daemon
/// synchronously.
pub trait StatusObserver: Send + Sync {
    fn on_status_changed(&self, event: &StatusEvent);
}

impl<F> StatusObserver for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_status_changed(&self, event: &StatusEvent) {
        self(event)
    }
}

/// Observer that discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StatusObserver for NoopObserver {
    fn on_status_changed(&self, _event: &StatusEvent) {}
}

/// Forwards notifications into an `mpsc` channel; a closed receiver is ignored.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: Mutex<Sender<StatusEvent>>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<StatusEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl StatusObserver for ChannelObserver {
    fn on_status_changed(&self, event: &StatusEvent) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sender.send(event.clone());
    }
}

/// One-line summary such as `nginx up, php down, mariadb failed`, suitable for a tray
/// tooltip.
pub fn format_summary(snapshots: &[DaemonSnapshot]) -> String {
    snapshots
        .iter()
        .map(|snapshot| {
            let label = match snapshot.status {
                DaemonStatus::Running => "up",
                DaemonStatus::Starting => "starting",
                DaemonStatus::Stopped => "down",
                DaemonStatus::Failed => "failed",
            };
            format!("{} {label}", snapshot.kind)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
