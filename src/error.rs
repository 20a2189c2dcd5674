//! Error handling for stackctl.
use thiserror::Error;

use crate::descriptor::DaemonKind;

/// Defines all possible errors raised while supervising daemons.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The daemon executable could not be spawned (missing, not executable, or rejected
    /// by the OS).
    #[error("Failed to start daemon '{daemon}': {source}")]
    LaunchFailure {
        /// The daemon that failed to start.
        daemon: DaemonKind,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A setting required to build the launch recipe is absent.
    #[error("Daemon '{daemon}' cannot start: setting '{key}' is not configured")]
    ConfigurationMissing {
        /// The daemon whose recipe could not be resolved.
        daemon: DaemonKind,
        /// The missing `section/key` lookup.
        key: String,
    },

    /// The daemon could not be confirmed as terminated.
    #[error("Failed to stop daemon '{daemon}': {reason}")]
    TerminationFailure {
        /// The daemon that did not terminate.
        daemon: DaemonKind,
        /// Human-readable reason.
        reason: String,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),

    /// Raw errno surfaced by a signal call.
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),
}

impl SupervisorError {
    /// Whether this error belongs to the launch path (and therefore leaves the daemon
    /// in the `Failed` state).
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::LaunchFailure { .. }
                | SupervisorError::ConfigurationMissing { .. }
        )
    }
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `SupervisorError`.
impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SupervisorError::MutexPoisonError(err.to_string())
    }
}

/// Aggregated outcome of a best-effort `start_all`/`stop_all` batch.
#[derive(Debug, Error)]
#[error("{} daemon(s) failed to {}: {}", .failures.len(), .operation, describe(.failures))]
pub struct BatchError {
    /// The batch operation (`start` or `stop`).
    pub operation: &'static str,
    /// Every daemon that reported a failure, in batch order.
    pub failures: Vec<(DaemonKind, SupervisorError)>,
}

impl BatchError {
    /// Daemons that failed, in batch order.
    pub fn kinds(&self) -> Vec<DaemonKind> {
        self.failures.iter().map(|(kind, _)| *kind).collect()
    }
}

fn describe(failures: &[(DaemonKind, SupervisorError)]) -> String {
    failures
        .iter()
        .map(|(kind, err)| format!("{kind}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for settings store operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error reading the settings file.
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing YAML settings.
    #[error("Invalid YAML format: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The document is not a map of sections to maps of scalar values.
    #[error("Invalid settings layout at '{0}': expected `section: {{ key: value }}`")]
    InvalidLayout(String),

    /// A `${VAR}` reference names a variable that is not set.
    #[error("Missing environment variable: {0}")]
    UnknownVariable(String),

    /// Error for poisoned lock.
    #[error("Settings lock is poisoned: {0}")]
    PoisonError(String),
}

impl<T> From<std::sync::PoisonError<T>> for SettingsError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SettingsError::PoisonError(err.to_string())
    }
}
