//! Autostart and shutdown policy: drives the supervisor from settings flags when the
//! host application starts and quits.
use tracing::{info, warn};

use crate::{
    constants::{AUTOSTART_DAEMONS_KEY, STOP_DAEMONS_ON_QUIT_KEY},
    descriptor::{DaemonKind, START_ORDER},
    error::{BatchError, SupervisorError},
    supervisor::Supervisor,
};

/// What the autostart pass did.
#[derive(Debug, Default)]
pub struct AutostartReport {
    /// Daemons started (or already running).
    pub started: Vec<DaemonKind>,
    /// Daemons whose start failed.
    pub failed: Vec<(DaemonKind, SupervisorError)>,
}

impl AutostartReport {
    /// Every daemon the policy attempted, successful or not.
    pub fn attempted(&self) -> Vec<DaemonKind> {
        let mut attempted = self.started.clone();
        attempted.extend(self.failed.iter().map(|(kind, _)| *kind));
        attempted.sort_by_key(|kind| START_ORDER.iter().position(|k| k == kind));
        attempted
    }
}

/// Starts every daemon flagged with `autostart/<name>`.
///
/// `global/autostartdaemons` switches the whole pass off when explicitly false. A failed
/// start never prevents the remaining daemons from being attempted.
pub fn on_startup(supervisor: &Supervisor) -> AutostartReport {
    let settings = supervisor.settings();
    let mut report = AutostartReport::default();

    if settings.get_bool(AUTOSTART_DAEMONS_KEY) == Some(false) {
        info!("Daemon autostart disabled by '{AUTOSTART_DAEMONS_KEY}'");
        return report;
    }

    let flagged: Vec<DaemonKind> = START_ORDER
        .into_iter()
        .filter(|kind| settings.flag(&kind.autostart_key()))
        .collect();
    if flagged.is_empty() {
        return report;
    }

    info!("Autostarting daemons: {flagged:?}");
    for instance in supervisor.foreign_instances() {
        if flagged.contains(&instance.kind) {
            warn!(
                "'{}' already appears to be running outside stackctl (PID {})",
                instance.kind, instance.pid
            );
        }
    }

    for kind in flagged {
        match supervisor.start(kind) {
            Ok(()) => report.started.push(kind),
            Err(err) => {
                warn!("Autostart of '{kind}' failed: {err}");
                report.failed.push((kind, err));
            }
        }
    }

    report
}

/// Stops every daemon when `global/stopdaemonsonquit` is set.
///
/// Returns `Ok(false)` when the flag is off and nothing was stopped.
pub fn on_shutdown(supervisor: &Supervisor) -> Result<bool, BatchError> {
    if !supervisor.settings().flag(STOP_DAEMONS_ON_QUIT_KEY) {
        info!("Leaving daemons running on quit");
        return Ok(false);
    }

    info!("Stopping all daemons on quit...");
    supervisor.stop_all().map(|_| true)
}
