//! Process supervisor: owns one process slot per daemon kind and performs every
//! start/stop transition.
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{Pid, getpgid},
};
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io,
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        Arc, Mutex, MutexGuard, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::{Duration, Instant},
};
use strum::IntoEnumIterator;
use tracing::{debug, error, info, warn};

use crate::{
    config::ConfigStore,
    constants::{
        GRACEFUL_COMMAND_TIMEOUT, HELPER_POLL_INTERVAL, KILL_CONFIRM_TIMEOUT,
        LOGS_DIR_KEY, STOP_TIMEOUT,
    },
    descriptor::{DaemonKind, LaunchRecipe, START_ORDER, STOP_ORDER},
    detect::{self, ForeignInstance},
    error::{BatchError, SupervisorError},
    status::{DaemonSnapshot, DaemonStatus, StatusEvent, StatusObserver},
};

/// A live OS process owned by the supervisor.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    /// Distinguishes successive launches of the same kind.
    generation: u64,
    /// Receives the exit status once the watcher thread has reaped the process.
    exited: Receiver<Option<ExitStatus>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Mutable runtime state of one daemon, guarded by its own lock.
#[derive(Debug)]
pub struct DaemonProcessState {
    pub kind: DaemonKind,
    handle: Option<ProcessHandle>,
    pub status: DaemonStatus,
    pub last_exit_code: Option<i32>,
}

impl DaemonProcessState {
    fn new(kind: DaemonKind) -> Self {
        Self {
            kind,
            handle: None,
            status: DaemonStatus::Stopped,
            last_exit_code: None,
        }
    }

    fn snapshot(&self) -> DaemonSnapshot {
        DaemonSnapshot {
            kind: self.kind,
            status: self.status,
            pid: self.handle.as_ref().map(ProcessHandle::pid),
            last_exit_code: self.last_exit_code,
        }
    }
}

/// State shared between the supervisor and its exit-watcher threads.
struct Shared {
    /// Per-kind locks; holding one serializes `start`/`stop` for that kind.
    states: BTreeMap<DaemonKind, Mutex<DaemonProcessState>>,
    /// Last published snapshot per kind, readable without waiting on a per-kind lock.
    published: RwLock<BTreeMap<DaemonKind, DaemonSnapshot>>,
    observer: Arc<dyn StatusObserver>,
    generation: AtomicU64,
}

impl Shared {
    fn lock(
        &self,
        kind: DaemonKind,
    ) -> Result<MutexGuard<'_, DaemonProcessState>, SupervisorError> {
        Ok(self.states[&kind].lock()?)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Applies a status change, publishes the new snapshot and notifies the observer.
    fn transition(
        &self,
        state: &mut DaemonProcessState,
        status: DaemonStatus,
        exit_code: Option<i32>,
        error: Option<String>,
    ) {
        state.status = status;
        let snapshot = state.snapshot();
        match self.published.write() {
            Ok(mut published) => {
                published.insert(state.kind, snapshot);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(state.kind, snapshot);
            }
        }

        debug!("Daemon '{}' is now {status}", state.kind);
        self.observer.on_status_changed(&StatusEvent {
            kind: state.kind,
            status,
            exit_code,
            error,
        });
    }

    /// Records an exit the supervisor did not ask for. Exits handled by `stop` are
    /// ignored here because `stop` clears the handle before releasing the lock.
    fn record_unrequested_exit(
        &self,
        kind: DaemonKind,
        generation: u64,
        exit: Option<ExitStatus>,
    ) {
        let mut state = match self.lock(kind) {
            Ok(state) => state,
            Err(err) => {
                error!("Cannot record exit of daemon '{kind}': {err}");
                return;
            }
        };

        let owned = state
            .handle
            .as_ref()
            .is_some_and(|handle| handle.generation == generation);
        if !owned {
            return;
        }

        state.handle = None;
        let exit_code = exit.and_then(|status| status.code());
        state.last_exit_code = exit_code;

        match exit {
            Some(status) if status.success() => {
                info!("Daemon '{kind}' exited normally.");
                self.transition(&mut state, DaemonStatus::Stopped, exit_code, None);
            }
            Some(status) => {
                warn!("Daemon '{kind}' exited unexpectedly with {status}.");
                self.transition(
                    &mut state,
                    DaemonStatus::Failed,
                    exit_code,
                    Some(describe_exit(status)),
                );
            }
            None => {
                warn!("Lost track of daemon '{kind}'; exit status unavailable.");
                self.transition(
                    &mut state,
                    DaemonStatus::Failed,
                    None,
                    Some("exit status unavailable".into()),
                );
            }
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => format!("exited with {status}"),
    }
}

/// Starts, stops and tracks the five stack daemons.
///
/// All state lives in a single table owned by the supervisor. Callers receive status
/// values or snapshots, never process handles.
pub struct Supervisor {
    shared: Arc<Shared>,
    store: Arc<dyn ConfigStore>,
    stop_timeout: Duration,
    kill_confirm_timeout: Duration,
}

impl Supervisor {
    /// Creates a supervisor with every daemon `Stopped`.
    pub fn new(store: Arc<dyn ConfigStore>, observer: Arc<dyn StatusObserver>) -> Self {
        debug!("Initializing supervisor...");

        let mut states = BTreeMap::new();
        let mut published = BTreeMap::new();
        for kind in DaemonKind::iter() {
            let state = DaemonProcessState::new(kind);
            published.insert(kind, state.snapshot());
            states.insert(kind, Mutex::new(state));
        }

        Self {
            shared: Arc::new(Shared {
                states,
                published: RwLock::new(published),
                observer,
                generation: AtomicU64::new(1),
            }),
            store,
            stop_timeout: STOP_TIMEOUT,
            kill_confirm_timeout: KILL_CONFIRM_TIMEOUT,
        }
    }

    /// Overrides how long `stop` waits before escalating to `SIGKILL`. The budget covers
    /// the graceful-stop command too.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Overrides how long `stop` waits for the exit after `SIGKILL` before reporting
    /// `TerminationFailure`.
    pub fn with_kill_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.kill_confirm_timeout = timeout;
        self
    }

    /// The settings store recipes are resolved from.
    pub fn settings(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }

    /// Last known snapshot of one daemon. Never waits on an in-flight start/stop.
    pub fn snapshot_of(&self, kind: DaemonKind) -> DaemonSnapshot {
        let published = match self.shared.published.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        published
            .get(&kind)
            .copied()
            .unwrap_or(DaemonSnapshot {
                kind,
                status: DaemonStatus::Stopped,
                pid: None,
                last_exit_code: None,
            })
    }

    /// Last known status of one daemon.
    pub fn status_of(&self, kind: DaemonKind) -> DaemonStatus {
        self.snapshot_of(kind).status
    }

    /// PID of the daemon's process while it is running.
    pub fn pid_of(&self, kind: DaemonKind) -> Option<u32> {
        self.snapshot_of(kind).pid
    }

    /// Snapshots of every daemon, in start order.
    pub fn snapshot(&self) -> Vec<DaemonSnapshot> {
        START_ORDER
            .iter()
            .map(|kind| self.snapshot_of(*kind))
            .collect()
    }

    /// Processes matching a daemon executable that this supervisor did not launch.
    pub fn foreign_instances(&self) -> Vec<ForeignInstance> {
        let owned: Vec<u32> = self
            .snapshot()
            .iter()
            .filter_map(|snapshot| snapshot.pid)
            .collect();
        detect::scan(&owned)
    }

    /// Starts a daemon. A daemon that is already running is left untouched.
    ///
    /// A launch failure marks the daemon `Failed`, notifies the observer, and is returned
    /// for reporting; the supervisor stays fully usable.
    pub fn start(&self, kind: DaemonKind) -> Result<(), SupervisorError> {
        let mut state = self.shared.lock(kind)?;
        if state.status == DaemonStatus::Running && state.handle.is_some() {
            debug!("Daemon '{kind}' is already running; ignoring start");
            return Ok(());
        }

        info!("Starting daemon: {kind}");
        self.shared
            .transition(&mut state, DaemonStatus::Starting, None, None);

        let launched = kind
            .descriptor()
            .resolve(self.store.as_ref())
            .and_then(|recipe| self.launch(kind, &recipe))
            .and_then(|child| {
                let generation = self.shared.next_generation();
                let pid = child.id();
                let exited =
                    spawn_exit_watcher(kind, child, generation, Arc::downgrade(&self.shared))?;
                Ok(ProcessHandle {
                    pid,
                    generation,
                    exited,
                })
            });

        match launched {
            Ok(handle) => {
                info!("Daemon '{kind}' started with PID: {}", handle.pid);
                state.handle = Some(handle);
                state.last_exit_code = None;
                self.shared
                    .transition(&mut state, DaemonStatus::Running, None, None);
                Ok(())
            }
            Err(err) => {
                error!("Failed to start daemon '{kind}': {err}");
                state.handle = None;
                self.shared.transition(
                    &mut state,
                    DaemonStatus::Failed,
                    None,
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Stops a daemon: cooperative request first, `SIGKILL` after the stop timeout.
    ///
    /// Stopping a `Stopped` daemon does nothing. When the exit cannot be confirmed the
    /// daemon keeps its last known status and `TerminationFailure` is returned.
    pub fn stop(&self, kind: DaemonKind) -> Result<(), SupervisorError> {
        let mut state = self.shared.lock(kind)?;
        if state.status == DaemonStatus::Stopped {
            debug!("Daemon '{kind}' is already stopped; ignoring stop");
            return Ok(());
        }

        let Some(handle) = state.handle.as_ref() else {
            debug!("Daemon '{kind}' has no live process; marking stopped");
            self.shared
                .transition(&mut state, DaemonStatus::Stopped, None, None);
            return Ok(());
        };

        let pid = handle.pid;
        info!("Stopping daemon '{kind}' (PID {pid})");
        let deadline = Instant::now() + self.stop_timeout;
        self.request_graceful_stop(kind, pid, deadline);

        let mut outcome = handle
            .exited
            .recv_timeout(deadline.saturating_duration_since(Instant::now()));
        if matches!(outcome, Err(RecvTimeoutError::Timeout)) {
            warn!(
                "Daemon '{kind}' did not exit within {:?}; sending SIGKILL",
                self.stop_timeout
            );
            if let Err(err) = signal_process(kind, pid, Signal::SIGKILL) {
                error!("Failed to forcefully terminate daemon '{kind}': {err}");
            }
            outcome = handle.exited.recv_timeout(self.kill_confirm_timeout);
        }

        match outcome {
            Ok(exit) => {
                let exit_code = exit.and_then(|status| status.code());
                state.handle = None;
                state.last_exit_code = exit_code;
                self.shared
                    .transition(&mut state, DaemonStatus::Stopped, exit_code, None);
                debug!("Daemon '{kind}' stopped successfully.");
                Ok(())
            }
            Err(err) => {
                let reason = match err {
                    RecvTimeoutError::Timeout => {
                        format!("process {pid} still alive after SIGKILL")
                    }
                    RecvTimeoutError::Disconnected => {
                        format!("lost the exit watcher for process {pid}")
                    }
                };
                error!("Failed to stop daemon '{kind}': {reason}");
                Err(SupervisorError::TerminationFailure {
                    daemon: kind,
                    reason,
                })
            }
        }
    }

    /// Starts every daemon in start order, continuing past failures.
    pub fn start_all(&self) -> Result<(), BatchError> {
        info!("Starting all daemons...");
        self.batch("start", START_ORDER, |kind| self.start(kind))
    }

    /// Stops every daemon in stop order (database first), continuing past failures.
    pub fn stop_all(&self) -> Result<(), BatchError> {
        info!("Stopping all daemons...");
        self.batch("stop", STOP_ORDER, |kind| self.stop(kind))
    }

    fn batch(
        &self,
        operation: &'static str,
        order: [DaemonKind; 5],
        action: impl Fn(DaemonKind) -> Result<(), SupervisorError>,
    ) -> Result<(), BatchError> {
        let failures: Vec<_> = order
            .into_iter()
            .filter_map(|kind| action(kind).err().map(|err| (kind, err)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BatchError {
                operation,
                failures,
            })
        }
    }

    /// Spawns the daemon in its own process group with the install dir as working
    /// directory.
    fn launch(
        &self,
        kind: DaemonKind,
        recipe: &LaunchRecipe,
    ) -> Result<Child, SupervisorError> {
        debug!(
            "Launching daemon '{kind}': {} {:?}",
            recipe.program.display(),
            recipe.arguments
        );

        let mut cmd = Command::new(&recipe.program);
        cmd.args(&recipe.arguments)
            .current_dir(&recipe.working_dir)
            .stdin(Stdio::null());

        let (stdout, stderr) = self.output_streams(kind);
        cmd.stdout(stdout).stderr(stderr);

        unsafe {
            cmd.pre_exec(|| {
                // Own process group, so worker children are signalled together.
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
            .map_err(|source| SupervisorError::LaunchFailure {
                daemon: kind,
                source,
            })
    }

    /// Appends daemon output to `<paths/logs>/<name>.log` when a log directory is
    /// configured, otherwise discards it.
    fn output_streams(&self, kind: DaemonKind) -> (Stdio, Stdio) {
        let Some(dir) = self.store.path(LOGS_DIR_KEY) else {
            return (Stdio::null(), Stdio::null());
        };

        let log_path = dir.join(format!("{kind}.log"));
        let opened = fs::create_dir_all(&dir).and_then(|_| {
            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            let clone = file.try_clone()?;
            Ok((file, clone))
        });

        match opened {
            Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
            Err(err) => {
                warn!(
                    "Cannot open log file {} for daemon '{kind}': {err}",
                    log_path.display()
                );
                (Stdio::null(), Stdio::null())
            }
        }
    }

    /// Runs the descriptor's graceful-stop command, falling back to `SIGTERM` when there
    /// is none or it fails. The command never runs past `deadline`.
    fn request_graceful_stop(&self, kind: DaemonKind, pid: u32, deadline: Instant) {
        let budget = GRACEFUL_COMMAND_TIMEOUT.min(deadline.saturating_duration_since(Instant::now()));
        match kind.descriptor().resolve_graceful_stop(self.store.as_ref()) {
            Some(Ok(recipe)) => match run_helper(&recipe, budget) {
                Ok(status) if status.success() => {
                    debug!("Graceful stop command accepted by daemon '{kind}'");
                    return;
                }
                Ok(status) => warn!(
                    "Graceful stop command for '{kind}' exited with {status}; falling back to SIGTERM"
                ),
                Err(err) => warn!(
                    "Graceful stop command for '{kind}' failed: {err}; falling back to SIGTERM"
                ),
            },
            Some(Err(err)) => warn!(
                "Cannot resolve graceful stop command for '{kind}': {err}; falling back to SIGTERM"
            ),
            None => {}
        }

        if let Err(err) = signal_process(kind, pid, Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to daemon '{kind}': {err}");
        }
    }
}

/// Hands the child to a thread blocked in `wait()`, so exits are observed without
/// polling.
fn spawn_exit_watcher(
    kind: DaemonKind,
    child: Child,
    generation: u64,
    shared: Weak<Shared>,
) -> Result<Receiver<Option<ExitStatus>>, SupervisorError> {
    let (tx, rx): (Sender<Option<ExitStatus>>, _) = mpsc::channel();
    let (handoff, adopted) = mpsc::channel::<Child>();
    let pid = child.id();

    let spawned = thread::Builder::new()
        .name(format!("{kind}-watcher"))
        .spawn(move || {
            let Ok(mut child) = adopted.recv() else {
                return;
            };
            let exit = match child.wait() {
                Ok(status) => Some(status),
                Err(err) => {
                    error!("Failed while waiting on daemon '{kind}' (PID {pid}): {err}");
                    None
                }
            };

            // Deliver to a pending `stop` before contending for the state lock it holds.
            let _ = tx.send(exit);

            if let Some(shared) = shared.upgrade() {
                shared.record_unrequested_exit(kind, generation, exit);
            }
        });

    match spawned {
        Ok(_) => match handoff.send(child) {
            Ok(()) => Ok(rx),
            Err(mpsc::SendError(child)) => {
                let source = io::Error::other("exit watcher exited before adopting the process");
                error!("Failed to hand daemon '{kind}' (PID {pid}) to its watcher");
                let _ = abandon(kind, child);
                Err(SupervisorError::LaunchFailure {
                    daemon: kind,
                    source,
                })
            }
        },
        Err(source) => {
            error!("Failed to spawn exit watcher for daemon '{kind}': {source}");
            let _ = abandon(kind, child);
            Err(SupervisorError::LaunchFailure {
                daemon: kind,
                source,
            })
        }
    }
}

/// Kills and reaps a child that never got an exit watcher.
fn abandon(kind: DaemonKind, mut child: Child) -> io::Result<ExitStatus> {
    if let Err(err) = child.kill() {
        warn!("Failed to kill unwatched daemon '{kind}' (PID {}): {err}", child.id());
    }
    child.wait()
}

/// Sends `sig` to the daemon's process group (when it has its own) and to the process.
fn signal_process(kind: DaemonKind, pid: u32, sig: Signal) -> Result<(), SupervisorError> {
    let target = Pid::from_raw(pid as i32);
    let own_group = getpgid(None)?;

    match getpgid(Some(target)) {
        Ok(group) if group != own_group => match signal::killpg(group, sig) {
            Ok(()) => debug!("Sent {sig} to process group {group} of daemon '{kind}'"),
            Err(Errno::ESRCH) => {
                debug!("Process group of daemon '{kind}' is gone; signalling PID directly")
            }
            Err(Errno::EPERM) => warn!(
                "Insufficient permissions to signal process group {group} for '{kind}'. Falling back to direct signal"
            ),
            Err(err) => return Err(err.into()),
        },
        Ok(_) => {}
        Err(Errno::ESRCH) => {
            debug!("Daemon '{kind}' (PID {pid}) already exited");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    match signal::kill(target, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Runs a short-lived helper command to completion, killing it after `timeout`.
pub(crate) fn run_helper(recipe: &LaunchRecipe, timeout: Duration) -> io::Result<ExitStatus> {
    let mut child = Command::new(&recipe.program)
        .args(&recipe.arguments)
        .current_dir(&recipe.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    match wait_until(&mut child, Instant::now() + timeout)? {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "{} did not finish within {timeout:?}",
                    recipe.program.display()
                ),
            ))
        }
    }
}

/// Polls a short-lived child until it exits or `deadline` passes (`Ok(None)`).
pub(crate) fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        thread::sleep(HELPER_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
    child.try_wait()
}
