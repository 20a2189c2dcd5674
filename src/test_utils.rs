//! Helpers shared by unit and integration tests.
use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, OnceLock},
    thread,
    time::{Duration, Instant},
};

use crate::{config::Settings, descriptor::DaemonKind};
use strum::IntoEnumIterator;

/// Global lock for tests that touch process-wide state.
///
/// Covers environment variable changes and spawning freshly written scripts: a script
/// still open for writing in one thread while another thread forks fails with
/// `ETXTBSY`.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes an executable `/bin/sh` script, creating parent directories.
pub fn write_script(path: &Path, body: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n"))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// Daemon stand-in: records its PID, then sleeps. Invoked with `-s quit` (the nginx
/// graceful-stop form) it terminates the recorded instance instead, failing when that
/// instance is gone.
pub const SLEEPER_SCRIPT: &str = r#"case "$*" in
  *"-s quit"*) kill "$(cat daemon.pid)" || exit 1; exit 0 ;;
esac
echo $$ > daemon.pid
echo $$ >> spawns.log
exec sleep 30"#;

/// A throwaway installation tree with one fake executable per daemon.
pub struct FakeStack {
    root: PathBuf,
    settings: Settings,
    _lock: MutexGuard<'static, ()>,
}

impl FakeStack {
    /// Lays out every daemon under `root/<name>` running [`SLEEPER_SCRIPT`].
    pub fn new(root: &Path) -> io::Result<Self> {
        let lock = env_lock();
        let mut settings = Settings::new().with_base_dir(root);

        for kind in DaemonKind::iter() {
            let descriptor = kind.descriptor();
            let install_dir = root.join(kind.as_ref());
            write_script(&descriptor.executable_path(&install_dir), SLEEPER_SCRIPT)?;
            settings.set(descriptor.install_dir_key, install_dir.to_string_lossy());
        }

        Ok(Self {
            root: root.to_path_buf(),
            settings,
            _lock: lock,
        })
    }

    pub fn install_dir(&self, kind: DaemonKind) -> PathBuf {
        self.root.join(kind.as_ref())
    }

    /// Replaces a daemon's executable with `body`.
    pub fn install(&self, kind: DaemonKind, body: &str) -> io::Result<()> {
        let path = kind.descriptor().executable_path(&self.install_dir(kind));
        write_script(&path, body)
    }

    /// Writes a helper executable (e.g. `bin/mysqladmin`) into a daemon's install dir.
    pub fn install_helper(
        &self,
        kind: DaemonKind,
        relative: &str,
        body: &str,
    ) -> io::Result<()> {
        write_script(&self.install_dir(kind).join(relative), body)
    }

    /// Deletes a daemon's executable.
    pub fn remove(&self, kind: DaemonKind) -> io::Result<()> {
        fs::remove_file(kind.descriptor().executable_path(&self.install_dir(kind)))
    }

    /// Settings pointing every `paths/<name>` at this tree.
    pub fn settings(&self) -> Settings {
        self.settings.clone()
    }

    /// How many times the daemon's executable has been launched.
    pub fn spawn_count(&self, kind: DaemonKind) -> usize {
        fs::read_to_string(self.install_dir(kind).join("spawns.log"))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Blocks until `spawn_count(kind) >= expected`, panicking after five seconds.
    pub fn wait_for_spawns(&self, kind: DaemonKind, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.spawn_count(kind) < expected {
            if Instant::now() >= deadline {
                panic!("Timed out waiting for {expected} launch(es) of '{kind}'");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}
