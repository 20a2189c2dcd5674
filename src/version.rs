//! Version probing for installed daemons.
use regex::Regex;
use std::{
    io::Read,
    process::{Command, Stdio},
    sync::OnceLock,
    thread::{self, JoinHandle},
    time::Instant,
};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::{
    config::ConfigStore, constants::VERSION_PROBE_TIMEOUT, descriptor::DaemonKind,
    supervisor::wait_until,
};

/// Extracts the first `major.minor.patch` number from a version banner.
pub fn parse_version_number(banner: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").expect("static pattern compiles"));
    re.find(banner).map(|found| found.as_str().to_string())
}

/// Runs the daemon executable with its version flag and parses the banner.
///
/// Returns `None` when the daemon is not installed, the probe times out, or the banner
/// carries no version number.
pub fn probe_version(kind: DaemonKind, store: &dyn ConfigStore) -> Option<String> {
    let descriptor = kind.descriptor();
    let install_dir = descriptor.install_dir(store).ok()?;
    let program = descriptor.executable_path(&install_dir);
    if !program.is_file() {
        debug!("No '{kind}' executable at {}", program.display());
        return None;
    }

    let mut child = match Command::new(&program)
        .arg(descriptor.version_flag)
        .current_dir(&install_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!("Failed to query version of '{kind}': {err}");
            return None;
        }
    };

    // Banners go to stdout or stderr depending on the daemon (nginx uses stderr). Both
    // pipes are drained while waiting so a long banner cannot stall the child.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    match wait_until(&mut child, Instant::now() + VERSION_PROBE_TIMEOUT) {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(
                "Version probe for '{kind}' timed out after {VERSION_PROBE_TIMEOUT:?}"
            );
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        Err(err) => {
            warn!("Failed while waiting on version probe for '{kind}': {err}");
            return None;
        }
    }

    let banner: String = [stdout, stderr]
        .into_iter()
        .flatten()
        .filter_map(|reader| reader.join().ok())
        .collect();

    parse_version_number(&banner)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    thread::Builder::new()
        .name("version-probe".into())
        .spawn(move || {
            let mut output = String::new();
            let _ = pipe.read_to_string(&mut output);
            output
        })
        .ok()
}

/// Probes every daemon, in declaration order.
pub fn probe_all(store: &dyn ConfigStore) -> Vec<(DaemonKind, Option<String>)> {
    DaemonKind::iter()
        .map(|kind| (kind, probe_version(kind, store)))
        .collect()
}
