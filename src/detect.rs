//! Detection of daemon instances running outside the supervisor.
use std::process;
use strum::IntoEnumIterator;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::descriptor::DaemonKind;

/// A process that looks like one of the stack daemons but is not owned by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignInstance {
    pub kind: DaemonKind,
    pub pid: u32,
    pub name: String,
}

/// Scans the process table for daemon executables whose PID is not in `owned`.
pub fn scan(owned: &[u32]) -> Vec<ForeignInstance> {
    let expected: Vec<(DaemonKind, String)> = DaemonKind::iter()
        .map(|kind| (kind, kind.descriptor().process_name()))
        .collect();

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let own_pid = process::id();
    let mut found = Vec::new();

    for (pid, proc_) in system.processes() {
        let pid = pid.as_u32();
        if pid == own_pid || owned.contains(&pid) {
            continue;
        }

        let name = proc_.name().to_string_lossy().into_owned();
        let exe_name = proc_
            .exe()
            .and_then(|exe| exe.file_name())
            .map(|file| file.to_string_lossy().into_owned());

        let matched = expected.iter().find(|(_, process_name)| {
            *process_name == name || exe_name.as_deref() == Some(process_name.as_str())
        });

        if let Some((kind, _)) = matched {
            debug!("Found foreign '{kind}' instance: PID {pid} ({name})");
            found.push(ForeignInstance {
                kind: *kind,
                pid,
                name,
            });
        }
    }

    found.sort_by_key(|instance| (instance.kind, instance.pid));
    found
}
