#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use stackctl::{
    config::{ConfigStore, Settings},
    descriptor::DaemonKind,
    status::{DaemonStatus, StatusEvent},
    supervisor::Supervisor,
};

/// Observer that keeps every event it receives.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl EventLog {
    pub fn supervisor(&self, settings: Settings) -> Supervisor {
        self.supervisor_over(Arc::new(settings))
    }

    pub fn supervisor_over(&self, store: Arc<dyn ConfigStore>) -> Supervisor {
        let events = Arc::clone(&self.events);
        Supervisor::new(
            store,
            Arc::new(move |event: &StatusEvent| {
                events.lock().unwrap().push(event.clone());
            }),
        )
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Kinds that reached `status`, in the order the events arrived.
    pub fn kinds_reaching(&self, status: DaemonStatus) -> Vec<DaemonKind> {
        self.events()
            .into_iter()
            .filter(|event| event.status == status)
            .map(|event| event.kind)
            .collect()
    }
}

pub fn wait_for_status(supervisor: &Supervisor, kind: DaemonKind, expected: DaemonStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if supervisor.status_of(kind) == expected {
            return;
        }

        if Instant::now() >= deadline {
            panic!(
                "Timed out waiting for '{kind}' to become {expected} (still {})",
                supervisor.status_of(kind)
            );
        }

        thread::sleep(Duration::from_millis(50));
    }
}

pub fn position(kinds: &[DaemonKind], kind: DaemonKind) -> usize {
    kinds
        .iter()
        .position(|candidate| *candidate == kind)
        .unwrap_or_else(|| panic!("'{kind}' missing from {kinds:?}"))
}
