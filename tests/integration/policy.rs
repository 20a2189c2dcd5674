#[path = "common/mod.rs"]
mod common;

use common::{EventLog, position};
use stackctl::{
    constants::STOP_DAEMONS_ON_QUIT_KEY,
    descriptor::DaemonKind,
    policy::{on_shutdown, on_startup},
    status::DaemonStatus,
    test_utils::FakeStack,
};
use strum::IntoEnumIterator;
use tempfile::tempdir;

#[test]
fn autostart_launches_only_flagged_daemons() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    let settings = stack
        .settings()
        .with("autostart/nginx", "true")
        .with("autostart/php", "false");
    let log = EventLog::default();
    let supervisor = log.supervisor(settings);

    let report = on_startup(&supervisor);

    assert_eq!(report.started, vec![DaemonKind::WebServer]);
    assert!(report.failed.is_empty());
    assert_eq!(supervisor.status_of(DaemonKind::WebServer), DaemonStatus::Running);
    assert_eq!(supervisor.status_of(DaemonKind::ScriptRunner), DaemonStatus::Stopped);

    stack.wait_for_spawns(DaemonKind::WebServer, 1);
    for kind in DaemonKind::iter().filter(|kind| *kind != DaemonKind::WebServer) {
        assert_eq!(stack.spawn_count(kind), 0, "{kind} should not have been launched");
    }

    supervisor.stop_all().unwrap();
}

#[test]
fn quit_with_stop_flag_stops_everything_database_first() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    let mut settings = stack.settings().with(STOP_DAEMONS_ON_QUIT_KEY, "true");
    for kind in DaemonKind::iter() {
        settings.set(&kind.autostart_key(), "on");
    }
    let log = EventLog::default();
    let supervisor = log.supervisor(settings);

    let report = on_startup(&supervisor);
    assert_eq!(report.started.len(), 5);
    for kind in DaemonKind::iter() {
        stack.wait_for_spawns(kind, 1);
    }

    log.clear();
    assert!(on_shutdown(&supervisor).unwrap());

    for kind in DaemonKind::iter() {
        assert_eq!(supervisor.status_of(kind), DaemonStatus::Stopped);
    }
    let stopped = log.kinds_reaching(DaemonStatus::Stopped);
    let mariadb = position(&stopped, DaemonKind::RelationalDb);
    assert!(mariadb < position(&stopped, DaemonKind::WebServer));
    assert!(mariadb < position(&stopped, DaemonKind::ScriptRunner));
}

#[test]
fn autostart_is_on_unless_switched_off() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    let settings = stack.settings().with("autostart/memcached", "true");
    let supervisor = EventLog::default().supervisor(settings);

    let report = on_startup(&supervisor);
    assert_eq!(report.attempted(), vec![DaemonKind::CacheServer]);

    stack.wait_for_spawns(DaemonKind::CacheServer, 1);
    supervisor.stop_all().unwrap();
}
