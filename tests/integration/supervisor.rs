#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{EventLog, position, wait_for_status};
use stackctl::{
    config::SettingsFile,
    descriptor::{DaemonKind, STOP_ORDER},
    error::SupervisorError,
    status::DaemonStatus,
    test_utils::FakeStack,
};
use strum::IntoEnumIterator;
use tempfile::tempdir;

const IGNORES_TERM: &str = "trap '' TERM\necho $$ >> spawns.log\nwhile true; do sleep 1; done";

#[test]
fn repeated_start_and_stop_are_idempotent() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    supervisor.start(DaemonKind::WebServer).unwrap();
    stack.wait_for_spawns(DaemonKind::WebServer, 1);
    let pid = supervisor.pid_of(DaemonKind::WebServer);
    let events_after_start = log.len();

    supervisor.start(DaemonKind::WebServer).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(stack.spawn_count(DaemonKind::WebServer), 1);
    assert_eq!(supervisor.pid_of(DaemonKind::WebServer), pid);
    assert_eq!(log.len(), events_after_start);

    supervisor.stop(DaemonKind::WebServer).unwrap();
    let events_after_stop = log.len();
    supervisor.stop(DaemonKind::WebServer).unwrap();
    assert_eq!(log.len(), events_after_stop);
    assert_eq!(supervisor.status_of(DaemonKind::WebServer), DaemonStatus::Stopped);
}

#[test]
fn nginx_is_stopped_through_its_quit_command() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    supervisor.start(DaemonKind::WebServer).unwrap();
    stack.wait_for_spawns(DaemonKind::WebServer, 1);

    supervisor.stop(DaemonKind::WebServer).unwrap();
    assert_eq!(supervisor.status_of(DaemonKind::WebServer), DaemonStatus::Stopped);
    assert_eq!(supervisor.pid_of(DaemonKind::WebServer), None);
    // The quit form never records a launch of its own.
    assert_eq!(stack.spawn_count(DaemonKind::WebServer), 1);
}

#[test]
fn mariadb_is_shut_down_through_mysqladmin() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack
        .install_helper(
            DaemonKind::RelationalDb,
            "bin/mysqladmin",
            r#"echo "$@" > shutdown.args
kill "$(cat daemon.pid)""#,
        )
        .unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    supervisor.start(DaemonKind::RelationalDb).unwrap();
    stack.wait_for_spawns(DaemonKind::RelationalDb, 1);
    supervisor.stop(DaemonKind::RelationalDb).unwrap();

    let args = fs::read_to_string(
        stack
            .install_dir(DaemonKind::RelationalDb)
            .join("shutdown.args"),
    )
    .unwrap();
    assert_eq!(args.trim(), "--user=root shutdown");
    assert_eq!(
        supervisor.status_of(DaemonKind::RelationalDb),
        DaemonStatus::Stopped
    );
}

#[test]
fn slow_shutdown_command_counts_against_the_stop_timeout() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack.install(DaemonKind::RelationalDb, IGNORES_TERM).unwrap();
    stack
        .install_helper(DaemonKind::RelationalDb, "bin/mysqladmin", "exec sleep 10")
        .unwrap();
    let supervisor = EventLog::default()
        .supervisor(stack.settings())
        .with_stop_timeout(Duration::from_millis(500));

    supervisor.start(DaemonKind::RelationalDb).unwrap();
    stack.wait_for_spawns(DaemonKind::RelationalDb, 1);

    let started = Instant::now();
    supervisor.stop(DaemonKind::RelationalDb).unwrap();
    let elapsed = started.elapsed();

    // 500ms budget for mysqladmin plus the wait, then SIGKILL and its confirmation.
    assert!(elapsed < Duration::from_millis(1500), "stop took {elapsed:?}");
    assert_eq!(
        supervisor.status_of(DaemonKind::RelationalDb),
        DaemonStatus::Stopped
    );
}

#[test]
fn missing_executable_marks_daemon_failed() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack.remove(DaemonKind::DocumentDb).unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    let err = supervisor.start(DaemonKind::DocumentDb).unwrap_err();
    assert!(matches!(err, SupervisorError::LaunchFailure { .. }));
    assert!(err.is_launch_error());

    let snapshot = supervisor.snapshot_of(DaemonKind::DocumentDb);
    assert_eq!(snapshot.status, DaemonStatus::Failed);
    assert_eq!(snapshot.pid, None);

    let events = log.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, DaemonStatus::Failed);
    assert!(events[1].error.is_some());
}

#[test]
fn stop_all_follows_stop_order_and_covers_failed_daemons() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack.remove(DaemonKind::CacheServer).unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    let err = supervisor.start_all().unwrap_err();
    assert_eq!(err.kinds(), vec![DaemonKind::CacheServer]);
    for kind in [
        DaemonKind::WebServer,
        DaemonKind::ScriptRunner,
        DaemonKind::RelationalDb,
        DaemonKind::DocumentDb,
    ] {
        stack.wait_for_spawns(kind, 1);
    }

    log.clear();
    supervisor.stop_all().unwrap();

    assert_eq!(log.kinds_reaching(DaemonStatus::Stopped), STOP_ORDER.to_vec());
    for kind in DaemonKind::iter() {
        assert_eq!(supervisor.status_of(kind), DaemonStatus::Stopped);
        assert_eq!(supervisor.pid_of(kind), None);
    }

    let events_after_first = log.len();
    supervisor.stop_all().unwrap();
    assert_eq!(log.len(), events_after_first);
}

#[test]
fn database_stops_before_its_consumers() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    supervisor.start_all().unwrap();
    for kind in DaemonKind::iter() {
        stack.wait_for_spawns(kind, 1);
    }
    supervisor.stop_all().unwrap();

    let stopped = log.kinds_reaching(DaemonStatus::Stopped);
    let mariadb = position(&stopped, DaemonKind::RelationalDb);
    assert!(mariadb < position(&stopped, DaemonKind::ScriptRunner));
    assert!(mariadb < position(&stopped, DaemonKind::WebServer));
}

#[test]
fn crashed_daemon_is_reported_and_left_alone() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack
        .install(
            DaemonKind::ScriptRunner,
            "echo $$ >> spawns.log\nsleep 0.2\nexit 7",
        )
        .unwrap();
    let log = EventLog::default();
    let supervisor = log.supervisor(stack.settings());

    supervisor.start(DaemonKind::ScriptRunner).unwrap();
    wait_for_status(&supervisor, DaemonKind::ScriptRunner, DaemonStatus::Failed);

    let failed: Vec<_> = log
        .events()
        .into_iter()
        .filter(|event| event.status == DaemonStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].exit_code, Some(7));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(stack.spawn_count(DaemonKind::ScriptRunner), 1);
    assert_eq!(
        supervisor.status_of(DaemonKind::ScriptRunner),
        DaemonStatus::Failed
    );
}

#[test]
fn reloaded_settings_apply_to_the_next_start() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack
        .install(
            DaemonKind::CacheServer,
            r#"echo "$@" >> spawns.log
exec sleep 30"#,
        )
        .unwrap();

    let settings_path = temp.path().join("stackctl.yaml");
    let write_settings = |port: u16| {
        fs::write(
            &settings_path,
            format!("paths:\n  memcached: memcached\nmemcached:\n  port: {port}\n"),
        )
        .unwrap();
    };
    write_settings(11211);
    let store = Arc::new(SettingsFile::open(&settings_path).unwrap());
    let supervisor = EventLog::default().supervisor_over(store.clone());

    supervisor.start(DaemonKind::CacheServer).unwrap();
    stack.wait_for_spawns(DaemonKind::CacheServer, 1);
    supervisor.stop(DaemonKind::CacheServer).unwrap();

    write_settings(11311);
    store.reload().unwrap();
    supervisor.start(DaemonKind::CacheServer).unwrap();
    stack.wait_for_spawns(DaemonKind::CacheServer, 2);
    supervisor.stop(DaemonKind::CacheServer).unwrap();

    let launches = fs::read_to_string(
        stack.install_dir(DaemonKind::CacheServer).join("spawns.log"),
    )
    .unwrap();
    let launches: Vec<_> = launches.lines().collect();
    assert_eq!(launches, vec!["-p 11211", "-p 11311"]);
}
