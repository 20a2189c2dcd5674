use std::fs;

use assert_cmd::Command;
use predicates::{prelude::*, str::contains};
use stackctl::{descriptor::DaemonKind, test_utils::FakeStack};
use tempfile::tempdir;

fn stackctl() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("stackctl"))
}

#[test]
fn check_reports_paths_and_autostart_flags() {
    let temp = tempdir().unwrap();
    let _stack = FakeStack::new(temp.path()).unwrap();
    let settings = temp.path().join("stackctl.yaml");
    fs::write(
        &settings,
        r#"paths:
  nginx: nginx
  mongodb: mongodb
autostart:
  nginx: true
"#,
    )
    .unwrap();
    fs::remove_file(temp.path().join("mongodb/bin/mongod")).unwrap();

    stackctl()
        .arg("check")
        .arg("--settings")
        .arg(&settings)
        .assert()
        .success()
        .stdout(contains("nginx:").and(contains("(found); autostart=true")))
        .stdout(contains("mongod (missing); autostart=false"))
        .stdout(contains("setting 'paths/php' is not configured"));
}

#[test]
fn versions_lists_installed_and_missing_daemons() {
    let temp = tempdir().unwrap();
    let stack = FakeStack::new(temp.path()).unwrap();
    stack
        .install(
            DaemonKind::CacheServer,
            r#"[ "$1" = "-h" ] && echo "memcached 1.6.22""#,
        )
        .unwrap();
    let settings = temp.path().join("stackctl.yaml");
    fs::write(&settings, "paths:\n  memcached: memcached\n").unwrap();

    stackctl()
        .args(["versions", "-s"])
        .arg(&settings)
        .assert()
        .success()
        .stdout(contains("Memcached").and(contains("1.6.22")))
        .stdout(contains("Nginx").and(contains("not installed")));
}

#[test]
fn missing_settings_file_fails() {
    let temp = tempdir().unwrap();

    stackctl()
        .arg("check")
        .arg("--settings")
        .arg(temp.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("absent.yaml"));
}

#[test]
fn unset_environment_reference_fails() {
    let temp = tempdir().unwrap();
    let settings = temp.path().join("stackctl.yaml");
    fs::write(&settings, "paths:\n  nginx: ${STACKCTL_TEST_UNSET_ROOT}/nginx\n").unwrap();

    stackctl()
        .env_remove("STACKCTL_TEST_UNSET_ROOT")
        .arg("check")
        .arg("--settings")
        .arg(&settings)
        .assert()
        .failure()
        .stderr(contains("STACKCTL_TEST_UNSET_ROOT"));
}
