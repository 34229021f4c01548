#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{body}").unwrap();
    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[test]
fn test_cli_parsing() {
    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn test_requires_test_arguments() {
    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.assert().failure();
}

#[test]
fn passing_suite_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "pass.t", "echo '1..1'; echo 'ok 1 - works'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: PASS"));
}

#[test]
fn failing_suite_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.t", "echo '1..1'; echo 'not ok 1 - broken'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg(&script)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Result: FAIL"));
}

#[test]
fn bailout_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "bail.t",
        "echo '1..3'; echo 'ok 1'; echo 'Bail out! lost the database'",
    );

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg(&script)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Bailed out!"));
}

#[test]
fn parse_errors_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // Plan says two tests, only one runs.
    let script = write_script(dir.path(), "short.t", "echo '1..2'; echo 'ok 1'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg(&script)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Bad plan."));
}

#[test]
fn directory_argument_runs_every_script() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.t", "echo '1..1'; echo 'ok 1'");
    write_script(dir.path(), "b.t", "echo '1..1'; echo 'ok 1'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Files=2, Tests=2"));
}

#[test]
fn parallel_jobs_accepts_suite() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.t", "echo '1..1'; echo 'ok 1'");
    write_script(dir.path(), "b.t", "echo '1..1'; echo 'ok 1'");
    write_script(dir.path(), "c.t", "echo '1..1'; echo 'ok 1'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.args(["-j", "3"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: PASS"));
}

#[test]
fn fork_pool_accepts_suite() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.t", "echo '1..1'; echo 'ok 1'");
    write_script(dir.path(), "b.t", "echo '1..1'; echo 'not ok 1'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.args(["-j", "2", "--fork"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Result: FAIL"));
}

#[test]
fn skip_all_suite_passes() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "skip.t", "echo '1..0 # SKIP no tty'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped: no tty"));
}

#[test]
fn verbose_echoes_tap_lines() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "v.t", "echo '1..1'; echo 'ok 1 - echoed'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg("-v")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok 1 - echoed"));
}

#[test]
fn exec_prefix_overrides_interpreter_heuristics() {
    let dir = tempfile::tempdir().unwrap();
    // Not executable on purpose; --exec sh runs it anyway.
    let path = dir.path().join("via-exec.t");
    std::fs::write(&path, "echo '1..1'\necho 'ok 1'\n").unwrap();

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.args(["--exec", "sh"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: PASS"));
}

#[test]
fn dump_tap_writes_spool_copies() {
    let dir = tempfile::tempdir().unwrap();
    let spool = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "spooled.t", "echo '1..1'; echo 'ok 1'");

    let mut cmd = Command::cargo_bin("tappet").unwrap();
    cmd.arg("--dump-tap")
        .arg(spool.path())
        .arg(&script)
        .assert()
        .success();

    let copy = spool
        .path()
        .join(script.to_str().unwrap().trim_start_matches('/'));
    let copied = std::fs::read_to_string(copy).unwrap();
    assert_eq!(copied, "1..1\nok 1\n");
}
