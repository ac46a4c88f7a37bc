//! CLI smoke tests (spec.md §6 external interfaces), in the same
//! `assert_cmd::Command::cargo_bin` style the teacher's own CLI tests use.

use assert_cmd::Command;
use predicates::prelude::*;

fn webdavfs_mount() -> Command {
    Command::cargo_bin("webdavfs-mount").expect("webdavfs-mount binary not found")
}

#[test]
fn completions_bash_generates_a_script() {
    webdavfs_mount()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("webdavfs-mount"));
}

#[test]
fn probe_with_unparseable_url_fails_with_a_clean_error() {
    webdavfs_mount()
        .args(["probe", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn mount_without_a_url_argument_fails_with_usage() {
    webdavfs_mount()
        .args(["mount"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
