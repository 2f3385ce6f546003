use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn quotes(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("quotes").unwrap();
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

fn init(data_dir: &Path, cloud_dir: &Path, name: &str) {
    quotes(data_dir)
        .args(["init", "--name", name, "--cloud-dir"])
        .arg(cloud_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized successfully"));
}

#[test]
fn quote_syncs_between_two_devices() {
    let dir = tempdir().unwrap();
    let cloud = dir.path().join("cloud");
    let laptop = dir.path().join("laptop");
    let phone = dir.path().join("phone");
    init(&laptop, &cloud, "laptop");
    init(&phone, &cloud, "phone");

    quotes(&laptop)
        .args(["add", "Simple is better than complex."])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added"));
    quotes(&laptop).arg("sync").assert().success();
    quotes(&phone).arg("sync").assert().success();

    quotes(&phone)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Simple is better than complex."));
}

#[test]
fn list_without_init_fails() {
    let dir = tempdir().unwrap();

    quotes(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("quotes init"));
}

#[test]
fn status_reports_pending_changes() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    init(&data, &dir.path().join("cloud"), "solo");
    quotes(&data).args(["add", "queued"]).assert().success();

    quotes(&data)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending records: 1"));
}

#[test]
fn empty_list_says_so() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    init(&data, &dir.path().join("cloud"), "solo");

    quotes(&data)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No quotes."));
}
