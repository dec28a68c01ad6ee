use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use predicates::prelude::*;

use pinctl::cluster_metadata::{CLUSTER_METADATA_SCHEMA_VERSION, ClusterMetadata};
use pinctl::id::new_ulid_string;
use pinctl::pin::Pin;
use pinctl::pin_state::PinState;
use pinctl::raft::snapshot_store;

fn pinctl_cmd(data_dir: &Path, args: &[&str]) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("pinctl").unwrap();
    cmd.arg("--data-dir").arg(data_dir);
    cmd.args(args);
    cmd
}

fn seed_metadata(data_dir: &Path) {
    let meta = ClusterMetadata {
        schema_version: CLUSTER_METADATA_SCHEMA_VERSION,
        cluster_id: new_ulid_string(),
        node_id: new_ulid_string(),
        node_name: "node-1".to_string(),
        api_base_url: "https://127.0.0.1:9097".to_string(),
    };
    meta.save(data_dir).unwrap();
}

fn seed_v1_snapshot(data_dir: &Path) {
    let raw = br#"{"schema_version":1,"pins":{"bafyaaa":{"replication":2}}}"#;
    snapshot_store::save_snapshot_raw(data_dir, raw, BTreeMap::new()).unwrap();
}

fn seed_current_snapshot(data_dir: &Path, cids: &[&str]) {
    let mut state = PinState::empty();
    for cid in cids {
        state.add(Pin::everywhere(*cid)).unwrap();
    }
    snapshot_store::save_snapshot(data_dir, &state, BTreeMap::new()).unwrap();
}

#[test]
fn check_passes_on_a_fresh_data_dir() {
    let tmp = tempfile::tempdir().unwrap();
    pinctl_cmd(tmp.path(), &["check"]).assert().success();
}

#[test]
fn check_reports_outdated_state_and_upgrade_fixes_it() {
    let tmp = tempfile::tempdir().unwrap();
    seed_metadata(tmp.path());
    seed_v1_snapshot(tmp.path());

    pinctl_cmd(tmp.path(), &["check"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("pinctl upgrade"))
        .stderr(predicate::str::contains("outdated"));

    pinctl_cmd(tmp.path(), &["upgrade"]).assert().success();
    pinctl_cmd(tmp.path(), &["check"]).assert().success();

    let out = tmp.path().join("pins.json");
    pinctl_cmd(tmp.path(), &["export", "-f", out.to_str().unwrap()])
        .assert()
        .success();

    let pins: Vec<Pin> = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
    assert_eq!(pins.len(), 1);
    assert_eq!(pins[0].cid, "bafyaaa");
    assert_eq!(pins[0].replication_factor_min, 2);
    assert_eq!(pins[0].replication_factor_max, 2);
}

#[test]
fn check_reports_corruption_distinctly() {
    let tmp = tempfile::tempdir().unwrap();
    snapshot_store::save_snapshot_raw(tmp.path(), b"{ truncated", BTreeMap::new()).unwrap();

    pinctl_cmd(tmp.path(), &["check"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("corrupt"))
        .stderr(predicate::str::contains("outdated").not());
}

#[test]
fn export_without_a_snapshot_exits_5() {
    let tmp = tempfile::tempdir().unwrap();
    pinctl_cmd(tmp.path(), &["export"])
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("no snapshot found"));
}

#[test]
fn export_then_import_roundtrips_between_data_dirs() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    seed_metadata(src.path());
    seed_metadata(dst.path());
    seed_current_snapshot(src.path(), &["bafyaaa", "bafybbb"]);

    let dump = src.path().join("pins.json");
    pinctl_cmd(src.path(), &["export", "-f", dump.to_str().unwrap()])
        .assert()
        .success();

    pinctl_cmd(dst.path(), &["import", "-f", dump.to_str().unwrap()])
        .assert()
        .success();

    let exported = pinctl_cmd(dst.path(), &["export"]).assert().success();
    let stdout = String::from_utf8(exported.get_output().stdout.clone()).unwrap();
    let pins: Vec<Pin> = serde_json::from_str(&stdout).unwrap();
    let cids: Vec<String> = pins.into_iter().map(|p| p.cid).collect();
    assert_eq!(cids, vec!["bafyaaa", "bafybbb"]);
}

#[test]
fn import_reads_stdin_and_export_writes_stdout() {
    let tmp = tempfile::tempdir().unwrap();
    seed_metadata(tmp.path());

    pinctl_cmd(tmp.path(), &["import"])
        .write_stdin("[]")
        .assert()
        .success();

    pinctl_cmd(tmp.path(), &["export"])
        .assert()
        .success()
        .stdout("[]\n");
}

#[test]
fn import_of_a_bad_record_fails_and_persists_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    seed_metadata(tmp.path());

    pinctl_cmd(tmp.path(), &["import"])
        .write_stdin(r#"[{"cid": "", "replication_factor_min": -1, "replication_factor_max": -1}]"#)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cid must not be empty"));

    pinctl_cmd(tmp.path(), &["export"]).assert().failure().code(5);
}

#[test]
fn cleanup_archives_the_consensus_dir() {
    let tmp = tempfile::tempdir().unwrap();
    seed_current_snapshot(tmp.path(), &["bafyaaa"]);

    pinctl_cmd(tmp.path(), &["cleanup"]).assert().success();

    assert!(tmp.path().join("raft.old.0/snapshots/current_meta.json").exists());
    assert!(tmp.path().join("raft").is_dir());
    pinctl_cmd(tmp.path(), &["check"]).assert().success();
    pinctl_cmd(tmp.path(), &["export"]).assert().failure().code(5);
}

#[test]
fn cleanup_without_a_consensus_dir_fails() {
    let tmp = tempfile::tempdir().unwrap();
    pinctl_cmd(tmp.path(), &["cleanup"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("nothing to rotate"));
}
