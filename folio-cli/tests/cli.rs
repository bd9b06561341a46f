use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn folio_cmd(base: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("folio"));
    cmd.arg("--base").arg(base).env("RUST_LOG", "warn");
    cmd
}

fn site(settings_yaml: &str) -> TempDir {
    let base = TempDir::new().expect("base");
    fs::write(base.path().join("folio.yaml"), settings_yaml).expect("write settings");
    base
}

fn write_manifest(base: &TempDir, name: &str, json: &str) -> std::path::PathBuf {
    let path = base.path().join(name);
    fs::write(&path, json).expect("write manifest");
    path
}

fn export_id(base: &TempDir, manifest: &Path) -> String {
    let output = folio_cmd(base.path())
        .arg("export")
        .arg(manifest)
        .arg("--json")
        .output()
        .expect("run export");
    assert!(output.status.success(), "export failed: {output:?}");
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("export report json");
    report["id"].as_str().expect("id field").to_string()
}

#[test]
fn id_new_output_passes_id_check() {
    let base = TempDir::new().expect("base");
    let output = folio_cmd(base.path())
        .args(["id", "new"])
        .output()
        .expect("id new");
    assert!(output.status.success());
    let id = String::from_utf8(output.stdout).expect("utf8");

    folio_cmd(base.path())
        .args(["id", "check", id.trim()])
        .assert()
        .success()
        .stdout(contains("Z"));
}

#[test]
fn malformed_id_is_a_user_error() {
    let base = TempDir::new().expect("base");
    folio_cmd(base.path())
        .args(["id", "check", "2024-13-01_00-00-00.000000__0001"])
        .assert()
        .code(1)
        .stderr(contains("malformed unique id"));
}

#[test]
fn export_build_and_publish_round() {
    let base = site("build:\n  builder: noop\n");
    let manifest = write_manifest(
        &base,
        "export.json",
        r#"{"items": [{"operation": "write", "path": "index.html", "text": "<h1>hello</h1>"}]}"#,
    );
    let id = export_id(&base, &manifest);
    assert_eq!(
        fs::read_to_string(base.path().join("data/index.html")).expect("data file"),
        "<h1>hello</h1>"
    );

    folio_cmd(base.path())
        .arg("build")
        .assert()
        .success()
        .stdout(contains(id.as_str()));
    folio_cmd(base.path())
        .args(["release", "current"])
        .assert()
        .success()
        .stdout(contains(id.as_str()));
    assert_eq!(
        fs::read_to_string(base.path().join("current/index.html")).expect("published file"),
        "<h1>hello</h1>"
    );

    folio_cmd(base.path())
        .args(["release", "list", "--json"])
        .assert()
        .success()
        .stdout(contains("\"current\": true").and(contains("\"task\": \"done\"")));
    folio_cmd(base.path())
        .args(["changes"])
        .assert()
        .success()
        .stdout(contains("index.html"));
}

#[test]
fn unchanged_content_is_skipped_on_second_export() {
    let base = site("build:\n  builder: noop\n");
    let manifest = write_manifest(
        &base,
        "export.json",
        r#"{"items": [{"operation": "write", "path": "a.txt", "text": "same"}]}"#,
    );
    export_id(&base, &manifest);

    folio_cmd(base.path())
        .arg("export")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(contains("0 executed, 1 skipped"));
}

#[test]
fn path_traversal_is_rejected_with_user_error() {
    let base = site("build:\n  builder: noop\n");
    let manifest = write_manifest(
        &base,
        "evil.json",
        r#"{"items": [{"operation": "write", "path": "../escape.txt", "text": "x"}]}"#,
    );
    folio_cmd(base.path())
        .arg("export")
        .arg(&manifest)
        .assert()
        .code(1)
        .stderr(contains("parent-directory"));
    assert!(!base.path().join("escape.txt").exists());
}

#[test]
fn queued_only_export_waits_for_drain() {
    let base = site("build:\n  builder: noop\n");
    let manifest = write_manifest(
        &base,
        "export.json",
        r#"{"items": [{"operation": "write", "path": "later.txt", "text": "queued"}]}"#,
    );
    folio_cmd(base.path())
        .arg("export")
        .arg(&manifest)
        .arg("--no-coordinate")
        .assert()
        .success()
        .stdout(contains("queued"));
    assert!(!base.path().join("data/later.txt").exists());

    folio_cmd(base.path())
        .args(["queue", "status"])
        .assert()
        .success()
        .stdout(contains("done"));
    folio_cmd(base.path())
        .args(["queue", "drain"])
        .assert()
        .success()
        .stdout(contains("committed"));
    assert!(base.path().join("data/later.txt").exists());
    folio_cmd(base.path())
        .args(["queue", "status"])
        .assert()
        .success()
        .stdout(contains("queue is empty"));
}

#[test]
fn publishing_unknown_release_fails() {
    let base = site("build:\n  builder: noop\n");
    folio_cmd(base.path())
        .args(["release", "publish", "2024-01-01_00-00-00.000000__0001"])
        .assert()
        .code(1)
        .stderr(contains("unknown release"));
}

#[test]
fn unknown_builder_is_a_configuration_error() {
    let base = site("build:\n  builder: jekyll\n");
    folio_cmd(base.path())
        .arg("build")
        .assert()
        .code(1)
        .stderr(contains("unknown builder 'jekyll'"));
}

#[test]
#[cfg(unix)]
fn build_failure_without_servable_release_exits_systemic() {
    let base = site("build:\n  builder: command\n  command: [sh, -c, \"exit 3\"]\n");
    let manifest = write_manifest(
        &base,
        "export.json",
        r#"{"items": [{"operation": "write", "path": "index.html", "text": "v1"}]}"#,
    );
    export_id(&base, &manifest);

    folio_cmd(base.path())
        .arg("build")
        .assert()
        .code(2)
        .stderr(contains("no servable release"));
    assert!(!base.path().join("current").exists());
}
