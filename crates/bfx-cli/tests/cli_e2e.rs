#![forbid(unsafe_code)]
//! Runs the built `bfx` binary against fixture trees.

use bfx_harness::{FixtureTree, snapshot, write_fake_compressor};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bfx(args: &[&str], log: &Path, good: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bfx"))
        .args(args)
        .arg(log)
        .arg(good)
        .env_remove("BFX_LOG")
        .env_remove("RUST_LOG")
        .env_remove("BFX_LOG_FORMAT")
        .env_remove("BFX_DRY_RUN")
        .env_remove("BFX_ALLOW_PERMISSION_CHANGE")
        .env_remove("BFX_COMPRESSOR")
        .output()
        .expect("spawn bfx")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn clean_repair_exits_zero() {
    let dir = TempDir::new().expect("tempdir");
    let mut fixture = FixtureTree::create(&dir.path().join("fx")).expect("fixture");
    let plain = fixture.plain("docs/a.txt", b"good", b"bad").expect("entry");
    let packed = fixture
        .compressed("sub/report.txt", b"numbers", b"junk")
        .expect("entry");
    let log = fixture.write_log().expect("log");
    let compressor = write_fake_compressor(dir.path(), 0).expect("script");
    let compressor = compressor.to_str().expect("utf-8 path");

    let output = bfx(&["--compressor", compressor], &log, fixture.good_root());

    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = stdout(&output);
    assert!(text.starts_with("Reading from "));
    assert!(!text.contains("Files not corrected"));
    assert_eq!(fs::read(plain).expect("read"), b"good");
    assert_eq!(fs::read(packed).expect("read"), b"numbers");
    assert!(fixture.temp_leftovers().expect("list").is_empty());
}

#[test]
fn missing_reference_is_reported_with_exit_three() {
    let dir = TempDir::new().expect("tempdir");
    let mut fixture = FixtureTree::create(&dir.path().join("fx")).expect("fixture");
    let lost = fixture
        .missing_reference("lost/gone.txt", b"orphan")
        .expect("entry");
    fixture.plain("docs/a.txt", b"good", b"bad").expect("entry");
    let log = fixture.write_log().expect("log");

    let output = bfx(&[], &log, fixture.good_root());

    assert_eq!(output.status.code(), Some(3));
    let text = stdout(&output);
    assert!(text.contains("Files not corrected because of errors:"));
    let line = text
        .lines()
        .find(|line| line.starts_with(&lost.display().to_string()))
        .expect("report line for missing file");
    assert!(line.ends_with("while copying file"));
}

#[test]
fn no_error_list_suppresses_report_but_not_exit_status() {
    let dir = TempDir::new().expect("tempdir");
    let mut fixture = FixtureTree::create(&dir.path().join("fx")).expect("fixture");
    fixture
        .missing_reference("lost/gone.txt", b"orphan")
        .expect("entry");
    let log = fixture.write_log().expect("log");

    let output = bfx(&["-n"], &log, fixture.good_root());

    assert_eq!(output.status.code(), Some(3));
    assert!(!stdout(&output).contains("Files not corrected"));
}

#[test]
fn dry_run_changes_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let mut fixture = FixtureTree::create(&dir.path().join("fx")).expect("fixture");
    fixture.plain("docs/a.txt", b"good", b"bad").expect("entry");
    fixture
        .compressed("sub/report.txt", b"numbers", b"junk")
        .expect("entry");
    let log = fixture.write_log().expect("log");
    let before = snapshot(fixture.archive_root()).expect("snapshot");

    let output = bfx(
        &["--dry-run", "--permissions", "--compressor", "false"],
        &log,
        fixture.good_root(),
    );

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(snapshot(fixture.archive_root()).expect("snapshot"), before);
    let logs = String::from_utf8_lossy(&output.stderr);
    assert!(logs.contains("Doing dry run. No changes made to files."));
}

#[test]
fn json_output_parses() {
    let dir = TempDir::new().expect("tempdir");
    let mut fixture = FixtureTree::create(&dir.path().join("fx")).expect("fixture");
    fixture.plain("docs/a.txt", b"good", b"bad").expect("entry");
    let lost = fixture
        .missing_reference("lost/gone.txt", b"orphan")
        .expect("entry");
    let log = fixture.write_log().expect("log");

    let output = bfx(&["--json", "-q"], &log, fixture.good_root());

    assert_eq!(output.status.code(), Some(3));
    let json: Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(json["summary"]["total"], 2);
    assert_eq!(json["summary"]["repaired"], 1);
    assert_eq!(json["summary"]["failed"], 1);
    assert_eq!(json["exit_code"], 3);
    assert_eq!(json["log_level"], "quiet");
    let failures = json["failures"]["files"].as_array().expect("files array");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["path"], lost.display().to_string());
}

#[test]
fn failing_compressor_reports_return_code() {
    let dir = TempDir::new().expect("tempdir");
    let mut fixture = FixtureTree::create(&dir.path().join("fx")).expect("fixture");
    let packed = fixture
        .compressed("sub/report.txt", b"numbers", b"junk")
        .expect("entry");
    let log = fixture.write_log().expect("log");

    let output = bfx(&["--compressor", "false"], &log, fixture.good_root());

    assert_eq!(output.status.code(), Some(3));
    let text = stdout(&output);
    assert!(text.contains(&format!(
        "{}: Compression return code 1",
        packed.display()
    )));
    assert_eq!(fs::read(packed).expect("read"), b"junk");
    assert!(fixture.temp_leftovers().expect("list").is_empty());
}

#[test]
fn unreadable_log_is_operational_error() {
    let dir = TempDir::new().expect("tempdir");
    let output = bfx(&[], &dir.path().join("absent.log"), dir.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: failed to open error log"));
}

#[test]
fn missing_arguments_exit_two() {
    let output = Command::new(env!("CARGO_BIN_EXE_bfx"))
        .arg("only-one.log")
        .output()
        .expect("spawn bfx");
    assert_eq!(output.status.code(), Some(2));
}
