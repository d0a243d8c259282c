//! End-to-end tests of the instvfs binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests
//!
//! Runs the built-in page workload and command scripts, checking each output
//! format.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn instvfs() -> Command {
    Command::cargo_bin("instvfs").unwrap()
}

#[test]
fn test_default_workload_prints_summary() {
    instvfs()
        .arg("--pages")
        .arg("4")
        .assert()
        .success()
        .stdout(predicate::str::contains("vfs instvfs"))
        .stdout(predicate::str::contains("% time"))
        .stdout(predicate::str::contains("xWrite"))
        .stdout(predicate::str::contains("xCurrentTime"))
        .stdout(predicate::str::contains("total"));
}

#[test]
fn test_trace_prints_events() {
    instvfs()
        .args(["-T", "--pages", "1", "--page-size", "512"])
        .assert()
        .success()
        .stdout(predicate::str::contains("xOpen(\"test.db\""))
        .stdout(predicate::str::contains("xWrite(\"test.db\", 512, 0)"))
        .stdout(predicate::str::contains("xRead(\"test.db\", 512, 0)"));
}

#[test]
fn test_json_output() {
    let output = instvfs()
        .args(["--format", "json", "--pages", "2", "--clock", "disabled"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["format"], "instvfs-json-v1");
    let report = &json["reports"][0];
    assert_eq!(report["vfs"], "instvfs");
    assert_eq!(report["clock"], "disabled");
    assert_eq!(report["total_ticks"], 0);
    assert_eq!(report["operations"].as_array().unwrap().len(), 20);
    assert_eq!(report["operations"][2]["operation"], "xWrite");
    assert_eq!(report["operations"][2]["calls"], 2);
}

#[test]
fn test_csv_output() {
    instvfs()
        .args(["--format", "csv", "--pages", "3", "-n", "pager"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("vfs,id,operation,calls,errors,ticks\n"))
        .stdout(predicate::str::contains("pager,3,xWrite,3,0,"));
}

#[test]
fn test_script_file_with_backend_error() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("run.toml");
    fs::write(
        &script,
        r#"
[[command]]
op = "create"
name = "inst"
parent = "memory"

[[command]]
op = "open"
vfs = "inst"
file = "db"
path = "missing.db"
flags = "READWRITE"

[[command]]
op = "report"
name = "inst"
"#,
    )
    .unwrap();

    instvfs()
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("vfs inst"))
        .stderr(predicate::str::contains("step 2 (open): unable to open file"));
}

#[test]
fn test_invalid_script_fails() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("bad.toml");
    fs::write(&script, "[[command]]\nop = \"explode\"\n").unwrap();

    instvfs()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid command script"));
}

#[test]
fn test_lifecycle_error_stops_script() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("dup.toml");
    fs::write(
        &script,
        "[[command]]\nop = \"create\"\nname = \"memory\"\n",
    )
    .unwrap();

    instvfs()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("step 1 (create) failed"));
}

#[test]
fn test_missing_script_fails() {
    instvfs()
        .arg("/nonexistent/run.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read command script"));
}

#[test]
fn test_os_backend_in_directory() {
    let dir = TempDir::new().unwrap();
    instvfs()
        .args(["--backend", "os", "--pages", "2"])
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("xDelete"));
    // the workload deletes its database file
    assert!(!dir.path().join("test.db").exists());
}

#[test]
fn test_dir_requires_os_backend() {
    instvfs()
        .args(["--dir", "/tmp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--dir requires --backend os"));
}

#[test]
fn test_zero_page_size_rejected() {
    instvfs()
        .args(["--page-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--page-size must be greater than zero"));
}

#[test]
fn test_oversized_workload_rejected() {
    instvfs()
        .args(["--pages", "4", "--page-size", "18446744073709551615"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("overflow the file offset range"));
}
