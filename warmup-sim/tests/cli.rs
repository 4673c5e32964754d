//! Command-line tests of framelock-sim.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn sim() -> Command {
    Command::cargo_bin("framelock-sim").unwrap()
}

#[test]
fn help_lists_the_flags() {
    sim()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--repeaters"))
        .stdout(predicate::str::contains("--drop-every"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn warms_up_a_small_cluster() {
    sim()
        .args(["--repeaters", "1", "--frames-after-warmup", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Barrier warmed up on every node"))
        .stdout(predicate::str::contains("pipeline depth 2"));
}

#[test]
fn json_report_is_parseable() {
    let output = sim()
        .args(["--repeaters", "2", "--slack", "1", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let nodes = report["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0]["role"], "Emitter");
    assert_eq!(nodes[0]["present_pipeline_depth"], 4);
    assert_eq!(nodes[1]["additional_presents"], 2);
}

#[test]
fn failed_warmup_exits_non_zero() {
    sim()
        .args([
            "--repeaters",
            "1",
            "--activation-delay-ms",
            "600000",
            "--timeout-ms",
            "400",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Barrier warmup FAILED"));
}

#[test]
fn settings_file_is_read() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "repeaters = 0").unwrap();
    writeln!(file, "[warmup]").unwrap();
    writeln!(file, "block_delay_ms = 50").unwrap();

    sim()
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Repeaters: 0"));
}

#[test]
fn missing_settings_file_is_an_error() {
    sim()
        .args(["--config", "/nonexistent/framelock.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load settings"));
}

#[test]
fn promoting_without_repeaters_is_rejected() {
    sim()
        .args(["--repeaters", "0", "--promote-backup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one repeater"));
}
