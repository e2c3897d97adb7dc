//! Tests for the courier binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn courier() -> Command {
    let mut command = Command::cargo_bin("courier").unwrap();
    command.env_remove("RUST_LOG").env_remove("COURIER_CONFIG");
    command
}

#[test]
fn test_config_show_prints_defaults() {
    courier()
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("send_strategy_name = \"bufferized\""));
}

#[test]
fn test_config_reads_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "prefix_name = \"dev-\"").unwrap();
    writeln!(file, "send_strategy_name = \"onebyone\"").unwrap();

    courier()
        .arg("--config")
        .arg(file.path())
        .args(["config", "--show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"prefix_name\": \"dev-\""))
        .stdout(predicate::str::contains("\"send_strategy_name\": \"onebyone\""));
}

#[test]
fn test_missing_config_file_fails() {
    courier()
        .args(["--config", "/nonexistent/courier.toml", "config"])
        .assert()
        .failure()
        .code(4);
}

#[test]
fn test_invalid_settings_fail() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "batch_sending_buffer_size = 0").unwrap();

    courier()
        .arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_bench_reports_json() {
    courier()
        .args([
            "bench",
            "--strategy",
            "onebyone",
            "--count",
            "20",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"received\": 20"));
}

#[test]
fn test_bench_unknown_strategy_fails() {
    courier()
        .args(["bench", "--strategy", "pigeon", "--count", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unknown send strategy"));
}
