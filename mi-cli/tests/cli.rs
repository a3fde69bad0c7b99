#![allow(missing_docs)]

use std::io::Write;
use std::process::Command;

fn mi_cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mi-cli"))
}

#[test]
fn test_cli_help() {
    let output = mi_cli().arg("--help").output().expect("Failed to run mi-cli");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: mi-cli"));
    assert!(stdout.contains("demo"));
}

#[test]
fn test_demo_runs() {
    let output = mi_cli().arg("demo").output().expect("Failed to run mi-cli");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""event":"added""#));
    assert!(stdout.contains(r#""error":"invalid breakpoint condition""#));
    assert!(stdout.lines().all(|line| serde_json::from_str::<serde_json::Value>(line).is_ok()));
}

#[test]
fn test_config_override() {
    let output = mi_cli().args(["--session", "board-7", "config"]).output().expect("Failed to run mi-cli");

    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["session_id"], "board-7");
    assert_eq!(config["strict_watchpoint_access"], true);

    let output = mi_cli().args(["--session", "", "config"]).output().expect("Failed to run mi-cli");
    assert!(!output.status.success());
}

#[test]
fn test_unexpected_failure_sets_exit_status() {
    let dir = std::env::temp_dir().join(format!("mi-cli-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("script.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(br#"{ "steps": [ { "op": "remove", "breakpoint": 9 } ] }"#).unwrap();
    drop(file);

    let output = mi_cli().arg("--quiet").arg("run").arg(&path).output().expect("Failed to run mi-cli");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""error":"unknown breakpoint context""#));

    std::fs::remove_dir_all(&dir).unwrap();
}
