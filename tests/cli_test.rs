mod common;

use std::process::Command;

use common::temp_file;
use serde_json::Value;

fn cli() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mpv_bridge_cli"));
    command.env_remove("MPV_BRIDGE_CONFIG");
    command
}

#[test]
fn codes_lists_every_engine_error() {
    let output = cli()
        .arg("codes")
        .output()
        .expect("failed to run mpv_bridge_cli codes");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("codes JSON payload");
    let entries = json.as_array().expect("array of codes");
    assert_eq!(entries.len(), 21);
    assert!(entries
        .iter()
        .any(|entry| entry["code"] == -8 && entry["name"] == "PropertyNotFound"));
    assert!(entries
        .iter()
        .any(|entry| entry["code"] == -1000 && entry["name"] == "ContextClosed"));
}

#[test]
fn probe_reports_size_through_data_source() {
    let path = temp_file("cli", "probe.bin", &[5u8; 2048]);
    let output = cli()
        .args(["probe", "--file"])
        .arg(&path)
        .output()
        .expect("failed to run mpv_bridge_cli probe");
    assert!(
        output.status.success(),
        "CLI exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    let json: Value = serde_json::from_slice(&output.stdout).expect("probe JSON payload");
    assert_eq!(json["uri"], "datasource://probe.bin");
    assert_eq!(json["loaded"], true);
    assert_eq!(json["file_size"], 2048);
    assert_eq!(json["bytes_read"], 2048);
    assert_eq!(json["end_reason"], "Eof");
    assert!(json["error"].is_null());
}

#[test]
fn play_prints_events_until_end_file() {
    let path = temp_file("cli", "play.bin", &[1u8; 512]);
    let output = cli()
        .args(["play", "--file"])
        .arg(&path)
        .output()
        .expect("failed to run mpv_bridge_cli play");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let events: Vec<Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("one JSON event per line"))
        .collect();
    let last = events.last().expect("at least one event");
    assert_eq!(last["EndFile"]["reason"], "Eof");
}

#[test]
fn play_missing_file_fails() {
    let output = cli()
        .args(["play", "--file", "/nonexistent/clip.bin"])
        .output()
        .expect("failed to run mpv_bridge_cli play");
    assert_eq!(output.status.code(), Some(1));
}
