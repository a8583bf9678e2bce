//! End-to-end coverage for the `replay` subcommand (§4.12, §8): feed a file
//! of newline-delimited events through the compiled binary and check it
//! processes the well-formed lines, skips the malformed ones, and exits
//! cleanly — no mocked pipeline, the real `EventHub` wired against
//! `InMemoryStore`.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn write_events_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("should create temp file");
    for line in lines {
        writeln!(file, "{line}").expect("should write line");
    }
    file
}

#[test]
fn replay_processes_well_formed_lines_and_skips_malformed_ones() {
    let events = write_events_file(&[
        r#"{"eventType":"MCP","producer":"local","ts":1,"mcpTag":"srv","data":{"task":"SEND","message":{"method":"tools/call","params":{"name":"bash","arguments":{"command":"ls"}}}}}"#,
        "not json",
        r#"{"eventType":"MCP","producer":"local","ts":2,"mcpTag":"srv","data":{"task":"SEND","message":{"method":"tools/call","params":{"name":"bash","arguments":{"command":"ls"}}}}}"#,
    ]);

    let output = Command::new(env!("CARGO_BIN_EXE_sentinel-server"))
        .arg("replay")
        .arg(events.path())
        .env("SENTINEL_LOG", "info")
        .output()
        .expect("should run sentinel-server replay");

    assert!(
        output.status.success(),
        "replay exited non-zero: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("processed"), "expected a replay summary log, got: {stdout}");
    assert!(stdout.contains("skipped"), "expected the malformed line to be counted as skipped, got: {stdout}");
}

#[test]
fn replay_on_empty_file_completes_with_zero_counts() {
    let events = write_events_file(&[]);

    let output = Command::new(env!("CARGO_BIN_EXE_sentinel-server"))
        .arg("replay")
        .arg(events.path())
        .output()
        .expect("should run sentinel-server replay");

    assert!(output.status.success());
}

#[test]
fn replay_with_missing_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_sentinel-server"))
        .arg("replay")
        .arg("/nonexistent/path/to/events.ndjson")
        .output()
        .expect("should run sentinel-server replay");

    assert!(!output.status.success());
}
