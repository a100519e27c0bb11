use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;

const NOW: &str = "1700000000";
const CREATOR: &str = "0x1111111111111111111111111111111111111111";
const DONOR: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn funding(state: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_funding"))
        .env_remove("FUNDING_STATE")
        .env_remove("FUNDING_NOW")
        .env_remove("FUNDING_LOG_JSON")
        .arg("--state")
        .arg(state)
        .args(["--now", NOW, "--json"])
        .args(args)
        .output()
        .expect("run funding")
}

fn json_stdout(output: &std::process::Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

#[test]
fn create_donate_withdraw_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");

    json_stdout(&funding(&state, &["init"]));
    json_stdout(&funding(&state, &["faucet", "--to", DONOR, "--amount", "2"]));
    let created = json_stdout(&funding(
        &state,
        &[
            "create",
            "--from",
            CREATOR,
            "--title",
            "Community garden",
            "--description",
            "Raised beds",
            "--goal",
            "1.0",
            "--days",
            "1",
        ],
    ));
    assert_eq!(created["events"][0]["type"], "project_created");
    assert_eq!(created["events"][0]["id"], 1);

    json_stdout(&funding(
        &state,
        &["donate", "--from", DONOR, "--project", "1", "--amount", "0.5"],
    ));
    let shown = json_stdout(&funding(&state, &["show", "--project", "1"]));
    assert_eq!(shown["current_amount"], "500000000000000000");
    assert_eq!(shown["goal"], "1000000000000000000");

    let stranger = funding(
        &state,
        &["withdraw", "--from", DONOR, "--project", "1"],
    );
    assert!(!stranger.status.success());
    assert!(String::from_utf8_lossy(&stranger.stderr)
        .contains("only the project creator can withdraw funds"));

    json_stdout(&funding(
        &state,
        &["withdraw", "--from", CREATOR, "--project", "1"],
    ));
    let again = funding(
        &state,
        &["withdraw", "--from", CREATOR, "--project", "1"],
    );
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("no funds available to withdraw"));

    let count = json_stdout(&funding(&state, &["count"]));
    assert_eq!(count, 1);
    let history = json_stdout(&funding(&state, &["history", "--project", "1"]));
    assert_eq!(history.as_array().map(Vec::len), Some(2));

    let events = Command::new(env!("CARGO_BIN_EXE_funding"))
        .env_remove("FUNDING_NOW")
        .env_remove("FUNDING_LOG_JSON")
        .arg("--state")
        .arg(&state)
        .arg("events")
        .output()
        .expect("run funding events");
    assert!(events.status.success());
    let lines: Vec<Value> = String::from_utf8(events.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2]["type"], "funds_withdrawn");
    assert_eq!(lines[2]["amount"], "500000000000000000");
}

#[test]
fn commands_require_initialised_state() {
    let dir = tempfile::tempdir().unwrap();
    let output = funding(&dir.path().join("missing.json"), &["count"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("run `funding init` first"));
}

#[test]
fn replay_reports_each_transaction() {
    let script = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/community-garden.jsonl");
    let output = Command::new(env!("CARGO_BIN_EXE_funding-replay"))
        .env_remove("FUNDING_LOG_JSON")
        .arg(&script)
        .arg("--keep-going")
        .output()
        .expect("run funding-replay");
    // the script deliberately contains rejected withdrawals
    assert!(!output.status.success());

    let results: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(results.len(), 6);
    assert_eq!(results[3]["ok"], false);
    assert_eq!(results[3]["kind"], "authorization");
    assert_eq!(results[4]["ok"], true);
    assert_eq!(
        results[4]["receipt"]["events"][0]["amount"],
        "500000000000000000"
    );
    assert_eq!(results[5]["error"], "no funds available to withdraw");
    assert_eq!(results[5]["kind"], "state");
}

#[test]
fn help_describes_every_global_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_funding"))
        .arg("--help")
        .output()
        .expect("run funding --help");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for text in [
        "Chain state file",
        "Block timestamp to use instead of the wall clock",
        "Print machine readable JSON",
        "Write log lines to stderr as JSON",
    ] {
        assert!(help.contains(text), "missing {text:?} in:\n{help}");
    }
}
