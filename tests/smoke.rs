//! Smoke tests -- verify the binary runs and the subcommands are wired up.

use assert_cmd::Command;
use chrono::{Duration, SecondsFormat, Utc};
use predicates::str::contains;
use std::io::Write;

fn netpulse() -> Command {
    let mut cmd = Command::cargo_bin("netpulse").unwrap();
    cmd.env_remove("NETPULSE_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    netpulse()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Connection quality monitor"));
}

#[test]
fn test_cli_version() {
    netpulse()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("netpulse"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "score", "baseline", "detect", "patterns", "anomalies", "alerts", "ingest"] {
        netpulse().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_score_from_explicit_values() {
    netpulse()
        .args(["score", "--latency", "500", "--json"])
        .assert()
        .success()
        .stdout(contains("\"score\": 70.0"))
        .stdout(contains("\"grade\": \"C\""))
        .stdout(contains("High latency (500.0ms)"));
}

#[test]
fn test_score_rejects_unknown_profile() {
    netpulse()
        .args(["score", "--profile", "office"])
        .assert()
        .failure();
}

#[test]
fn test_ingest_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("netpulse.db");
    let input = dir.path().join("measurements.jsonl");

    let mut file = std::fs::File::create(&input).unwrap();
    for (minutes_ago, latency) in [(7, 18.0), (4, 22.0), (1, 20.0)] {
        let time = (Utc::now() - Duration::minutes(minutes_ago)).to_rfc3339_opts(SecondsFormat::Secs, true);
        writeln!(
            file,
            r#"{{"probe_id":"home","time":"{}","latency":{},"jitter":2.0,"packet_loss":0.0}}"#,
            time, latency
        )
        .unwrap();
    }
    drop(file);

    let db_arg = db.to_str().unwrap();
    netpulse()
        .args(["--db", db_arg, "ingest", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Imported 3 measurements"));

    netpulse()
        .args(["--db", db_arg, "score", "--probe", "home", "--json"])
        .assert()
        .success()
        .stdout(contains("\"grade\": \"A\""));

    netpulse()
        .args(["--db", db_arg, "baseline"])
        .assert()
        .success()
        .stdout(contains("across 1 probes"));

    netpulse()
        .args(["--db", db_arg, "anomalies"])
        .assert()
        .success()
        .stdout(contains("No anomalies recorded."));

    netpulse()
        .args(["--db", db_arg, "patterns"])
        .assert()
        .success()
        .stdout(contains("No recurring patterns found."));

    netpulse()
        .args(["--db", db_arg, "alerts"])
        .assert()
        .success()
        .stdout(contains("Fired 0 alerts"));
}
