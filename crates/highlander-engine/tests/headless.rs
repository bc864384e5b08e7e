//! Runs the engine binary end to end and checks what lands on each stream.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::path::PathBuf;
use std::process::Command;

const SHORT_RUN: &str = "\
population:
  size: 3
  initial_health: 1000000
  damage: 1
pacing:
  yield_ms: 1
seed: 7
run:
  duration_ms: 100
  checkpoint_interval_ms: 40
  quiescence_timeout_ms: 2000
logging:
  level: \"debug\"
report:
  sink: tracing
";

fn config_file() -> PathBuf {
    let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("highlander-headless.yaml");
    std::fs::write(&path, SHORT_RUN).unwrap();
    path
}

#[test]
fn stdout_carries_only_the_run_report() {
    let output = Command::new(env!("CARGO_BIN_EXE_highlander-engine"))
        .env("HIGHLANDER_CONFIG", config_file())
        .env_remove("RUST_LOG")
        .env_remove("HIGHLANDER_POPULATION")
        .env_remove("HIGHLANDER_SEED")
        .output()
        .unwrap();

    assert!(output.status.success(), "engine run failed");
    assert!(!output.stderr.is_empty(), "expected logs on stderr");

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["end_reason"], "DurationElapsed");
    assert_eq!(report["final_stats"]["health_sum"], 3_000_000);
    assert_eq!(report["final_stats"]["population"], 3);
}
