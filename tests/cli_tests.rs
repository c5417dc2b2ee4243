//! Integration tests for the pose-mdn CLI.

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a configuration file with the given YAML content.
fn create_test_config(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("config.yaml");
    fs::write(&config_path, content).expect("Failed to write test config");
    config_path
}

/// Run the pose-mdn CLI with the given arguments.
fn run_cli(args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("pose-mdn").expect("Failed to find pose-mdn binary");
    cmd.args(args);
    cmd
}

fn valid_config_yaml() -> &'static str {
    r#"
model: gated-recurrent
rnn_size: 64
num_layers: 1
num_mixture: 5

dataset:
  path: "data/train.txt"

training:
  num_epochs: 2
  learning_rate: 0.005

output_dir: "./outputs"
seed: 42
"#
}

fn invalid_config_yaml() -> &'static str {
    r#"
model: bidirectional
rnn_size: 64
"#
}

#[test]
fn test_validate_command_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), valid_config_yaml());

    let mut cmd = run_cli(&["validate", config_path.to_str().unwrap()]);

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Configuration is valid"))
        .stdout(predicates::str::contains("gated-recurrent"));
}

#[test]
fn test_validate_command_unknown_cell_variant() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), invalid_config_yaml());

    let mut cmd = run_cli(&["validate", config_path.to_str().unwrap()]);

    cmd.assert().failure();
}

#[test]
fn test_validate_command_rejects_out_of_range_field() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), "keep_prob: 0.0\n");

    let mut cmd = run_cli(&["validate", config_path.to_str().unwrap()]);

    cmd.assert().failure();
}

#[test]
fn test_validate_command_missing_file() {
    let mut cmd = run_cli(&["validate", "/nonexistent/config.yaml"]);

    cmd.assert().failure();
}

#[test]
fn test_train_command_help() {
    let mut cmd = run_cli(&["train", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Train a model"))
        .stdout(predicates::str::contains("--resume"));
}

#[test]
fn test_sample_command_help() {
    let mut cmd = run_cli(&["sample", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("--checkpoint"))
        .stdout(predicates::str::contains("--num"))
        .stdout(predicates::str::contains("1200"));
}

#[test]
fn test_init_command_writes_parseable_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("generated.yaml");

    let mut cmd = run_cli(&["init", output.to_str().unwrap(), "--preset", "test"]);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Configuration written"));

    // The generated file must validate cleanly.
    let mut cmd = run_cli(&["validate", output.to_str().unwrap()]);
    cmd.assert().success();
}

#[test]
fn test_init_command_rejects_unknown_preset() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("generated.yaml");

    let mut cmd = run_cli(&["init", output.to_str().unwrap(), "--preset", "waltz"]);
    cmd.assert().failure();
}

#[test]
fn test_sample_command_missing_checkpoint() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), valid_config_yaml());

    let mut cmd = run_cli(&[
        "sample",
        config_path.to_str().unwrap(),
        "--checkpoint",
        "/nonexistent/checkpoint-final",
        "--num",
        "3",
    ]);

    cmd.assert().failure();
}
