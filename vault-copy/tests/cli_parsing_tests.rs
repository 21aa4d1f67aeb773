//! CLI Argument Parsing Tests for vault-copy
//!
//! These tests verify that command-line arguments are parsed correctly and that runs which
//! cannot start fail with the setup failure exit code before talking to any server.

use assert_cmd::Command;
use predicates::prelude::*;

const VAULT_VARS: [&str; 6] = [
    "VAULT_ADDR",
    "VAULT_TOKEN",
    "VAULT_SOURCE_ADDR",
    "VAULT_SOURCE_TOKEN",
    "VAULT_DEST_ADDR",
    "VAULT_DEST_TOKEN",
];

/// `vault-copy` started in an empty directory with no Vault variables set.
fn vault_copy(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vault-copy").unwrap();
    cmd.current_dir(dir.path());
    for var in VAULT_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_runs() {
    Command::cargo_bin("vault-copy")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--src-path"));
}

#[test]
fn test_version_runs() {
    Command::cargo_bin("vault-copy")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// ProgressType Argument Parsing Tests
// ============================================================================

#[test]
fn test_progress_type_accepts_both_spellings() {
    for value in [
        "auto",
        "Auto",
        "progress-bar",
        "ProgressBar",
        "text-updates",
        "TextUpdates",
    ] {
        Command::cargo_bin("vault-copy")
            .unwrap()
            .args(["--progress-type", value, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_progress_type_invalid_value() {
    Command::cargo_bin("vault-copy")
        .unwrap()
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/b",
            "--progress-type",
            "fancy",
        ])
        .assert()
        .failure();
}

#[test]
fn test_progress_delay_invalid_value() {
    Command::cargo_bin("vault-copy")
        .unwrap()
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/b",
            "--progress-delay",
            "soon",
        ])
        .assert()
        .failure();
}

// ============================================================================
// Setup failures
// ============================================================================

#[test]
fn test_missing_paths() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args(["--src-path", "secret/a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--dst-path"));
    vault_copy(&dir)
        .args(["--dst-path", "secret/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--src-path"));
}

#[test]
fn test_missing_token() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args(["--src-path", "secret/a", "--dst-path", "secret/b"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("source token is required"));
}

#[test]
fn test_missing_destination_token_for_other_server() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/b",
            "--src-token",
            "t",
            "--dst-addr",
            "http://127.0.0.1:8201",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("destination token is required"));
}

#[test]
fn test_invalid_destination_path() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/../b",
            "--src-token",
            "t",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid destination path"));
}

#[test]
fn test_invalid_destination_path_reported_before_missing_token() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args(["--src-path", "secret/a", "--dst-path", "secret/b!"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid destination path"))
        .stderr(predicate::str::contains("token").not());
}

#[test]
fn test_zero_parallelism() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/b",
            "--src-token",
            "t",
            "--parallel",
            "0",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("parallelism"));
}

#[test]
fn test_token_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    // the token is found, so the run gets as far as the (unreachable) server
    vault_copy(&dir)
        .env("VAULT_TOKEN", "t")
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/b",
            "--src-addr",
            "http://127.0.0.1:1",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed connecting to source Vault"));
}

#[test]
fn test_token_from_default_config_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.yaml"),
        "source:\n  address: http://127.0.0.1:1\n  token: from-file\n",
    )
    .unwrap();
    vault_copy(&dir)
        .args(["--src-path", "secret/a", "--dst-path", "secret/b"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed connecting to source Vault"));
}

#[test]
fn test_missing_explicit_config_file() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args([
            "--src-path",
            "secret/a",
            "--dst-path",
            "secret/b",
            "--src-token",
            "t",
            "--config",
            "missing.yaml",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed reading config file"));
}

#[test]
fn test_invalid_config_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), "settings: [1, 2").unwrap();
    vault_copy(&dir)
        .args(["--src-path", "secret/a", "--dst-path", "secret/b"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed parsing config file"));
}

#[test]
fn test_quiet_suppresses_setup_errors() {
    let dir = tempfile::tempdir().unwrap();
    vault_copy(&dir)
        .args(["--src-path", "secret/a", "--dst-path", "secret/b", "-q"])
        .assert()
        .code(1)
        .stderr(predicate::str::is_empty());
}
