//! CLI smoke tests: commands that work without network access.
//!
//! These tests run the compiled binary against settings that point every
//! path into a temp directory, and verify exit codes and output.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Helper: run hubupdate with given args and return (exit_code, stdout, stderr).
fn run_cli(args: &[&str], config: Option<&Path>) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_hubupdate");
    let mut cmd = Command::new(bin);
    cmd.args(args).env("RUST_LOG", "error"); // suppress tracing noise
    match config {
        Some(path) => cmd.env("HUBUPDATE_CONFIG", path),
        None => cmd.env("HUBUPDATE_CONFIG", "/nonexistent/hubupdate/settings.yml"),
    };
    let output = cmd.output().expect("failed to execute hubupdate binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

/// Settings with every path inside a fresh temp dir.
fn sandbox_settings(extra: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let settings = format!(
        "repository:\n  base_url: http://127.0.0.1:9\n  timeout_secs: 1\npaths:\n  data_dir: {}\n  config_dir: {}\n  backup_dir: {}\n  compose_file: {}\n{}",
        root.join("state").display(),
        root.join("config").display(),
        root.join("backups").display(),
        root.join("docker-compose.yaml").display(),
        extra
    );
    let path = root.join("settings.yml");
    std::fs::write(&path, settings).unwrap();
    (dir, path)
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let (code, stdout, _stderr) = run_cli(&[], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("hubupdate"));
}

#[test]
fn cli_help_flag() {
    let (code, stdout, _stderr) = run_cli(&["--help"], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("Commands:"));
    assert!(stdout.contains("acknowledge"));
}

#[test]
fn cli_version_command() {
    let (code, stdout, _stderr) = run_cli(&["version"], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("hubupdate"));
    assert!(stdout.contains('.'));
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn cli_validate_good_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.yml");
    std::fs::write(
        &path,
        "version: 1.1.0\nrequires: 1.0.0\nsteps:\n  - type: service_config\n    path: config/app.conf\n    target: app.conf\n    permissions: \"644\"\n",
    )
    .unwrap();
    let (code, stdout, _stderr) = run_cli(&["validate", path.to_str().unwrap()], None);
    assert_eq!(code, 0, "stdout: {stdout}");
    assert!(stdout.contains("Version 1.1.0 with 1 step(s)"));
    assert!(stdout.contains("[service_config]"));
}

#[test]
fn cli_validate_bad_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.yml");
    std::fs::write(&path, "version: 1.1.0\nsteps:\n  - type: docker_compose\n    action: reboot\n")
        .unwrap();
    let (code, stdout, _stderr) = run_cli(&["validate", path.to_str().unwrap()], None);
    assert_ne!(code, 0);
    assert!(stdout.contains("[ERROR] steps[0].action"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_check_sandbox() {
    let (_dir, settings) = sandbox_settings("");
    let (code, stdout, _stderr) = run_cli(&["config", "check"], Some(&settings));
    assert_eq!(code, 0, "stdout: {stdout}");
    assert!(stdout.contains("Settings file"));
}

#[test]
fn cli_config_check_unknown_field() {
    let (_dir, settings) = sandbox_settings("intervals:\n  update_chek_secs: 60\n");
    let (code, stdout, _stderr) = run_cli(&["--config", settings.to_str().unwrap(), "config", "check"], None);
    assert_ne!(code, 0);
    assert!(stdout.contains("did you mean 'update_check_secs'?"));
}

#[test]
fn cli_config_show() {
    let (_dir, settings) = sandbox_settings("");
    let (code, stdout, _stderr) = run_cli(&["config", "show"], Some(&settings));
    assert_eq!(code, 0);
    assert!(stdout.contains("update_check_secs: 3600"));
}

// ============================================================================
// State commands
// ============================================================================

#[test]
fn cli_status_fresh_install() {
    let (_dir, settings) = sandbox_settings("");
    let (code, stdout, _stderr) = run_cli(&["status"], Some(&settings));
    assert_eq!(code, 0, "stdout: {stdout}");
    assert!(stdout.contains("Installed version: unknown"));
    assert!(stdout.contains("Pending update:    none"));
}

#[test]
fn cli_acknowledge_without_journal() {
    let (_dir, settings) = sandbox_settings("");
    let (code, stdout, _stderr) = run_cli(&["acknowledge"], Some(&settings));
    assert_eq!(code, 0);
    assert!(stdout.contains("No pending update journal."));
}

#[test]
fn cli_apply_rejects_bad_version() {
    let (_dir, settings) = sandbox_settings("");
    let (code, _stdout, stderr) = run_cli(&["apply", "--version", "latest"], Some(&settings));
    assert_ne!(code, 0);
    assert!(stderr.contains("not a version"));
}

#[test]
fn cli_check_offline() {
    let (_dir, settings) = sandbox_settings("");
    let (code, stdout, _stderr) = run_cli(&["check"], Some(&settings));
    assert_eq!(code, 0);
    assert!(stdout.contains("Installed: 0.0.0"));
    assert!(stdout.contains("unknown"));
}
