//! CLI smoke tests and end-to-end logon checks against an inventory file.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

struct Sandbox {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: PathBuf,
}

impl Sandbox {
    /// Profile enabled at 20480 MB, one 30 GiB virtual volume with `used_mb` in use.
    fn new(used_mb: u64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();

        let inventory = root.join("volumes.json");
        let volumes = serde_json::json!([{
            "id": "vol-profile",
            "label": "Profile-jdoe",
            "size_bytes": 30 * GIB,
            "free_bytes": 30 * GIB - used_mb * MIB,
            "backing": "virtual",
        }]);
        fs::write(&inventory, volumes.to_string()).expect("write inventory");

        let config = root.join("cqs.toml");
        let toml = format!(
            r"[cooldown]
window_hours = 8.0

[policy]
sources = ['overrides']

[policy.profile]
enabled = true
max_size_mb = 20480

[volumes]
sources = ['inventory']
inventory_file = '{inventory}'

[notifications]
backends = ['file']

[notifications.file]
path = '{notes}'

[paths]
state_file = '{state}'
jsonl_log = '{log}'
",
            inventory = inventory.display(),
            notes = root.join("notifications.jsonl").display(),
            state = root.join("cooldown.json").display(),
            log = root.join("activity.jsonl").display(),
        );
        fs::write(&config, toml).expect("write config");

        Self {
            _dir: dir,
            root,
            config,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn run(&self, case: &str, args: &[&str]) -> common::CmdResult {
        let config = self.config.to_string_lossy().to_string();
        let mut full: Vec<&str> = vec!["--config", &config, "--json"];
        full.extend_from_slice(args);
        let home = self.root.to_string_lossy().to_string();
        common::run_cli_case_with_env(case, &full, &[("HOME", &home)])
    }
}

fn parse_json(result: &common::CmdResult) -> Value {
    let line = result.stdout.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}); log: {}",
            result.log_path.display()
        )
    })
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).map_or(0, |s| s.lines().count())
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: cqs [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("cqs"),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for sub in ["check", "status", "cooldown", "config", "completions"] {
        let result = common::run_cli_case(&format!("help_{sub}"), &[sub, "--help"]);
        assert!(
            result.status.success(),
            "{sub} --help failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn completions_generate_for_bash() {
    let result = common::run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("cqs"), "log: {}", result.log_path.display());
}

#[test]
fn config_path_reports_explicit_file() {
    let sandbox = Sandbox::new(1_000);
    let result = sandbox.run("config_path", &["config", "path"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result);
    assert_eq!(payload["command"], "config path");
    assert_eq!(payload["exists"], true);
}

#[test]
fn config_show_reports_sources() {
    let sandbox = Sandbox::new(1_000);
    let result = sandbox.run("config_show", &["config", "show"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result);
    assert_eq!(payload["policy_sources"], serde_json::json!(["overrides"]));
    assert_eq!(payload["volume_sources"], serde_json::json!(["inventory"]));
    assert!(payload["config_hash"].as_str().is_some_and(|h| !h.is_empty()));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.toml");
    let missing = missing.to_string_lossy().to_string();
    let result = common::run_cli_case("missing_config", &["--config", &missing, "check"]);
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("cqs:"), "log: {}", result.log_path.display());
}

#[test]
fn check_notifies_once_then_respects_cooldown() {
    // 19000 of 20480 MB is 92.8%: warning.
    let sandbox = Sandbox::new(19_000);
    let notes = sandbox.path("notifications.jsonl");

    let first = sandbox.run("check_first", &["check"]);
    assert!(first.status.success(), "log: {}", first.log_path.display());
    let payload = parse_json(&first);
    assert_eq!(payload["command"], "check");
    assert_eq!(payload["outcome"], "notified");
    assert_eq!(payload["worst"], "warning");
    assert_eq!(payload["cooldown_armed"], true);
    assert_eq!(payload["statuses"][0]["kind"], "profile");
    assert!(sandbox.path("cooldown.json").exists());
    assert_eq!(line_count(&notes), 1);

    let second = sandbox.run("check_second", &["check"]);
    assert!(second.status.success(), "log: {}", second.log_path.display());
    assert_eq!(parse_json(&second)["outcome"], "cooldown_active");
    assert_eq!(line_count(&notes), 1);

    let forced = sandbox.run("check_forced", &["check", "--force"]);
    assert!(forced.status.success(), "log: {}", forced.log_path.display());
    assert_eq!(parse_json(&forced)["outcome"], "notified");
    assert_eq!(line_count(&notes), 2);

    assert!(line_count(&sandbox.path("activity.jsonl")) > 0);
}

#[test]
fn healthy_check_does_not_arm_cooldown() {
    let sandbox = Sandbox::new(1_000);
    let result = sandbox.run("check_healthy", &["check"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result);
    assert_eq!(payload["outcome"], "healthy");
    assert_eq!(payload["cooldown_armed"], false);
    assert!(!sandbox.path("cooldown.json").exists());
    assert!(!sandbox.path("notifications.jsonl").exists());
}

#[test]
fn status_is_a_dry_run() {
    let sandbox = Sandbox::new(20_000);
    let result = sandbox.run("status_dry_run", &["status"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result);
    assert_eq!(payload["command"], "status");
    assert_eq!(payload["outcome"], "would_notify");
    assert_eq!(payload["worst"], "critical");
    assert!(!sandbox.path("cooldown.json").exists());
    assert!(!sandbox.path("notifications.jsonl").exists());
}

#[test]
fn cooldown_show_and_clear() {
    let sandbox = Sandbox::new(19_000);

    let before = sandbox.run("cooldown_show_empty", &["cooldown", "show"]);
    assert!(before.status.success(), "log: {}", before.log_path.display());
    let payload = parse_json(&before);
    assert_eq!(payload["suppressed"], false);
    assert!(payload["last_notified_at"].is_null());

    let check = sandbox.run("cooldown_check", &["check"]);
    assert_eq!(parse_json(&check)["outcome"], "notified");

    let armed = sandbox.run("cooldown_show_armed", &["cooldown", "show"]);
    let payload = parse_json(&armed);
    assert_eq!(payload["suppressed"], true);
    assert!(payload["until"].is_string());
    assert_eq!(payload["gate"]["state"], "suppressed");

    let cleared = sandbox.run("cooldown_clear", &["cooldown", "clear"]);
    assert!(cleared.status.success(), "log: {}", cleared.log_path.display());
    assert_eq!(parse_json(&cleared)["cleared"], true);
    assert!(!sandbox.path("cooldown.json").exists());

    let again = sandbox.run("cooldown_check_again", &["check"]);
    assert_eq!(parse_json(&again)["outcome"], "notified");
}

#[test]
fn env_override_changes_thresholds() {
    let sandbox = Sandbox::new(19_000);
    let config = sandbox.config.to_string_lossy().to_string();
    let home = sandbox.root.to_string_lossy().to_string();
    let result = common::run_cli_case_with_env(
        "env_thresholds",
        &["--config", &config, "status"],
        &[
            ("HOME", &home),
            ("CQS_WARNING_PCT", "95"),
            ("CQS_CRITICAL_PCT", "99"),
            ("CQS_OUTPUT_FORMAT", "json"),
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result);
    assert_eq!(payload["outcome"], "healthy");
}

#[test]
fn invalid_env_override_is_rejected() {
    let sandbox = Sandbox::new(1_000);
    let config = sandbox.config.to_string_lossy().to_string();
    let result = common::run_cli_case_with_env(
        "env_invalid",
        &["--config", &config, "check"],
        &[("CQS_COOLDOWN_HOURS", "soon")],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
}
