use std::path::{Path, PathBuf};

use super::*;

#[test]
fn parse_full_config() {
    let content = r#"
[hooks]
dir = "tools/hooks"
fabricate = ["pre-commit"]

[identity]
name = "release-bot"
email = "release-bot@example.test"
remote = "upstream"
token_env = "BOT_TOKEN"

[identity.settings]
"commit.gpgsign" = "false"
"tag.gpgsign" = "false"

[lint]
config_candidates = [".commitlintrc.json"]
package_keys = ["lint-staged"]

[install]
enabled = true
command = ["pnpm", "install", "--frozen-lockfile"]

[install.env]
HUSKY = "0"

[snapshot]
root = "/var/tmp/devlease"
max_age = "36h"

[handoff]
backend = "actions"

[cleanup]
full_restore = true

[verify]
access_check = ["git", "ls-remote", "--exit-code", "upstream"]
"#;

    let config = DevleaseConfig::from_toml_str(content).expect("config should parse");
    assert_eq!(config.hooks.dir, PathBuf::from("tools/hooks"));
    assert_eq!(config.hooks.fabricate, vec!["pre-commit"]);
    assert_eq!(config.identity.remote, "upstream");
    assert_eq!(config.identity.token_env.as_deref(), Some("BOT_TOKEN"));
    assert_eq!(
        config.identity.settings.get("tag.gpgsign").map(String::as_str),
        Some("false")
    );
    assert_eq!(
        config.install.command,
        Some(vec![
            "pnpm".to_string(),
            "install".to_string(),
            "--frozen-lockfile".to_string()
        ])
    );
    assert_eq!(config.install.env.len(), 1);
    assert_eq!(
        config.snapshot.max_age().expect("valid duration").as_secs(),
        36 * 3600
    );
    assert_eq!(config.handoff.backend, HandoffBackend::Actions);
    assert!(config.cleanup.full_restore);
    assert_eq!(
        config.verify.access_check.as_ref().map(Vec::len),
        Some(4)
    );
}

#[test]
fn empty_config_uses_defaults() {
    let config = DevleaseConfig::from_toml_str("").expect("empty config should parse");
    assert_eq!(config, DevleaseConfig::default());
    assert_eq!(config.hooks.dir, PathBuf::from(".husky"));
    assert_eq!(
        config.hooks.fabricate,
        vec!["pre-commit", "commit-msg", "pre-push"]
    );
    assert_eq!(config.handoff.backend, HandoffBackend::File);
    assert!(!config.cleanup.full_restore);
    assert!(config.install.enabled);
    assert_eq!(
        config.install.env.get("HUSKY").map(String::as_str),
        Some("0")
    );
    assert_eq!(
        config.snapshot.max_age().expect("default max age").as_secs(),
        7 * 24 * 3600
    );
}

#[test]
fn reject_unknown_config_fields() {
    let err = DevleaseConfig::from_toml_str("[hooks]\ndirectory = \".husky\"\n")
        .expect_err("unknown field should fail");
    assert!(err.to_string().contains("failed to parse devlease config"));
}

#[test]
fn reject_hooks_dir_escaping_workdir() {
    let err = DevleaseConfig::from_toml_str("[hooks]\ndir = \"../elsewhere\"\n")
        .expect_err("parent dir should fail");
    assert!(
        err.to_string().contains("hooks.dir must be a relative path"),
        "unexpected error: {err}"
    );
}

#[test]
fn reject_hooks_dir_that_is_the_workdir_itself() {
    for dir in [".", "./.", "./"] {
        let err = DevleaseConfig::from_toml_str(&format!("[hooks]\ndir = \"{dir}\"\n"))
            .expect_err("workdir as hooks dir should fail");
        assert!(
            err.to_string().contains("must name an entry below the working directory"),
            "unexpected error for {dir}: {err}"
        );
    }
}

#[test]
fn reject_hooks_dir_inside_devlease_state() {
    let err = DevleaseConfig::from_toml_str("[hooks]\ndir = \"./.git/devlease/hooks\"\n")
        .expect_err("state dir should fail");
    assert!(err.to_string().contains("devlease state"), "unexpected error: {err}");

    let config = DevleaseConfig::from_toml_str("[hooks]\ndir = \"./tools/./hooks\"\n")
        .expect("nested hooks dir is fine");
    assert_eq!(config.hooks.dir, PathBuf::from("./tools/./hooks"));
}

#[test]
fn reject_fabricated_hook_with_separator() {
    let err = DevleaseConfig::from_toml_str("[hooks]\nfabricate = [\"nested/pre-commit\"]\n")
        .expect_err("nested hook name should fail");
    assert!(err.to_string().contains("plain file names"));
}

#[test]
fn reject_invalid_max_age() {
    let err = DevleaseConfig::from_toml_str("[snapshot]\nmax_age = \"soon\"\n")
        .expect_err("bad duration should fail");
    assert!(err.to_string().contains("invalid snapshot.max_age 'soon'"));
}

#[test]
fn reject_empty_install_command() {
    let err = DevleaseConfig::from_toml_str("[install]\ncommand = []\n")
        .expect_err("empty command should fail");
    assert!(err.to_string().contains("install.command must name a program"));
}

#[test]
fn reject_unqualified_identity_setting() {
    let err = DevleaseConfig::from_toml_str("[identity.settings]\ngpgsign = \"false\"\n")
        .expect_err("unqualified key should fail");
    assert!(err.to_string().contains("section-qualified"));
}

#[test]
fn layout_paths_follow_config() {
    let config = DevleaseConfig::from_toml_str("[hooks]\ndir = \"githooks\"\n").expect("parse");
    let layout = config.layout_for("/work/repo");
    assert_eq!(layout.hooks_dir(), PathBuf::from("/work/repo/githooks"));
    assert_eq!(
        layout.hooks_backup_dir(),
        PathBuf::from("/work/repo/githooks.devlease-backup")
    );
    assert_eq!(
        layout.package_json_path(),
        PathBuf::from("/work/repo/package.json")
    );
}

#[test]
fn layout_state_dir_falls_back_to_temp_without_git_dir() {
    let layout = WorkspaceLayout::new("/nonexistent/devlease/repo");
    assert_eq!(layout.state_dir(), std::env::temp_dir().join("devlease"));
    let handoff = layout.handoff_path();
    assert!(handoff.starts_with(std::env::temp_dir().join("devlease")));
    let name = handoff
        .file_name()
        .and_then(|name| name.to_str())
        .expect("utf8 name");
    assert!(name.starts_with("handoff-") && name.ends_with(".json"));
}

#[test]
fn layout_relative_snapshot_root_is_anchored_to_workdir() {
    let layout = WorkspaceLayout::new("/work/repo").with_snapshot_root(Some("backups".into()));
    assert_eq!(layout.snapshots_dir(), Path::new("/work/repo/backups"));
}

#[test]
fn sha256_hex_matches_known_digest() {
    assert_eq!(
        sha256_hex(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(
        sha256_hex(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn outcome_hard_failure_only_when_everything_failed() {
    let mut outcome = Outcome::new();
    assert!(!outcome.is_hard_failure());

    outcome.record("first", Ok::<(), anyhow::Error>(()));
    outcome.fail("second", "boom");
    assert!(!outcome.is_hard_failure());
    assert!(!outcome.is_clean());
    assert_eq!(outcome.attempted(), 2);

    let mut all_failed = Outcome::new();
    all_failed.record::<()>("only", Err(anyhow::anyhow!("nope")));
    assert!(all_failed.is_hard_failure());
    assert_eq!(all_failed.into_messages(), vec!["only: nope".to_string()]);
}

#[test]
fn outcome_merge_accumulates_attempts_and_failures() {
    let mut left = Outcome::new();
    left.fail("a", "x");
    let mut right = Outcome::new();
    right.record("b", Ok::<(), anyhow::Error>(()));
    left.merge(right);
    assert_eq!(left.attempted(), 2);
    assert_eq!(left.failures().len(), 1);
    assert!(!left.is_hard_failure());
}

#[test]
fn snapshot_well_formed_requires_stored_paths_inside_location() {
    let mut snapshot = Snapshot::new("abc", 1, "/snapshots/snapshot-abc");
    snapshot.push_entry(SnapshotEntry {
        original_path: PathBuf::from("/repo/.husky"),
        stored_path: Some(PathBuf::from("/snapshots/snapshot-abc/items/0-.husky")),
        kind: EntryKind::Directory,
        existed: true,
        checksum: None,
    });
    snapshot.push_entry(SnapshotEntry {
        original_path: PathBuf::from("/repo/.commitlintrc"),
        stored_path: None,
        kind: EntryKind::File,
        existed: false,
        checksum: None,
    });
    assert!(snapshot.is_well_formed());

    snapshot.push_entry(SnapshotEntry {
        original_path: PathBuf::from("/repo/package.json"),
        stored_path: Some(PathBuf::from("/elsewhere/package.json")),
        kind: EntryKind::File,
        existed: true,
        checksum: Some("00".to_string()),
    });
    assert!(!snapshot.is_well_formed());
}

#[test]
fn command_spec_display_joins_program_and_args() {
    let spec = CommandSpec::new("git")
        .args(["config", "--get"])
        .arg("core.hooksPath")
        .env("GIT_TERMINAL_PROMPT", "0");
    assert_eq!(spec.display(), "git config --get core.hooksPath");
    assert_eq!(
        spec.envs.get("GIT_TERMINAL_PROMPT").map(String::as_str),
        Some("0")
    );
}

#[test]
fn ensure_success_reports_exit_code_and_stderr() {
    let spec = CommandSpec::new("npm").arg("ci");
    let err = ensure_success(
        &spec,
        CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "lockfile out of date\n".to_string(),
        },
    )
    .expect_err("non-zero exit should fail");
    assert_eq!(
        err.to_string(),
        "npm ci failed (exit=1): lockfile out of date"
    );
}
