use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use devlease_core::{LintConfig, Outcome, WorkspaceLayout};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::step::{outcome_into_result, ReversibleStep, StepContext};

pub const DISABLED_FILE_SUFFIX: &str = ".devlease-disabled";
pub const DISABLED_PACKAGE_KEY_PREFIX: &str = "//devlease-disabled:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Disable,
    Enable,
}

pub struct LintToolsDisable;

impl ReversibleStep for LintToolsDisable {
    fn name(&self) -> &str {
        "disable-lint-tools"
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let outcome = disable_lint_tools(ctx.workspace.layout, &ctx.workspace.config.lint);
        outcome_into_result("failed disabling lint tools", outcome)
    }

    fn revert(&self, ctx: &StepContext<'_>) -> Result<()> {
        let outcome = enable_lint_tools(ctx.workspace.layout, &ctx.workspace.config.lint);
        outcome_into_result("failed re-enabling lint tools", outcome)
    }
}

fn disabled_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(DISABLED_FILE_SUFFIX);
    PathBuf::from(name)
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Renames config candidates aside and hides the lint keys in `package.json`.
pub fn disable_lint_tools(layout: &WorkspaceLayout, config: &LintConfig) -> Outcome {
    let mut outcome = Outcome::new();
    for candidate in &config.config_candidates {
        let path = layout.workspace_path(candidate);
        if !exists(&path) {
            continue;
        }
        let target = disabled_path(&path);
        let result = if exists(&target) {
            Err(anyhow!("{} already exists", target.display()))
        } else {
            fs::rename(&path, &target)
                .with_context(|| format!("failed renaming {}", path.display()))
        };
        if outcome.record(candidate.clone(), result).is_some() {
            debug!(file = candidate.as_str(), "lint config disabled");
        }
    }

    rewrite_package_keys(layout, config, Direction::Disable, &mut outcome);
    if outcome.attempted() > 0 {
        info!(
            attempted = outcome.attempted(),
            failed = outcome.failures().len(),
            "lint tools disabled"
        );
    }
    outcome
}

/// Undoes [`disable_lint_tools`] using only the marker names, so it needs no snapshot.
pub fn enable_lint_tools(layout: &WorkspaceLayout, config: &LintConfig) -> Outcome {
    let mut outcome = Outcome::new();
    for candidate in &config.config_candidates {
        let path = layout.workspace_path(candidate);
        let disabled = disabled_path(&path);
        if !exists(&disabled) {
            continue;
        }
        let result = if exists(&path) {
            Err(anyhow!(
                "{} exists; refusing to overwrite it with {}",
                path.display(),
                disabled.display()
            ))
        } else {
            fs::rename(&disabled, &path)
                .with_context(|| format!("failed renaming {}", disabled.display()))
        };
        if outcome.record(candidate.clone(), result).is_some() {
            debug!(file = candidate.as_str(), "lint config re-enabled");
        }
    }

    rewrite_package_keys(layout, config, Direction::Enable, &mut outcome);
    outcome
}

fn rewrite_package_keys(
    layout: &WorkspaceLayout,
    config: &LintConfig,
    direction: Direction,
    outcome: &mut Outcome,
) {
    let path = layout.package_json_path();
    if !path.is_file() {
        return;
    }
    match rename_package_keys(&path, &config.package_keys, direction) {
        Ok(0) => {}
        Ok(renamed) => {
            outcome.record("package.json", Ok(()));
            debug!(renamed, ?direction, "package.json lint keys rewritten");
        }
        Err(err) => {
            outcome.record::<()>("package.json", Err(err));
        }
    }
}

fn rename_package_keys(path: &Path, keys: &[String], direction: Direction) -> Result<usize> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let mut document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    let Some(object) = document.as_object_mut() else {
        bail!("{} is not a JSON object", path.display());
    };

    let present = object.keys().cloned().collect::<BTreeSet<_>>();
    let mut renamed = 0;
    let mut rebuilt = Map::with_capacity(object.len());
    for (key, value) in std::mem::take(object) {
        let target = match direction {
            Direction::Disable => keys
                .contains(&key)
                .then(|| format!("{DISABLED_PACKAGE_KEY_PREFIX}{key}")),
            Direction::Enable => key
                .strip_prefix(DISABLED_PACKAGE_KEY_PREFIX)
                .map(str::to_string),
        };
        match target {
            Some(target) if !present.contains(&target) => {
                renamed += 1;
                rebuilt.insert(target, value);
            }
            _ => {
                rebuilt.insert(key, value);
            }
        }
    }
    *object = rebuilt;

    if renamed > 0 {
        let mut content = serde_json::to_string_pretty(&document)
            .with_context(|| format!("failed serializing {}", path.display()))?;
        content.push('\n');
        fs::write(path, content).with_context(|| format!("failed writing {}", path.display()))?;
    }
    Ok(renamed)
}
