use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use devlease_core::Snapshot;
use devlease_git::{ConfigScope, HOOKS_PATH_KEY};
use devlease_store::{copy_tree, remove_path};
use tracing::{debug, info};

use crate::step::{ReversibleStep, StepContext, Workspace};

pub const DISABLED_MARKER: &str = "devlease: hook disabled";

pub const NOOP_HOOK_BODY: &str =
    "#!/usr/bin/env sh\n# devlease: hook disabled; restored by `devlease cleanup`\nexit 0\n";

#[cfg(windows)]
pub const HOOKS_PATH_SENTINEL: &str = "NUL";
#[cfg(not(windows))]
pub const HOOKS_PATH_SENTINEL: &str = "/dev/null";

/// Points `core.hooksPath` at the null device for one scope.
pub struct HooksPathRedirect {
    scope: ConfigScope,
    name: String,
}

impl HooksPathRedirect {
    pub fn new(scope: ConfigScope) -> Self {
        Self {
            scope,
            name: format!("redirect-hooks-{}", scope.as_str()),
        }
    }
}

impl ReversibleStep for HooksPathRedirect {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.workspace
            .git
            .set(self.scope, HOOKS_PATH_KEY, HOOKS_PATH_SENTINEL)
    }

    fn revert(&self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.workspace.git.unset(self.scope, HOOKS_PATH_KEY)
    }
}

/// Replaces every hook script with a no-op after copying the originals aside.
pub struct ScriptNeutralizer;

impl ReversibleStep for ScriptNeutralizer {
    fn name(&self) -> &str {
        "neutralize-hook-scripts"
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let layout = ctx.workspace.layout;
        let hooks_dir = layout.hooks_dir();
        let backup_dir = layout.hooks_backup_dir();
        ensure_not_symlink(&hooks_dir)?;

        // A leftover backup already holds the true originals.
        if hooks_dir.is_dir() && !backup_dir.exists() {
            copy_tree(&hooks_dir, &backup_dir).with_context(|| {
                format!(
                    "failed backing up {} to {}",
                    hooks_dir.display(),
                    backup_dir.display()
                )
            })?;
        }

        fs::create_dir_all(&hooks_dir)
            .with_context(|| format!("failed to create {}", hooks_dir.display()))?;

        let existing = hook_scripts(&hooks_dir)
            .with_context(|| format!("failed listing hooks in {}", hooks_dir.display()))?;
        for script in &existing {
            write_noop_hook(script)?;
        }

        let mut fabricated = 0;
        for name in &ctx.workspace.config.hooks.fabricate {
            let path = hooks_dir.join(name);
            if fs::symlink_metadata(&path).is_err() {
                write_noop_hook(&path)?;
                fabricated += 1;
            }
        }

        info!(
            neutralized = existing.len(),
            fabricated,
            dir = %hooks_dir.display(),
            "hook scripts disabled"
        );
        Ok(())
    }

    fn revert(&self, ctx: &StepContext<'_>) -> Result<()> {
        restore_hooks_dir(&ctx.workspace, ctx.snapshot).map(|_| ())
    }
}

/// Fails when `hooks_dir` is a symlink. Snapshots and the sibling backup only keep the
/// link itself, so scripts behind it could not be restored.
pub(crate) fn ensure_not_symlink(hooks_dir: &Path) -> Result<()> {
    let linked = fs::symlink_metadata(hooks_dir)
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(false);
    if linked {
        bail!(
            "hooks directory {} is a symlink; point hooks.dir at the real directory",
            hooks_dir.display()
        );
    }
    Ok(())
}

fn write_noop_hook(path: &Path) -> Result<()> {
    // never write through a symlinked hook into its target
    if fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(false)
    {
        remove_path(path).with_context(|| format!("failed replacing {}", path.display()))?;
    }
    fs::write(path, NOOP_HOOK_BODY)
        .with_context(|| format!("failed writing no-op hook {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("failed marking {} executable", path.display()))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HooksRestore {
    FromSnapshot,
    FromBackup,
    Nothing,
}

/// Puts the hooks directory back wholesale, preferring the snapshot entry over the
/// sibling backup. The sibling backup is removed either way.
pub fn restore_hooks_dir(
    workspace: &Workspace<'_>,
    snapshot: Option<&Snapshot>,
) -> Result<HooksRestore> {
    let hooks_dir = workspace.layout.hooks_dir();
    let backup_dir = workspace.layout.hooks_backup_dir();

    let from_snapshot = match snapshot {
        Some(snapshot) => workspace.store.restore_entry(snapshot, &hooks_dir)?,
        None => false,
    };

    let restored = if from_snapshot {
        HooksRestore::FromSnapshot
    } else if backup_dir.is_dir() {
        remove_path(&hooks_dir)
            .with_context(|| format!("failed removing {}", hooks_dir.display()))?;
        fs::rename(&backup_dir, &hooks_dir).with_context(|| {
            format!(
                "failed moving {} back to {}",
                backup_dir.display(),
                hooks_dir.display()
            )
        })?;
        HooksRestore::FromBackup
    } else {
        HooksRestore::Nothing
    };

    remove_path(&backup_dir)
        .with_context(|| format!("failed removing {}", backup_dir.display()))?;
    debug!(?restored, dir = %hooks_dir.display(), "hooks directory restored");
    Ok(restored)
}

/// Top-level hook scripts in `dir`, sorted. Subdirectories are not scripts.
pub fn hook_scripts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            scripts.push(entry.path());
        }
    }
    scripts.sort();
    Ok(scripts)
}

fn carries_marker(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|content| content.contains(DISABLED_MARKER))
        .unwrap_or(false)
}

/// True when `dir` holds at least one script and every script carries the marker.
///
/// An empty or missing directory reports `false`: with nothing to neutralize there is no
/// evidence that neutralization ran, and fabricated hooks always leave at least one script.
pub fn is_disabled(dir: &Path) -> bool {
    match hook_scripts(dir) {
        Ok(scripts) => !scripts.is_empty() && scripts.iter().all(|path| carries_marker(path)),
        Err(_) => false,
    }
}

pub fn marked_scripts(dir: &Path) -> Vec<PathBuf> {
    hook_scripts(dir)
        .unwrap_or_default()
        .into_iter()
        .filter(|path| carries_marker(path))
        .collect()
}
