use devlease_core::CleanupResult;
use devlease_git::{ConfigScope, HOOKS_PATH_KEY};
use tracing::{debug, info, info_span, warn};

use crate::hooks::{restore_hooks_dir, HooksRestore};
use crate::lint::enable_lint_tools;
use crate::step::Workspace;

/// Best-effort restore without any snapshot. Every sub-step runs regardless of the others
/// and problems are reported as warnings; this never fails.
pub fn run_emergency_cleanup(workspace: &Workspace<'_>) -> CleanupResult {
    let span = info_span!("emergency_cleanup", workdir = %workspace.layout.root().display());
    let _guard = span.enter();

    let mut result = CleanupResult {
        success: true,
        emergency: true,
        ..CleanupResult::default()
    };

    for scope in [ConfigScope::Local, ConfigScope::Global] {
        if let Err(err) = workspace.git.unset(scope, HOOKS_PATH_KEY) {
            result.warnings.push(format!(
                "failed unsetting {HOOKS_PATH_KEY} ({}): {err:#}",
                scope.as_str()
            ));
        }
    }

    match restore_hooks_dir(workspace, None) {
        Ok(HooksRestore::FromBackup) => {
            result.restored = true;
            info!("hooks restored from sibling backup");
        }
        Ok(_) => debug!("no hooks backup to restore"),
        Err(err) => result
            .warnings
            .push(format!("failed restoring hooks directory: {err:#}")),
    }

    let lint = enable_lint_tools(workspace.layout, &workspace.config.lint);
    result.warnings.extend(lint.into_messages());

    result.warnings.extend(sweep_expired(workspace));

    for warning in &result.warnings {
        warn!("{warning}");
    }
    info!(restored = result.restored, "emergency cleanup finished");
    result
}

/// Deletes snapshots older than the configured maximum age. Returns warnings only.
pub(crate) fn sweep_expired(workspace: &Workspace<'_>) -> Vec<String> {
    let max_age = match workspace.config.snapshot.max_age() {
        Ok(max_age) => max_age,
        Err(err) => return vec![format!("{err:#}")],
    };
    match workspace.store.expire(max_age) {
        Ok(report) => report.failures.into_messages(),
        Err(err) => vec![format!("failed sweeping expired snapshots: {err}")],
    }
}
