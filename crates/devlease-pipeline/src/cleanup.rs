use anyhow::{anyhow, Context, Result};
use devlease_core::{CleanupResult, Outcome, Snapshot};
use devlease_git::{restore_config_state, ConfigScope, HOOKS_PATH_KEY};
use devlease_store::{DurableHandoff, HandoffRecord, HandoffState, SnapshotError};
use tracing::{error, info, info_span, warn};

use crate::emergency::{run_emergency_cleanup, sweep_expired};
use crate::hooks::{marked_scripts, restore_hooks_dir};
use crate::lint::enable_lint_tools;
use crate::step::Workspace;

/// Undoes a previous setup using only what the handoff recorded.
///
/// `Err` means the record itself could not be obtained; everything after that point is
/// reported through the returned result instead.
pub fn run_cleanup(
    workspace: &Workspace<'_>,
    handoff: &DurableHandoff,
    full_restore: bool,
) -> Result<CleanupResult> {
    let span = info_span!("cleanup", workdir = %workspace.layout.root().display());
    let _guard = span.enter();

    let record = match handoff.read().context("cleanup handoff is unreadable")? {
        HandoffState::Clean => {
            info!("no pending setup; nothing to clean up");
            return Ok(CleanupResult::nothing_to_do());
        }
        HandoffState::Pending(record) => record,
    };
    let snapshot = resolve_snapshot(workspace, record)?;
    info!(snapshot = snapshot.id(), full_restore, "restoring environment");

    let mut result = CleanupResult {
        restored: true,
        ..CleanupResult::default()
    };
    let mut hard_failure = false;
    let mut apply = |outcome: Outcome, result: &mut CleanupResult| {
        hard_failure |= outcome.is_hard_failure();
        result.errors.extend(outcome.into_messages());
    };

    apply(restore_config(workspace, &snapshot), &mut result);

    // an incomplete setup rollback already put the files back and consumed the location
    let files_present = snapshot.location().is_dir();
    if !files_present {
        warn!(
            location = %snapshot.location().display(),
            "snapshot files already restored; retrying config and hooks only"
        );
    }

    let mut hooks = Outcome::new();
    hooks.record(
        "hooks directory",
        restore_hooks_dir(workspace, files_present.then_some(&snapshot)),
    );
    apply(hooks, &mut result);
    for script in marked_scripts(&workspace.layout.hooks_dir()) {
        result
            .warnings
            .push(format!("hook still disabled: {}", script.display()));
    }

    apply(
        enable_lint_tools(workspace.layout, &workspace.config.lint),
        &mut result,
    );

    let settled = if !files_present {
        Ok(())
    } else if full_restore {
        workspace.store.restore(snapshot).map(|_| ())
    } else {
        workspace.store.discard(snapshot)
    };
    if let Err(err) = settled {
        apply(snapshot_outcome(err), &mut result);
    }

    if let Err(err) = handoff.clear() {
        result.warnings.push(format!("{err:#}"));
    }
    result.warnings.extend(sweep_expired(workspace));

    result.success = !hard_failure;
    if result.success {
        info!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "cleanup finished"
        );
    } else {
        error!(errors = result.errors.len(), "cleanup finished with hard failures");
    }
    Ok(result)
}

/// Runs cleanup, falling back to emergency cleanup when the handoff record cannot be
/// used. The handoff is cleared after the fallback so it does not repeat.
pub fn run_cleanup_with_fallback(
    workspace: &Workspace<'_>,
    handoff: &DurableHandoff,
    full_restore: bool,
) -> CleanupResult {
    let cause = match run_cleanup(workspace, handoff, full_restore) {
        Ok(result) => return result,
        Err(err) => err,
    };

    warn!("cleanup record unavailable, running emergency cleanup: {cause:#}");
    let mut result = run_emergency_cleanup(workspace);
    result.success = false;
    result
        .errors
        .insert(0, format!("cleanup record unavailable: {cause:#}"));
    if let Err(err) = handoff.clear() {
        result.errors.push(format!("{err:#}"));
    }
    result
}

fn resolve_snapshot(workspace: &Workspace<'_>, record: HandoffRecord) -> Result<Snapshot> {
    if let Some(snapshot) = record.snapshot {
        return Ok(snapshot);
    }
    let embedded = record
        .snapshot_error
        .unwrap_or_else(|| "no snapshot recorded".to_string());
    let location = record.location.ok_or_else(|| {
        anyhow!("handoff has no usable snapshot ({embedded}) and no backup location")
    })?;
    workspace.store.load_manifest(&location).with_context(|| {
        format!(
            "handoff has no usable snapshot ({embedded}); manifest at {} is unreadable",
            location.display()
        )
    })
}

fn restore_config(workspace: &Workspace<'_>, snapshot: &Snapshot) -> Outcome {
    if let Some(state) = snapshot.config_state() {
        return restore_config_state(workspace.git, state);
    }
    warn!("snapshot carries no config state; only unsetting core.hooksPath");
    let mut outcome = Outcome::new();
    for scope in [ConfigScope::Local, ConfigScope::Global] {
        outcome.record(
            format!("{HOOKS_PATH_KEY} ({})", scope.as_str()),
            workspace.git.unset(scope, HOOKS_PATH_KEY),
        );
    }
    outcome
}

fn snapshot_outcome(err: SnapshotError) -> Outcome {
    let mut outcome = Outcome::new();
    match err {
        SnapshotError::Restore { failures, total } => {
            for _ in failures.len()..total {
                outcome.record("snapshot entry", Ok(()));
            }
            for failure in failures {
                outcome.fail(failure.path.display().to_string(), failure.message);
            }
        }
        other => outcome.fail("snapshot", other.to_string()),
    }
    outcome
}
