use anyhow::{anyhow, Result};
use devlease_core::{CommandRunner, DevleaseConfig, Outcome, Snapshot, WorkspaceLayout};
use devlease_git::GitConfig;
use devlease_store::SnapshotStore;

/// Everything the pipelines touch in one working directory.
#[derive(Clone, Copy)]
pub struct Workspace<'a> {
    pub layout: &'a WorkspaceLayout,
    pub config: &'a DevleaseConfig,
    pub git: &'a dyn GitConfig,
    pub runner: &'a dyn CommandRunner,
    pub store: &'a SnapshotStore,
}

pub struct StepContext<'a> {
    pub workspace: Workspace<'a>,
    /// The snapshot taken before any mutation. Absent only when a step is reverted
    /// outside a setup run.
    pub snapshot: Option<&'a Snapshot>,
}

/// A forward mutation paired with its inverse. Both directions must be idempotent.
pub trait ReversibleStep {
    fn name(&self) -> &str;
    fn apply(&self, ctx: &StepContext<'_>) -> Result<()>;
    fn revert(&self, ctx: &StepContext<'_>) -> Result<()>;
}

pub(crate) fn outcome_into_result(what: &str, outcome: Outcome) -> Result<()> {
    if outcome.is_clean() {
        return Ok(());
    }
    Err(anyhow!("{what}: {}", outcome.into_messages().join("; ")))
}
