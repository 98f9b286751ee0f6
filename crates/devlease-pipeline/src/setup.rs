use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use devlease_core::{
    ensure_success, CommandSpec, DevleaseConfig, EntryKind, SetupPhase, SetupResult, Snapshot,
    WorkspaceLayout,
};
use devlease_git::{
    capture_config_state, git_command, remote_url_key, restore_config_state, ConfigKeys,
    ConfigScope, HOOKS_PATH_KEY,
};
use devlease_store::{DurableHandoff, SnapshotError};
use tracing::{error, info, info_span, warn};

use crate::hooks::{
    ensure_not_symlink, is_disabled, HooksPathRedirect, ScriptNeutralizer, HOOKS_PATH_SENTINEL,
};
use crate::identity::IdentityStep;
use crate::install::InstallDependencies;
use crate::lint::LintToolsDisable;
use crate::step::{ReversibleStep, StepContext, Workspace};

/// The fixed mutation order.
pub fn default_steps(token: Option<String>) -> Vec<Box<dyn ReversibleStep>> {
    vec![
        Box::new(HooksPathRedirect::new(ConfigScope::Local)),
        Box::new(HooksPathRedirect::new(ConfigScope::Global)),
        Box::new(ScriptNeutralizer),
        Box::new(IdentityStep::new(token)),
        Box::new(LintToolsDisable),
        Box::new(InstallDependencies),
    ]
}

/// Items captured before any mutation: the hooks directory, the package descriptor and
/// every lint config candidate.
pub fn capture_paths(
    layout: &WorkspaceLayout,
    config: &DevleaseConfig,
) -> Vec<(PathBuf, EntryKind)> {
    let mut paths = vec![
        (layout.hooks_dir(), EntryKind::Directory),
        (layout.package_json_path(), EntryKind::File),
    ];
    for candidate in &config.lint.config_candidates {
        paths.push((layout.workspace_path(candidate), EntryKind::File));
    }
    paths
}

pub struct SetupPipeline<'a> {
    workspace: Workspace<'a>,
    handoff: &'a DurableHandoff,
    steps: Vec<Box<dyn ReversibleStep>>,
    secret: Option<String>,
}

impl<'a> SetupPipeline<'a> {
    pub fn new(
        workspace: Workspace<'a>,
        handoff: &'a DurableHandoff,
        token: Option<String>,
    ) -> Self {
        Self {
            workspace,
            handoff,
            steps: default_steps(token.clone()),
            secret: token.filter(|token| !token.is_empty()),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Box<dyn ReversibleStep>>) -> Self {
        self.steps = steps;
        self
    }

    pub fn run(&self) -> SetupResult {
        let span = info_span!("setup", workdir = %self.workspace.layout.root().display());
        let _guard = span.enter();

        if let Err(err) = self.validate() {
            error!("setup precondition failed: {err:#}");
            return SetupResult::failed(SetupPhase::Validating, self.scrub(format!("{err:#}")));
        }

        let mut rollback_errors = Vec::new();
        let snapshot = match self.capture(&mut rollback_errors) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("setup capture failed: {err:#}");
                let mut result =
                    SetupResult::failed(SetupPhase::Capturing, self.scrub(format!("{err:#}")));
                result.rollback_errors = rollback_errors;
                return result;
            }
        };

        if let Err(failure) = self.mutate(&snapshot) {
            error!("setup mutation failed: {failure}");
            let rollback_errors = self.roll_back(failure.completed, snapshot);
            let mut result = SetupResult::failed(SetupPhase::Mutating, failure.message);
            if !rollback_errors.is_empty() {
                result
                    .warnings
                    .push("rollback incomplete; run `devlease cleanup` to retry".to_string());
            }
            result.rollback_errors = rollback_errors;
            return result;
        }

        let warnings = self.verify();
        for warning in &warnings {
            warn!("{warning}");
        }
        info!(snapshot = snapshot.id(), "environment ready");
        SetupResult {
            success: true,
            environment_ready: true,
            phase: SetupPhase::Succeeded,
            failed_phase: None,
            snapshot: Some(snapshot.handle()),
            errors: Vec::new(),
            rollback_errors: Vec::new(),
            warnings,
        }
    }

    fn validate(&self) -> Result<()> {
        let root = self.workspace.layout.root();
        let metadata = fs::metadata(root)
            .with_context(|| format!("working directory {} is not accessible", root.display()))?;
        if !metadata.is_dir() {
            bail!("working directory {} is not a directory", root.display());
        }
        fs::read_dir(root)
            .with_context(|| format!("working directory {} is not readable", root.display()))?;

        let version = git_command(root).arg("--version");
        self.workspace
            .runner
            .run(&version)
            .and_then(|output| ensure_success(&version, output))
            .context("git is not available")?;

        ensure_not_symlink(&self.workspace.layout.hooks_dir())?;

        if self
            .handoff
            .is_pending()
            .context("failed reading the cleanup handoff")?
        {
            bail!("a previous setup is still pending; run `devlease cleanup` first");
        }
        Ok(())
    }

    fn capture(&self, rollback_errors: &mut Vec<String>) -> Result<Snapshot> {
        let _span = info_span!("capture").entered();
        let ws = &self.workspace;

        let mut snapshot = match ws.store.capture(&capture_paths(ws.layout, ws.config)) {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::Capture {
                path,
                partial,
                source,
            }) => {
                if let Err(err) = ws.store.discard(*partial) {
                    rollback_errors.push(err.to_string());
                }
                return Err(anyhow::Error::new(source)
                    .context(format!("failed to capture {}", path.display())));
            }
            Err(err) => return Err(err.into()),
        };

        let keys = ConfigKeys::new(ws.config.identity.remote.clone())
            .with_extra(ws.config.identity.settings.keys().cloned());
        let attached = capture_config_state(ws.git, &keys).and_then(|state| {
            snapshot.attach_config_state(state);
            ws.store.persist_manifest(&snapshot)?;
            self.handoff.write(&snapshot)
        });

        if let Err(err) = attached {
            if let Err(clear_err) = self.handoff.clear() {
                rollback_errors.push(format!("{clear_err:#}"));
            }
            if let Err(discard_err) = ws.store.discard(snapshot) {
                rollback_errors.push(discard_err.to_string());
            }
            return Err(err);
        }
        Ok(snapshot)
    }

    fn mutate<'s>(&'s self, snapshot: &Snapshot) -> Result<(), MutationFailure<'s>> {
        let ctx = StepContext {
            workspace: self.workspace,
            snapshot: Some(snapshot),
        };

        let mut completed: Vec<&dyn ReversibleStep> = Vec::new();
        for step in &self.steps {
            let _span = info_span!("step", name = step.name()).entered();
            // the failing step may have half-applied; its inverse is idempotent
            completed.push(step.as_ref());
            match step.apply(&ctx) {
                Ok(()) => info!("step applied"),
                Err(err) => {
                    return Err(MutationFailure {
                        message: self.scrub(format!("{}: {err:#}", step.name())),
                        completed,
                    });
                }
            }
        }
        Ok(())
    }

    fn roll_back(&self, completed: Vec<&dyn ReversibleStep>, snapshot: Snapshot) -> Vec<String> {
        let _span = info_span!("rollback").entered();
        let mut errors = Vec::new();

        {
            let ctx = StepContext {
                workspace: self.workspace,
                snapshot: Some(&snapshot),
            };
            for step in completed.iter().rev() {
                if let Err(err) = step.revert(&ctx) {
                    warn!(step = step.name(), "revert failed: {err:#}");
                    errors.push(self.scrub(format!("revert {}: {err:#}", step.name())));
                }
            }
        }

        let config_state = snapshot.config_state().cloned();
        if let Err(err) = self.workspace.store.restore(snapshot) {
            errors.extend(err.messages());
        }
        if let Some(state) = config_state {
            errors.extend(
                restore_config_state(self.workspace.git, &state)
                    .into_messages()
                    .into_iter()
                    .map(|message| self.scrub(message)),
            );
        }
        if !errors.is_empty() {
            // a later cleanup can retry whatever did not come back
            warn!(count = errors.len(), "rollback finished with errors; keeping the handoff");
            return errors;
        }
        if let Err(err) = self.handoff.clear() {
            errors.push(format!("{err:#}"));
        }
        info!("rolled back to the captured state");
        errors
    }

    fn verify(&self) -> Vec<String> {
        let _span = info_span!("verify").entered();
        let ws = &self.workspace;
        let mut warnings = Vec::new();

        let hooks_dir = ws.layout.hooks_dir();
        if !is_disabled(&hooks_dir) {
            warnings.push(format!(
                "hooks in {} are not fully disabled",
                hooks_dir.display()
            ));
        }

        for scope in [ConfigScope::Local, ConfigScope::Global] {
            match ws.git.get(scope, HOOKS_PATH_KEY) {
                Ok(Some(value)) if value == HOOKS_PATH_SENTINEL => {}
                Ok(other) => warnings.push(format!(
                    "core.hooksPath ({}) is {}, expected {HOOKS_PATH_SENTINEL}",
                    scope.as_str(),
                    other.as_deref().unwrap_or("unset")
                )),
                Err(err) => warnings.push(format!(
                    "could not read core.hooksPath ({}): {err:#}",
                    scope.as_str()
                )),
            }
        }

        if let Some(warning) = self.access_check() {
            warnings.push(self.scrub(warning));
        }
        warnings
    }

    fn access_check(&self) -> Option<String> {
        let ws = &self.workspace;
        let root = ws.layout.root();
        let spec = match &ws.config.verify.access_check {
            Some(command) => {
                let (program, args) = command.split_first()?;
                CommandSpec::new(program.as_str())
                    .args(args.iter().cloned())
                    .current_dir(root)
            }
            None => {
                let remote = &ws.config.identity.remote;
                match ws.git.get(ConfigScope::Local, &remote_url_key(remote)) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        return Some(format!(
                            "no remote '{remote}' configured; skipping access check"
                        ))
                    }
                    Err(err) => {
                        return Some(format!("could not read remote '{remote}': {err:#}"))
                    }
                }
                git_command(root).args([
                    "push",
                    "--dry-run",
                    "--no-verify",
                    remote.as_str(),
                    "HEAD",
                ])
            }
        };

        let result = ws
            .runner
            .run(&spec)
            .and_then(|output| ensure_success(&spec, output));
        match result {
            Ok(_) => {
                info!("access check passed");
                None
            }
            Err(err) => Some(format!("access check failed: {err:#}")),
        }
    }

    fn scrub(&self, message: String) -> String {
        match &self.secret {
            Some(secret) => message.replace(secret.as_str(), "***"),
            None => message,
        }
    }
}

struct MutationFailure<'s> {
    message: String,
    completed: Vec<&'s dyn ReversibleStep>,
}

impl std::fmt::Display for MutationFailure<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
