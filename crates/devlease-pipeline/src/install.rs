use std::path::Path;

use anyhow::{bail, Result};
use devlease_core::{ensure_success, CommandSpec};
use tracing::{debug, info};

use crate::step::{ReversibleStep, StepContext};

// First match wins.
const LOCKFILE_COMMANDS: &[(&str, &[&str])] = &[
    ("pnpm-lock.yaml", &["pnpm", "install", "--frozen-lockfile"]),
    ("yarn.lock", &["yarn", "install", "--frozen-lockfile"]),
    ("bun.lock", &["bun", "install", "--frozen-lockfile"]),
    ("bun.lockb", &["bun", "install", "--frozen-lockfile"]),
    ("package-lock.json", &["npm", "ci"]),
    ("npm-shrinkwrap.json", &["npm", "ci"]),
];

/// Picks the install command from the lockfile present in `root`. Falls back to
/// `npm install` when only `package.json` exists, and to nothing otherwise.
pub fn detect_install_command(root: &Path) -> Option<Vec<String>> {
    for (lockfile, command) in LOCKFILE_COMMANDS {
        if root.join(lockfile).is_file() {
            return Some(command.iter().map(|part| part.to_string()).collect());
        }
    }
    if root.join("package.json").is_file() {
        return Some(vec!["npm".to_string(), "install".to_string()]);
    }
    None
}

/// Runs the package manager. Installed dependencies are kept, so the inverse does
/// nothing.
pub struct InstallDependencies;

impl ReversibleStep for InstallDependencies {
    fn name(&self) -> &str {
        "install-dependencies"
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let install = &ctx.workspace.config.install;
        if !install.enabled {
            debug!("dependency install disabled");
            return Ok(());
        }

        let root = ctx.workspace.layout.root();
        let Some(command) = install
            .command
            .clone()
            .or_else(|| detect_install_command(root))
        else {
            debug!("no package manifest; skipping dependency install");
            return Ok(());
        };
        let Some((program, args)) = command.split_first() else {
            bail!("install command is empty");
        };

        let spec = CommandSpec::new(program.as_str())
            .args(args.iter().cloned())
            .envs(&install.env)
            .current_dir(root);
        info!(command = %spec.display(), "installing dependencies");
        let output = ctx.workspace.runner.run(&spec)?;
        ensure_success(&spec, output)?;
        Ok(())
    }

    fn revert(&self, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }
}
