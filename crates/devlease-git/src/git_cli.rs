use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use devlease_core::{ensure_success, CommandOutput, CommandRunner, CommandSpec};
use tracing::debug;

use crate::{ConfigScope, GitConfig};

// `git config --get` exits 1 when the key is unset.
const EXIT_KEY_UNSET: i32 = 1;
// `git config --unset-all` exits 5 when there is nothing to unset.
const EXIT_NOTHING_TO_UNSET: i32 = 5;

/// A `git` invocation rooted at `root` with line-ending conversion pinned off and
/// credential prompts disabled.
pub fn git_command(root: &Path) -> CommandSpec {
    let mut spec = CommandSpec::new("git")
        .args(["-c", "core.autocrlf=false", "-c", "core.eol=lf"])
        .env("GIT_TERMINAL_PROMPT", "0")
        .current_dir(root);
    if cfg!(windows) {
        spec = spec.args(["-c", "core.longpaths=true"]);
    }
    spec
}

/// `git` invoked through a [`CommandRunner`] from a fixed working directory.
pub struct GitCli<'a> {
    root: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> GitCli<'a> {
    pub fn new(root: impl Into<PathBuf>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_command(&self) -> CommandSpec {
        git_command(&self.root)
    }

    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.runner.run(spec)
    }

    /// Returns the `git --version` line.
    pub fn version(&self) -> Result<String> {
        let spec = self.base_command().arg("--version");
        let output = ensure_success(&spec, self.runner.run(&spec)?)?;
        Ok(output.stdout.trim().to_string())
    }

    fn config_command(&self, scope: ConfigScope) -> CommandSpec {
        self.base_command().arg("config").arg(scope.flag())
    }
}

impl GitConfig for GitCli<'_> {
    fn get(&self, scope: ConfigScope, key: &str) -> Result<Option<String>> {
        let spec = self.config_command(scope).arg("--get").arg(key);
        let output = self
            .runner
            .run(&spec)
            .with_context(|| format!("failed reading git config {key} ({})", scope.as_str()))?;
        match output.code {
            Some(0) => {
                let value = output.stdout.trim_end_matches(['\n', '\r']).to_string();
                Ok(Some(value))
            }
            Some(EXIT_KEY_UNSET) => Ok(None),
            _ => {
                ensure_success(&spec, output)?;
                Ok(None)
            }
        }
    }

    fn set(&self, scope: ConfigScope, key: &str, value: &str) -> Result<()> {
        let spec = self.config_command(scope).arg(key).arg(value);
        let output = self
            .runner
            .run(&spec)
            .with_context(|| format!("failed writing git config {key} ({})", scope.as_str()))?;
        if !output.success() {
            // the value may carry credentials, so only the key is reported
            anyhow::bail!(
                "git config {} {key} failed (exit={}): {}",
                scope.flag(),
                exit_label(&output),
                output.stderr.trim()
            );
        }
        debug!(key, scope = scope.as_str(), "git config set");
        Ok(())
    }

    fn unset(&self, scope: ConfigScope, key: &str) -> Result<()> {
        let spec = self.config_command(scope).arg("--unset-all").arg(key);
        let output = self
            .runner
            .run(&spec)
            .with_context(|| format!("failed unsetting git config {key} ({})", scope.as_str()))?;
        if output.code == Some(EXIT_NOTHING_TO_UNSET) {
            return Ok(());
        }
        ensure_success(&spec, output)?;
        debug!(key, scope = scope.as_str(), "git config unset");
        Ok(())
    }
}

fn exit_label(output: &CommandOutput) -> String {
    output
        .code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string())
}
