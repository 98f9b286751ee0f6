use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::layout::WorkspaceLayout;

pub const CONFIG_FILE_NAME: &str = "devlease.toml";

const DEFAULT_FABRICATED_HOOKS: &[&str] = &["pre-commit", "commit-msg", "pre-push"];

const DEFAULT_LINT_CONFIG_CANDIDATES: &[&str] = &[
    "commitlint.config.js",
    "commitlint.config.cjs",
    "commitlint.config.mjs",
    "commitlint.config.ts",
    ".commitlintrc",
    ".commitlintrc.json",
    ".commitlintrc.yml",
    ".commitlintrc.yaml",
    ".commitlintrc.js",
    ".commitlintrc.cjs",
    ".lintstagedrc",
    ".lintstagedrc.json",
    ".lintstagedrc.yml",
    ".lintstagedrc.yaml",
    ".lintstagedrc.js",
    ".lintstagedrc.cjs",
    ".lintstagedrc.mjs",
    "lint-staged.config.js",
    "lint-staged.config.cjs",
    "lint-staged.config.mjs",
];

const DEFAULT_PACKAGE_KEYS: &[&str] = &["lint-staged", "commitlint", "husky"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevleaseConfig {
    pub hooks: HooksConfig,
    pub identity: IdentityConfig,
    pub lint: LintConfig,
    pub install: InstallConfig,
    pub snapshot: SnapshotConfig,
    pub handoff: HandoffConfig,
    pub cleanup: CleanupConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HooksConfig {
    pub dir: PathBuf,
    pub fabricate: Vec<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".husky"),
            fabricate: to_strings(DEFAULT_FABRICATED_HOOKS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
    pub remote: String,
    pub token_env: Option<String>,
    pub settings: BTreeMap<String, String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "devlease-agent".to_string(),
            email: "devlease-agent@users.noreply.github.com".to_string(),
            remote: "origin".to_string(),
            token_env: None,
            settings: BTreeMap::from([("commit.gpgsign".to_string(), "false".to_string())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LintConfig {
    pub config_candidates: Vec<String>,
    pub package_keys: Vec<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            config_candidates: to_strings(DEFAULT_LINT_CONFIG_CANDIDATES),
            package_keys: to_strings(DEFAULT_PACKAGE_KEYS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallConfig {
    pub enabled: bool,
    pub command: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            env: BTreeMap::from([
                ("CI".to_string(), "true".to_string()),
                ("HUSKY".to_string(), "0".to_string()),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    pub root: Option<PathBuf>,
    pub max_age: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_age: "7d".to_string(),
        }
    }
}

impl SnapshotConfig {
    pub fn max_age(&self) -> Result<Duration> {
        humantime::parse_duration(self.max_age.trim())
            .with_context(|| format!("invalid snapshot.max_age '{}'", self.max_age))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffBackend {
    #[default]
    File,
    Actions,
}

impl HandoffBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Actions => "actions",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandoffConfig {
    pub backend: HandoffBackend,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupConfig {
    pub full_restore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    pub access_check: Option<Vec<String>>,
}

impl DevleaseConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse devlease config")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit` when given, otherwise `devlease.toml` in the working directory,
    /// otherwise the defaults.
    pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = workdir.join(CONFIG_FILE_NAME);
                if !candidate.is_file() {
                    tracing::debug!(
                        "no {CONFIG_FILE_NAME} in {}, using defaults",
                        workdir.display()
                    );
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config file: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn layout_for(&self, workdir: impl Into<PathBuf>) -> WorkspaceLayout {
        WorkspaceLayout::new(workdir)
            .with_hooks_dir(self.hooks.dir.clone())
            .with_snapshot_root(self.snapshot.root.clone())
            .with_handoff_path(self.handoff.path.clone())
    }

    fn validate(&self) -> Result<()> {
        validate_hooks_dir(&self.hooks.dir)?;
        for name in &self.hooks.fabricate {
            validate_file_name("hooks.fabricate", name)?;
        }
        for name in &self.lint.config_candidates {
            validate_relative_path("lint.config_candidates", Path::new(name))?;
        }
        for key in &self.lint.package_keys {
            if key.trim().is_empty() {
                return Err(anyhow!("lint.package_keys must not contain empty keys"));
            }
        }
        if self.identity.remote.trim().is_empty() {
            return Err(anyhow!("identity.remote must not be empty"));
        }
        for key in self.identity.settings.keys() {
            if !key.contains('.') {
                return Err(anyhow!(
                    "identity.settings key '{key}' must be a section-qualified git config key"
                ));
            }
        }
        if let Some(command) = &self.install.command {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("install.command must name a program"));
            }
        }
        if let Some(command) = &self.verify.access_check {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("verify.access_check must name a program"));
            }
        }
        self.snapshot.max_age()?;
        Ok(())
    }
}

fn validate_relative_path(field: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("{field} must not be empty"));
    }
    if path
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(anyhow!(
            "{field} must be a relative path inside the working directory: {}",
            path.display()
        ));
    }
    if !path
        .components()
        .any(|component| matches!(component, Component::Normal(_)))
    {
        return Err(anyhow!(
            "{field} must name an entry below the working directory: {}",
            path.display()
        ));
    }
    Ok(())
}

/// The hooks directory is neutralized and copied wholesale, so it may not be the working
/// directory itself or sit inside devlease's own state.
fn validate_hooks_dir(path: &Path) -> Result<()> {
    validate_relative_path("hooks.dir", path)?;
    let normal = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect::<Vec<_>>();
    if normal.len() >= 2 && normal[0] == ".git" && normal[1] == "devlease" {
        return Err(anyhow!(
            "hooks.dir must not point into devlease state: {}",
            path.display()
        ));
    }
    Ok(())
}

fn validate_file_name(field: &str, name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(anyhow!("{field} contains an invalid name: '{name}'"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(anyhow!("{field} entries must be plain file names: '{name}'"));
    }
    Ok(())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
