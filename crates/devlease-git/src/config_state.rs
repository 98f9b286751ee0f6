use anyhow::{Context, Result};
use devlease_core::{ConfigState, Outcome};
use tracing::debug;

use crate::{ConfigScope, GitConfig};

pub const USER_NAME_KEY: &str = "user.name";
pub const USER_EMAIL_KEY: &str = "user.email";
pub const HOOKS_PATH_KEY: &str = "core.hooksPath";

/// Which keys to capture besides the fixed identity and hooks keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigKeys {
    pub remote: String,
    pub extra: Vec<String>,
}

impl ConfigKeys {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_extra<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(keys.into_iter().map(Into::into));
        self
    }
}

pub fn remote_url_key(remote: &str) -> String {
    format!("remote.{remote}.url")
}

pub fn capture_config_state(git: &dyn GitConfig, keys: &ConfigKeys) -> Result<ConfigState> {
    let read = |scope: ConfigScope, key: &str| {
        git.get(scope, key)
            .with_context(|| format!("failed capturing git config {key}"))
    };

    let mut state = ConfigState {
        user_name: read(ConfigScope::Local, USER_NAME_KEY)?,
        user_email: read(ConfigScope::Local, USER_EMAIL_KEY)?,
        hooks_path: read(ConfigScope::Local, HOOKS_PATH_KEY)?,
        global_hooks_path: read(ConfigScope::Global, HOOKS_PATH_KEY)?,
        remote_name: keys.remote.clone(),
        remote_url: read(ConfigScope::Local, &remote_url_key(&keys.remote))?,
        extra: Default::default(),
    };
    for key in &keys.extra {
        let value = read(ConfigScope::Local, key)?;
        state.extra.insert(key.clone(), value);
    }

    debug!(extra = state.extra.len(), "captured git config state");
    Ok(state)
}

/// Writes every captured value back. Present values are set and absent ones unset; a
/// failing key does not stop the remaining ones.
pub fn restore_config_state(git: &dyn GitConfig, state: &ConfigState) -> Outcome {
    let remote_key = remote_url_key(&state.remote_name);
    let named = [
        (ConfigScope::Local, USER_NAME_KEY, &state.user_name),
        (ConfigScope::Local, USER_EMAIL_KEY, &state.user_email),
        (ConfigScope::Local, HOOKS_PATH_KEY, &state.hooks_path),
        (ConfigScope::Global, HOOKS_PATH_KEY, &state.global_hooks_path),
        (ConfigScope::Local, remote_key.as_str(), &state.remote_url),
    ];

    let mut outcome = Outcome::new();
    for (scope, key, value) in named {
        restore_key(git, &mut outcome, scope, key, value.as_deref());
    }
    for (key, value) in &state.extra {
        restore_key(git, &mut outcome, ConfigScope::Local, key, value.as_deref());
    }
    outcome
}

fn restore_key(
    git: &dyn GitConfig,
    outcome: &mut Outcome,
    scope: ConfigScope,
    key: &str,
    value: Option<&str>,
) {
    outcome.record(
        format!("{key} ({})", scope.as_str()),
        restore_config_value(git, scope, key, value),
    );
}

/// Sets `key` to `value`, or unsets it when `value` is `None`.
pub fn restore_config_value(
    git: &dyn GitConfig,
    scope: ConfigScope,
    key: &str,
    value: Option<&str>,
) -> Result<()> {
    match value {
        Some(value) => git.set(scope, key, value),
        None => git.unset(scope, key),
    }
}
