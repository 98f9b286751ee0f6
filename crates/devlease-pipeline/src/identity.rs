use anyhow::{anyhow, Context, Result};
use devlease_core::{Outcome, Snapshot};
use devlease_git::{
    redact_url, remote_url_key, restore_config_value, ConfigScope, USER_EMAIL_KEY, USER_NAME_KEY,
};
use tracing::info;

use crate::step::{outcome_into_result, ReversibleStep, StepContext};

/// Sets the agent identity and, given a token, embeds it into an https remote URL.
pub struct IdentityStep {
    token: Option<String>,
}

impl IdentityStep {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|token| !token.is_empty()),
        }
    }
}

impl ReversibleStep for IdentityStep {
    fn name(&self) -> &str {
        "configure-identity"
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let git = ctx.workspace.git;
        let identity = &ctx.workspace.config.identity;

        git.set(ConfigScope::Local, USER_NAME_KEY, &identity.name)?;
        git.set(ConfigScope::Local, USER_EMAIL_KEY, &identity.email)?;
        for (key, value) in &identity.settings {
            git.set(ConfigScope::Local, key, value)?;
        }

        if let Some(token) = &self.token {
            let key = remote_url_key(&identity.remote);
            let current = git
                .get(ConfigScope::Local, &key)
                .with_context(|| format!("failed reading remote '{}'", identity.remote))?;
            match current.as_deref().and_then(|url| with_access_token(url, token)) {
                Some(url) => {
                    git.set(ConfigScope::Local, &key, &url)?;
                    info!(
                        remote = identity.remote.as_str(),
                        url = %redact_url(&url),
                        "remote authenticated"
                    );
                }
                None => info!(
                    remote = identity.remote.as_str(),
                    "remote is not https; token not applied"
                ),
            }
        }

        info!(name = identity.name.as_str(), "git identity configured");
        Ok(())
    }

    fn revert(&self, ctx: &StepContext<'_>) -> Result<()> {
        let state = ctx
            .snapshot
            .and_then(Snapshot::config_state)
            .ok_or_else(|| anyhow!("no captured config state to restore the identity from"))?;
        let git = ctx.workspace.git;

        let mut outcome = Outcome::new();
        let remote_key = remote_url_key(&state.remote_name);
        let named = [
            (USER_NAME_KEY, state.user_name.as_deref()),
            (USER_EMAIL_KEY, state.user_email.as_deref()),
            (remote_key.as_str(), state.remote_url.as_deref()),
        ];
        for (key, value) in named {
            outcome.record(key, restore_config_value(git, ConfigScope::Local, key, value));
        }
        for key in ctx.workspace.config.identity.settings.keys() {
            let value = state.extra.get(key).cloned().flatten();
            outcome.record(
                key.clone(),
                restore_config_value(git, ConfigScope::Local, key, value.as_deref()),
            );
        }
        outcome_into_result("failed restoring identity", outcome)
    }
}

/// Rewrites an `https://` URL to authenticate as `x-access-token`. Any existing
/// credentials in the URL are replaced. Returns `None` for other schemes.
pub fn with_access_token(url: &str, token: &str) -> Option<String> {
    let rest = url.strip_prefix("https://")?;
    let authority_len = rest.find('/').unwrap_or(rest.len());
    let host_and_path = match rest[..authority_len].rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    };
    Some(format!("https://x-access-token:{token}@{host_and_path}"))
}
