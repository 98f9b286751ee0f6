use anyhow::Result;

mod config_state;
mod git_cli;
mod memory;
mod redact;

pub use config_state::{
    capture_config_state, remote_url_key, restore_config_state, restore_config_value, ConfigKeys,
    HOOKS_PATH_KEY, USER_EMAIL_KEY, USER_NAME_KEY,
};
pub use git_cli::{git_command, GitCli};
pub use memory::MemoryGitConfig;
pub use redact::redact_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigScope {
    Local,
    Global,
}

impl ConfigScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
        }
    }

    pub fn flag(&self) -> &'static str {
        match self {
            Self::Local => "--local",
            Self::Global => "--global",
        }
    }
}

/// Get/set/unset access to git configuration at one scope.
///
/// `get` returns `None` for an unset key. `unset` on a key that is already unset
/// succeeds.
pub trait GitConfig {
    fn get(&self, scope: ConfigScope, key: &str) -> Result<Option<String>>;
    fn set(&self, scope: ConfigScope, key: &str, value: &str) -> Result<()>;
    fn unset(&self, scope: ConfigScope, key: &str) -> Result<()>;
}
