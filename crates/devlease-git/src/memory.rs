use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};

use crate::{ConfigScope, GitConfig};

/// In-memory git configuration. Keys listed through [`MemoryGitConfig::fail_writes_to`]
/// reject `set` and `unset`, which lets callers exercise partial failures.
#[derive(Debug, Default)]
pub struct MemoryGitConfig {
    values: RefCell<BTreeMap<(ConfigScope, String), String>>,
    failing: RefCell<BTreeSet<String>>,
}

impl MemoryGitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, scope: ConfigScope, key: &str, value: &str) -> Self {
        self.values
            .borrow_mut()
            .insert((scope, key.to_string()), value.to_string());
        self
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.failing.borrow_mut().insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.borrow_mut().clear();
    }

    pub fn value(&self, scope: ConfigScope, key: &str) -> Option<String> {
        self.values
            .borrow()
            .get(&(scope, key.to_string()))
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<(ConfigScope, String), String> {
        self.values.borrow().clone()
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.failing.borrow().contains(key) {
            return Err(anyhow!("config write rejected for {key}"));
        }
        Ok(())
    }
}

impl GitConfig for MemoryGitConfig {
    fn get(&self, scope: ConfigScope, key: &str) -> Result<Option<String>> {
        Ok(self.value(scope, key))
    }

    fn set(&self, scope: ConfigScope, key: &str, value: &str) -> Result<()> {
        self.check_writable(key)?;
        self.values
            .borrow_mut()
            .insert((scope, key.to_string()), value.to_string());
        Ok(())
    }

    fn unset(&self, scope: ConfigScope, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.values.borrow_mut().remove(&(scope, key.to_string()));
        Ok(())
    }
}
