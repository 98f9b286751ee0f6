use std::fmt;

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: String,
    pub message: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.message)
    }
}

/// Accumulates per-item results of a best-effort operation. Every item is attempted;
/// failures are collected instead of short-circuiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    attempted: usize,
    failures: Vec<ItemFailure>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&mut self, item: impl Into<String>, result: Result<T>) -> Option<T> {
        self.attempted += 1;
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.failures.push(ItemFailure {
                    item: item.into(),
                    message: format!("{err:#}"),
                });
                None
            }
        }
    }

    pub fn fail(&mut self, item: impl Into<String>, message: impl Into<String>) {
        self.attempted += 1;
        self.failures.push(ItemFailure {
            item: item.into(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: Outcome) {
        self.attempted += other.attempted;
        self.failures.extend(other.failures);
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Hard only when there was something to do and none of it worked.
    pub fn is_hard_failure(&self) -> bool {
        self.attempted > 0 && self.failures.len() == self.attempted
    }

    pub fn into_messages(self) -> Vec<String> {
        self.failures
            .into_iter()
            .map(|failure| failure.to_string())
            .collect()
    }
}
