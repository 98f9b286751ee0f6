use std::fmt;
use std::io;
use std::path::PathBuf;

use devlease_core::Snapshot;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot manifest not found at {} ({reason})", .location.display())]
    NotFound { location: PathBuf, reason: String },

    #[error("failed to create snapshot location {}: {source}", .location.display())]
    CreateLocation {
        location: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Copying an existing item failed. `partial` holds what was captured so far so the
    /// caller can discard it.
    #[error("failed to capture {}: {source}", .path.display())]
    Capture {
        path: PathBuf,
        partial: Box<Snapshot>,
        #[source]
        source: io::Error,
    },

    #[error("failed to write snapshot manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("restore failed for {} of {total} entries", .failures.len())]
    Restore {
        failures: Vec<EntryFailure>,
        total: usize,
    },

    #[error("snapshot io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Flattens the error into reportable lines, one per failed entry where applicable.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Restore { failures, .. } => failures.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}
