use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub original_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<PathBuf>,
    pub kind: EntryKind,
    /// False when nothing existed at `original_path` at capture time; restoring such an
    /// entry removes whatever is there by then.
    pub existed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigState {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub hooks_path: Option<String>,
    pub global_hooks_path: Option<String>,
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
    pub remote_url: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Option<String>>,
}

fn default_remote_name() -> String {
    "origin".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub id: String,
    pub location: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u32,
    id: String,
    created_at_unix: u64,
    location: PathBuf,
    entries: Vec<SnapshotEntry>,
    #[serde(default)]
    config_state: Option<ConfigState>,
}

impl Snapshot {
    pub fn new(id: impl Into<String>, created_at_unix: u64, location: impl Into<PathBuf>) -> Self {
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            id: id.into(),
            created_at_unix,
            location: location.into(),
            entries: Vec::new(),
            config_state: None,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at_unix(&self) -> u64 {
        self.created_at_unix
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn entry_for(&self, original_path: &Path) -> Option<&SnapshotEntry> {
        self.entries
            .iter()
            .find(|entry| entry.original_path == original_path)
    }

    pub fn push_entry(&mut self, entry: SnapshotEntry) {
        self.entries.push(entry);
    }

    pub fn config_state(&self) -> Option<&ConfigState> {
        self.config_state.as_ref()
    }

    pub fn attach_config_state(&mut self, state: ConfigState) {
        self.config_state = Some(state);
    }

    pub fn handle(&self) -> SnapshotHandle {
        SnapshotHandle {
            id: self.id.clone(),
            location: self.location.clone(),
        }
    }

    /// Structural checks applied to snapshots read back from untrusted storage.
    pub fn is_well_formed(&self) -> bool {
        if self.version != SNAPSHOT_FORMAT_VERSION || self.id.trim().is_empty() {
            return false;
        }
        self.entries.iter().all(|entry| match &entry.stored_path {
            Some(stored) => entry.existed && stored.starts_with(&self.location),
            None => !entry.existed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    Validating,
    Capturing,
    Mutating,
    Verifying,
    Succeeded,
    RollingBack,
    Failed,
}

impl SetupPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Capturing => "capturing",
            Self::Mutating => "mutating",
            Self::Verifying => "verifying",
            Self::Succeeded => "succeeded",
            Self::RollingBack => "rolling_back",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupResult {
    pub success: bool,
    pub environment_ready: bool,
    pub phase: SetupPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<SetupPhase>,
    pub snapshot: Option<SnapshotHandle>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub rollback_errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SetupResult {
    pub fn failed(failed_phase: SetupPhase, error: impl Into<String>) -> Self {
        Self {
            success: false,
            environment_ready: false,
            phase: SetupPhase::Failed,
            failed_phase: Some(failed_phase),
            snapshot: None,
            errors: vec![error.into()],
            rollback_errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub success: bool,
    pub restored: bool,
    pub emergency: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CleanupResult {
    pub fn nothing_to_do() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
