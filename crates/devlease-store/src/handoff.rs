use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use devlease_core::Snapshot;
use tracing::{debug, info, warn};

pub const KEY_CLEANUP_REQUIRED: &str = "cleanup_required";
pub const KEY_BACKUP_LOCATION: &str = "backup_location";
pub const KEY_SNAPSHOT: &str = "snapshot";

/// Persistence that outlives the process writing to it.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// A JSON object on disk. Every write goes through a temp file and a rename so a crash
/// never leaves a torn record behind.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading handoff file: {}", self.path.display())
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing handoff file: {}", self.path.display()))
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if values.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).with_context(|| {
                    format!("failed removing handoff file: {}", self.path.display())
                })?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(values)
            .with_context(|| "failed serializing handoff values")?;
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, content)
            .with_context(|| format!("failed writing handoff file: {}", staged.display()))?;
        fs::rename(&staged, &self.path).with_context(|| {
            format!(
                "failed moving handoff file into place: {}",
                self.path.display()
            )
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = match self.load() {
            Ok(values) => values,
            Err(err) if self.path.is_file() => {
                warn!(
                    "discarding unreadable handoff file {}: {err:#}",
                    self.path.display()
                );
                return fs::remove_file(&self.path).with_context(|| {
                    format!("failed removing handoff file: {}", self.path.display())
                });
            }
            Err(err) => return Err(err),
        };
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

/// GitHub Actions step state. Writes go to the file named by `GITHUB_STATE`; the runner
/// hands them back to the post step as `STATE_<key>` environment variables, so values
/// written in this process are not visible to `get` until the next invocation.
#[derive(Debug, Clone)]
pub struct ActionsStateStore {
    state_file: Option<PathBuf>,
    inherited: BTreeMap<String, String>,
}

impl ActionsStateStore {
    pub fn new(state_file: Option<PathBuf>, inherited: BTreeMap<String, String>) -> Self {
        Self {
            state_file,
            inherited,
        }
    }

    pub fn from_env() -> Self {
        let state_file = std::env::var_os("GITHUB_STATE")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let inherited = std::env::vars()
            .filter_map(|(name, value)| {
                name.strip_prefix("STATE_")
                    .map(|key| (key.to_string(), value))
            })
            .collect();
        Self::new(state_file, inherited)
    }

    fn append(&self, key: &str, value: &str) -> Result<()> {
        let path = self
            .state_file
            .as_ref()
            .ok_or_else(|| anyhow!("GITHUB_STATE is not set; cannot persist step state"))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open step state file: {}", path.display()))?;
        let line = if value.contains('\n') {
            let delimiter = format!("devlease_{}", uuid::Uuid::new_v4().simple());
            format!("{key}<<{delimiter}\n{value}\n{delimiter}\n")
        } else {
            format!("{key}={value}\n")
        };
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append step state: {}", path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush step state: {}", path.display()))
    }
}

impl KeyValueStore for ActionsStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .inherited
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.append(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.append(key, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRecord {
    pub location: Option<PathBuf>,
    pub snapshot: Option<Snapshot>,
    /// Why the embedded snapshot could not be used, when it was present but invalid.
    pub snapshot_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Clean,
    Pending(HandoffRecord),
}

pub struct DurableHandoff {
    store: Box<dyn KeyValueStore>,
}

impl DurableHandoff {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn from_boxed(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The flag goes last so a set flag always has a location and snapshot behind it.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let serialized =
            serde_json::to_string(snapshot).with_context(|| "failed serializing snapshot")?;
        self.store
            .set(KEY_BACKUP_LOCATION, &snapshot.location().display().to_string())?;
        self.store.set(KEY_SNAPSHOT, &serialized)?;
        self.store.set(KEY_CLEANUP_REQUIRED, "true")?;
        info!(snapshot = snapshot.id(), "handoff recorded");
        Ok(())
    }

    pub fn is_pending(&self) -> Result<bool> {
        Ok(self.store.get(KEY_CLEANUP_REQUIRED)?.as_deref() == Some("true"))
    }

    pub fn read(&self) -> Result<HandoffState> {
        if !self.is_pending()? {
            return Ok(HandoffState::Clean);
        }

        let location = self
            .store
            .get(KEY_BACKUP_LOCATION)?
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let (snapshot, snapshot_error) = match self.store.get(KEY_SNAPSHOT)? {
            None => (None, Some("no snapshot recorded".to_string())),
            Some(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot) if snapshot.is_well_formed() => (Some(snapshot), None),
                Ok(_) => (None, Some("snapshot failed structural checks".to_string())),
                Err(err) => (None, Some(format!("snapshot unparsable: {err}"))),
            },
        };
        if let Some(reason) = &snapshot_error {
            debug!("handoff snapshot unusable: {reason}");
        }

        Ok(HandoffState::Pending(HandoffRecord {
            location,
            snapshot,
            snapshot_error,
        }))
    }

    /// Removes all three keys, attempting each even if an earlier one fails.
    pub fn clear(&self) -> Result<()> {
        let mut failures = Vec::new();
        for key in [KEY_CLEANUP_REQUIRED, KEY_SNAPSHOT, KEY_BACKUP_LOCATION] {
            if let Err(err) = self.store.remove(key) {
                failures.push(format!("{key}: {err:#}"));
            }
        }
        if !failures.is_empty() {
            return Err(anyhow!("failed clearing handoff: {}", failures.join("; ")));
        }
        debug!("handoff cleared");
        Ok(())
    }
}
