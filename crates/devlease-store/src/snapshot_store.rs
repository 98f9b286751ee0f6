use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use devlease_core::{
    current_unix_timestamp, sha256_file_hex, EntryKind, Outcome, Snapshot, SnapshotEntry,
};
use tracing::{debug, info, warn};

use crate::error::{EntryFailure, SnapshotError};
use crate::fs_ops::{copy_tree, remove_path};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const SNAPSHOT_DIR_PREFIX: &str = "snapshot-";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExpireReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    pub failures: Outcome,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(location: &Path) -> PathBuf {
        location.join(MANIFEST_FILE_NAME)
    }

    /// Copies every existing path into a fresh `snapshot-<id>` location and records
    /// missing paths as absent entries.
    pub fn capture(&self, paths: &[(PathBuf, EntryKind)]) -> Result<Snapshot, SnapshotError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let location = self.root.join(format!("{SNAPSHOT_DIR_PREFIX}{id}"));

        fs::create_dir_all(&self.root)
            .and_then(|_| fs::create_dir(&location))
            .map_err(|source| SnapshotError::CreateLocation {
                location: location.clone(),
                source,
            })?;

        let mut snapshot = Snapshot::new(id, current_unix_timestamp(), &location);
        let items_dir = location.join("items");

        for (index, (original, expected_kind)) in paths.iter().enumerate() {
            let metadata = match fs::symlink_metadata(original) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %original.display(), "capture: path absent");
                    snapshot.push_entry(SnapshotEntry {
                        original_path: original.clone(),
                        stored_path: None,
                        kind: *expected_kind,
                        existed: false,
                        checksum: None,
                    });
                    continue;
                }
                Err(source) => {
                    return Err(SnapshotError::Capture {
                        path: original.clone(),
                        partial: Box::new(snapshot),
                        source,
                    });
                }
            };

            let file_name = original
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "item".to_string());
            let stored = items_dir.join(format!("{index:02}-{file_name}"));
            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            let copied = copy_tree(original, &stored).and_then(|_| {
                if metadata.is_file() {
                    sha256_file_hex(&stored).map(Some)
                } else {
                    Ok(None)
                }
            });
            let checksum = match copied {
                Ok(checksum) => checksum,
                Err(source) => {
                    let _ = remove_path(&stored);
                    return Err(SnapshotError::Capture {
                        path: original.clone(),
                        partial: Box::new(snapshot),
                        source,
                    });
                }
            };

            debug!(
                path = %original.display(),
                kind = kind.as_str(),
                "capture: stored item"
            );
            snapshot.push_entry(SnapshotEntry {
                original_path: original.clone(),
                stored_path: Some(stored),
                kind,
                existed: true,
                checksum,
            });
        }

        if let Err(err) = self.persist_manifest(&snapshot) {
            return Err(SnapshotError::Capture {
                path: Self::manifest_path(&location),
                partial: Box::new(snapshot),
                source: io::Error::other(err.to_string()),
            });
        }

        info!(
            snapshot = snapshot.id(),
            entries = snapshot.entries().len(),
            "captured snapshot"
        );
        Ok(snapshot)
    }

    pub fn persist_manifest(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        let path = Self::manifest_path(snapshot.location());
        let content =
            serde_json::to_string_pretty(snapshot).map_err(|err| SnapshotError::Manifest {
                path: path.clone(),
                message: err.to_string(),
            })?;
        let staged = path.with_extension("json.tmp");
        fs::write(&staged, content)
            .and_then(|_| fs::rename(&staged, &path))
            .map_err(|err| SnapshotError::Manifest {
                path: path.clone(),
                message: err.to_string(),
            })?;
        Ok(path)
    }

    pub fn load_manifest(&self, location: &Path) -> Result<Snapshot, SnapshotError> {
        let path = Self::manifest_path(location);
        let raw = fs::read_to_string(&path).map_err(|err| SnapshotError::NotFound {
            location: location.to_path_buf(),
            reason: err.to_string(),
        })?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|err| SnapshotError::NotFound {
                location: location.to_path_buf(),
                reason: format!("unparsable manifest: {err}"),
            })?;
        if !snapshot.is_well_formed() {
            return Err(SnapshotError::NotFound {
                location: location.to_path_buf(),
                reason: "manifest failed structural checks".to_string(),
            });
        }
        Ok(snapshot)
    }

    /// Restores every entry, continuing past individual failures. The location is only
    /// deleted when all entries came back.
    pub fn restore(&self, snapshot: Snapshot) -> Result<RestoreReport, SnapshotError> {
        let mut report = RestoreReport::default();
        let mut failures = Vec::new();

        for entry in snapshot.entries() {
            match restore_entry_contents(entry) {
                Ok(()) if entry.existed => report.restored += 1,
                Ok(()) => report.removed += 1,
                Err(err) => {
                    warn!(path = %entry.original_path.display(), "restore failed: {err:#}");
                    failures.push(EntryFailure {
                        path: entry.original_path.clone(),
                        message: format!("{err:#}"),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(SnapshotError::Restore {
                total: snapshot.entries().len(),
                failures,
            });
        }

        remove_path(snapshot.location()).map_err(|source| SnapshotError::Io {
            path: snapshot.location().to_path_buf(),
            source,
        })?;
        info!(
            snapshot = snapshot.id(),
            restored = report.restored,
            removed = report.removed,
            "restored snapshot"
        );
        Ok(report)
    }

    /// Restores the single entry recorded for `original_path` without consuming the
    /// snapshot. Returns false when the snapshot has no such entry.
    pub fn restore_entry(
        &self,
        snapshot: &Snapshot,
        original_path: &Path,
    ) -> Result<bool, SnapshotError> {
        let Some(entry) = snapshot.entry_for(original_path) else {
            return Ok(false);
        };
        restore_entry_contents(entry).map_err(|err| SnapshotError::Restore {
            failures: vec![EntryFailure {
                path: entry.original_path.clone(),
                message: format!("{err:#}"),
            }],
            total: 1,
        })?;
        Ok(true)
    }

    pub fn discard(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        remove_path(snapshot.location()).map_err(|source| SnapshotError::Io {
            path: snapshot.location().to_path_buf(),
            source,
        })?;
        debug!(snapshot = snapshot.id(), "discarded snapshot");
        Ok(())
    }

    /// Deletes snapshot locations older than `max_age`. Age comes from the manifest when
    /// it is readable, otherwise from the directory mtime.
    pub fn expire(&self, max_age: Duration) -> Result<ExpireReport, SnapshotError> {
        let mut report = ExpireReport::default();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let now = current_unix_timestamp();
        for entry in entries {
            let entry = entry.map_err(|source| SnapshotError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            let is_snapshot_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false)
                && entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(SNAPSHOT_DIR_PREFIX);
            if !is_snapshot_dir {
                continue;
            }

            let created_at = match self.load_manifest(&path) {
                Ok(snapshot) => Some(snapshot.created_at_unix()),
                Err(_) => directory_mtime_unix(&path),
            };
            let Some(created_at) = created_at else {
                report.failures.fail(
                    path.display().to_string(),
                    "cannot determine snapshot age",
                );
                continue;
            };

            if now.saturating_sub(created_at) <= max_age.as_secs() {
                report.kept += 1;
                continue;
            }

            let removed = remove_path(&path)
                .with_context(|| format!("failed removing expired snapshot {}", path.display()));
            if report
                .failures
                .record(path.display().to_string(), removed)
                .is_some()
            {
                debug!(path = %path.display(), "expired snapshot removed");
                report.removed.push(path);
            }
        }

        if !report.removed.is_empty() {
            info!(removed = report.removed.len(), "expired old snapshots");
        }
        Ok(report)
    }
}

fn restore_entry_contents(entry: &SnapshotEntry) -> anyhow::Result<()> {
    let original = &entry.original_path;
    if !entry.existed {
        remove_path(original)
            .with_context(|| format!("failed removing {}", original.display()))?;
        return Ok(());
    }

    let stored = entry
        .stored_path
        .as_deref()
        .ok_or_else(|| anyhow!("entry has no stored copy"))?;
    if fs::symlink_metadata(stored).is_err() {
        return Err(anyhow!("stored copy missing: {}", stored.display()));
    }
    if let Some(expected) = &entry.checksum {
        let actual = sha256_file_hex(stored)
            .with_context(|| format!("failed hashing stored copy {}", stored.display()))?;
        if &actual != expected {
            return Err(anyhow!(
                "checksum mismatch for stored copy {} (expected={expected} actual={actual})",
                stored.display()
            ));
        }
    }

    remove_path(original).with_context(|| format!("failed removing {}", original.display()))?;
    copy_tree(stored, original).with_context(|| {
        format!(
            "failed copying {} back to {}",
            stored.display(),
            original.display()
        )
    })?;
    Ok(())
}

fn directory_mtime_unix(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs())
}
