use std::path::{Path, PathBuf};

use crate::checksum::sha256_hex;

pub const HOOKS_BACKUP_SUFFIX: &str = ".devlease-backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
    hooks_dir: PathBuf,
    snapshot_root: Option<PathBuf>,
    handoff_path: Option<PathBuf>,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hooks_dir: PathBuf::from(".husky"),
            snapshot_root: None,
            handoff_path: None,
        }
    }

    pub fn with_hooks_dir(mut self, relative: impl Into<PathBuf>) -> Self {
        self.hooks_dir = relative.into();
        self
    }

    pub fn with_snapshot_root(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot_root = path;
        self
    }

    pub fn with_handoff_path(mut self, path: Option<PathBuf>) -> Self {
        self.handoff_path = path;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> PathBuf {
        self.root.join(".git")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join(&self.hooks_dir)
    }

    pub fn hooks_backup_dir(&self) -> PathBuf {
        let hooks_dir = self.hooks_dir();
        let mut name = hooks_dir
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| ".husky".into());
        name.push(HOOKS_BACKUP_SUFFIX);
        hooks_dir.with_file_name(name)
    }

    pub fn package_json_path(&self) -> PathBuf {
        self.root.join("package.json")
    }

    pub fn workspace_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Directory holding devlease state for this working directory. Lives inside
    /// `.git` when possible so nothing shows up in `git status`.
    pub fn state_dir(&self) -> PathBuf {
        let git_dir = self.git_dir();
        if git_dir.is_dir() {
            return git_dir.join("devlease");
        }
        std::env::temp_dir().join("devlease")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        match &self.snapshot_root {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.root.join(path),
            None => self.state_dir().join("snapshots"),
        }
    }

    pub fn handoff_path(&self) -> PathBuf {
        if let Some(path) = &self.handoff_path {
            if path.is_absolute() {
                return path.clone();
            }
            return self.root.join(path);
        }

        if self.git_dir().is_dir() {
            return self.state_dir().join("handoff.json");
        }

        let digest = sha256_hex(self.root.display().to_string().as_bytes());
        self.state_dir().join(format!("handoff-{}.json", &digest[..16]))
    }
}
