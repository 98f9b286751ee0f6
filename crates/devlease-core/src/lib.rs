mod checksum;
mod config;
mod layout;
mod outcome;
mod process;
mod types;

pub use checksum::{sha256_file_hex, sha256_hex};
pub use config::{
    CleanupConfig, DevleaseConfig, HandoffBackend, HandoffConfig, HooksConfig, IdentityConfig,
    InstallConfig, LintConfig, SnapshotConfig, VerifyConfig, CONFIG_FILE_NAME,
};
pub use layout::{WorkspaceLayout, HOOKS_BACKUP_SUFFIX};
pub use outcome::{ItemFailure, Outcome};
pub use process::{ensure_success, CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use types::{
    current_unix_timestamp, CleanupResult, ConfigState, EntryKind, SetupPhase, SetupResult,
    Snapshot, SnapshotEntry, SnapshotHandle, SNAPSHOT_FORMAT_VERSION,
};

#[cfg(test)]
mod tests;
