mod error;
mod fs_ops;
mod handoff;
mod snapshot_store;

pub use error::{EntryFailure, SnapshotError};
pub use fs_ops::{copy_tree, path_kind, remove_path};
pub use handoff::{
    ActionsStateStore, DurableHandoff, FileKeyValueStore, HandoffRecord, HandoffState,
    KeyValueStore, KEY_BACKUP_LOCATION, KEY_CLEANUP_REQUIRED, KEY_SNAPSHOT,
};
pub use snapshot_store::{
    ExpireReport, RestoreReport, SnapshotStore, MANIFEST_FILE_NAME, SNAPSHOT_DIR_PREFIX,
};

#[cfg(test)]
mod tests;
