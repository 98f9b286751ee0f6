use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use devlease_core::{ConfigState, EntryKind, Snapshot};

use super::*;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "devlease-store-tests-{}-{nanos}-{seq}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("must chmod");
}

#[cfg(unix)]
fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).expect("must stat").permissions().mode() & 0o777
}

fn seed_workspace(workdir: &Path) {
    write_file(&workdir.join(".husky/pre-commit"), "#!/bin/sh\nnpx lint-staged\n");
    write_file(&workdir.join(".husky/commit-msg"), "#!/bin/sh\nnpx commitlint --edit $1\n");
    write_file(&workdir.join(".husky/_/husky.sh"), "# internal\n");
    write_file(
        &workdir.join("package.json"),
        "{\n  \"name\": \"demo\",\n  \"lint-staged\": {}\n}\n",
    );
    #[cfg(unix)]
    make_executable(&workdir.join(".husky/pre-commit"));
}

fn watched_paths(workdir: &Path) -> Vec<(PathBuf, EntryKind)> {
    vec![
        (workdir.join(".husky"), EntryKind::Directory),
        (workdir.join("package.json"), EntryKind::File),
        (workdir.join(".commitlintrc.json"), EntryKind::File),
    ]
}

#[test]
fn capture_then_restore_round_trip_is_byte_identical() {
    let root = test_root();
    let workdir = root.join("repo");
    seed_workspace(&workdir);
    let store = SnapshotStore::new(root.join("snapshots"));

    let snapshot = store
        .capture(&watched_paths(&workdir))
        .expect("capture must succeed");
    let location = snapshot.location().to_path_buf();
    assert!(location.join(MANIFEST_FILE_NAME).is_file());
    assert_eq!(snapshot.entries().len(), 3);
    assert!(snapshot
        .entries()
        .iter()
        .all(|entry| entry.stored_path.as_ref().map_or(true, |p| p.starts_with(&location))));

    let report = store.restore(snapshot).expect("restore must succeed");
    assert_eq!(report.restored, 2);
    assert_eq!(report.removed, 1);
    assert!(!location.exists(), "restore must delete the snapshot location");

    assert_eq!(
        fs::read_to_string(workdir.join(".husky/pre-commit")).expect("read"),
        "#!/bin/sh\nnpx lint-staged\n"
    );
    assert_eq!(
        fs::read_to_string(workdir.join(".husky/_/husky.sh")).expect("read"),
        "# internal\n"
    );
    assert_eq!(
        fs::read_to_string(workdir.join("package.json")).expect("read"),
        "{\n  \"name\": \"demo\",\n  \"lint-staged\": {}\n}\n"
    );
    assert!(!workdir.join(".commitlintrc.json").exists());
    #[cfg(unix)]
    assert_eq!(mode_of(&workdir.join(".husky/pre-commit")), 0o755);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn restore_undoes_mutations_made_after_capture() {
    let root = test_root();
    let workdir = root.join("repo");
    seed_workspace(&workdir);
    let store = SnapshotStore::new(root.join("snapshots"));
    let snapshot = store.capture(&watched_paths(&workdir)).expect("capture");

    write_file(&workdir.join(".husky/pre-commit"), "exit 0\n");
    write_file(&workdir.join(".husky/pre-push"), "exit 0\n");
    write_file(&workdir.join("package.json"), "{}\n");
    write_file(&workdir.join(".commitlintrc.json"), "{}\n");

    store.restore(snapshot).expect("restore");

    assert!(!workdir.join(".husky/pre-push").exists());
    assert_eq!(
        fs::read_to_string(workdir.join(".husky/pre-commit")).expect("read"),
        "#!/bin/sh\nnpx lint-staged\n"
    );
    assert!(!workdir.join(".commitlintrc.json").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn capture_records_absent_hooks_dir_so_restore_deletes_fabricated_hooks() {
    let root = test_root();
    let workdir = root.join("repo");
    fs::create_dir_all(&workdir).expect("mkdir");
    let store = SnapshotStore::new(root.join("snapshots"));

    let snapshot = store
        .capture(&[(workdir.join(".husky"), EntryKind::Directory)])
        .expect("capture");
    let entry = &snapshot.entries()[0];
    assert!(!entry.existed);
    assert!(entry.stored_path.is_none());
    assert_eq!(entry.kind, EntryKind::Directory);

    write_file(&workdir.join(".husky/pre-commit"), "exit 0\n");
    store.restore(snapshot).expect("restore");
    assert!(!workdir.join(".husky").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn restore_continues_past_checksum_mismatch_and_keeps_location() {
    let root = test_root();
    let workdir = root.join("repo");
    seed_workspace(&workdir);
    write_file(&workdir.join(".commitlintrc.json"), "{\"extends\": []}\n");
    let store = SnapshotStore::new(root.join("snapshots"));
    let snapshot = store.capture(&watched_paths(&workdir)).expect("capture");
    let location = snapshot.location().to_path_buf();

    let package_entry = snapshot
        .entry_for(&workdir.join("package.json"))
        .expect("package entry")
        .clone();
    write_file(
        package_entry.stored_path.as_deref().expect("stored path"),
        "tampered",
    );
    write_file(&workdir.join("package.json"), "{\"agent\": true}\n");
    write_file(&workdir.join(".husky/pre-commit"), "exit 0\n");
    write_file(&workdir.join(".commitlintrc.json"), "changed\n");

    let err = store
        .restore(snapshot)
        .expect_err("tampered entry must fail");
    match &err {
        SnapshotError::Restore { failures, total } => {
            assert_eq!(*total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, workdir.join("package.json"));
            assert!(failures[0].message.contains("checksum mismatch"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.messages().len(), 1);

    assert_eq!(
        fs::read_to_string(workdir.join("package.json")).expect("read"),
        "{\"agent\": true}\n",
        "a failed entry must leave the current file in place"
    );
    assert_eq!(
        fs::read_to_string(workdir.join(".husky/pre-commit")).expect("read"),
        "#!/bin/sh\nnpx lint-staged\n"
    );
    assert_eq!(
        fs::read_to_string(workdir.join(".commitlintrc.json")).expect("read"),
        "{\"extends\": []}\n"
    );
    assert!(location.exists(), "location is kept for a retry");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn load_manifest_round_trips_config_state() {
    let root = test_root();
    let workdir = root.join("repo");
    seed_workspace(&workdir);
    let store = SnapshotStore::new(root.join("snapshots"));
    let mut snapshot = store.capture(&watched_paths(&workdir)).expect("capture");

    let mut state = ConfigState {
        remote_name: "origin".to_string(),
        user_email: Some(String::new()),
        ..ConfigState::default()
    };
    state
        .extra
        .insert("commit.gpgsign".to_string(), Some("true".to_string()));
    state.extra.insert("tag.gpgsign".to_string(), None);
    snapshot.attach_config_state(state.clone());
    store.persist_manifest(&snapshot).expect("persist");

    let loaded = store
        .load_manifest(snapshot.location())
        .expect("manifest must load");
    assert_eq!(loaded, snapshot);
    let loaded_state = loaded.config_state().expect("config state");
    assert_eq!(loaded_state.user_email.as_deref(), Some(""));
    assert_eq!(loaded_state.user_name, None);
    assert_eq!(loaded_state.extra.get("tag.gpgsign"), Some(&None));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn load_manifest_reports_not_found_for_missing_or_garbage() {
    let root = test_root();
    let store = SnapshotStore::new(root.join("snapshots"));

    let missing = store
        .load_manifest(&root.join("snapshots/snapshot-missing"))
        .expect_err("missing manifest must fail");
    assert!(missing.is_not_found());

    let garbage_location = root.join("snapshots/snapshot-garbage");
    write_file(&garbage_location.join(MANIFEST_FILE_NAME), "{not json");
    let garbage = store
        .load_manifest(&garbage_location)
        .expect_err("garbage manifest must fail");
    assert!(garbage.is_not_found());
    assert!(garbage.to_string().contains("unparsable manifest"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn restore_entry_leaves_location_for_full_restore() {
    let root = test_root();
    let workdir = root.join("repo");
    seed_workspace(&workdir);
    let store = SnapshotStore::new(root.join("snapshots"));
    let snapshot = store.capture(&watched_paths(&workdir)).expect("capture");

    write_file(&workdir.join(".husky/pre-commit"), "exit 0\n");
    write_file(&workdir.join("package.json"), "{}\n");

    let restored = store
        .restore_entry(&snapshot, &workdir.join(".husky"))
        .expect("entry restore");
    assert!(restored);
    assert_eq!(
        fs::read_to_string(workdir.join(".husky/pre-commit")).expect("read"),
        "#!/bin/sh\nnpx lint-staged\n"
    );
    assert_eq!(
        fs::read_to_string(workdir.join("package.json")).expect("read"),
        "{}\n",
        "only the requested entry is restored"
    );
    assert!(snapshot.location().exists());

    let unknown = store
        .restore_entry(&snapshot, &workdir.join("not-captured"))
        .expect("unknown entry is not an error");
    assert!(!unknown);

    store.discard(snapshot).expect("discard");
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn capture_fails_when_location_cannot_be_created() {
    let root = test_root();
    let blocked_root = root.join("not-a-dir");
    write_file(&blocked_root, "file in the way");
    let store = SnapshotStore::new(&blocked_root);

    let err = store
        .capture(&[(root.join("anything"), EntryKind::File)])
        .expect_err("capture must fail");
    assert!(matches!(err, SnapshotError::CreateLocation { .. }));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn expire_removes_only_old_snapshot_directories() {
    let root = test_root();
    let snapshots_root = root.join("snapshots");
    let store = SnapshotStore::new(&snapshots_root);

    let old_location = snapshots_root.join("snapshot-old");
    fs::create_dir_all(&old_location).expect("mkdir");
    store
        .persist_manifest(&Snapshot::new("old", 1, &old_location))
        .expect("persist old manifest");

    let fresh = store.capture(&[]).expect("capture fresh snapshot");
    let unrelated = snapshots_root.join("notes");
    fs::create_dir_all(&unrelated).expect("mkdir");

    let report = store
        .expire(Duration::from_secs(3600))
        .expect("expire must succeed");
    assert_eq!(report.removed, vec![old_location.clone()]);
    assert_eq!(report.kept, 1);
    assert!(report.failures.is_clean());
    assert!(!old_location.exists());
    assert!(fresh.location().exists());
    assert!(unrelated.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn expire_on_missing_root_is_a_no_op() {
    let root = test_root();
    let store = SnapshotStore::new(root.join("never-created"));
    let report = store.expire(Duration::from_secs(1)).expect("expire");
    assert!(report.removed.is_empty());
    assert_eq!(report.kept, 0);
    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn copy_tree_recreates_symlinks() {
    let root = test_root();
    let src = root.join("src");
    write_file(&src.join("target.sh"), "echo hi\n");
    std::os::unix::fs::symlink("target.sh", src.join("link.sh")).expect("symlink");

    copy_tree(&src, &root.join("dst")).expect("copy");
    let link = fs::read_link(root.join("dst/link.sh")).expect("must stay a symlink");
    assert_eq!(link, PathBuf::from("target.sh"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn remove_path_handles_files_dirs_and_missing() {
    let root = test_root();
    write_file(&root.join("dir/nested/file"), "x");
    write_file(&root.join("file"), "y");

    remove_path(&root.join("dir")).expect("remove dir");
    remove_path(&root.join("file")).expect("remove file");
    remove_path(&root.join("missing")).expect("missing is fine");
    assert!(!root.join("dir").exists());
    assert!(!root.join("file").exists());
    assert_eq!(path_kind(&root), Some(EntryKind::Directory));
    assert_eq!(path_kind(&root.join("missing")), None);

    let _ = fs::remove_dir_all(&root);
}

fn sample_snapshot(root: &Path) -> (SnapshotStore, Snapshot) {
    let workdir = root.join("repo");
    seed_workspace(&workdir);
    let store = SnapshotStore::new(root.join("snapshots"));
    let snapshot = store.capture(&watched_paths(&workdir)).expect("capture");
    (store, snapshot)
}

#[test]
fn handoff_survives_a_fresh_store_instance() {
    let root = test_root();
    let (_store, snapshot) = sample_snapshot(&root);
    let handoff_path = root.join("state/handoff.json");

    DurableHandoff::new(FileKeyValueStore::new(&handoff_path))
        .write(&snapshot)
        .expect("write handoff");

    let reader = DurableHandoff::new(FileKeyValueStore::new(&handoff_path));
    assert!(reader.is_pending().expect("pending check"));
    match reader.read().expect("read handoff") {
        HandoffState::Pending(record) => {
            assert_eq!(record.location.as_deref(), Some(snapshot.location()));
            assert_eq!(record.snapshot.as_ref(), Some(&snapshot));
            assert!(record.snapshot_error.is_none());
        }
        HandoffState::Clean => panic!("handoff must be pending"),
    }

    reader.clear().expect("clear");
    assert_eq!(reader.read().expect("read"), HandoffState::Clean);
    assert!(!handoff_path.exists(), "clearing all keys removes the file");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn handoff_without_flag_reads_clean() {
    let root = test_root();
    let kv = FileKeyValueStore::new(root.join("handoff.json"));
    kv.set(KEY_BACKUP_LOCATION, "/somewhere").expect("set");
    let handoff = DurableHandoff::new(kv);
    assert_eq!(handoff.read().expect("read"), HandoffState::Clean);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn handoff_with_corrupt_snapshot_keeps_location() {
    let root = test_root();
    let (_store, snapshot) = sample_snapshot(&root);
    let handoff_path = root.join("handoff.json");
    let handoff = DurableHandoff::new(FileKeyValueStore::new(&handoff_path));
    handoff.write(&snapshot).expect("write");

    FileKeyValueStore::new(&handoff_path)
        .set(KEY_SNAPSHOT, "{\"id\": 42")
        .expect("corrupt snapshot key");

    match handoff.read().expect("read") {
        HandoffState::Pending(record) => {
            assert!(record.snapshot.is_none());
            assert_eq!(record.location.as_deref(), Some(snapshot.location()));
            assert!(record
                .snapshot_error
                .as_deref()
                .expect("reason")
                .contains("unparsable"));
        }
        HandoffState::Clean => panic!("handoff must be pending"),
    }

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unreadable_handoff_file_errors_but_can_be_cleared() {
    let root = test_root();
    let handoff_path = root.join("handoff.json");
    write_file(&handoff_path, "this is not json");
    let handoff = DurableHandoff::new(FileKeyValueStore::new(&handoff_path));

    assert!(handoff.read().is_err());
    handoff.clear().expect("clear must discard the unreadable file");
    assert!(!handoff_path.exists());
    assert_eq!(handoff.read().expect("read"), HandoffState::Clean);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn actions_state_store_appends_file_commands() {
    let root = test_root();
    let state_file = root.join("github_state");
    let store = ActionsStateStore::new(Some(state_file.clone()), BTreeMap::new());

    store.set(KEY_CLEANUP_REQUIRED, "true").expect("set flag");
    store.set("multi", "a\nb").expect("set multiline");
    store.remove(KEY_CLEANUP_REQUIRED).expect("remove flag");

    let written = fs::read_to_string(&state_file).expect("read state file");
    let lines = written.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "cleanup_required=true");
    assert!(lines[1].starts_with("multi<<devlease_"));
    assert_eq!(lines[2], "a");
    assert_eq!(lines[3], "b");
    assert_eq!(lines[4], lines[1].trim_start_matches("multi<<"));
    assert_eq!(lines[5], "cleanup_required=");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn actions_state_store_reads_inherited_state() {
    let inherited = BTreeMap::from([
        (KEY_CLEANUP_REQUIRED.to_string(), "true".to_string()),
        (KEY_BACKUP_LOCATION.to_string(), String::new()),
    ]);
    let store = ActionsStateStore::new(None, inherited);

    assert_eq!(
        store.get(KEY_CLEANUP_REQUIRED).expect("get").as_deref(),
        Some("true")
    );
    assert_eq!(store.get(KEY_BACKUP_LOCATION).expect("get"), None);
    let err = store
        .set(KEY_SNAPSHOT, "{}")
        .expect_err("writes need GITHUB_STATE");
    assert!(err.to_string().contains("GITHUB_STATE is not set"));
}
