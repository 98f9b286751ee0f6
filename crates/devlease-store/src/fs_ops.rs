use std::fs;
use std::io;
use std::path::Path;

use devlease_core::EntryKind;

/// Copies `src` to `dst`, recursing into directories. Symlinks are recreated rather
/// than followed; file permissions travel with `fs::copy`.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(src)?;

    if metadata.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::set_permissions(dst, metadata.permissions())?;
        return Ok(());
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(src)?;
        std::os::unix::fs::symlink(&target, dst)?;
        return Ok(());
    }

    fs::copy(src, dst)?;
    Ok(())
}

/// Removes a file, symlink or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

pub fn path_kind(path: &Path) -> Option<EntryKind> {
    let metadata = fs::symlink_metadata(path).ok()?;
    if metadata.is_dir() {
        Some(EntryKind::Directory)
    } else {
        Some(EntryKind::File)
    }
}
