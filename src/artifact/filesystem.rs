//! Filesystem utilities used by the build steps.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Copy the tree below `src` into `dst`, keeping symlinks as symlinks.
///
/// `dst` is created if missing. Entries already in `dst` are replaced.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("creating directory '{}'", dst.display()))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", src.display()))?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let kind = entry.file_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating directory '{}'", target.display()))?;
            continue;
        }
        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)
                .with_context(|| format!("replacing '{}'", target.display()))?;
        }
        if kind.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("reading symlink '{}'", entry.path().display()))?;
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("creating symlink '{}'", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copying '{}' -> '{}'", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Create a new, empty directory `<parent>/<prefix>-<nanos>`.
pub fn create_unique_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    loop {
        let n = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = parent.join(format!("{prefix}-{n}"));
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("creating directory '{}'", path.display()));
            }
        }
    }
}

/// Make `path` absolute against `base`.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_keeps_links_and_replaces_entries() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("system-data");
        let dst = temp.path().join("root");
        fs::create_dir_all(src.join("etc/default")).unwrap();
        fs::write(src.join("etc/hostname"), "ubuntu\n").unwrap();
        fs::write(src.join("etc/default/grub"), "GRUB_TIMEOUT=0\n").unwrap();
        std::os::unix::fs::symlink("etc/hostname", src.join("hostname")).unwrap();

        fs::create_dir_all(dst.join("etc")).unwrap();
        fs::write(dst.join("etc/hostname"), "stale\n").unwrap();

        copy_dir_recursive(&src, &dst).unwrap();
        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("etc/hostname")).unwrap(), "ubuntu\n");
        assert!(dst.join("etc/default/grub").is_file());
        assert_eq!(fs::read_link(dst.join("hostname")).unwrap(), Path::new("etc/hostname"));
    }

    #[test]
    fn test_create_unique_dir_never_reuses() {
        let temp = TempDir::new().unwrap();
        let first = create_unique_dir(temp.path(), "work").unwrap();
        let second = create_unique_dir(temp.path(), "work").unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
    }

    #[test]
    fn test_absolutize() {
        let base = Path::new("/srv/build");
        assert_eq!(absolutize(base, Path::new("disk.img")), base.join("disk.img"));
        assert_eq!(absolutize(base, Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
