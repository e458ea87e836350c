//! Partition image creation and population.
//!
//! A partition image is a sparse file of fixed size. Population writes the
//! source tree into it as a deterministic tar stream (sorted entries, zeroed
//! mtime and ownership) and fails if the stream does not fit.

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

/// Create (or truncate) a sparse image file of exactly `size_bytes`.
pub fn create_partition_image(image_path: &Path, size_bytes: u64) -> Result<()> {
    if let Some(parent) = image_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    let file = File::create(image_path)
        .with_context(|| format!("creating partition image '{}'", image_path.display()))?;
    file.set_len(size_bytes)
        .with_context(|| format!("sizing partition image '{}'", image_path.display()))?;
    Ok(())
}

/// Bytes the tar stream for `tree` occupies: one header block per entry,
/// file data padded to whole blocks, two trailing zero blocks.
///
/// Long-name extension headers are not counted.
pub fn tar_footprint(tree: &Path) -> Result<u64> {
    const BLOCK: u64 = 512;
    let mut total = 2 * BLOCK;
    for path in sorted_entries(tree)? {
        let md = fs::symlink_metadata(&path)
            .with_context(|| format!("reading metadata of '{}'", path.display()))?;
        total += BLOCK;
        if md.is_file() {
            total += md.len().div_ceil(BLOCK) * BLOCK;
        }
    }
    Ok(total)
}

/// Write `tree` into the existing image at `image_path`.
///
/// Returns the number of bytes used.
pub fn populate_partition_image(tree: &Path, image_path: &Path) -> Result<u64> {
    let capacity = fs::metadata(image_path)
        .with_context(|| format!("reading partition image '{}'", image_path.display()))?
        .len();

    let file = OpenOptions::new()
        .write(true)
        .open(image_path)
        .with_context(|| format!("opening partition image '{}'", image_path.display()))?;

    let mut builder = TarBuilder::new(file);
    for path in sorted_entries(tree)? {
        append_entry(&mut builder, tree, &path)?;
    }
    let mut file = builder
        .into_inner()
        .with_context(|| format!("finalizing tar stream in '{}'", image_path.display()))?;
    file.flush()?;

    let used = file.stream_position()?;
    if used > capacity {
        bail!(
            "contents of '{}' need {} bytes but partition image '{}' holds {}",
            tree.display(),
            used,
            image_path.display(),
            capacity
        );
    }
    Ok(used)
}

fn sorted_entries(tree: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(tree).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking '{}'", tree.display()))?;
        if entry.path() == tree {
            continue;
        }
        entries.push(entry.into_path());
    }
    Ok(entries)
}

fn append_entry(builder: &mut TarBuilder<File>, tree: &Path, path: &Path) -> Result<()> {
    let rel = path
        .strip_prefix(tree)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let md = fs::symlink_metadata(path)
        .with_context(|| format!("reading metadata of '{}'", path.display()))?;
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(md.permissions().mode());

    if md.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_cksum();
        builder.append_data(&mut header, rel, std::io::empty())?;
    } else if md.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_link_name(&target)?;
        header.set_cksum();
        builder.append_data(&mut header, rel, std::io::empty())?;
    } else if md.is_file() {
        let mut f = File::open(path)?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(md.len());
        header.set_cksum();
        builder.append_data(&mut header, rel, &mut f)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hostname"), "ubuntu\n").unwrap();
        std::os::unix::fs::symlink("etc/hostname", root.join("hostname")).unwrap();
    }

    #[test]
    fn test_create_partition_image_is_exact_size() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("parts/root.img");
        create_partition_image(&image, 4 * 1024 * 1024).unwrap();
        assert_eq!(fs::metadata(&image).unwrap().len(), 4 * 1024 * 1024);
    }

    #[test]
    fn test_populate_keeps_image_size_and_lists_entries() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("root");
        sample_tree(&tree);
        let image = temp.path().join("root.img");
        create_partition_image(&image, 1024 * 1024).unwrap();

        let used = populate_partition_image(&tree, &image).unwrap();
        assert!(used > 0);
        assert_eq!(fs::metadata(&image).unwrap().len(), 1024 * 1024);

        let mut archive = tar::Archive::new(File::open(&image).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["etc", "etc/hostname", "hostname"]);
    }

    #[test]
    fn test_tar_footprint_bounds_written_stream() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("root");
        sample_tree(&tree);
        fs::write(tree.join("etc/data"), vec![1u8; 700]).unwrap();

        // etc, etc/data, etc/hostname, hostname + data padded to 1024 + hostname padded to 512
        let footprint = tar_footprint(&tree).unwrap();
        assert_eq!(footprint, 1024 + 4 * 512 + 1024 + 512);

        let image = temp.path().join("root.img");
        create_partition_image(&image, 1024 * 1024).unwrap();
        let used = populate_partition_image(&tree, &image).unwrap();
        assert!(used >= footprint);
    }

    #[test]
    fn test_populate_rejects_overflow() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("root");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("big"), vec![7u8; 8192]).unwrap();
        let image = temp.path().join("root.img");
        create_partition_image(&image, 1024).unwrap();

        assert!(populate_partition_image(&tree, &image).is_err());
    }
}
