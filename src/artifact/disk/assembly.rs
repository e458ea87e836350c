//! Disk assembly: splice partition images into one raw disk file.

use super::helpers::{align_mib, MIB};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

/// Sector size in bytes.
const SECTOR_SIZE: u64 = 512;

/// First partition starts at this offset (1MB for partition table + alignment).
const FIRST_PARTITION_OFFSET_SECTORS: u64 = 2048;

/// Byte offsets of each partition inside the assembled disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    pub boot_offset: u64,
    pub boot_size: u64,
    pub root_offset: u64,
    pub root_size: u64,
    pub disk_size: u64,
}

impl DiskLayout {
    /// Boot partition first, root right after it, every offset MiB-aligned.
    pub fn plan(boot_size: u64, root_size: u64, min_disk_size: Option<u64>) -> Self {
        let boot_offset = FIRST_PARTITION_OFFSET_SECTORS * SECTOR_SIZE;
        let root_offset = boot_offset + align_mib(boot_size);
        let end = root_offset + align_mib(root_size);
        let disk_size = end.max(min_disk_size.map_or(0, align_mib));
        Self {
            boot_offset,
            boot_size,
            root_offset,
            root_size,
            disk_size,
        }
    }
}

/// Assemble a raw disk image from partition images.
///
/// Creates a sparse disk file of `layout.disk_size` and copies each image to
/// its offset. Parent directories of `disk_path` are created.
pub fn assemble_disk(
    disk_path: &Path,
    boot_image: &Path,
    root_image: &Path,
    min_disk_size: Option<u64>,
) -> Result<DiskLayout> {
    let boot_size = image_len(boot_image)?;
    let root_size = image_len(root_image)?;
    let layout = DiskLayout::plan(boot_size, root_size, min_disk_size);

    if let Some(parent) = disk_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }

    let disk = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(disk_path)
        .with_context(|| format!("creating disk image '{}'", disk_path.display()))?;
    disk.set_len(layout.disk_size)
        .with_context(|| format!("sizing disk image '{}'", disk_path.display()))?;

    splice(&disk, boot_image, layout.boot_offset)?;
    splice(&disk, root_image, layout.root_offset)?;
    disk.sync_all()
        .with_context(|| format!("syncing disk image '{}'", disk_path.display()))?;

    Ok(layout)
}

fn image_len(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)
        .with_context(|| format!("reading partition image '{}'", path.display()))?
        .len())
}

fn splice(mut disk: &File, image: &Path, offset: u64) -> Result<()> {
    let mut src =
        File::open(image).with_context(|| format!("opening '{}'", image.display()))?;
    disk.seek(SeekFrom::Start(offset))?;
    io::copy(&mut src, &mut disk)
        .with_context(|| format!("writing '{}' at offset {}", image.display(), offset))?;
    Ok(())
}
