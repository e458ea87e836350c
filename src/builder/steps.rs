//! Step bodies of the reference model-assertion builder.
//!
//! Each step reads what earlier steps recorded in [`BuildState`] and records
//! its own results there, so a resumed process continues from persisted
//! paths instead of recreating anything.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::state::BuildState;
use super::{CALCULATE_BOOTFS_SIZE, CALCULATE_ROOTFS_SIZE};
use crate::artifact::disk::{
    assemble_disk, create_partition_image, padded_partition_size, populate_partition_image,
    tar_footprint,
};
use crate::artifact::filesystem::{copy_dir_recursive, create_unique_dir};
use crate::machine::StepQueue;

/// Location of the cloud-init user-data inside the root filesystem.
pub const CLOUD_INIT_USER_DATA: &str = "var/lib/cloud/seed/nocloud-net/user-data";

const WORKDIR_PREFIX: &str = "model-image";

/// Seed manifest written next to the unpacked model assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedManifest {
    pub model_sha256: String,
    pub channel: Option<String>,
    pub extra_snaps: Vec<String>,
}

pub fn make_temporary_directories(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    let workdir = match &state.workdir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating working directory '{}'", dir.display()))?;
            dir.clone()
        }
        None => create_unique_dir(&std::env::temp_dir(), WORKDIR_PREFIX)?,
    };

    let unpackdir = workdir.join("unpack");
    let rootfs = workdir.join("root");
    let bootfs = workdir.join("boot");
    for dir in [&unpackdir, &rootfs, &bootfs] {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating directory '{}'", dir.display()))?;
    }

    info!(workdir = %workdir.display(), owned = state.owns_workdir, "working directories ready");
    state.workdir = Some(workdir);
    state.unpackdir = Some(unpackdir);
    state.rootfs = Some(rootfs);
    state.bootfs = Some(bootfs);
    Ok(())
}

/// Unpack the model assertion and lay out the seeded image trees.
pub fn prepare_image(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    let model = &state.model_assertion;
    let bytes = fs::read(model)
        .with_context(|| format!("reading model assertion '{}'", model.display()))?;
    if bytes.is_empty() {
        bail!("model assertion '{}' is empty", model.display());
    }
    let digest = hex_digest(&bytes);

    let image_dir = state.image_dir()?;
    let system_data = image_dir.join("system-data");
    let boot_assets = image_dir.join("boot-assets");
    let seed_dir = system_data.join("var/lib/snapd/seed");
    for dir in [&seed_dir, &system_data.join("etc"), &boot_assets] {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating directory '{}'", dir.display()))?;
    }

    let manifest = SeedManifest {
        model_sha256: digest.clone(),
        channel: state.channel.clone(),
        extra_snaps: state.extra_snaps.clone(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)?;

    write_file(&image_dir.join("model.assertion"), &bytes)?;
    write_file(&image_dir.join("seed.json"), &manifest_json)?;
    write_file(&seed_dir.join("model.assertion"), &bytes)?;
    write_file(&seed_dir.join("seed.json"), &manifest_json)?;
    write_file(&system_data.join("etc/hostname"), b"ubuntu\n")?;
    write_file(
        &boot_assets.join("boot.cfg"),
        format!("model_sha256={digest}\nchannel={}\n", state.channel.as_deref().unwrap_or("stable"))
            .as_bytes(),
    )?;

    info!(
        model = %model.display(),
        sha256 = %digest,
        channel = state.channel.as_deref().unwrap_or("stable"),
        extra_snaps = state.extra_snaps.len(),
        "image seeded"
    );
    state.model_digest = Some(digest);
    Ok(())
}

pub fn populate_rootfs_contents(state: &mut BuildState, queue: &mut StepQueue) -> Result<()> {
    let src = state.image_dir()?.join("system-data");
    let rootfs = state.rootfs()?.to_path_buf();
    copy_dir_recursive(&src, &rootfs)
        .with_context(|| format!("populating root filesystem '{}'", rootfs.display()))?;

    if let Some(user_data) = &state.cloud_init {
        let dst = rootfs.join(CLOUD_INIT_USER_DATA);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory '{}'", parent.display()))?;
        }
        fs::copy(user_data, &dst).with_context(|| {
            format!("installing cloud-init user-data '{}'", user_data.display())
        })?;
        debug!(user_data = %user_data.display(), "cloud-init seed installed");
    }

    queue.push_next(CALCULATE_ROOTFS_SIZE);
    Ok(())
}

pub fn calculate_rootfs_size(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    let rootfs = state.rootfs()?;
    state.rootfs_size = partition_size_for(rootfs)?;
    info!(bytes = state.rootfs_size, "root partition size");
    Ok(())
}

pub fn populate_bootfs_contents(state: &mut BuildState, queue: &mut StepQueue) -> Result<()> {
    let src = state.image_dir()?.join("boot-assets");
    let bootfs = state.bootfs()?.to_path_buf();
    copy_dir_recursive(&src, &bootfs)
        .with_context(|| format!("populating boot filesystem '{}'", bootfs.display()))?;

    queue.push_next(CALCULATE_BOOTFS_SIZE);
    Ok(())
}

pub fn calculate_bootfs_size(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    let bootfs = state.bootfs()?;
    state.bootfs_size = partition_size_for(bootfs)?;
    info!(bytes = state.bootfs_size, "boot partition size");
    Ok(())
}

pub fn prepare_filesystems(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    if state.rootfs_size == 0 || state.bootfs_size == 0 {
        bail!(
            "partition sizes are not calculated (root {}, boot {})",
            state.rootfs_size,
            state.bootfs_size
        );
    }

    let workdir = state.workdir()?;
    let root_image = workdir.join("root.img");
    let boot_image = workdir.join("boot.img");
    create_partition_image(&root_image, state.rootfs_size)?;
    create_partition_image(&boot_image, state.bootfs_size)?;

    state.root_image = Some(root_image);
    state.boot_image = Some(boot_image);
    Ok(())
}

pub fn populate_filesystems(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    let (root_image, boot_image) = partition_images(state)?;

    let used = populate_partition_image(state.rootfs()?, &root_image)?;
    debug!(image = %root_image.display(), used, "root partition populated");
    let used = populate_partition_image(state.bootfs()?, &boot_image)?;
    debug!(image = %boot_image.display(), used, "boot partition populated");
    Ok(())
}

pub fn make_disk(state: &mut BuildState, _: &mut StepQueue) -> Result<()> {
    let (root_image, boot_image) = partition_images(state)?;

    let layout = assemble_disk(&state.output, &boot_image, &root_image, state.image_size)
        .with_context(|| format!("assembling disk image '{}'", state.output.display()))?;

    info!(output = %state.output.display(), bytes = layout.disk_size, "disk image written");
    state.disk_image = Some(state.output.clone());
    state.disk_layout = Some(layout);
    Ok(())
}

fn partition_images(state: &BuildState) -> Result<(PathBuf, PathBuf)> {
    match (&state.root_image, &state.boot_image) {
        (Some(root), Some(boot)) => Ok((root.clone(), boot.clone())),
        _ => bail!("partition images are not prepared yet; prepare_filesystems has not run"),
    }
}

/// Partitions hold a tar stream, so they are sized from its footprint.
fn partition_size_for(tree: &Path) -> Result<u64> {
    let footprint = tar_footprint(tree)?;
    debug!(tree = %tree.display(), footprint, "measured tree");
    Ok(padded_partition_size(footprint))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing '{}'", path.display()))
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::state::BuildOptions;
    use tempfile::TempDir;

    fn state_in(temp: &TempDir) -> BuildState {
        let model = temp.path().join("model.assertion");
        fs::write(&model, "type: model\nseries: 16\n").unwrap();
        BuildState::from_options(BuildOptions {
            model_assertion: model,
            output: temp.path().join("out/disk.img"),
            channel: Some("edge".into()),
            extra_snaps: vec!["htop".into()],
            cloud_init: None,
            image_size: None,
            workdir: Some(temp.path().join("work")),
            keep: false,
        })
    }

    fn seeded(temp: &TempDir) -> BuildState {
        let mut state = state_in(temp);
        let mut queue = StepQueue::default();
        make_temporary_directories(&mut state, &mut queue).unwrap();
        prepare_image(&mut state, &mut queue).unwrap();
        state
    }

    #[test]
    fn test_make_temporary_directories_uses_given_workdir() {
        let temp = TempDir::new().unwrap();
        let state = seeded(&temp);
        let workdir = temp.path().join("work");
        assert_eq!(state.workdir.as_deref(), Some(workdir.as_path()));
        assert!(workdir.join("unpack").is_dir());
        assert!(workdir.join("root").is_dir());
        assert!(workdir.join("boot").is_dir());
        assert!(!state.owns_workdir);
    }

    #[test]
    fn test_prepare_image_records_digest_and_seed() {
        let temp = TempDir::new().unwrap();
        let state = seeded(&temp);

        let digest = state.model_digest.clone().unwrap();
        assert_eq!(digest.len(), 64);

        let seed: SeedManifest =
            serde_json::from_slice(&fs::read(state.image_dir().unwrap().join("seed.json")).unwrap())
                .unwrap();
        assert_eq!(seed.model_sha256, digest);
        assert_eq!(seed.channel.as_deref(), Some("edge"));
        assert_eq!(seed.extra_snaps, ["htop"]);
    }

    #[test]
    fn test_prepare_image_rejects_missing_model() {
        let temp = TempDir::new().unwrap();
        let mut state = state_in(&temp);
        let mut queue = StepQueue::default();
        make_temporary_directories(&mut state, &mut queue).unwrap();
        state.model_assertion = temp.path().join("absent.assertion");
        assert!(prepare_image(&mut state, &mut queue).is_err());
    }

    #[test]
    fn test_populate_rootfs_inserts_size_step_and_cloud_init() {
        let temp = TempDir::new().unwrap();
        let mut state = seeded(&temp);
        let user_data = temp.path().join("user-data");
        fs::write(&user_data, "#cloud-config\n").unwrap();
        state.cloud_init = Some(user_data);

        let mut queue = StepQueue::new(["populate_bootfs_contents"]);
        populate_rootfs_contents(&mut state, &mut queue).unwrap();

        assert_eq!(queue.next_name(), Some(CALCULATE_ROOTFS_SIZE));
        let rootfs = state.rootfs().unwrap();
        assert!(rootfs.join("etc/hostname").is_file());
        assert_eq!(
            fs::read_to_string(rootfs.join(CLOUD_INIT_USER_DATA)).unwrap(),
            "#cloud-config\n"
        );
    }

    #[test]
    fn test_prepare_filesystems_requires_sizes() {
        let temp = TempDir::new().unwrap();
        let mut state = seeded(&temp);
        let mut queue = StepQueue::default();
        assert!(prepare_filesystems(&mut state, &mut queue).is_err());
    }

    #[test]
    fn test_full_step_chain_writes_output() {
        let temp = TempDir::new().unwrap();
        let mut state = seeded(&temp);
        let mut queue = StepQueue::default();

        populate_rootfs_contents(&mut state, &mut queue).unwrap();
        calculate_rootfs_size(&mut state, &mut queue).unwrap();
        populate_bootfs_contents(&mut state, &mut queue).unwrap();
        calculate_bootfs_size(&mut state, &mut queue).unwrap();
        prepare_filesystems(&mut state, &mut queue).unwrap();
        populate_filesystems(&mut state, &mut queue).unwrap();
        make_disk(&mut state, &mut queue).unwrap();

        let output = temp.path().join("out/disk.img");
        let layout = state.disk_layout.unwrap();
        assert_eq!(fs::metadata(&output).unwrap().len(), layout.disk_size);
        assert_eq!(state.disk_image.as_deref(), Some(output.as_path()));
    }
}
