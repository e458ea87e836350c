//! Checkpointed state of the model-assertion builder.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::artifact::disk::DiskLayout;

/// Inputs of a fresh build, already resolved to absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub model_assertion: PathBuf,
    pub output: PathBuf,
    pub channel: Option<String>,
    pub extra_snaps: Vec<String>,
    pub cloud_init: Option<PathBuf>,
    pub image_size: Option<u64>,
    pub workdir: Option<PathBuf>,
    pub keep: bool,
}

/// Everything a resumed build needs; every field survives a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    // Invocation inputs.
    pub model_assertion: PathBuf,
    pub output: PathBuf,
    pub channel: Option<String>,
    pub extra_snaps: Vec<String>,
    pub cloud_init: Option<PathBuf>,
    pub image_size: Option<u64>,
    /// `--keep` as given on the fresh invocation; bounded runs do not set it.
    pub keep: bool,

    // Working directory and the trees inside it.
    pub workdir: Option<PathBuf>,
    /// True when the builder created `workdir` and may delete it.
    pub owns_workdir: bool,
    pub unpackdir: Option<PathBuf>,
    pub rootfs: Option<PathBuf>,
    pub bootfs: Option<PathBuf>,

    // Results of individual steps.
    pub model_digest: Option<String>,
    pub rootfs_size: u64,
    pub bootfs_size: u64,
    pub root_image: Option<PathBuf>,
    pub boot_image: Option<PathBuf>,
    pub disk_image: Option<PathBuf>,
    pub disk_layout: Option<DiskLayout>,
}

impl BuildState {
    pub fn from_options(options: BuildOptions) -> Self {
        Self {
            model_assertion: options.model_assertion,
            output: options.output,
            channel: options.channel,
            extra_snaps: options.extra_snaps,
            cloud_init: options.cloud_init,
            image_size: options.image_size,
            keep: options.keep,
            owns_workdir: options.workdir.is_none(),
            workdir: options.workdir,
            ..Self::default()
        }
    }

    pub fn workdir(&self) -> Result<&Path> {
        require(&self.workdir, "working directory")
    }

    pub fn unpackdir(&self) -> Result<&Path> {
        require(&self.unpackdir, "unpack directory")
    }

    pub fn rootfs(&self) -> Result<&Path> {
        require(&self.rootfs, "root filesystem tree")
    }

    pub fn bootfs(&self) -> Result<&Path> {
        require(&self.bootfs, "boot filesystem tree")
    }

    /// Seeded image tree inside the unpack directory.
    pub fn image_dir(&self) -> Result<PathBuf> {
        Ok(self.unpackdir()?.join("image"))
    }
}

fn require<'a>(slot: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
    slot.as_deref()
        .ok_or_else(|| anyhow!("{what} is not prepared yet; an earlier step has not run"))
}
