//! Command-line surface.

use clap::Parser;
use std::path::{Path, PathBuf};

use crate::artifact::disk::parse_size;
use crate::artifact::filesystem::absolutize;
use crate::builder::BuildOptions;
use crate::config::BuildDefaults;
use crate::error::UsageError;
use crate::machine::Bound;

pub const DEFAULT_OUTPUT: &str = "disk.img";

/// Build a bootable disk image from a model assertion.
///
/// Every completed step is checkpointed into the current directory, so a
/// build stopped with --until/--thru (or by a failure) continues with
/// --resume.
#[derive(Debug, Parser)]
#[command(name = "model-image", version, about)]
pub struct Cli {
    /// Model assertion describing the image
    #[arg(
        value_name = "MODEL_ASSERTION",
        required_unless_present = "resume",
        conflicts_with = "resume"
    )]
    pub model_assertion: Option<PathBuf>,

    /// Continue the build recorded in the checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Stop before running STEP
    #[arg(long, value_name = "STEP", conflicts_with = "thru")]
    pub until: Option<String>,

    /// Stop after running STEP
    #[arg(long, value_name = "STEP")]
    pub thru: Option<String>,

    /// Disk image to write [default: disk.img]
    #[arg(short, long, value_name = "PATH", conflicts_with = "resume")]
    pub output: Option<PathBuf>,

    /// Snap channel recorded in the seed
    #[arg(short, long, value_name = "NAME", conflicts_with = "resume")]
    pub channel: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Keep the checkpoint and working directory after a successful build
    #[arg(short, long)]
    pub keep: bool,

    /// Build in DIR instead of a private temporary directory; DIR is never removed
    #[arg(short, long, value_name = "DIR", conflicts_with = "resume")]
    pub workdir: Option<PathBuf>,

    /// Minimum size of the disk image (bytes, or a K/M/G suffix)
    #[arg(long, value_name = "SIZE", value_parser = parse_size_arg, conflicts_with = "resume")]
    pub image_size: Option<u64>,

    /// cloud-init user-data to install into the root filesystem
    #[arg(long, value_name = "FILE", conflicts_with = "resume")]
    pub cloud_init: Option<PathBuf>,

    /// Extra snap to seed (repeatable)
    #[arg(long = "extra-snaps", value_name = "NAME", conflicts_with = "resume")]
    pub extra_snaps: Vec<String>,

    /// TOML file with [build] defaults
    #[arg(long, value_name = "FILE", conflicts_with = "resume")]
    pub config: Option<PathBuf>,
}

fn parse_size_arg(raw: &str) -> Result<u64, String> {
    parse_size(raw).map_err(|e| format!("{e:#}"))
}

/// Fresh or resumed build, with its stop condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Fresh {
        model_assertion: PathBuf,
        bound: Bound,
    },
    Resume {
        bound: Bound,
    },
}

impl RunMode {
    pub fn bound(&self) -> &Bound {
        match self {
            RunMode::Fresh { bound, .. } | RunMode::Resume { bound } => bound,
        }
    }
}

impl Cli {
    /// Resolve the run mode.
    ///
    /// clap already rejects these combinations when parsing argv; this also
    /// covers a `Cli` assembled in code.
    pub fn run_mode(&self) -> Result<RunMode, UsageError> {
        let bound = match (&self.until, &self.thru) {
            (Some(_), Some(_)) => return Err(UsageError::ConflictingBounds),
            (Some(step), None) => Bound::Until(step.clone()),
            (None, Some(step)) => Bound::Thru(step.clone()),
            (None, None) => Bound::None,
        };
        match (&self.model_assertion, self.resume) {
            (Some(_), true) => Err(UsageError::ResumeWithModelAssertion),
            (None, false) => Err(UsageError::NothingToBuild),
            (Some(model), false) => Ok(RunMode::Fresh {
                model_assertion: model.clone(),
                bound,
            }),
            (None, true) => Ok(RunMode::Resume { bound }),
        }
    }

    /// Options for a fresh build: flags over `defaults`, paths made absolute
    /// against `cwd`.
    pub fn build_options(
        &self,
        cwd: &Path,
        model_assertion: &Path,
        defaults: BuildDefaults,
    ) -> BuildOptions {
        let output = self
            .output
            .clone()
            .or(defaults.output)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
        let extra_snaps = if self.extra_snaps.is_empty() {
            defaults.extra_snaps
        } else {
            self.extra_snaps.clone()
        };

        BuildOptions {
            model_assertion: absolutize(cwd, model_assertion),
            output: absolutize(cwd, &output),
            channel: self.channel.clone().or(defaults.channel),
            extra_snaps,
            cloud_init: self
                .cloud_init
                .clone()
                .or(defaults.cloud_init)
                .map(|p| absolutize(cwd, &p)),
            image_size: self.image_size.or(defaults.image_size),
            workdir: self
                .workdir
                .clone()
                .or(defaults.workdir)
                .map(|p| absolutize(cwd, &p)),
            keep: self.keep,
        }
    }
}
