//! TOML defaults for fresh builds.
//!
//! ```toml
//! [build]
//! output = "out/pc.img"
//! channel = "edge"
//! image_size = "4G"
//! extra_snaps = ["htop"]
//! workdir = "work"
//! cloud_init = "user-data.yaml"
//! ```
//!
//! Relative paths in the file are resolved against the directory holding it.
//! Command-line flags take precedence over every key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::disk::parse_size;
use crate::artifact::filesystem::absolutize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDefaults {
    pub output: Option<PathBuf>,
    pub channel: Option<String>,
    pub image_size: Option<u64>,
    pub extra_snaps: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub cloud_init: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    #[serde(default)]
    build: BuildToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    output: Option<PathBuf>,
    channel: Option<String>,
    image_size: Option<String>,
    extra_snaps: Option<Vec<String>>,
    workdir: Option<PathBuf>,
    cloud_init: Option<PathBuf>,
}

pub fn load_build_defaults(config_path: &Path) -> Result<BuildDefaults> {
    let contents = fs::read_to_string(config_path)
        .with_context(|| format!("reading build config '{}'", config_path.display()))?;
    parse_build_defaults(&contents, config_path)
}

fn parse_build_defaults(contents: &str, config_path: &Path) -> Result<BuildDefaults> {
    let parsed: ConfigToml = toml::from_str(contents)
        .with_context(|| format!("parsing build config '{}'", config_path.display()))?;
    let build = parsed.build;
    let base = config_path.parent().unwrap_or_else(|| Path::new(""));

    let image_size = build
        .image_size
        .as_deref()
        .map(parse_size)
        .transpose()
        .with_context(|| {
            format!(
                "invalid build config '{}': bad image_size",
                config_path.display()
            )
        })?;

    Ok(BuildDefaults {
        output: build.output.map(|p| absolutize(base, &p)),
        channel: build.channel,
        image_size,
        extra_snaps: build.extra_snaps.unwrap_or_default(),
        workdir: build.workdir.map(|p| absolutize(base, &p)),
        cloud_init: build.cloud_init.map(|p| absolutize(base, &p)),
    })
}
