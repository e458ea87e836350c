//! Reference model-assertion builder.
//!
//! The pipeline below is the initial queue of a fresh build. The two size
//! calculations are on-demand steps, pushed by the populate steps so they
//! run right after the tree they measure is complete.

pub mod state;
pub mod steps;

pub use state::{BuildOptions, BuildState};

use crate::machine::{StateMachine, StepRegistry};

pub const BUILDER_NAME: &str = "model-assertion";

pub const MAKE_TEMPORARY_DIRECTORIES: &str = "make_temporary_directories";
pub const PREPARE_IMAGE: &str = "prepare_image";
pub const POPULATE_ROOTFS_CONTENTS: &str = "populate_rootfs_contents";
pub const CALCULATE_ROOTFS_SIZE: &str = "calculate_rootfs_size";
pub const POPULATE_BOOTFS_CONTENTS: &str = "populate_bootfs_contents";
pub const CALCULATE_BOOTFS_SIZE: &str = "calculate_bootfs_size";
pub const PREPARE_FILESYSTEMS: &str = "prepare_filesystems";
pub const POPULATE_FILESYSTEMS: &str = "populate_filesystems";
pub const MAKE_DISK: &str = "make_disk";

/// Step registry of the model-assertion builder.
pub fn registry() -> StepRegistry<BuildState> {
    StepRegistry::new(BUILDER_NAME)
        .step(MAKE_TEMPORARY_DIRECTORIES, steps::make_temporary_directories)
        .step(PREPARE_IMAGE, steps::prepare_image)
        .step(POPULATE_ROOTFS_CONTENTS, steps::populate_rootfs_contents)
        .step(POPULATE_BOOTFS_CONTENTS, steps::populate_bootfs_contents)
        .step(PREPARE_FILESYSTEMS, steps::prepare_filesystems)
        .step(POPULATE_FILESYSTEMS, steps::populate_filesystems)
        .step(MAKE_DISK, steps::make_disk)
        .on_demand(CALCULATE_ROOTFS_SIZE, steps::calculate_rootfs_size)
        .on_demand(CALCULATE_BOOTFS_SIZE, steps::calculate_bootfs_size)
}

/// Fresh machine for `options` on the given registry.
pub fn fresh_machine(
    registry: StepRegistry<BuildState>,
    options: BuildOptions,
) -> StateMachine<BuildState> {
    StateMachine::new(registry, BuildState::from_options(options))
}
