//! Raw disk image infrastructure, without root privileges.
//!
//! Partition images are plain sparse files populated from staging trees;
//! [`assembly::assemble_disk`] splices them into the final raw image at
//! MiB-aligned offsets.

pub mod assembly;
pub mod helpers;
pub mod partitions;

pub use assembly::{assemble_disk, DiskLayout};
pub use helpers::{padded_partition_size, parse_size, MIB};
pub use partitions::{create_partition_image, populate_partition_image, tar_footprint};
