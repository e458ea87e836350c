//! Artifact helpers used by the reference build steps.
//!
//! - [`filesystem`] - Directory copying, tree sizes, unique work directories
//! - [`disk`] - Partition images and raw disk assembly

pub mod disk;
pub mod filesystem;
