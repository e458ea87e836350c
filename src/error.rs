//! Error types for the state machine, the checkpoint store and flag handling.
//!
//! Step bodies report failures as `anyhow::Error`; these enums describe what
//! the core itself can go wrong on.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while executing the step queue.
#[derive(Debug, Error)]
pub enum MachineError {
    /// A step returned an error. The step stays at the head of the queue.
    #[error("step '{step}' failed")]
    StepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// The queue named a step the registry has no implementation for.
    #[error("no implementation registered for step '{0}'")]
    UnknownStep(String),

    /// Writing the checkpoint after a completed step failed.
    #[error("checkpointing after step '{step}' failed")]
    Checkpoint {
        step: String,
        #[source]
        source: CheckpointError,
    },
}

/// Failure reading, writing or locking the checkpoint file.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint to resume from at '{}'", path.display())]
    Missing { path: PathBuf },

    #[error("checkpoint '{}' is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("checkpoint was written by builder '{found}', cannot resume with '{expected}'")]
    BuilderMismatch { found: String, expected: String },

    #[error("checkpoint references unknown step '{0}'")]
    UnknownStep(String),

    #[error("another build holds the lock '{}'", path.display())]
    Busy { path: PathBuf },

    #[error("serializing checkpoint state")]
    Serialize(#[source] serde_json::Error),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Invalid flag combination, detected before any machine is constructed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("--resume and a model assertion are mutually exclusive")]
    ResumeWithModelAssertion,

    #[error("a model assertion or --resume is required")]
    NothingToBuild,

    #[error("--until and --thru are mutually exclusive")]
    ConflictingBounds,
}
