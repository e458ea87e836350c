//! Durable snapshots of a [`StateMachine`] for `--resume`.
//!
//! The checkpoint is a single JSON file in the working directory. It is
//! rewritten after every completed step by writing a temporary sibling and
//! renaming it over the previous snapshot, so a reader only ever sees a whole
//! snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::CheckpointError;
use crate::machine::{StateMachine, StepRegistry};

/// Checkpoint file name, relative to the working directory.
pub const CHECKPOINT_FILENAME: &str = ".model-image.ckpt";

/// Advisory lock held for the duration of one invocation.
pub const LOCK_FILENAME: &str = ".model-image.lock";

/// Bumped whenever the envelope or a builder state struct changes shape.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, S> {
    version: u32,
    builder: &'a str,
    saved_at_unix: i64,
    completed: &'a [String],
    pending: Vec<String>,
    state: &'a S,
}

#[derive(Deserialize)]
struct Envelope<S> {
    version: u32,
    builder: String,
    #[serde(default)]
    saved_at_unix: i64,
    completed: Vec<String>,
    pending: Vec<String>,
    state: S,
}

// Parsed first so a version or builder mismatch is reported as such, not as
// a state struct that fails to deserialize.
#[derive(Deserialize)]
struct Header {
    version: u32,
    builder: String,
}

/// Location of the checkpoint for one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILENAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILENAME)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_FILENAME}.tmp"))
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Snapshot `machine`, replacing any earlier checkpoint.
    pub fn save<S: Serialize>(&self, machine: &StateMachine<S>) -> Result<(), CheckpointError> {
        let envelope = EnvelopeRef {
            version: CHECKPOINT_VERSION,
            builder: machine.builder(),
            saved_at_unix: OffsetDateTime::now_utc().unix_timestamp(),
            completed: machine.completed(),
            pending: machine.pending(),
            state: machine.state(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(CheckpointError::Serialize)?;

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp)
            .map_err(|e| CheckpointError::io(format!("creating '{}'", tmp.display()), e))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| CheckpointError::io(format!("writing '{}'", tmp.display()), e))?;
        drop(file);

        let path = self.path();
        fs::rename(&tmp, &path).map_err(|e| {
            CheckpointError::io(
                format!("renaming '{}' -> '{}'", tmp.display(), path.display()),
                e,
            )
        })?;
        Ok(())
    }

    /// Rebuild a machine from the checkpoint, binding it to `registry`.
    ///
    /// The returned machine keeps checkpointing into this store.
    pub fn load<S: DeserializeOwned>(
        &self,
        registry: StepRegistry<S>,
    ) -> Result<StateMachine<S>, CheckpointError> {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::Missing { path });
            }
            Err(e) => {
                return Err(CheckpointError::io(format!("reading '{}'", path.display()), e));
            }
        };

        let header: Header =
            serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?;
        if header.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: header.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        if header.builder != registry.builder() {
            return Err(CheckpointError::BuilderMismatch {
                found: header.builder,
                expected: registry.builder().to_string(),
            });
        }

        let envelope: Envelope<S> =
            serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?;
        if let Some(unknown) = envelope.pending.iter().find(|name| !registry.contains(name)) {
            return Err(CheckpointError::UnknownStep(unknown.clone()));
        }

        info!(
            path = %path.display(),
            saved_at_unix = envelope.saved_at_unix,
            completed = envelope.completed.len(),
            pending = envelope.pending.len(),
            "loaded checkpoint"
        );
        Ok(StateMachine::from_parts(
            registry,
            envelope.state,
            envelope.pending,
            envelope.completed,
        )
        .with_checkpoint(self.clone()))
    }

    /// Remove the checkpoint. Missing files are fine.
    ///
    /// The lock file stays: unlinking it while held would let a second
    /// invocation lock a fresh inode alongside this one.
    pub fn discard(&self) -> Result<(), CheckpointError> {
        for path in [self.path(), self.tmp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CheckpointError::io(format!("removing '{}'", path.display()), e));
                }
            }
        }
        Ok(())
    }

    /// Take the per-directory build lock without blocking.
    pub fn lock(&self) -> Result<CheckpointLock, CheckpointError> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::io(format!("opening lock '{}'", path.display()), e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(CheckpointError::Busy { path });
        }
        Ok(CheckpointLock { file, path })
    }
}

/// Held build lock; released when dropped.
#[derive(Debug)]
pub struct CheckpointLock {
    file: File,
    path: PathBuf,
}

impl CheckpointLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
