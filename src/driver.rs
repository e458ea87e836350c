//! Invocation driver: one process run of `model-image`.
//!
//! Parses flags, installs logging, builds or resumes the machine, runs it to
//! its bound and decides what to clean up. Exit status:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | build finished, or stopped at `--until`/`--thru` |
//! | 1 | a step crashed, or another runtime failure |
//! | 2 | invalid flags |

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};

use crate::artifact::filesystem::absolutize;
use crate::builder::{self, BuildState};
use crate::checkpoint::CheckpointStore;
use crate::cli::{Cli, RunMode};
use crate::config::{load_build_defaults, BuildDefaults};
use crate::error::MachineError;
use crate::logging::{self, LogInit};
use crate::machine::{RunOutcome, StateMachine, StepRegistry};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

pub struct Driver {
    registry: StepRegistry<BuildState>,
    dir: Option<PathBuf>,
    log_init: LogInit,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver {
    /// Driver for the model-assertion builder, checkpointing into the
    /// process current directory and logging to stderr.
    pub fn new() -> Self {
        Self {
            registry: builder::registry(),
            dir: None,
            log_init: Box::new(logging::init_stderr),
        }
    }

    pub fn with_registry(mut self, registry: StepRegistry<BuildState>) -> Self {
        self.registry = registry;
        self
    }

    /// Resolve relative paths and keep the checkpoint in `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_log_init<F>(mut self, init: F) -> Self
    where
        F: FnOnce(Level) -> Result<()> + 'static,
    {
        self.log_init = Box::new(init);
        self
    }

    /// Run one invocation; `args` includes the program name.
    pub fn run<I, T>(self, args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) => {
                let _ = e.print();
                return e.exit_code();
            }
        };

        let Driver {
            registry,
            dir,
            log_init,
        } = self;

        if let Err(e) = log_init(logging::level_for(cli.debug)) {
            eprintln!("model-image: {e:#}");
            return EXIT_FAILURE;
        }

        let mode = match cli.run_mode() {
            Ok(mode) => mode,
            Err(e) => {
                error!("{e}");
                return EXIT_USAGE;
            }
        };

        match execute(registry, dir, &cli, &mode) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                // The machine already logged its own crash.
                if e.downcast_ref::<MachineError>().is_none() {
                    error!("{e:#}");
                }
                EXIT_FAILURE
            }
        }
    }
}

fn execute(
    registry: StepRegistry<BuildState>,
    dir: Option<PathBuf>,
    cli: &Cli,
    mode: &RunMode,
) -> Result<()> {
    let cwd = match dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let store = CheckpointStore::in_dir(&cwd);
    let _lock = store.lock()?;

    let mut machine = match mode {
        RunMode::Fresh {
            model_assertion, ..
        } => {
            let defaults = match &cli.config {
                Some(path) => load_build_defaults(&absolutize(&cwd, path))?,
                None => BuildDefaults::default(),
            };
            let options = cli.build_options(&cwd, model_assertion, defaults);
            if store.exists() {
                warn!(path = %store.path().display(), "discarding checkpoint of an earlier build");
                store.discard()?;
            }
            info!(
                model = %options.model_assertion.display(),
                output = %options.output.display(),
                "starting build"
            );
            builder::fresh_machine(registry, options).with_checkpoint(store.clone())
        }
        RunMode::Resume { .. } => {
            let machine = store.load(registry)?;
            info!(
                next = machine.queue().next_name().unwrap_or("-"),
                completed = machine.completed().len(),
                "resuming build"
            );
            machine
        }
    };

    let bound = mode.bound();
    match machine.run_with(bound)? {
        RunOutcome::Paused { next } => {
            info!(
                next = %next,
                checkpoint = %store.path().display(),
                "build stopped; continue with --resume"
            );
            Ok(())
        }
        RunOutcome::Finished => finish(&machine, &store, cli.keep || bound.is_bounded()),
    }
}

/// Cleanup after the queue ran dry.
fn finish(
    machine: &StateMachine<BuildState>,
    store: &CheckpointStore,
    retain_requested: bool,
) -> Result<()> {
    let state = machine.state();
    if let Some(disk) = &state.disk_image {
        info!(output = %disk.display(), "build finished");
    } else {
        info!("build finished early");
    }

    if retain_requested || state.keep {
        info!(
            checkpoint = %store.path().display(),
            workdir = %state.workdir.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
            "keeping checkpoint and working directory"
        );
        return Ok(());
    }

    store.discard()?;
    if let (true, Some(workdir)) = (state.owns_workdir, &state.workdir) {
        if workdir.exists() {
            fs::remove_dir_all(workdir)
                .with_context(|| format!("removing working directory '{}'", workdir.display()))?;
            info!(workdir = %workdir.display(), "removed working directory");
        }
    }
    Ok(())
}
