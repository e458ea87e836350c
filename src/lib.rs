//! Resumable disk-image builds driven by a model assertion.
//!
//! A build is a queue of named steps executed one at a time by a
//! [`machine::StateMachine`]. After every step the machine's whole state is
//! written to a checkpoint file, so a build stopped with `--until`/`--thru`
//! (or by a crash) continues in a later process with `--resume`.
//!
//! # Architecture
//!
//! ```text
//! driver ──► cli / config        flags and TOML defaults
//!    │
//!    ├──► checkpoint             .model-image.ckpt, lock, load/save/discard
//!    │
//!    └──► machine ──► registry   step name → implementation
//!            │        queue      pending names, mutable by steps
//!            │
//!            └──► builder        reference model-assertion steps
//!                    │
//!                    └──► artifact   trees, partition images, disk assembly
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use model_image::machine::{StateMachine, StepRegistry};
//!
//! let registry = StepRegistry::new("counter")
//!     .step("one", |n: &mut u32, _| { *n += 1; Ok(()) })
//!     .step("two", |n: &mut u32, _| { *n += 2; Ok(()) });
//! let mut machine = StateMachine::new(registry, 0u32);
//! machine.run_until("two")?;
//! assert_eq!(*machine.state(), 1);
//! ```

pub mod artifact;
pub mod builder;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod machine;

pub use checkpoint::CheckpointStore;
pub use driver::Driver;
pub use error::{CheckpointError, MachineError, UsageError};
pub use machine::{Bound, RunOutcome, StateMachine, StepQueue, StepRegistry};
