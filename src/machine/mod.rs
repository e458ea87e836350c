//! Step-sequencing state machine.
//!
//! A [`StateMachine`] owns the builder state, a [`StepRegistry`] of step
//! implementations and the dynamic [`StepQueue`] of pending step names. Steps
//! run strictly one at a time in queue order; after each one completes the
//! machine writes a checkpoint (when a [`CheckpointStore`] is attached), so an
//! interrupted build loses at most the step that was in flight.
//!
//! ```text
//! queue: [a, b, c]   pop a → run a → checkpoint {pending: [b, c]}
//!                    a calls push_next("a2")
//! queue: [a2, b, c]  pop a2 → ...
//! ```

pub mod queue;
pub mod registry;

pub use queue::StepQueue;
pub use registry::{StepFn, StepRegistry};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::checkpoint::CheckpointStore;
use crate::error::MachineError;

/// Where a run should stop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Bound {
    /// Run until the queue is exhausted.
    #[default]
    None,
    /// Stop before the named step runs.
    Until(String),
    /// Stop after the named step has run.
    Thru(String),
}

impl Bound {
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Bound::None)
    }
}

/// How a run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The queue is empty: every step ran, or a step cleared the rest.
    Finished,
    /// A bound was reached; `next` is the first step still pending.
    Paused { next: String },
}

#[derive(Debug)]
pub struct StateMachine<S> {
    registry: StepRegistry<S>,
    queue: StepQueue,
    completed: Vec<String>,
    state: S,
    checkpoint: Option<CheckpointStore>,
}

impl<S> StateMachine<S> {
    /// Fresh machine: the queue starts as the registry's pipeline.
    pub fn new(registry: StepRegistry<S>, state: S) -> Self {
        let queue = StepQueue::new(registry.pipeline().iter().cloned());
        Self {
            registry,
            queue,
            completed: Vec::new(),
            state,
            checkpoint: None,
        }
    }

    /// Reassemble a machine from checkpointed parts.
    pub(crate) fn from_parts(
        registry: StepRegistry<S>,
        state: S,
        pending: Vec<String>,
        completed: Vec<String>,
    ) -> Self {
        Self {
            registry,
            queue: StepQueue::new(pending),
            completed,
            state,
            checkpoint: None,
        }
    }

    /// Checkpoint into `store` after every completed step.
    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn builder(&self) -> &str {
        self.registry.builder()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn queue(&self) -> &StepQueue {
        &self.queue
    }

    pub fn pending(&self) -> Vec<String> {
        self.queue.to_vec()
    }

    /// Steps that completed, in execution order, across resumes.
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn checkpoint_store(&self) -> Option<&CheckpointStore> {
        self.checkpoint.as_ref()
    }
}

impl<S: Serialize> StateMachine<S> {
    pub fn run(&mut self) -> Result<RunOutcome, MachineError> {
        self.run_with(&Bound::None)
    }

    /// Run up to, but not including, the step called `name`.
    ///
    /// If `name` never becomes the next pending step the whole queue runs.
    pub fn run_until(&mut self, name: &str) -> Result<RunOutcome, MachineError> {
        self.run_with(&Bound::Until(name.to_string()))
    }

    /// Run up to and including the step called `name`.
    pub fn run_thru(&mut self, name: &str) -> Result<RunOutcome, MachineError> {
        self.run_with(&Bound::Thru(name.to_string()))
    }

    pub fn run_with(&mut self, bound: &Bound) -> Result<RunOutcome, MachineError> {
        loop {
            if let (Bound::Until(target), Some(next)) = (bound, self.queue.next_name()) {
                if next == target {
                    return self.pause();
                }
            }

            let Some(name) = self.queue.pop() else {
                info!(completed = self.completed.len(), "step queue exhausted");
                return Ok(RunOutcome::Finished);
            };

            self.execute(name.clone())?;

            if let Bound::Thru(target) = bound {
                if &name == target {
                    if self.queue.is_empty() {
                        info!(step = %name, "step queue exhausted");
                        return Ok(RunOutcome::Finished);
                    }
                    return self.pause();
                }
            }
        }
    }

    fn execute(&mut self, name: String) -> Result<(), MachineError> {
        let Some(step) = self.registry.get(&name) else {
            error!(step = %name, error = "no implementation registered", "Crash in state machine");
            self.queue.restore_front(name.clone());
            return Err(MachineError::UnknownStep(name));
        };

        info!(step = %name, "running step");
        let before = self.queue.clone();
        if let Err(source) = step(&mut self.state, &mut self.queue) {
            error!(step = %name, error = %format!("{source:#}"), "Crash in state machine");
            // Queue edits of a failed step are dropped with it.
            self.queue = before;
            self.queue.restore_front(name.clone());
            return Err(MachineError::StepFailed { step: name, source });
        }

        self.completed.push(name.clone());
        if let Err(source) = self.save_checkpoint() {
            error!(step = %name, error = %source, "Crash in state machine");
            return Err(MachineError::Checkpoint { step: name, source });
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<RunOutcome, MachineError> {
        let next = self.queue.next_name().unwrap_or_default().to_string();
        // A bound that hits before any step ran still has to leave a checkpoint.
        if let Err(source) = self.save_checkpoint() {
            error!(step = %next, error = %source, "Crash in state machine");
            return Err(MachineError::Checkpoint { step: next, source });
        }
        info!(next = %next, "pausing before step");
        Ok(RunOutcome::Paused { next })
    }

    fn save_checkpoint(&self) -> Result<(), crate::error::CheckpointError> {
        if let Some(store) = &self.checkpoint {
            store.save(self)?;
            debug!(path = %store.path().display(), pending = self.queue.len(), "checkpoint saved");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde::Deserialize;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Trace {
        ran: Vec<String>,
    }

    fn record(name: &'static str) -> impl Fn(&mut Trace, &mut StepQueue) -> anyhow::Result<()> {
        move |trace: &mut Trace, _: &mut StepQueue| {
            trace.ran.push(name.to_string());
            Ok(())
        }
    }

    fn abc_registry() -> StepRegistry<Trace> {
        StepRegistry::new("trace")
            .step("a", record("a"))
            .step("b", record("b"))
            .step("c", record("c"))
    }

    #[test]
    fn test_run_executes_every_step_in_order() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        assert_eq!(machine.run().unwrap(), RunOutcome::Finished);
        assert_eq!(machine.state().ran, ["a", "b", "c"]);
        assert_eq!(machine.completed(), ["a", "b", "c"]);
        assert!(machine.queue().is_empty());
    }

    #[test]
    fn test_run_until_stops_before_target() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        let outcome = machine.run_until("b").unwrap();
        assert_eq!(outcome, RunOutcome::Paused { next: "b".into() });
        assert_eq!(machine.state().ran, ["a"]);
        assert_eq!(machine.pending(), ["b", "c"]);
    }

    #[test]
    fn test_run_until_first_step_runs_nothing() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        let outcome = machine.run_until("a").unwrap();
        assert_eq!(outcome, RunOutcome::Paused { next: "a".into() });
        assert!(machine.state().ran.is_empty());
    }

    #[test]
    fn test_run_until_unknown_target_runs_everything() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        assert_eq!(machine.run_until("zzz").unwrap(), RunOutcome::Finished);
        assert_eq!(machine.state().ran, ["a", "b", "c"]);
    }

    #[test]
    fn test_run_until_already_passed_target_runs_everything() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        machine.run_thru("a").unwrap();
        assert_eq!(machine.run_until("a").unwrap(), RunOutcome::Finished);
        assert_eq!(machine.state().ran, ["a", "b", "c"]);
    }

    #[test]
    fn test_run_thru_stops_after_target() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        let outcome = machine.run_thru("b").unwrap();
        assert_eq!(outcome, RunOutcome::Paused { next: "c".into() });
        assert_eq!(machine.state().ran, ["a", "b"]);
    }

    #[test]
    fn test_run_thru_last_step_finishes() {
        let mut machine = StateMachine::new(abc_registry(), Trace::default());
        assert_eq!(machine.run_thru("c").unwrap(), RunOutcome::Finished);
    }

    #[test]
    fn test_inserted_step_runs_once_right_after_inserter() {
        let registry = StepRegistry::new("trace")
            .step("a", |trace: &mut Trace, queue: &mut StepQueue| {
                trace.ran.push("a".into());
                queue.push_next("extra");
                Ok(())
            })
            .step("b", record("b"))
            .on_demand("extra", record("extra"));

        let mut machine = StateMachine::new(registry, Trace::default());
        machine.run().unwrap();
        assert_eq!(machine.state().ran, ["a", "extra", "b"]);
    }

    #[test]
    fn test_step_clearing_queue_finishes_normally() {
        let registry = abc_registry()
            .replace("b", |trace: &mut Trace, queue: &mut StepQueue| {
                trace.ran.push("b".into());
                queue.clear();
                Ok(())
            })
            .unwrap();

        let mut machine = StateMachine::new(registry, Trace::default());
        assert_eq!(machine.run().unwrap(), RunOutcome::Finished);
        assert_eq!(machine.state().ran, ["a", "b"]);
    }

    #[test]
    fn test_failing_step_stays_pending() {
        let registry = abc_registry()
            .replace("b", |_: &mut Trace, _: &mut StepQueue| bail!("disk full"))
            .unwrap();

        let mut machine = StateMachine::new(registry, Trace::default());
        let err = machine.run().unwrap_err();
        assert!(matches!(&err, MachineError::StepFailed { step, .. } if step == "b"));
        assert_eq!(machine.completed(), ["a"]);
        assert_eq!(machine.pending(), ["b", "c"]);
    }

    #[test]
    fn test_failed_step_queue_edits_are_dropped() {
        let attempts = Rc::new(Cell::new(0));
        let seen = Rc::clone(&attempts);
        let registry = StepRegistry::new("trace")
            .step("a", move |trace: &mut Trace, queue: &mut StepQueue| {
                queue.push_next("extra");
                seen.set(seen.get() + 1);
                if seen.get() == 1 {
                    bail!("transient");
                }
                trace.ran.push("a".into());
                Ok(())
            })
            .step("b", record("b"))
            .on_demand("extra", record("extra"));

        let mut machine = StateMachine::new(registry, Trace::default());
        machine.run().unwrap_err();
        assert_eq!(machine.pending(), ["a", "b"]);

        machine.run().unwrap();
        assert_eq!(attempts.get(), 2);
        assert_eq!(machine.state().ran, ["a", "extra", "b"]);
        assert_eq!(machine.completed(), ["a", "extra", "b"]);
    }

    #[test]
    fn test_unknown_queued_step_fails() {
        let registry = StepRegistry::new("trace").step(
            "a",
            |_: &mut Trace, queue: &mut StepQueue| {
                queue.push_next("ghost");
                Ok(())
            },
        );

        let mut machine = StateMachine::new(registry, Trace::default());
        let err = machine.run().unwrap_err();
        assert!(matches!(err, MachineError::UnknownStep(name) if name == "ghost"));
    }

    #[test]
    fn test_checkpoint_written_after_each_step() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(temp.path());
        let registry = abc_registry()
            .replace("c", |_: &mut Trace, _: &mut StepQueue| bail!("boom"))
            .unwrap();

        let mut machine = StateMachine::new(registry, Trace::default()).with_checkpoint(store.clone());
        machine.run().unwrap_err();

        let resumed: StateMachine<Trace> = store.load(abc_registry()).unwrap();
        assert_eq!(resumed.completed(), ["a", "b"]);
        assert_eq!(resumed.pending(), ["c"]);
        assert_eq!(resumed.state().ran, ["a", "b"]);
    }

    #[test]
    fn test_pause_before_first_step_writes_checkpoint() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::in_dir(temp.path());

        let mut machine =
            StateMachine::new(abc_registry(), Trace::default()).with_checkpoint(store.clone());
        machine.run_until("a").unwrap();

        assert!(store.exists());
        let resumed: StateMachine<Trace> = store.load(abc_registry()).unwrap();
        assert_eq!(resumed.pending(), ["a", "b", "c"]);
    }
}
