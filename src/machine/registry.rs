//! Name → implementation table for build steps.

use std::collections::BTreeMap;
use std::fmt;

use super::queue::StepQueue;
use crate::error::MachineError;

/// A step body. It may mutate the builder state and reshape the queue.
pub type StepFn<S> = Box<dyn Fn(&mut S, &mut StepQueue) -> anyhow::Result<()>>;

/// Steps known to one builder variant.
///
/// `pipeline` is the initial queue order; on-demand steps are registered
/// but only run when some other step inserts them.
pub struct StepRegistry<S> {
    builder: String,
    pipeline: Vec<String>,
    steps: BTreeMap<String, StepFn<S>>,
}

impl<S> StepRegistry<S> {
    pub fn new(builder: impl Into<String>) -> Self {
        Self {
            builder: builder.into(),
            pipeline: Vec::new(),
            steps: BTreeMap::new(),
        }
    }

    /// Register a step and append it to the initial pipeline.
    pub fn step<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut S, &mut StepQueue) -> anyhow::Result<()> + 'static,
    {
        self.pipeline.push(name.to_string());
        self.steps.insert(name.to_string(), Box::new(f));
        self
    }

    /// Register a step that only runs when inserted by another step.
    pub fn on_demand<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut S, &mut StepQueue) -> anyhow::Result<()> + 'static,
    {
        self.steps.insert(name.to_string(), Box::new(f));
        self
    }

    /// Swap the implementation of an already registered step.
    ///
    /// Position in the pipeline is unchanged.
    pub fn replace<F>(mut self, name: &str, f: F) -> Result<Self, MachineError>
    where
        F: Fn(&mut S, &mut StepQueue) -> anyhow::Result<()> + 'static,
    {
        match self.steps.get_mut(name) {
            Some(slot) => {
                *slot = Box::new(f);
                Ok(self)
            }
            None => Err(MachineError::UnknownStep(name.to_string())),
        }
    }

    pub fn builder(&self) -> &str {
        &self.builder
    }

    pub fn pipeline(&self) -> &[String] {
        &self.pipeline
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&StepFn<S>> {
        self.steps.get(name)
    }
}

impl<S> fmt::Debug for StepRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("builder", &self.builder)
            .field("pipeline", &self.pipeline)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}
