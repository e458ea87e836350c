//! The dynamic queue of pending step names.

use std::collections::VecDeque;

/// Ordered list of steps that have not run yet.
///
/// The machine pops from the front. While a step runs it may reshape the
/// remainder; [`StepQueue::push_next`] inserts right behind the running step
/// and keeps the order of successive calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepQueue {
    pending: VecDeque<String>,
    // Insertion point for push_next, reset before every step.
    cursor: usize,
}

impl StepQueue {
    pub fn new<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            pending: names.into_iter().map(Into::into).collect(),
            cursor: 0,
        }
    }

    /// Name of the step that will run next.
    pub fn next_name(&self) -> Option<&str> {
        self.pending.front().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pending.iter().any(|pending| pending == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    /// Run `name` immediately after the current step.
    pub fn push_next(&mut self, name: impl Into<String>) {
        let at = self.cursor.min(self.pending.len());
        self.pending.insert(at, name.into());
        self.cursor = at + 1;
    }

    /// Run `name` after everything already queued.
    pub fn push_back(&mut self, name: impl Into<String>) {
        self.pending.push_back(name.into());
    }

    /// Substitute the next pending step. Returns the replaced name.
    pub fn replace_next(&mut self, name: impl Into<String>) -> Option<String> {
        let replaced = self.pending.pop_front();
        self.pending.push_front(name.into());
        replaced
    }

    /// Insert `names` starting at position `index` (clamped to the end).
    pub fn splice<I, T>(&mut self, index: usize, names: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut at = index.min(self.pending.len());
        for name in names {
            self.pending.insert(at, name.into());
            at += 1;
        }
    }

    /// Drop every pending step. The machine then finishes normally.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.cursor = 0;
    }

    pub(crate) fn pop(&mut self) -> Option<String> {
        self.cursor = 0;
        self.pending.pop_front()
    }

    pub(crate) fn restore_front(&mut self, name: String) {
        self.pending.push_front(name);
        self.cursor = 0;
    }
}
