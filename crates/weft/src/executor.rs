//! Executor descriptions and the ordered registry used for partitioning.
//!
//! Executors are external collaborators; the core only asks which operations
//! each one claims. The registry is a caller-owned priority list rather than
//! mutated global state: registration and deregistration are plain list edits.

use std::fmt;
use std::sync::Arc;

use crate::trace::BoundOp;

/// A lowering target for regions of a trace.
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this executor can lower the given operation.
    fn can_execute(&self, op: &BoundOp) -> bool;

    /// Fusion backends get the bookend hoist applied to their regions.
    fn is_fusion_backend(&self) -> bool {
        false
    }
}

/// Ordered, first-match-wins executor list.
///
/// The last entry acts as the fallback and is expected to accept every
/// operation; hoisted bookend regions are assigned to it.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    entries: Vec<Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        ExecutorRegistry {
            entries: Vec::new(),
        }
    }

    pub fn from_entries(entries: Vec<Arc<dyn Executor>>) -> Self {
        ExecutorRegistry { entries }
    }

    /// Appends an executor with the lowest priority so far.
    pub fn push(&mut self, executor: Arc<dyn Executor>) {
        self.entries.push(executor);
    }

    /// Inserts an executor at an explicit priority position.
    pub fn insert(&mut self, index: usize, executor: Arc<dyn Executor>) {
        self.entries.insert(index, executor);
    }

    /// Removes an executor by name; returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|executor| executor.name() != name);
        self.entries.len() != before
    }

    /// First executor (by priority) that claims the operation.
    pub fn assign(&self, op: &BoundOp) -> Option<usize> {
        self.entries
            .iter()
            .position(|executor| executor.can_execute(op))
    }

    pub fn get(&self, index: usize) -> &Arc<dyn Executor> {
        &self.entries[index]
    }

    /// Index of the fallback executor.
    pub fn fallback_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|executor| executor.name()).collect()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|executor| executor.name()))
            .finish()
    }
}
