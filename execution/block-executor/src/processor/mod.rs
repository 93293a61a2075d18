// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-worker timelines.
//!
//! A processor answers "where would a task with this earliest start and cost finish if
//! placed here" without mutating itself, and then materializes a chosen placement. The
//! variants only differ in how they track idle gaps.

mod list;
mod simple;
pub mod slot_manager;
mod tree;

use crate::block_task::Task;
use octopus_types::error::PanicError;
use std::sync::Arc;

pub use list::ListProcessor;
pub use simple::SimpleProcessor;
pub use tree::TreeProcessor;

/// A candidate interval `[start, finish)` on one processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Placement {
    pub start: u64,
    pub finish: u64,
}

pub struct ScheduledTask<T> {
    pub task: Arc<Task<T>>,
    pub start: u64,
    pub finish: u64,
}

impl<T> Clone for ScheduledTask<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            start: self.start,
            finish: self.finish,
        }
    }
}

impl<T> std::fmt::Debug for ScheduledTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}, {})", self.task.id(), self.start, self.finish)
    }
}

pub trait Processor<T> {
    /// Upper bound on the total cost that will be placed, set before the first placement.
    fn set_timespan(&mut self, timespan: u64);

    /// Earliest placement of a task of `cost` that starts no earlier than `est`.
    fn find_eft(&self, est: u64, cost: u64) -> Result<Placement, PanicError>;

    /// Commits a placement previously returned by `find_eft`.
    fn add_task(&mut self, task: Arc<Task<T>>, placement: Placement) -> Result<(), PanicError>;

    /// Placed tasks ordered by start time.
    fn timeline(&self) -> Vec<ScheduledTask<T>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finish time of the last placed task.
    fn finish_time(&self) -> u64 {
        self.timeline().last().map_or(0, |entry| entry.finish)
    }

    /// Assigned tasks in increasing id order, the order they execute in.
    fn execution_order(&self) -> Vec<Arc<Task<T>>> {
        let mut tasks: Vec<Arc<Task<T>>> = self
            .timeline()
            .into_iter()
            .map(|entry| entry.task)
            .collect();
        tasks.sort_by_key(|task| task.id());
        tasks
    }

    /// Runs `run` on every assigned task, strictly sequentially in id order.
    fn execute<F>(&self, mut run: F)
    where
        F: FnMut(&Arc<Task<T>>),
    {
        for task in self.execution_order() {
            run(&task);
        }
    }
}

/// Which gap-tracking structure a processor uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Linear scan over a linked timeline.
    List,
    /// Free slots in an AVL tree backed by a max segment tree.
    Tree,
    /// Append only, no gap reuse.
    Simple,
}

pub enum AnyProcessor<T> {
    List(ListProcessor<T>),
    Tree(TreeProcessor<T>),
    Simple(SimpleProcessor<T>),
}

impl<T> AnyProcessor<T> {
    pub fn new(kind: ProcessorKind) -> Self {
        match kind {
            ProcessorKind::List => AnyProcessor::List(ListProcessor::new()),
            ProcessorKind::Tree => AnyProcessor::Tree(TreeProcessor::new()),
            ProcessorKind::Simple => AnyProcessor::Simple(SimpleProcessor::new()),
        }
    }

    pub fn kind(&self) -> ProcessorKind {
        match self {
            AnyProcessor::List(_) => ProcessorKind::List,
            AnyProcessor::Tree(_) => ProcessorKind::Tree,
            AnyProcessor::Simple(_) => ProcessorKind::Simple,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $processor:ident => $body:expr) => {
        match $self {
            AnyProcessor::List($processor) => $body,
            AnyProcessor::Tree($processor) => $body,
            AnyProcessor::Simple($processor) => $body,
        }
    };
}

impl<T> Processor<T> for AnyProcessor<T> {
    fn set_timespan(&mut self, timespan: u64) {
        dispatch!(self, p => p.set_timespan(timespan))
    }

    fn find_eft(&self, est: u64, cost: u64) -> Result<Placement, PanicError> {
        dispatch!(self, p => p.find_eft(est, cost))
    }

    fn add_task(&mut self, task: Arc<Task<T>>, placement: Placement) -> Result<(), PanicError> {
        dispatch!(self, p => p.add_task(task, placement))
    }

    fn timeline(&self) -> Vec<ScheduledTask<T>> {
        dispatch!(self, p => p.timeline())
    }

    fn len(&self) -> usize {
        dispatch!(self, p => p.len())
    }
}
