// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{Placement, Processor, ScheduledTask};
use crate::block_task::Task;
use octopus_types::error::{code_invariant_error, PanicError};
use std::sync::Arc;

const HEAD: usize = 0;

struct Node<T> {
    entry: Option<ScheduledTask<T>>,
    start: u64,
    finish: u64,
    next: Option<usize>,
}

/// Timeline kept as a singly linked list ordered by start time, nodes stored in an arena.
/// Node 0 is a sentinel occupying `[0, 0)`.
pub struct ListProcessor<T> {
    nodes: Vec<Node<T>>,
    timespan: u64,
}

impl<T> Default for ListProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListProcessor<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                entry: None,
                start: 0,
                finish: 0,
                next: None,
            }],
            timespan: 0,
        }
    }

    pub fn timespan(&self) -> u64 {
        self.timespan
    }
}

impl<T> Processor<T> for ListProcessor<T> {
    fn set_timespan(&mut self, timespan: u64) {
        self.timespan = timespan;
    }

    /// First gap, in time order, that holds the task no earlier than `est`; the tail otherwise.
    fn find_eft(&self, est: u64, cost: u64) -> Result<Placement, PanicError> {
        let mut current = HEAD;
        loop {
            let start = self.nodes[current].finish.max(est);
            let finish = start + cost;
            match self.nodes[current].next {
                Some(next) if self.nodes[next].start < finish => current = next,
                _ => return Ok(Placement { start, finish }),
            }
        }
    }

    fn add_task(&mut self, task: Arc<Task<T>>, placement: Placement) -> Result<(), PanicError> {
        let Placement { start, finish } = placement;
        if finish < start {
            return Err(code_invariant_error(format!(
                "placement of {} ends before it starts",
                task.id()
            )));
        }

        let mut current = HEAD;
        while let Some(next) = self.nodes[current].next {
            if self.nodes[next].finish > start {
                break;
            }
            current = next;
        }
        let next = self.nodes[current].next;
        if self.nodes[current].finish > start
            || next.map_or(false, |next| self.nodes[next].start < finish)
        {
            return Err(code_invariant_error(format!(
                "{} placed at [{}, {}) overlaps the timeline",
                task.id(),
                start,
                finish
            )));
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            entry: Some(ScheduledTask {
                task,
                start,
                finish,
            }),
            start,
            finish,
            next,
        });
        self.nodes[current].next = Some(idx);
        Ok(())
    }

    fn timeline(&self) -> Vec<ScheduledTask<T>> {
        let mut timeline = Vec::with_capacity(self.nodes.len() - 1);
        let mut current = self.nodes[HEAD].next;
        while let Some(idx) = current {
            if let Some(entry) = &self.nodes[idx].entry {
                timeline.push(entry.clone());
            }
            current = self.nodes[idx].next;
        }
        timeline
    }

    fn len(&self) -> usize {
        self.nodes.len() - 1
    }
}
