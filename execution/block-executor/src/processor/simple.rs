// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{Placement, Processor, ScheduledTask};
use crate::block_task::Task;
use octopus_types::error::{code_invariant_error, PanicError};
use std::sync::Arc;

/// Append-only timeline. Idle gaps are never reused.
pub struct SimpleProcessor<T> {
    tasks: Vec<ScheduledTask<T>>,
    tail: u64,
}

impl<T> Default for SimpleProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SimpleProcessor<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            tail: 0,
        }
    }
}

impl<T> Processor<T> for SimpleProcessor<T> {
    fn set_timespan(&mut self, _timespan: u64) {}

    fn find_eft(&self, est: u64, cost: u64) -> Result<Placement, PanicError> {
        let start = self.tail.max(est);
        Ok(Placement {
            start,
            finish: start + cost,
        })
    }

    fn add_task(&mut self, task: Arc<Task<T>>, placement: Placement) -> Result<(), PanicError> {
        if placement.start < self.tail || placement.finish < placement.start {
            return Err(code_invariant_error(format!(
                "{} placed at [{}, {}) before the tail {}",
                task.id(),
                placement.start,
                placement.finish,
                self.tail
            )));
        }
        self.tail = placement.finish;
        self.tasks.push(ScheduledTask {
            task,
            start: placement.start,
            finish: placement.finish,
        });
        Ok(())
    }

    fn timeline(&self) -> Vec<ScheduledTask<T>> {
        self.tasks.clone()
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn finish_time(&self) -> u64 {
        self.tail
    }
}
