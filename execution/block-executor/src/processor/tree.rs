// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{slot_manager::SlotManager, Placement, Processor, ScheduledTask};
use crate::block_task::Task;
use octopus_types::error::{code_invariant_error, PanicError};
use std::{collections::BTreeMap, sync::Arc};

/// Horizon used until `set_timespan` is called.
const DEFAULT_HORIZON: u64 = 1 << 48;

/// Same insertion policy as the list processor with logarithmic slot lookups.
pub struct TreeProcessor<T> {
    slots: SlotManager,
    tasks: BTreeMap<u64, ScheduledTask<T>>,
}

impl<T> Default for TreeProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TreeProcessor<T> {
    pub fn new() -> Self {
        Self {
            slots: SlotManager::new(DEFAULT_HORIZON),
            tasks: BTreeMap::new(),
        }
    }

    pub fn slot_manager(&self) -> &SlotManager {
        &self.slots
    }
}

impl<T> Processor<T> for TreeProcessor<T> {
    /// No placement finishes later than the total cost of the block, so twice that bounds
    /// the timeline.
    fn set_timespan(&mut self, timespan: u64) {
        if self.tasks.is_empty() {
            self.slots = SlotManager::new(timespan.saturating_mul(2).max(1));
        }
    }

    fn find_eft(&self, est: u64, cost: u64) -> Result<Placement, PanicError> {
        let start = self.slots.find(est, cost).ok_or_else(|| {
            code_invariant_error(format!(
                "no free slot of length {} after {} within horizon {}",
                cost,
                est,
                self.slots.horizon()
            ))
        })?;
        Ok(Placement {
            start,
            finish: start + cost,
        })
    }

    fn add_task(&mut self, task: Arc<Task<T>>, placement: Placement) -> Result<(), PanicError> {
        let Placement { start, finish } = placement;
        if finish < start {
            return Err(code_invariant_error(format!(
                "placement of {} ends before it starts",
                task.id()
            )));
        }
        self.slots.occupy(start, finish)?;
        self.tasks.insert(start, ScheduledTask {
            task,
            start,
            finish,
        });
        Ok(())
    }

    fn timeline(&self) -> Vec<ScheduledTask<T>> {
        self.tasks.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}
