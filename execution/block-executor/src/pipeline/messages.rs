// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    block_task::Task,
    scheduler::{Schedule, TaskGraph},
    task::FootprintPredictor,
};
use octopus_dependency_graph::AccessedBy;
use octopus_types::{
    block::{BlockHeader, Withdrawal},
    task_id::TaskId,
};
use std::fmt;

/// Every channel of the pipeline carries a payload or the end-of-stream sentinel. A stage
/// receiving `End` forwards it downstream and terminates.
pub enum StageMessage<P> {
    Start(P),
    End,
}

impl<P> fmt::Debug for StageMessage<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageMessage::Start(_) => write!(f, "Start(..)"),
            StageMessage::End => write!(f, "End"),
        }
    }
}

/// The transactions of one block with their predicted footprints.
pub struct TaskBatch<T> {
    pub header: BlockHeader,
    pub tasks: Vec<Task<T>>,
    pub withdrawals: Vec<Withdrawal>,
}

impl<T> TaskBatch<T> {
    /// Assigns ids in block order and predicts every transaction's footprint and cost.
    pub fn from_transactions(
        header: BlockHeader,
        txns: Vec<T>,
        predictor: &impl FootprintPredictor<T>,
        withdrawals: Vec<Withdrawal>,
    ) -> Self {
        let tasks = txns
            .into_iter()
            .enumerate()
            .map(|(index, txn)| {
                let footprint = predictor.predict(&txn, header.coinbase);
                let cost = predictor.cost(&txn);
                Task::new(TaskId::new(header.number, index as u32, 0), txn, footprint, cost)
            })
            .collect();
        Self {
            header,
            tasks,
            withdrawals,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Prefetched tasks and the accessed-by index of their footprints.
pub struct GraphBuildInput<T> {
    pub header: BlockHeader,
    pub tasks: Vec<Task<T>>,
    pub accessed_by: AccessedBy,
    pub withdrawals: Vec<Withdrawal>,
}

pub struct GraphMessage<T> {
    pub header: BlockHeader,
    pub graph: TaskGraph<T>,
    pub withdrawals: Vec<Withdrawal>,
}

pub struct ScheduleMessage<T> {
    pub header: BlockHeader,
    pub schedule: Schedule<T>,
    pub critical_path_len: u64,
    pub withdrawals: Vec<Withdrawal>,
}
