// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::messages::{GraphMessage, ScheduleMessage};
use crate::{errors::BlockExecutionResult, scheduler::schedule};
use octopus_config::config::{ExecutionConfig, SchedulePolicy};

pub struct ScheduleStage {
    num_workers: usize,
    policy: SchedulePolicy,
    tree_processor_threshold: usize,
}

impl ScheduleStage {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            num_workers: config.num_workers,
            policy: config.schedule_policy,
            tree_processor_threshold: config.tree_processor_threshold,
        }
    }

    pub fn process<T: Send + Sync>(
        &self,
        message: GraphMessage<T>,
    ) -> BlockExecutionResult<ScheduleMessage<T>> {
        let GraphMessage {
            header,
            graph,
            withdrawals,
        } = message;
        let schedule = schedule(
            &graph,
            self.num_workers,
            self.policy,
            self.tree_processor_threshold,
        )?;
        Ok(ScheduleMessage {
            header,
            schedule,
            critical_path_len: graph.critical_path_len(),
            withdrawals,
        })
    }
}
