// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{schedule, Schedule, TaskGraph};
use octopus_config::config::SchedulePolicy;
use octopus_types::error::{code_invariant_error, PanicError};
use rayon::prelude::*;
use tracing::debug;

/// Policies tried by the aggregator, in tie-breaking order.
pub const AGGREGATED_POLICIES: [SchedulePolicy; 4] = [
    SchedulePolicy::Heft,
    SchedulePolicy::Ct,
    SchedulePolicy::Cptl,
    SchedulePolicy::Cpop,
];

/// Runs every heuristic on its own processors in parallel and keeps the schedule with the
/// smallest makespan. On ties the earlier policy of `AGGREGATED_POLICIES` wins.
pub(crate) fn aggregate<T: Send + Sync>(
    graph: &TaskGraph<T>,
    num_workers: usize,
    tree_processor_threshold: usize,
) -> Result<Schedule<T>, PanicError> {
    let schedules = AGGREGATED_POLICIES
        .par_iter()
        .map(|policy| schedule(graph, num_workers, *policy, tree_processor_threshold))
        .collect::<Result<Vec<_>, _>>()?;
    for candidate in &schedules {
        debug!(
            policy = ?candidate.policy(),
            makespan = candidate.makespan(),
            "aggregated candidate"
        );
    }
    schedules
        .into_iter()
        .min_by_key(|candidate| candidate.makespan())
        .ok_or_else(|| code_invariant_error("no schedule to aggregate"))
}
