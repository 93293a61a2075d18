// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ready_queue_schedule, Placer, Schedule, TaskGraph};
use octopus_config::config::SchedulePolicy;
use octopus_types::error::{code_invariant_error, PanicError};

/// Baselines used to judge the heuristics, run on append-only processors.
///
/// `Hesi` releases the cheapest ready task first, `Loba` the ready task that can start
/// earliest. Neither reserves a processor for the critical path.
pub(crate) fn baseline_schedule<T>(
    graph: &TaskGraph<T>,
    placer: Placer<'_, T>,
    policy: SchedulePolicy,
) -> Result<Schedule<T>, PanicError> {
    match policy {
        SchedulePolicy::Hesi => ready_queue_schedule(
            graph,
            placer,
            policy,
            |idx, _| u64::MAX - graph.vertex(idx).cost,
            |_| false,
        ),
        SchedulePolicy::Loba => {
            ready_queue_schedule(graph, placer, policy, |_, est| u64::MAX - est, |_| false)
        },
        other => Err(code_invariant_error(format!(
            "{:?} is not a baseline policy",
            other
        ))),
    }
}
