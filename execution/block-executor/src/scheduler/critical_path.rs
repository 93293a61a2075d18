// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ready_queue_schedule, Placer, Schedule, TaskGraph};
use octopus_config::config::SchedulePolicy;
use octopus_types::error::{code_invariant_error, PanicError};

/// Critical-path scheduling. Vertices are released in dependency order; the ready vertex
/// with the highest priority goes first. A task whose priority equals the critical-path
/// length is pinned to processor 0, so the critical path never waits on a shared worker.
///
/// `Cpop` uses `rank_d + rank_u`, which reaches the critical-path length exactly on the
/// critical path. `Cptl` uses `cpl - rank_d`, favoring tasks that can start early.
pub(crate) fn critical_path_schedule<T>(
    graph: &TaskGraph<T>,
    placer: Placer<'_, T>,
    policy: SchedulePolicy,
) -> Result<Schedule<T>, PanicError> {
    let cpl = graph.critical_path_len();
    match policy {
        SchedulePolicy::Cpop => ready_queue_schedule(
            graph,
            placer,
            policy,
            |idx, _| {
                let vertex = graph.vertex(idx);
                vertex.rank_d + vertex.rank_u
            },
            |priority| priority == cpl,
        ),
        SchedulePolicy::Cptl => ready_queue_schedule(
            graph,
            placer,
            policy,
            |idx, _| cpl - graph.vertex(idx).rank_d.min(cpl),
            |priority| priority == cpl,
        ),
        other => Err(code_invariant_error(format!(
            "{:?} is not a critical-path policy",
            other
        ))),
    }
}
