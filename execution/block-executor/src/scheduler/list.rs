// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{Placer, Schedule, TaskGraph};
use octopus_config::config::SchedulePolicy;
use octopus_types::error::{code_invariant_error, PanicError};
use std::{cmp::Reverse, collections::BinaryHeap};

/// Insertion-based list scheduling. Every task is queued up front by a static priority,
/// highest first with smaller ids breaking ties, and placed on the processor where it
/// finishes earliest.
///
/// Both priorities strictly decrease along every edge (costs are positive), so a task is
/// always popped after all of its predecessors and its earliest start is final by then.
pub(crate) fn list_schedule<T>(
    graph: &TaskGraph<T>,
    mut placer: Placer<'_, T>,
    policy: SchedulePolicy,
) -> Result<Schedule<T>, PanicError> {
    let priority = |idx| {
        let vertex = graph.vertex(idx);
        match policy {
            SchedulePolicy::Ct => Ok(vertex.ct),
            SchedulePolicy::Heft => Ok(vertex.rank_u),
            other => Err(code_invariant_error(format!("{:?} is not a list policy", other))),
        }
    };

    let mut queue = BinaryHeap::with_capacity(graph.num_tasks());
    for (idx, vertex) in graph.vertices().iter().enumerate() {
        if !vertex.is_virtual() {
            queue.push((priority(idx)?, Reverse(vertex.id), idx));
        }
    }

    placer.place(graph.source(), None)?;
    while let Some((_, _, idx)) = queue.pop() {
        placer.place(idx, None)?;
    }
    Ok(placer.finish(policy))
}
