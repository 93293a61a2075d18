// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Maps the ranked DAG of a block onto a fixed number of processors.

mod aggregator;
mod baseline;
mod critical_path;
mod list;

use crate::{
    block_task::Task,
    processor::{AnyProcessor, Placement, Processor, ProcessorKind},
};
use octopus_config::config::SchedulePolicy;
use octopus_dependency_graph::{Graph, VertexIndex};
use octopus_types::{
    error::{code_invariant_error, PanicError},
    task_id::TaskId,
};
use std::{fmt, sync::Arc};
use tracing::debug;

pub type TaskGraph<T> = Graph<Arc<Task<T>>>;

/// One task's place in a schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub id: TaskId,
    pub processor: usize,
    pub start: u64,
    pub finish: u64,
}

/// The outcome of scheduling one block: a timeline per worker.
pub struct Schedule<T> {
    policy: SchedulePolicy,
    makespan: u64,
    processors: Vec<AnyProcessor<T>>,
}

impl<T> Schedule<T> {
    /// The policy that produced the schedule. Never `Aggregate`.
    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    pub fn makespan(&self) -> u64 {
        self.makespan
    }

    pub fn processors(&self) -> &[AnyProcessor<T>] {
        &self.processors
    }

    pub fn num_tasks(&self) -> usize {
        self.processors.iter().map(|processor| processor.len()).sum()
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        let mut assignments: Vec<Assignment> = self
            .processors
            .iter()
            .enumerate()
            .flat_map(|(processor, timeline)| {
                timeline.timeline().into_iter().map(move |entry| Assignment {
                    id: entry.task.id(),
                    processor,
                    start: entry.start,
                    finish: entry.finish,
                })
            })
            .collect();
        assignments.sort_by_key(|assignment| assignment.id);
        assignments
    }
}

impl<T> fmt::Debug for Schedule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("policy", &self.policy)
            .field("makespan", &self.makespan)
            .field("assignments", &self.assignments())
            .finish()
    }
}

/// List or tree processors by block size; the baselines always use append-only processors.
pub fn processor_kind(
    policy: SchedulePolicy,
    num_tasks: usize,
    tree_processor_threshold: usize,
) -> ProcessorKind {
    match policy {
        SchedulePolicy::Hesi | SchedulePolicy::Loba => ProcessorKind::Simple,
        _ if num_tasks >= tree_processor_threshold => ProcessorKind::Tree,
        _ => ProcessorKind::List,
    }
}

/// Schedules `graph` onto `num_workers` processors with `policy`.
pub fn schedule<T: Send + Sync>(
    graph: &TaskGraph<T>,
    num_workers: usize,
    policy: SchedulePolicy,
    tree_processor_threshold: usize,
) -> Result<Schedule<T>, PanicError> {
    if num_workers == 0 {
        return Err(code_invariant_error("scheduling onto zero workers"));
    }
    let kind = processor_kind(policy, graph.num_tasks(), tree_processor_threshold);
    let schedule = match policy {
        SchedulePolicy::Heft | SchedulePolicy::Ct => {
            list::list_schedule(graph, Placer::new(graph, num_workers, kind), policy)
        },
        SchedulePolicy::Cptl | SchedulePolicy::Cpop => {
            critical_path::critical_path_schedule(graph, Placer::new(graph, num_workers, kind), policy)
        },
        SchedulePolicy::Hesi | SchedulePolicy::Loba => {
            baseline::baseline_schedule(graph, Placer::new(graph, num_workers, kind), policy)
        },
        SchedulePolicy::Aggregate => {
            aggregator::aggregate(graph, num_workers, tree_processor_threshold)
        },
    }?;
    debug!(
        policy = ?schedule.policy(),
        makespan = schedule.makespan(),
        critical_path = graph.critical_path_len(),
        tasks = schedule.num_tasks(),
        "scheduled block"
    );
    Ok(schedule)
}

/// Places vertices one at a time, tracking the earliest start of every vertex.
pub(crate) struct Placer<'g, T> {
    graph: &'g TaskGraph<T>,
    est: Vec<u64>,
    processors: Vec<AnyProcessor<T>>,
}

impl<'g, T> Placer<'g, T> {
    pub(crate) fn new(graph: &'g TaskGraph<T>, num_workers: usize, kind: ProcessorKind) -> Self {
        let timespan = graph.total_cost();
        let processors = (0..num_workers)
            .map(|_| {
                let mut processor = AnyProcessor::new(kind);
                processor.set_timespan(timespan);
                processor
            })
            .collect();
        Self {
            graph,
            est: vec![0; graph.num_vertices()],
            processors,
        }
    }

    pub(crate) fn est(&self, idx: VertexIndex) -> u64 {
        self.est[idx]
    }

    /// Places a task on `forced`, or on the processor with the smallest finish time (the
    /// first one on ties), then raises the earliest start of its successors. Virtual
    /// vertices take no time and occupy no processor.
    pub(crate) fn place(&mut self, idx: VertexIndex, forced: Option<usize>) -> Result<(), PanicError> {
        let graph = self.graph;
        let vertex = graph.vertex(idx);
        let est = self.est[idx];
        let finish = match &vertex.payload {
            None => est,
            Some(task) => {
                let (processor, placement) = match forced {
                    Some(processor) => (processor, self.processors[processor].find_eft(est, vertex.cost)?),
                    None => self.best_processor(est, vertex.cost)?,
                };
                self.processors[processor].add_task(task.clone(), placement)?;
                placement.finish
            },
        };
        for &succ in graph.successors(idx) {
            self.est[succ] = self.est[succ].max(finish);
        }
        Ok(())
    }

    fn best_processor(&self, est: u64, cost: u64) -> Result<(usize, Placement), PanicError> {
        let mut best: Option<(usize, Placement)> = None;
        for (processor, timeline) in self.processors.iter().enumerate() {
            let placement = timeline.find_eft(est, cost)?;
            if best.map_or(true, |(_, current)| placement.finish < current.finish) {
                best = Some((processor, placement));
            }
        }
        best.ok_or_else(|| code_invariant_error("no processor to place on"))
    }

    pub(crate) fn finish(self, policy: SchedulePolicy) -> Schedule<T> {
        Schedule {
            policy,
            makespan: self.est[self.graph.sink()],
            processors: self.processors,
        }
    }
}

/// Drives a dependency-ordered priority queue: a vertex becomes eligible once every
/// predecessor is placed. `priority` is evaluated when the vertex becomes eligible, at which
/// point its earliest start is final. Vertices for which `force` holds go to processor 0.
pub(crate) fn ready_queue_schedule<T>(
    graph: &TaskGraph<T>,
    mut placer: Placer<'_, T>,
    policy: SchedulePolicy,
    priority: impl Fn(VertexIndex, u64) -> u64,
    force: impl Fn(u64) -> bool,
) -> Result<Schedule<T>, PanicError> {
    use std::{cmp::Reverse, collections::BinaryHeap};

    let mut in_degree: Vec<usize> = graph.vertices().iter().map(|v| v.in_degree).collect();
    let mut ready = BinaryHeap::new();
    ready.push((priority(graph.source(), 0), Reverse(TaskId::Snapshot), graph.source()));

    let mut placed = 0;
    while let Some((priority_value, _, idx)) = ready.pop() {
        let forced = if !graph.vertex(idx).is_virtual() && force(priority_value) {
            Some(0)
        } else {
            None
        };
        placer.place(idx, forced)?;
        placed += 1;
        for &succ in graph.successors(idx) {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 && succ != graph.sink() {
                let vertex = graph.vertex(succ);
                ready.push((priority(succ, placer.est(succ)), Reverse(vertex.id), succ));
            }
        }
    }
    if placed != graph.num_vertices() - 1 {
        return Err(code_invariant_error(format!(
            "placed {} of {} vertices",
            placed,
            graph.num_vertices() - 1
        )));
    }
    Ok(placer.finish(policy))
}
