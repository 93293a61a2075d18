// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Histogram, HistogramVec, IntCounter, IntCounterVec,
};
use std::time::Duration;

pub const MISPREDICTION_LABEL: &str = "misprediction";
pub const VM_ABORT_LABEL: &str = "vm_abort";

pub const PREFETCH_STAGE: &str = "prefetch";
pub const GRAPH_BUILD_STAGE: &str = "graph_build";
pub const SCHEDULE_STAGE: &str = "schedule";
pub const EXECUTE_STAGE: &str = "execute";

/// Tasks that did not commit in the parallel wave, by reason.
pub static DEFERRED_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "octopus_block_executor_deferred_tasks",
        "Number of tasks deferred to serial replay",
        &["reason"]
    )
    .unwrap()
});

pub static REPLAY_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "octopus_block_executor_replay_failures",
        "Number of deferred tasks whose serial replay was aborted by the VM"
    )
    .unwrap()
});

pub static BLOCK_TASKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "octopus_block_executor_block_tasks",
        "Number of tasks executed across all blocks"
    )
    .unwrap()
});

/// Makespan of the chosen schedule, in gas units.
pub static SCHEDULE_MAKESPAN: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "octopus_block_executor_schedule_makespan",
        "Makespan of the schedule chosen for each block",
        exponential_buckets(/*start=*/ 1_000.0, /*factor=*/ 2.0, /*count=*/ 24).unwrap()
    )
    .unwrap()
});

static STAGE_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "octopus_block_executor_stage_seconds",
        "Time spent by a pipeline stage on one block",
        &["stage"]
    )
    .unwrap()
});

pub fn observe_stage(stage: &'static str, duration: Duration) {
    STAGE_SECONDS
        .with_label_values(&[stage])
        .observe(duration.as_secs_f64());
}
