// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::config::{ConfigSanitizer, Error};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How tasks are mapped onto workers.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// List scheduling by upward rank.
    Heft,
    /// List scheduling by completion-time rank.
    Ct,
    /// Critical-path scheduling, priority `cpl - rank_d`.
    Cptl,
    /// Critical-path scheduling, priority `rank_d + rank_u`.
    Cpop,
    /// Baseline: cheapest ready task first, append-only workers.
    Hesi,
    /// Baseline: earliest ready task first, append-only workers.
    Loba,
    /// Runs Heft, Ct, Cptl and Cpop and keeps the shortest makespan.
    Aggregate,
}

/// What happens when a task touches a key outside its predicted footprint.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortMode {
    /// The access fails immediately and the task is deferred.
    EarlyAbort,
    /// The access is served from the last committed value and recorded; the task runs to
    /// completion and is deferred afterwards.
    Tolerant,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Number of workers (processors) a block is scheduled onto.
    pub num_workers: usize,
    pub schedule_policy: SchedulePolicy,
    /// Blocks with at least this many tasks use tree processors instead of list processors.
    pub tree_processor_threshold: usize,
    pub abort_mode: AbortMode,
    /// Number of version chains kept resident.
    pub cache_capacity: usize,
    /// Threads used by the prefetch stage to warm the cache and install placeholders.
    pub prefetch_threads: usize,
    /// Capacity of each pipeline channel.
    pub channel_capacity: usize,
    /// Upper bound on how long a read waits for a pending producer. `None` waits forever.
    pub read_timeout_ms: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            schedule_policy: SchedulePolicy::Aggregate,
            tree_processor_threshold: 1000,
            abort_mode: AbortMode::EarlyAbort,
            cache_capacity: 1 << 20,
            prefetch_threads: num_cpus::get(),
            channel_capacity: 16,
            read_timeout_ms: None,
        }
    }
}

impl ExecutionConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl ConfigSanitizer for ExecutionConfig {
    fn sanitize(&self) -> Result<(), Error> {
        let sanitizer_name = Self::get_sanitizer_name();
        let positive = [
            ("num_workers", self.num_workers),
            ("cache_capacity", self.cache_capacity),
            ("prefetch_threads", self.prefetch_threads),
            ("channel_capacity", self.channel_capacity),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::ConfigSanitizerFailed(
                    sanitizer_name,
                    format!("{} must be > 0", field),
                ));
            }
        }
        if self.read_timeout_ms == Some(0) {
            return Err(Error::ConfigSanitizerFailed(
                sanitizer_name,
                "read_timeout_ms must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}
