// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

/*!
The block executor runs the transactions of a block in parallel without optimistic
validation. Every transaction comes with a predicted read/write footprint. From the
footprints the executor builds a dependency DAG, schedules it onto a fixed number of
workers so that the makespan is small, and runs each worker's timeline in order against a
multi-version cache.

Before execution, every predicted write installs a pending placeholder in the cache. A
reader that reaches a placeholder blocks until its producer settles it, so a consumer that
happens to run earlier than its producer in wall-clock time still observes the causally
correct value. Waits only ever target smaller task ids and every worker runs its tasks in
id order, so the smallest unfinished task can always progress.

A task whose actual accesses leave its predicted footprint, or whose VM execution fails,
does not commit: its placeholders are settled as ignored and the task is deferred. After
the parallel wave, deferred tasks are replayed serially against the settled state with
their incarnation bumped, which places them after every first-incarnation task of the block
in the serialization order. The block is then finalized: the accrued coinbase prize and the
withdrawals are credited, and every touched version chain is collected and written back.

The four stages (prefetch, graph build, schedule, execute) can be chained across blocks by
the [`Pipeline`](pipeline::Pipeline), each stage on its own thread behind a bounded channel.
*/

pub mod block_task;
pub mod counters;
pub mod errors;
pub mod executor;
pub mod pipeline;
pub mod processor;
pub mod scheduler;
pub mod task;
#[cfg(test)]
mod unit_tests;
pub mod view;

pub use block_task::Task;
pub use errors::{BlockExecutionError, BlockExecutionResult};
pub use executor::{BlockExecutor, BlockOutcome, TaskOutcome, TaskStatus};
pub use scheduler::{schedule, Schedule};
