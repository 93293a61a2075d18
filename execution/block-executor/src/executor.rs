// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    block_task::Task,
    counters::{
        BLOCK_TASKS, DEFERRED_TASKS, MISPREDICTION_LABEL, REPLAY_FAILURES, SCHEDULE_MAKESPAN,
        VM_ABORT_LABEL,
    },
    errors::{BlockExecutionError, BlockExecutionResult},
    pipeline::{
        graph_build::build_graph,
        messages::{ScheduleMessage, TaskBatch},
        prefetch::prefetch_batch,
    },
    processor::Processor,
    scheduler::{schedule, Schedule},
    task::{Access, ExecutionStatus, ExecutorTask},
    view::{ReplayView, SpeculativeView},
};
use octopus_config::config::{AbortMode, ExecutionConfig, SchedulePolicy};
use octopus_mvcache::VersionCache;
use octopus_types::{
    block::{BlockHeader, Withdrawal},
    rw_set::RwSet,
    state_key::StateKey,
    state_view::StateSnapshot,
    task_id::{BlockNumber, TaskId},
};
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

/// Why a task did not commit in the parallel wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferReason {
    /// The first access outside the predicted footprint.
    Misprediction { key: StateKey, access: Access },
    /// The VM aborted the transaction.
    VmAbort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Committed under its original id.
    Committed,
    /// Deferred, then replayed and committed under `id`.
    Replayed { id: TaskId, reason: DeferReason },
    /// Deferred, then aborted by the VM again during replay. Nothing was written.
    ReplayFailed { id: TaskId, reason: DeferReason },
    /// Aborted by the VM during sequential execution. Nothing was written.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutcome {
    /// The id the task was scheduled under.
    pub id: TaskId,
    pub status: TaskStatus,
    pub gas_used: u64,
    /// Accesses observed during the execution that decided the status.
    pub actual: RwSet,
}

impl TaskOutcome {
    /// The task's position in the serialization order of the block.
    pub fn final_id(&self) -> TaskId {
        match self.status {
            TaskStatus::Committed | TaskStatus::Failed => self.id,
            TaskStatus::Replayed { id, .. } | TaskStatus::ReplayFailed { id, .. } => id,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Replayed { .. } | TaskStatus::ReplayFailed { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block: BlockNumber,
    /// `None` for sequential execution.
    pub policy: Option<SchedulePolicy>,
    pub makespan: u64,
    /// Ordered by task id.
    pub outcomes: Vec<TaskOutcome>,
    pub gas_used: u64,
}

impl BlockOutcome {
    fn new(
        block: BlockNumber,
        policy: Option<SchedulePolicy>,
        makespan: u64,
        mut outcomes: Vec<TaskOutcome>,
    ) -> Self {
        outcomes.sort_by_key(|outcome| outcome.id);
        let gas_used = outcomes.iter().map(|outcome| outcome.gas_used).sum();
        Self {
            block,
            policy,
            makespan,
            outcomes,
            gas_used,
        }
    }

    pub fn num_deferred(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_deferred()).count()
    }

    /// Outcomes in the order the block is equivalent to executing sequentially.
    pub fn serialization_order(&self) -> Vec<&TaskOutcome> {
        let mut order: Vec<&TaskOutcome> = self.outcomes.iter().collect();
        order.sort_by_key(|outcome| outcome.final_id());
        order
    }
}

enum WaveOutcome {
    Committed { gas_used: u64, actual: RwSet },
    Deferred(DeferReason),
}

/// Executes scheduled blocks against a shared version cache.
pub struct BlockExecutor<E, S> {
    executor_task: Arc<E>,
    cache: Arc<VersionCache<S>>,
    abort_mode: AbortMode,
    num_workers: usize,
    schedule_policy: SchedulePolicy,
    tree_processor_threshold: usize,
    executor_thread_pool: Arc<ThreadPool>,
}

impl<E, S> BlockExecutor<E, S>
where
    E: ExecutorTask,
    S: StateSnapshot,
{
    /// Builds an executor with its own pool of `config.num_workers` threads.
    pub fn new(
        config: &ExecutionConfig,
        executor_task: Arc<E>,
        cache: Arc<VersionCache<S>>,
    ) -> BlockExecutionResult<Self> {
        let executor_thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .thread_name(|index| format!("octopus_exec_{}", index))
            .build()
            .map_err(|error| BlockExecutionError::ThreadSpawn("executor pool", error.to_string()))?;
        Ok(Self::with_thread_pool(
            config,
            executor_task,
            cache,
            Arc::new(executor_thread_pool),
        ))
    }

    /// The pool must have at least `config.num_workers` threads: every processor occupies one
    /// thread for the whole wave and may block on another processor.
    pub fn with_thread_pool(
        config: &ExecutionConfig,
        executor_task: Arc<E>,
        cache: Arc<VersionCache<S>>,
        executor_thread_pool: Arc<ThreadPool>,
    ) -> Self {
        Self {
            executor_task,
            cache,
            abort_mode: config.abort_mode,
            num_workers: config.num_workers,
            schedule_policy: config.schedule_policy,
            tree_processor_threshold: config.tree_processor_threshold,
            executor_thread_pool,
        }
    }

    pub fn cache(&self) -> &Arc<VersionCache<S>> {
        &self.cache
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Runs every stage of one block on the calling thread (prefetch and the wave still use
    /// the executor pool).
    pub fn execute_block(&self, batch: TaskBatch<E::Txn>) -> BlockExecutionResult<BlockOutcome> {
        let input = prefetch_batch(&self.cache, batch, &self.executor_thread_pool)?;
        let message = build_graph(input)?;
        let schedule = schedule(
            &message.graph,
            self.num_workers,
            self.schedule_policy,
            self.tree_processor_threshold,
        )?;
        self.execute_schedule(ScheduleMessage {
            header: message.header,
            critical_path_len: message.graph.critical_path_len(),
            schedule,
            withdrawals: message.withdrawals,
        })
    }

    /// Runs the parallel wave of a scheduled block, replays the deferred tasks and finalizes
    /// the block.
    pub fn execute_schedule(
        &self,
        message: ScheduleMessage<E::Txn>,
    ) -> BlockExecutionResult<BlockOutcome> {
        let ScheduleMessage {
            header,
            schedule,
            critical_path_len,
            withdrawals,
        } = message;
        let start = Instant::now();
        SCHEDULE_MAKESPAN.observe(schedule.makespan() as f64);
        BLOCK_TASKS.inc_by(schedule.num_tasks() as u64);

        let wave = self.execute_wave(&header, &schedule)?;
        let mut outcomes = Vec::with_capacity(wave.len());
        let mut deferred = Vec::new();
        for (task, outcome) in wave {
            match outcome {
                WaveOutcome::Committed { gas_used, actual } => outcomes.push(TaskOutcome {
                    id: task.id(),
                    status: TaskStatus::Committed,
                    gas_used,
                    actual,
                }),
                WaveOutcome::Deferred(reason) => deferred.push((task, reason)),
            }
        }
        let num_deferred = deferred.len();
        outcomes.extend(self.replay(&header, deferred)?);
        let collected = self.finalize(&header, &withdrawals)?;

        info!(
            block = header.number,
            policy = ?schedule.policy(),
            tasks = outcomes.len(),
            deferred = num_deferred,
            makespan = schedule.makespan(),
            critical_path = critical_path_len,
            collected = collected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "executed block"
        );
        Ok(BlockOutcome::new(
            header.number,
            Some(schedule.policy()),
            schedule.makespan(),
            outcomes,
        ))
    }

    /// One job per processor; each job runs its tasks strictly in id order. After a fatal
    /// error every remaining task only settles its placeholders, so no reader waits forever.
    fn execute_wave(
        &self,
        header: &BlockHeader,
        schedule: &Schedule<E::Txn>,
    ) -> BlockExecutionResult<Vec<(Arc<Task<E::Txn>>, WaveOutcome)>> {
        let results: Vec<Mutex<Vec<(Arc<Task<E::Txn>>, WaveOutcome)>>> = schedule
            .processors()
            .iter()
            .map(|processor| Mutex::new(Vec::with_capacity(processor.len())))
            .collect();
        let maybe_error: Mutex<Option<BlockExecutionError>> = Mutex::new(None);

        {
            let maybe_error = &maybe_error;
            self.executor_thread_pool.scope(|s| {
                for (processor, slot) in schedule.processors().iter().zip(&results) {
                    s.spawn(move |_| {
                        let mut local = Vec::with_capacity(processor.len());
                        processor.execute(|task| {
                            if maybe_error.lock().is_some() {
                                task.abort(&self.cache);
                                return;
                            }
                            match self.execute_speculative(task, header) {
                                Ok(outcome) => local.push((task.clone(), outcome)),
                                Err(error) => {
                                    let mut maybe_error = maybe_error.lock();
                                    if maybe_error.is_none() {
                                        *maybe_error = Some(error);
                                    }
                                },
                            }
                        });
                        *slot.lock() = local;
                    });
                }
            });
        }

        if let Some(error) = maybe_error.into_inner() {
            return Err(error);
        }
        let mut wave: Vec<(Arc<Task<E::Txn>>, WaveOutcome)> =
            results.into_iter().flat_map(|slot| slot.into_inner()).collect();
        wave.sort_by_key(|(task, _)| task.id());
        Ok(wave)
    }

    fn execute_speculative(
        &self,
        task: &Task<E::Txn>,
        header: &BlockHeader,
    ) -> BlockExecutionResult<WaveOutcome> {
        let mut view = SpeculativeView::new(task, &self.cache, header.coinbase, self.abort_mode);
        let status = self
            .executor_task
            .execute_transaction(&mut view, task.txn(), task.id());

        if let Some(error) = view.fatal().cloned() {
            view.abort();
            return Err(error.into());
        }
        match (status, view.misprediction()) {
            (ExecutionStatus::Success(output), None) => match view.commit() {
                Ok(actual) => Ok(WaveOutcome::Committed {
                    gas_used: output.gas_used,
                    actual,
                }),
                Err(error) => {
                    task.abort(&self.cache);
                    Err(error.into())
                },
            },
            (_, Some((key, access))) => {
                DEFERRED_TASKS
                    .with_label_values(&[MISPREDICTION_LABEL])
                    .inc();
                debug!(task = %task.id(), key = %key, access = %access, "footprint misprediction");
                view.abort();
                Ok(WaveOutcome::Deferred(DeferReason::Misprediction {
                    key,
                    access,
                }))
            },
            (ExecutionStatus::Abort(error), None) => {
                DEFERRED_TASKS.with_label_values(&[VM_ABORT_LABEL]).inc();
                debug!(task = %task.id(), error = ?error, "vm aborted speculative execution");
                view.abort();
                Ok(WaveOutcome::Deferred(DeferReason::VmAbort))
            },
        }
    }

    /// Replays the deferred tasks serially, in id order, each under its next incarnation.
    fn replay(
        &self,
        header: &BlockHeader,
        mut deferred: Vec<(Arc<Task<E::Txn>>, DeferReason)>,
    ) -> BlockExecutionResult<Vec<TaskOutcome>> {
        deferred.sort_by_key(|(task, _)| task.id());
        let mut outcomes = Vec::with_capacity(deferred.len());
        for (task, reason) in deferred {
            let id = task.id().next_incarnation();
            let mut view = ReplayView::new(id, &self.cache, header.coinbase);
            let status = self
                .executor_task
                .execute_transaction(&mut view, task.txn(), id);
            if let Some(error) = view.fatal() {
                return Err(error.clone().into());
            }
            let outcome = match status {
                ExecutionStatus::Success(output) => TaskOutcome {
                    id: task.id(),
                    status: TaskStatus::Replayed { id, reason },
                    gas_used: output.gas_used,
                    actual: view.commit()?,
                },
                ExecutionStatus::Abort(error) => {
                    REPLAY_FAILURES.inc();
                    warn!(task = %id, reason = ?reason, error = ?error, "deferred task failed on replay");
                    TaskOutcome {
                        id: task.id(),
                        status: TaskStatus::ReplayFailed { id, reason },
                        gas_used: 0,
                        actual: view.into_actual(),
                    }
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// The end step of a block: credits and garbage collection at `block_end`.
    fn finalize(
        &self,
        header: &BlockHeader,
        withdrawals: &[Withdrawal],
    ) -> BlockExecutionResult<usize> {
        Ok(self.cache.garbage_collection(
            TaskId::block_end(header.number),
            header.coinbase,
            withdrawals,
        )?)
    }

    /// Executes a block one transaction at a time in id order, without prediction or
    /// scheduling, then finalizes it. The batch must not have been prefetched.
    pub fn execute_block_sequential(
        &self,
        batch: TaskBatch<E::Txn>,
    ) -> BlockExecutionResult<BlockOutcome> {
        let TaskBatch {
            header,
            mut tasks,
            withdrawals,
        } = batch;
        let start = Instant::now();
        tasks.sort_by_key(|task| task.id());

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let mut view = ReplayView::new(task.id(), &self.cache, header.coinbase);
            let status = self
                .executor_task
                .execute_transaction(&mut view, task.txn(), task.id());
            if let Some(error) = view.fatal() {
                return Err(error.clone().into());
            }
            outcomes.push(match status {
                ExecutionStatus::Success(output) => TaskOutcome {
                    id: task.id(),
                    status: TaskStatus::Committed,
                    gas_used: output.gas_used,
                    actual: view.commit()?,
                },
                ExecutionStatus::Abort(error) => {
                    debug!(task = %task.id(), error = ?error, "vm aborted sequential execution");
                    TaskOutcome {
                        id: task.id(),
                        status: TaskStatus::Failed,
                        gas_used: 0,
                        actual: view.into_actual(),
                    }
                },
            });
        }
        self.finalize(&header, &withdrawals)?;

        info!(
            block = header.number,
            tasks = outcomes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "executed block sequentially"
        );
        Ok(BlockOutcome::new(header.number, None, 0, outcomes))
    }
}
