// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chains the four stages of block execution across blocks. Each stage runs on its own
//! thread and hands its output to the next one over a bounded channel, so block `n + 1` can
//! be prefetched while block `n` executes.

pub mod graph_build;
pub mod messages;
pub mod prefetch;
pub mod schedule;

use self::{
    graph_build::build_graph,
    messages::{StageMessage, TaskBatch},
    prefetch::PrefetchStage,
    schedule::ScheduleStage,
};
use crate::{
    counters::{
        observe_stage, EXECUTE_STAGE, GRAPH_BUILD_STAGE, PREFETCH_STAGE, SCHEDULE_STAGE,
    },
    errors::{BlockExecutionError, BlockExecutionResult},
    executor::{BlockExecutor, BlockOutcome},
    task::ExecutorTask,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use octopus_config::config::ExecutionConfig;
use octopus_mvcache::VersionCache;
use octopus_types::{block::BlockHeader, error::code_invariant_error, state_view::StateSnapshot};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};
use tracing::{info, warn};

trait Payload {
    fn header(&self) -> &BlockHeader;
}

macro_rules! impl_payload {
    ($($message:ident),*) => {
        $(
            impl<T> Payload for messages::$message<T> {
                fn header(&self) -> &BlockHeader {
                    &self.header
                }
            }
        )*
    };
}

impl_payload!(TaskBatch, GraphBuildInput, GraphMessage, ScheduleMessage);

/// Forwards every payload of `receiver` through `process` until `End`, which is forwarded
/// too. Fails when `process` fails or either neighbour hangs up.
fn run_stage<I: Payload, O>(
    stage: &'static str,
    receiver: Receiver<StageMessage<I>>,
    sender: Sender<StageMessage<O>>,
    mut process: impl FnMut(I) -> BlockExecutionResult<O>,
) -> BlockExecutionResult<()> {
    loop {
        match receiver.recv() {
            Ok(StageMessage::Start(input)) => {
                let block = input.header().number;
                let timer = Instant::now();
                let output = process(input)?;
                observe_stage(stage, timer.elapsed());
                info!(stage = stage, block = block, elapsed_ms = timer.elapsed().as_millis() as u64, "stage done");
                sender
                    .send(StageMessage::Start(output))
                    .map_err(|_| BlockExecutionError::PipelineDisconnected(stage))?;
            },
            Ok(StageMessage::End) => {
                sender
                    .send(StageMessage::End)
                    .map_err(|_| BlockExecutionError::PipelineDisconnected(stage))?;
                return Ok(());
            },
            Err(_) => return Err(BlockExecutionError::PipelineDisconnected(stage)),
        }
    }
}

fn spawn_stage<R: Send + 'static>(
    stage: &'static str,
    body: impl FnOnce() -> BlockExecutionResult<R> + Send + 'static,
) -> BlockExecutionResult<JoinHandle<BlockExecutionResult<R>>> {
    thread::Builder::new()
        .name(format!("octopus_{}", stage))
        .spawn(body)
        .map_err(|error| BlockExecutionError::ThreadSpawn(stage, error.to_string()))
}

fn join_stage<R>(
    stage: &'static str,
    handle: JoinHandle<BlockExecutionResult<R>>,
) -> BlockExecutionResult<R> {
    handle.join().unwrap_or_else(|_| {
        Err(code_invariant_error(format!("{} stage panicked", stage)).into())
    })
}

/// A running four-stage pipeline. Blocks are executed in submission order.
pub struct Pipeline<T> {
    sender: Option<Sender<StageMessage<TaskBatch<T>>>>,
    stages: Vec<(&'static str, JoinHandle<BlockExecutionResult<()>>)>,
    execute: Option<JoinHandle<BlockExecutionResult<Vec<BlockOutcome>>>>,
}

impl<T> Pipeline<T>
where
    T: Send + Sync + std::fmt::Debug + 'static,
{
    pub fn spawn<E, S>(
        config: &ExecutionConfig,
        executor_task: Arc<E>,
        cache: Arc<VersionCache<S>>,
    ) -> BlockExecutionResult<Self>
    where
        E: ExecutorTask<Txn = T> + 'static,
        S: StateSnapshot + 'static,
    {
        let capacity = config.channel_capacity;
        let (batch_tx, batch_rx) = bounded(capacity);
        let (prefetched_tx, prefetched_rx) = bounded(capacity);
        let (graph_tx, graph_rx) = bounded(capacity);
        let (schedule_tx, schedule_rx) = bounded(capacity);

        let prefetch_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.prefetch_threads)
            .thread_name(|index| format!("octopus_prefetch_{}", index))
            .build()
            .map_err(|error| BlockExecutionError::ThreadSpawn(PREFETCH_STAGE, error.to_string()))?;
        let prefetch_stage = PrefetchStage::new(cache.clone(), prefetch_pool);
        let schedule_stage = ScheduleStage::new(config);
        let executor = BlockExecutor::new(config, executor_task, cache)?;

        let stages = vec![
            (
                PREFETCH_STAGE,
                spawn_stage(PREFETCH_STAGE, move || {
                    run_stage(PREFETCH_STAGE, batch_rx, prefetched_tx, |batch| {
                        prefetch_stage.process(batch)
                    })
                })?,
            ),
            (
                GRAPH_BUILD_STAGE,
                spawn_stage(GRAPH_BUILD_STAGE, move || {
                    run_stage(GRAPH_BUILD_STAGE, prefetched_rx, graph_tx, build_graph)
                })?,
            ),
            (
                SCHEDULE_STAGE,
                spawn_stage(SCHEDULE_STAGE, move || {
                    run_stage(SCHEDULE_STAGE, graph_rx, schedule_tx, |message| {
                        schedule_stage.process(message)
                    })
                })?,
            ),
        ];
        let execute = spawn_stage(EXECUTE_STAGE, move || {
            let mut outcomes = Vec::new();
            loop {
                match schedule_rx.recv() {
                    Ok(StageMessage::Start(message)) => {
                        let timer = Instant::now();
                        outcomes.push(executor.execute_schedule(message)?);
                        observe_stage(EXECUTE_STAGE, timer.elapsed());
                    },
                    Ok(StageMessage::End) => return Ok(outcomes),
                    Err(_) => return Err(BlockExecutionError::PipelineDisconnected(EXECUTE_STAGE)),
                }
            }
        })?;

        Ok(Self {
            sender: Some(batch_tx),
            stages,
            execute: Some(execute),
        })
    }

    /// Queues a block. Blocks while the first channel is full.
    pub fn submit(&self, batch: TaskBatch<T>) -> BlockExecutionResult<()> {
        self.sender
            .as_ref()
            .ok_or(BlockExecutionError::PipelineDisconnected(PREFETCH_STAGE))?
            .send(StageMessage::Start(batch))
            .map_err(|_| BlockExecutionError::PipelineDisconnected(PREFETCH_STAGE))
    }

    /// Signals the end of input and waits for every stage. Returns the outcome of every block
    /// or the error that stopped the pipeline.
    pub fn finish(mut self) -> BlockExecutionResult<Vec<BlockOutcome>> {
        if let Some(sender) = self.sender.take() {
            // A stage that already failed has dropped its receiver; its error is reported below.
            let _ = sender.send(StageMessage::End);
        }
        let mut errors = Vec::new();
        for (stage, handle) in self.stages.drain(..) {
            if let Err(error) = join_stage(stage, handle) {
                errors.push(error);
            }
        }
        let outcomes = match self.execute.take() {
            Some(handle) => join_stage(EXECUTE_STAGE, handle),
            None => Err(BlockExecutionError::PipelineDisconnected(EXECUTE_STAGE)),
        };
        match outcomes {
            Ok(outcomes) if errors.is_empty() => Ok(outcomes),
            Ok(_) => Err(first_cause(errors)),
            Err(error) => {
                errors.push(error);
                Err(first_cause(errors))
            },
        }
    }
}

/// A failing stage makes its neighbours fail with a disconnection; report the failure itself.
fn first_cause(errors: Vec<BlockExecutionError>) -> BlockExecutionError {
    for error in &errors {
        warn!(error = ?error, "pipeline stage failed");
    }
    let position = errors
        .iter()
        .position(|error| !matches!(error, BlockExecutionError::PipelineDisconnected(_)))
        .unwrap_or(0);
    errors
        .into_iter()
        .nth(position)
        .unwrap_or(BlockExecutionError::PipelineDisconnected(EXECUTE_STAGE))
}

impl<T> Drop for Pipeline<T> {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            warn!("pipeline dropped without finish");
        }
    }
}
