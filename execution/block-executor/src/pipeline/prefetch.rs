// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::messages::{GraphBuildInput, TaskBatch};
use crate::errors::BlockExecutionResult;
use octopus_dependency_graph::AccessedBy;
use octopus_mvcache::{MvCacheError, VersionCache};
use octopus_types::{state_key::StateKey, state_view::StateSnapshot};
use rayon::{prelude::*, ThreadPool};
use std::sync::Arc;

/// Warms the cache with every predicted read and installs the placeholders of every
/// predicted write, then indexes the footprints by key.
pub fn prefetch_batch<T: Send, S: StateSnapshot>(
    cache: &VersionCache<S>,
    batch: TaskBatch<T>,
    pool: &ThreadPool,
) -> BlockExecutionResult<GraphBuildInput<T>> {
    let TaskBatch {
        header,
        mut tasks,
        withdrawals,
    } = batch;
    let accessed_by: AccessedBy = tasks
        .iter()
        .map(|task| (task.id(), task.footprint()))
        .collect();
    let read_keys: Vec<StateKey> = accessed_by
        .read_keys()
        .filter(|key| !key.is_prize())
        .copied()
        .collect();

    pool.install(|| -> Result<(), MvCacheError> {
        read_keys
            .par_iter()
            .try_for_each(|key| cache.chain(key).map(|_| ()))?;
        // Placeholder installation is ordered per chain, so tasks may install concurrently.
        tasks.par_iter_mut().try_for_each(|task| task.prefetch(cache))
    })?;

    Ok(GraphBuildInput {
        header,
        tasks,
        accessed_by,
        withdrawals,
    })
}

/// First stage of the pipeline, with its own loader pool.
pub struct PrefetchStage<S> {
    cache: Arc<VersionCache<S>>,
    pool: ThreadPool,
}

impl<S: StateSnapshot> PrefetchStage<S> {
    pub fn new(cache: Arc<VersionCache<S>>, pool: ThreadPool) -> Self {
        Self { cache, pool }
    }

    pub fn process<T: Send>(&self, batch: TaskBatch<T>) -> BlockExecutionResult<GraphBuildInput<T>> {
        prefetch_batch(&self.cache, batch, &self.pool)
    }
}
