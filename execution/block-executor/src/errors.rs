// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use octopus_dependency_graph::GraphError;
use octopus_mvcache::MvCacheError;
use octopus_types::error::PanicError;
use thiserror::Error;

/// Unrecoverable failures of block processing. VM aborts and footprint mispredictions never
/// show up here: they turn into deferrals.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BlockExecutionError {
    /// The engine itself is inconsistent.
    #[error("fatal block executor error: {0}")]
    FatalBlockExecutorError(#[from] PanicError),
    #[error("version cache failure: {0}")]
    CacheError(#[from] MvCacheError),
    /// The predicted footprints do not form a DAG.
    #[error("invalid dependency graph: {0}")]
    GraphError(#[from] GraphError),
    /// A pipeline stage lost its upstream or downstream channel.
    #[error("pipeline stage {0} is disconnected")]
    PipelineDisconnected(&'static str),
    #[error("failed to spawn {0}: {1}")]
    ThreadSpawn(&'static str, String),
}

pub type BlockExecutionResult<T> = Result<T, BlockExecutionError>;
