// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use octopus_types::{error::PanicError, state_key::StateKey, task_id::TaskId};
use thiserror::Error;

/// Failures of the version store. All of them are fatal for the block being processed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MvCacheError {
    /// A key committed during the block has no resident chain at garbage collection.
    #[error("dirty key {0} is missing from the version cache")]
    MissingDirtyChain(StateKey),
    /// The producer of a pending version did not settle it within the read timeout.
    #[error("timed out waiting for {producer} to settle {key}")]
    WaitTimeout { key: StateKey, producer: TaskId },
    /// No committed version precedes the reader.
    #[error("no committed version of {key} is visible from {from}")]
    Unresolvable { key: StateKey, from: TaskId },
    #[error("snapshot access for {key} failed: {message}")]
    Snapshot { key: StateKey, message: String },
    #[error(transparent)]
    Invariant(#[from] PanicError),
}
