// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use octopus_mvcache::MvCacheError;
use octopus_types::{
    rw_set::RwSet, state_key::StateKey, state_value::StateValue, task_id::TaskId, Address, U256,
};
use std::fmt::{self, Debug};
use thiserror::Error;

/// The execution result of a transaction.
#[derive(Debug)]
pub enum ExecutionStatus<T, E> {
    /// Transaction was executed successfully.
    Success(T),
    /// Transaction failed. Its writes must not be committed.
    Abort(E),
}

/// Trait that defines a transaction that could be parallel executed by the block executor.
pub trait Transaction: Sync + Send + Debug + 'static {}

impl<T: Sync + Send + Debug + 'static> Transaction for T {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionOutput {
    pub gas_used: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

/// Why a storage access was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    /// The key is outside the predicted footprint (early-abort mode only).
    #[error("{access} of {key} was not predicted")]
    Misprediction { key: StateKey, access: Access },
    /// The version cache failed; the block cannot continue.
    #[error(transparent)]
    Fatal(#[from] MvCacheError),
}

/// The storage surface handed to the VM. Every storage access of a transaction goes through
/// it; the VM never touches the version cache directly.
pub trait StateSurface {
    /// Reads `key` as of the executing task. May block on a pending producer.
    fn get(&mut self, key: &StateKey) -> Result<StateValue, SurfaceError>;

    /// Buffers a write. Nothing is published before the task commits.
    fn set(&mut self, key: StateKey, value: StateValue) -> Result<(), SurfaceError>;

    /// Accrues a fee to the block's coinbase. The fee becomes visible in the coinbase balance
    /// to every later task.
    fn add_prize(&mut self, amount: U256) -> Result<(), SurfaceError>;

    fn coinbase(&self) -> Address;
}

/// Trait for single threaded transaction executor (the VM).
pub trait ExecutorTask: Sync + Send {
    /// Type of transaction.
    type Txn: Transaction;

    /// Type of error when the executor failed to process a transaction.
    type Error: Debug + Send + Sync;

    /// Execute a single transaction, routing every storage access through `view`.
    fn execute_transaction(
        &self,
        view: &mut impl StateSurface,
        txn: &Self::Txn,
        task_id: TaskId,
    ) -> ExecutionStatus<TransactionOutput, Self::Error>;
}

/// Predicts the footprint and the cost of a transaction before it runs. Predictions may be
/// wrong; a wrong prediction costs a deferral, never correctness.
pub trait FootprintPredictor<T>: Sync {
    fn predict(&self, txn: &T, coinbase: Address) -> RwSet;

    /// Estimated cost (gas) used for scheduling.
    fn cost(&self, txn: &T) -> u64;
}
