// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use thiserror::Error;

/// An engine inconsistency. Never retried: the block's processing stops.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PanicError {
    #[error("code invariant error: {0}")]
    CodeInvariantError(String),
}

pub fn code_invariant_error<M: Debug>(message: M) -> PanicError {
    PanicError::CodeInvariantError(format!("{:?}", message))
}
