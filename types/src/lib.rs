// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod block;
pub mod error;
pub mod rw_set;
pub mod state_key;
pub mod state_value;
pub mod state_view;
pub mod task_id;

pub use primitive_types::{H160, H256, U256};

/// 20-byte account address.
pub type Address = H160;
