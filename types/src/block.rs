// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{task_id::BlockNumber, Address};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: BlockNumber,
    /// Receiver of the block's transaction fees.
    pub coinbase: Address,
}

/// Balance credit applied in the block's finalization step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub address: Address,
    pub amount: U256,
}
