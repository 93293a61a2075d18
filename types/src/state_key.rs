// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::Address;
use primitive_types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The account field (or storage slot) a key addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    Balance,
    Nonce,
    Code,
    CodeHash,
    Exist,
    Storage(H256),
    /// Coinbase fee accrual. Not backed by the snapshot.
    Prize,
}

/// (account, slot) pair identifying one versioned value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub address: Address,
    pub slot: Slot,
}

impl StateKey {
    pub fn new(address: Address, slot: Slot) -> Self {
        Self { address, slot }
    }

    pub fn balance(address: Address) -> Self {
        Self::new(address, Slot::Balance)
    }

    pub fn nonce(address: Address) -> Self {
        Self::new(address, Slot::Nonce)
    }

    pub fn code(address: Address) -> Self {
        Self::new(address, Slot::Code)
    }

    pub fn code_hash(address: Address) -> Self {
        Self::new(address, Slot::CodeHash)
    }

    pub fn exist(address: Address) -> Self {
        Self::new(address, Slot::Exist)
    }

    pub fn storage(address: Address, slot: H256) -> Self {
        Self::new(address, Slot::Storage(slot))
    }

    /// The cumulative coinbase prize pseudo-key.
    pub fn prize() -> Self {
        Self::new(Address::zero(), Slot::Prize)
    }

    pub fn is_prize(&self) -> bool {
        self.slot == Slot::Prize
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Slot::Prize => write!(f, "prize"),
            Slot::Storage(slot) => write!(f, "{:?}/storage/{:?}", self.address, slot),
            other => write!(f, "{:?}/{:?}", self.address, other),
        }
    }
}
