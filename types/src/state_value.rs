// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::state_key::Slot;
use bytes::Bytes;
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};

/// Payload of one version of a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateValue {
    /// Balances, storage words and prize amounts.
    Word(U256),
    Nonce(u64),
    Code(Bytes),
    Hash(H256),
    Flag(bool),
}

impl StateValue {
    /// Value of a key absent from the snapshot.
    pub fn default_for(slot: &Slot) -> Self {
        match slot {
            Slot::Balance | Slot::Storage(_) | Slot::Prize => StateValue::Word(U256::zero()),
            Slot::Nonce => StateValue::Nonce(0),
            Slot::Code => StateValue::Code(Bytes::new()),
            Slot::CodeHash => StateValue::Hash(H256::zero()),
            Slot::Exist => StateValue::Flag(false),
        }
    }

    pub fn as_word(&self) -> Option<U256> {
        match self {
            StateValue::Word(word) => Some(*word),
            _ => None,
        }
    }

    pub fn as_nonce(&self) -> Option<u64> {
        match self {
            StateValue::Nonce(nonce) => Some(*nonce),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&Bytes> {
        match self {
            StateValue::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<H256> {
        match self {
            StateValue::Hash(hash) => Some(*hash),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            StateValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Word arithmetic wraps, so adding and later subtracting the same prize round-trips.
    pub fn wrapping_add_word(&self, delta: U256) -> Option<Self> {
        self.as_word()
            .map(|word| StateValue::Word(word.overflowing_add(delta).0))
    }

    pub fn wrapping_sub_word(&self, delta: U256) -> Option<Self> {
        self.as_word()
            .map(|word| StateValue::Word(word.overflowing_sub(delta).0))
    }
}

impl From<U256> for StateValue {
    fn from(word: U256) -> Self {
        StateValue::Word(word)
    }
}
