// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{state_key::StateKey, Address};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Read-set and write-set of a task, either predicted or observed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RwSet {
    reads: BTreeSet<StateKey>,
    writes: BTreeSet<StateKey>,
}

impl RwSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal footprint of any transfer-like transaction: the sender's nonce, the sender's
    /// balance, the prize it pays into, and the accrued prize when it touches the coinbase.
    pub fn basic(sender: Address, to: Option<Address>, coinbase: Address) -> Self {
        let mut rw_set = Self::new();
        rw_set.add_read(StateKey::nonce(sender));
        rw_set.add_write(StateKey::nonce(sender));
        rw_set.add_read(StateKey::balance(sender));
        rw_set.add_write(StateKey::balance(sender));
        rw_set.add_write(StateKey::prize());
        if sender == coinbase || to == Some(coinbase) {
            rw_set.add_read(StateKey::prize());
        }
        rw_set
    }

    pub fn add_read(&mut self, key: StateKey) {
        self.reads.insert(key);
    }

    pub fn add_write(&mut self, key: StateKey) {
        self.writes.insert(key);
    }

    pub fn has_read(&self, key: &StateKey) -> bool {
        self.reads.contains(key)
    }

    pub fn has_write(&self, key: &StateKey) -> bool {
        self.writes.contains(key)
    }

    pub fn reads(&self) -> impl Iterator<Item = &StateKey> {
        self.reads.iter()
    }

    pub fn writes(&self) -> impl Iterator<Item = &StateKey> {
        self.writes.iter()
    }

    pub fn num_reads(&self) -> usize {
        self.reads.len()
    }

    pub fn num_writes(&self) -> usize {
        self.writes.len()
    }

    /// Whether every access of `actual` was predicted by `self`.
    pub fn covers(&self, actual: &RwSet) -> bool {
        actual.reads.is_subset(&self.reads) && actual.writes.is_subset(&self.writes)
    }
}
