// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The backing snapshot: the synchronous store behind the version cache.

use crate::{state_key::StateKey, state_value::StateValue};
use anyhow::Result;
use parking_lot::RwLock;
use std::{collections::HashMap, ops::Deref};

/// Pre-block state consulted on cache misses and updated by write-back.
pub trait StateSnapshot: Send + Sync {
    /// Gets the state value for a given state key, `None` if the key was never written.
    fn get_state_value(&self, state_key: &StateKey) -> Result<Option<StateValue>>;

    /// Persists the final committed value of a key.
    fn write_back(&self, state_key: &StateKey, value: StateValue) -> Result<()>;

    fn get_or_default(&self, state_key: &StateKey) -> Result<StateValue> {
        Ok(self
            .get_state_value(state_key)?
            .unwrap_or_else(|| StateValue::default_for(&state_key.slot)))
    }
}

impl<R, S> StateSnapshot for R
where
    R: Deref<Target = S> + Send + Sync,
    S: StateSnapshot + ?Sized,
{
    fn get_state_value(&self, state_key: &StateKey) -> Result<Option<StateValue>> {
        self.deref().get_state_value(state_key)
    }

    fn write_back(&self, state_key: &StateKey, value: StateValue) -> Result<()> {
        self.deref().write_back(state_key, value)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshot {
    data: RwLock<HashMap<StateKey, StateValue>>,
}

impl InMemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: StateKey, value: StateValue) {
        self.data.write().insert(key, value);
    }

    pub fn get(&self, key: &StateKey) -> Option<StateValue> {
        self.data.read().get(key).cloned()
    }

    /// Point-in-time copy of every stored entry.
    pub fn contents(&self) -> HashMap<StateKey, StateValue> {
        self.data.read().clone()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl FromIterator<(StateKey, StateValue)> for InMemorySnapshot {
    fn from_iter<I: IntoIterator<Item = (StateKey, StateValue)>>(iter: I) -> Self {
        Self {
            data: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl StateSnapshot for InMemorySnapshot {
    fn get_state_value(&self, state_key: &StateKey) -> Result<Option<StateValue>> {
        Ok(self.get(state_key))
    }

    fn write_back(&self, state_key: &StateKey, value: StateValue) -> Result<()> {
        self.insert(*state_key, value);
        Ok(())
    }
}
