// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use octopus_types::{rw_set::RwSet, state_key::StateKey, task_id::TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tasks that claimed to access one key, kept sorted by `TaskId`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAccesses {
    pub read_by: BTreeSet<TaskId>,
    pub written_by: BTreeSet<TaskId>,
}

impl KeyAccesses {
    /// The latest writer ordered before `reader`.
    pub fn closest_writer(&self, reader: TaskId) -> Option<TaskId> {
        self.written_by.range(..reader).next_back().copied()
    }

    /// Every writer ordered before `reader`.
    pub fn writers_before(&self, reader: TaskId) -> impl Iterator<Item = &TaskId> {
        self.written_by.range(..reader)
    }
}

/// Accessed-by index of a block: for every key, who reads it and who writes it.
#[derive(Clone, Debug, Default)]
pub struct AccessedBy {
    entries: HashMap<StateKey, KeyAccesses>,
}

impl AccessedBy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: TaskId, rw_set: &RwSet) {
        for key in rw_set.reads() {
            self.entries.entry(*key).or_default().read_by.insert(id);
        }
        for key in rw_set.writes() {
            self.entries.entry(*key).or_default().written_by.insert(id);
        }
    }

    pub fn get(&self, key: &StateKey) -> Option<&KeyAccesses> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &KeyAccesses)> {
        self.entries.iter()
    }

    /// Distinct keys read by at least one task.
    pub fn read_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.entries
            .iter()
            .filter(|(_, accesses)| !accesses.read_by.is_empty())
            .map(|(key, _)| key)
    }

    pub fn closest_writer(&self, key: &StateKey, reader: TaskId) -> Option<TaskId> {
        self.entries
            .get(key)
            .and_then(|accesses| accesses.closest_writer(reader))
    }

    pub fn num_keys(&self) -> usize {
        self.entries.len()
    }
}

impl<'a> FromIterator<(TaskId, &'a RwSet)> for AccessedBy {
    fn from_iter<I: IntoIterator<Item = (TaskId, &'a RwSet)>>(iter: I) -> Self {
        let mut accessed_by = AccessedBy::new();
        for (id, rw_set) in iter {
            accessed_by.add(id, rw_set);
        }
        accessed_by
    }
}
