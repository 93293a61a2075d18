// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use octopus_dependency_graph::DagNode;
use octopus_mvcache::{MvCacheError, Version, VersionCache, VersionChain};
use octopus_types::{
    rw_set::RwSet, state_key::StateKey, state_view::StateSnapshot, task_id::TaskId,
};
use std::{collections::HashMap, fmt, sync::Arc};

/// Scheduling and execution unit of one transaction.
///
/// The prefetch stage resolves the chains the task reads and installs a pending placeholder
/// for every predicted write; the graph-build stage records, for each read, the placeholder
/// of the closest earlier writer of the block.
pub struct Task<T> {
    id: TaskId,
    cost: u64,
    txn: T,
    footprint: RwSet,
    read_chains: HashMap<StateKey, Arc<VersionChain>>,
    read_versions: HashMap<StateKey, Arc<Version>>,
    write_versions: HashMap<StateKey, (Arc<VersionChain>, Arc<Version>)>,
    prize_version: Option<Arc<Version>>,
}

impl<T> Task<T> {
    /// Costs are at least one so that every rank strictly decreases along an edge.
    pub fn new(id: TaskId, txn: T, footprint: RwSet, cost: u64) -> Self {
        Self {
            id,
            cost: cost.max(1),
            txn,
            footprint,
            read_chains: HashMap::new(),
            read_versions: HashMap::new(),
            write_versions: HashMap::new(),
            prize_version: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn txn(&self) -> &T {
        &self.txn
    }

    pub fn footprint(&self) -> &RwSet {
        &self.footprint
    }

    /// Resolves the chains of the predicted reads and installs the placeholders of the
    /// predicted writes.
    pub fn prefetch<S: StateSnapshot>(
        &mut self,
        cache: &VersionCache<S>,
    ) -> Result<(), MvCacheError> {
        for key in self.footprint.reads() {
            if !key.is_prize() && !self.read_chains.contains_key(key) {
                self.read_chains.insert(*key, cache.chain(key)?);
            }
        }
        for key in self.footprint.writes() {
            if key.is_prize() {
                if self.prize_version.is_none() {
                    self.prize_version = Some(cache.install_prize_pending(self.id)?);
                }
            } else if !self.write_versions.contains_key(key) {
                let installed = cache.install_pending(key, self.id)?;
                self.write_versions.insert(*key, installed);
            }
        }
        Ok(())
    }

    pub fn is_prefetched(&self) -> bool {
        self.footprint.num_writes() == self.write_versions.len() + self.prize_version.iter().count()
    }

    pub(crate) fn set_read_version(&mut self, key: StateKey, version: Arc<Version>) {
        self.read_versions.insert(key, version);
    }

    pub fn read_chain(&self, key: &StateKey) -> Option<&Arc<VersionChain>> {
        self.read_chains.get(key)
    }

    /// Placeholder of the closest earlier in-block writer of `key`, if any was predicted.
    pub fn read_version(&self, key: &StateKey) -> Option<&Arc<Version>> {
        self.read_versions.get(key)
    }

    pub fn write_version(&self, key: &StateKey) -> Option<&(Arc<VersionChain>, Arc<Version>)> {
        self.write_versions.get(key)
    }

    pub fn write_versions(
        &self,
    ) -> impl Iterator<Item = (&StateKey, &(Arc<VersionChain>, Arc<Version>))> {
        self.write_versions.iter()
    }

    pub fn prize_version(&self) -> Option<&Arc<Version>> {
        self.prize_version.as_ref()
    }

    /// Settles every placeholder of the task as ignored.
    pub fn abort<S: StateSnapshot>(&self, cache: &VersionCache<S>) {
        for (_, version) in self.write_versions.values() {
            cache.ignore(version);
        }
        if let Some(version) = &self.prize_version {
            cache.ignore(version);
        }
    }
}

impl<T> DagNode for Task<T> {
    fn task_id(&self) -> TaskId {
        self.id
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn footprint(&self) -> &RwSet {
        &self.footprint
    }
}

impl<T: fmt::Debug> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("cost", &self.cost)
            .field("txn", &self.txn)
            .field("footprint", &self.footprint)
            .finish()
    }
}
