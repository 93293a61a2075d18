// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    counters::{CACHE_EVICTIONS, CACHE_GROWTHS, CACHE_HITS, CACHE_MISSES, COLLECTED_CHAINS},
    types::MvCacheError,
    version::{Version, VersionStatus},
    version_chain::VersionChain,
};
use dashmap::DashSet;
use lru::LruCache;
use octopus_types::{
    block::Withdrawal,
    error::code_invariant_error,
    state_key::StateKey,
    state_value::StateValue,
    state_view::StateSnapshot,
    task_id::TaskId,
    Address, U256,
};
use parking_lot::{Mutex, RwLock};
use std::{collections::BTreeMap, num::NonZeroUsize, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Bounded map from key to version chain, shared by every worker of a block.
///
/// Chains are loaded lazily from the snapshot. A chain is evictable only once nobody else
/// holds it, it carries nothing but its head and it is not dirty, i.e. after end-of-block
/// garbage collection has written its committed value back. An eviction therefore never
/// loses a committed value.
/// Coinbase fee accrual lives in a separate prize chain that is summed by readers and
/// pruned at block end.
pub struct VersionCache<S> {
    snapshot: S,
    chains: Mutex<LruCache<StateKey, Arc<VersionChain>>>,
    /// Keys committed since the last garbage collection.
    dirty: DashSet<StateKey>,
    prize: VersionChain,
    /// Held shared while installing versions, exclusively while collecting.
    collection: RwLock<()>,
    read_timeout: Option<Duration>,
}

impl<S: StateSnapshot> VersionCache<S> {
    pub fn new(snapshot: S, capacity: NonZeroUsize, read_timeout: Option<Duration>) -> Self {
        Self {
            snapshot,
            chains: Mutex::new(LruCache::new(capacity)),
            dirty: DashSet::new(),
            prize: VersionChain::new(StateKey::prize(), StateValue::Word(U256::zero())),
            collection: RwLock::new(()),
            read_timeout,
        }
    }

    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn num_chains(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.chains.lock().cap().get()
    }

    pub fn prize_chain(&self) -> &VersionChain {
        &self.prize
    }

    /// The chain of `key`, loading its snapshot value on a miss.
    pub fn chain(&self, key: &StateKey) -> Result<Arc<VersionChain>, MvCacheError> {
        if key.is_prize() {
            return Err(code_invariant_error("the prize is not a cached key").into());
        }
        if let Some(chain) = self.chains.lock().get(key) {
            CACHE_HITS.inc();
            return Ok(chain.clone());
        }

        CACHE_MISSES.inc();
        let value = self
            .snapshot
            .get_or_default(key)
            .map_err(|error| MvCacheError::Snapshot {
                key: *key,
                message: error.to_string(),
            })?;

        let mut chains = self.chains.lock();
        // Another worker may have loaded the key meanwhile.
        if let Some(chain) = chains.get(key) {
            return Ok(chain.clone());
        }
        let chain = Arc::new(VersionChain::new(*key, value));
        self.make_room(&mut chains);
        chains.put(*key, chain.clone());
        Ok(chain)
    }

    fn make_room(&self, chains: &mut LruCache<StateKey, Arc<VersionChain>>) {
        if chains.len() < chains.cap().get() {
            return;
        }
        let victim = chains
            .iter()
            .rev()
            .find(|(key, chain)| {
                Arc::strong_count(*chain) == 1
                    && !chain.has_in_flight()
                    && !self.dirty.contains(*key)
            })
            .map(|(key, _)| *key);
        match victim {
            Some(key) => {
                chains.pop(&key);
                CACHE_EVICTIONS.inc();
            },
            None => {
                let grown = chains.cap().saturating_add(chains.cap().get());
                warn!(
                    capacity = chains.cap().get(),
                    grown = grown.get(),
                    "every cached chain is in use, growing the version cache"
                );
                chains.resize(grown);
                CACHE_GROWTHS.inc();
            },
        }
    }

    /// Latest committed value of `key`, never blocking.
    pub fn fetch(&self, key: &StateKey) -> Result<StateValue, MvCacheError> {
        self.chain(key)?.last_committed_value()
    }

    /// Installs a pending placeholder for the write of `id` to `key`.
    pub fn install_pending(
        &self,
        key: &StateKey,
        id: TaskId,
    ) -> Result<(Arc<VersionChain>, Arc<Version>), MvCacheError> {
        let _collection = self.collection.read();
        let chain = self.chain(key)?;
        let version = Version::pending(*key, id);
        chain.install(version.clone())?;
        Ok((chain, version))
    }

    pub fn install_prize_pending(&self, id: TaskId) -> Result<Arc<Version>, MvCacheError> {
        let _collection = self.collection.read();
        let version = Version::pending(StateKey::prize(), id);
        self.prize.install(version.clone())?;
        Ok(version)
    }

    /// Publishes `value` as the committed content of a previously installed version.
    pub fn commit(&self, chain: &VersionChain, version: &Arc<Version>, value: StateValue) {
        self.dirty.insert(*chain.key());
        chain.update(version, value);
    }

    pub fn commit_prize(&self, version: &Arc<Version>, amount: U256) {
        self.prize.update(version, StateValue::Word(amount));
    }

    /// Marks a task's placeholder as skipped by readers. The chain is collected at the end of
    /// the block like any written chain.
    pub fn ignore(&self, version: &Version) {
        if !version.key().is_prize() {
            self.dirty.insert(*version.key());
        }
        version.settle(VersionStatus::Ignore, None);
    }

    /// Writes a value produced outside the predicted footprint (replay and finalization).
    pub fn install_committed(
        &self,
        key: &StateKey,
        id: TaskId,
        value: StateValue,
    ) -> Result<(), MvCacheError> {
        let _collection = self.collection.read();
        let chain = self.chain(key)?;
        self.dirty.insert(*key);
        chain.install_committed(id, value)?;
        Ok(())
    }

    pub fn install_prize_committed(&self, id: TaskId, amount: U256) -> Result<(), MvCacheError> {
        let _collection = self.collection.read();
        self.prize.install_committed(id, StateValue::Word(amount))?;
        Ok(())
    }

    /// Total prize accrued by tasks ordered before `reader`, waiting for pending producers.
    pub fn fetch_prize(&self, reader: TaskId) -> Result<U256, MvCacheError> {
        let mut total = U256::zero();
        for version in self.prize.versions() {
            if version.id() >= reader {
                break;
            }
            if let (VersionStatus::Committed, Some(value)) =
                version.wait_settled(self.read_timeout)?
            {
                total = total.overflowing_add(prize_amount(&value)?).0;
            }
        }
        Ok(total)
    }

    /// Prize already committed before `reader`, skipping producers that are still running.
    pub fn committed_prize_before(&self, reader: TaskId) -> Result<U256, MvCacheError> {
        let mut total = U256::zero();
        for version in self.prize.versions() {
            if version.id() >= reader {
                break;
            }
            if let Some(value) = version.value() {
                total = total.overflowing_add(prize_amount(&value)?).0;
            }
        }
        Ok(total)
    }

    /// Finalizes a block at `end`: credits the accrued prize to the coinbase and applies the
    /// withdrawals, prunes the prize chain, then trims every dirty chain to its committed
    /// value and writes that value back to the snapshot. Requires every task of the block to
    /// have settled. Returns the number of chains collected.
    pub fn garbage_collection(
        &self,
        end: TaskId,
        coinbase: Address,
        withdrawals: &[Withdrawal],
    ) -> Result<usize, MvCacheError> {
        let mut credits: BTreeMap<Address, U256> = BTreeMap::new();
        let prize = self.fetch_prize(end)?;
        if !prize.is_zero() {
            credits.insert(coinbase, prize);
        }
        for withdrawal in withdrawals {
            let credit = credits.entry(withdrawal.address).or_default();
            *credit = credit.overflowing_add(withdrawal.amount).0;
        }
        for (address, amount) in credits {
            let key = StateKey::balance(address);
            let balance = self.fetch(&key)?;
            let credited = balance.wrapping_add_word(amount).ok_or_else(|| {
                code_invariant_error(format!("balance of {:?} is not a word", address))
            })?;
            self.install_committed(&key, end, credited)?;
        }

        let _collection = self.collection.write();
        self.prize.trim(end, StateValue::Word(U256::zero()));

        let keys: Vec<StateKey> = self.dirty.iter().map(|key| *key.key()).collect();
        for key in &keys {
            let chain = self
                .chains
                .lock()
                .peek(key)
                .cloned()
                .ok_or(MvCacheError::MissingDirtyChain(*key))?;
            let value = chain.garbage_collect(end)?;
            self.snapshot
                .write_back(key, value)
                .map_err(|error| MvCacheError::Snapshot {
                    key: *key,
                    message: error.to_string(),
                })?;
            self.dirty.remove(key);
        }
        COLLECTED_CHAINS.set(keys.len() as i64);
        debug!(end = %end, collected = keys.len(), "garbage collected version chains");
        Ok(keys.len())
    }

    /// Compares every cached committed value against `reference` and returns the smallest
    /// producer whose value diverges.
    pub fn validate(&self, reference: &impl StateSnapshot) -> Result<Option<TaskId>, MvCacheError> {
        let chains: Vec<(StateKey, Arc<VersionChain>)> = self
            .chains
            .lock()
            .iter()
            .map(|(key, chain)| (*key, chain.clone()))
            .collect();
        let mut first_mismatch: Option<TaskId> = None;
        for (key, chain) in chains {
            let last = chain.last_committed();
            let value = chain.last_committed_value()?;
            let expected = reference
                .get_or_default(&key)
                .map_err(|error| MvCacheError::Snapshot {
                    key,
                    message: error.to_string(),
                })?;
            if value != expected {
                first_mismatch = Some(match first_mismatch {
                    Some(current) => current.min(last.id()),
                    None => last.id(),
                });
            }
        }
        Ok(first_mismatch)
    }
}

fn prize_amount(value: &StateValue) -> Result<U256, MvCacheError> {
    value
        .as_word()
        .ok_or_else(|| code_invariant_error(format!("prize {:?} is not a word", value)).into())
}
