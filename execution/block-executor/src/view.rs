// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Storage surfaces handed to the VM.
//!
//! The coinbase balance stored in the cache excludes the prize accrued during the block.
//! Reading it adds the prize of every task ordered before the reader; writing it stores the
//! written value minus that same prize. The block's finalization credits the total.

use crate::{
    block_task::Task,
    task::{Access, StateSurface, SurfaceError},
};
use octopus_config::config::AbortMode;
use octopus_mvcache::{MvCacheError, VersionCache};
use octopus_types::{
    error::code_invariant_error, rw_set::RwSet, state_key::StateKey, state_value::StateValue,
    state_view::StateSnapshot, task_id::TaskId, Address, U256,
};
use std::collections::{BTreeMap, HashMap};

fn is_coinbase_balance(key: &StateKey, coinbase: Address) -> bool {
    *key == StateKey::balance(coinbase)
}

fn add_prize_to(value: StateValue, prize: U256) -> Result<StateValue, MvCacheError> {
    value
        .wrapping_add_word(prize)
        .ok_or_else(|| code_invariant_error(format!("coinbase balance {:?} is not a word", value)).into())
}

fn sub_prize_from(value: &StateValue, prize: U256) -> Result<StateValue, MvCacheError> {
    value
        .wrapping_sub_word(prize)
        .ok_or_else(|| code_invariant_error(format!("coinbase balance {:?} is not a word", value)).into())
}

/// View of a task running in the parallel wave.
///
/// Reads resolve against the version the task is entitled to observe, waiting on pending
/// producers. Writes are buffered and only published by [`SpeculativeView::commit`].
pub struct SpeculativeView<'a, T, S> {
    task: &'a Task<T>,
    cache: &'a VersionCache<S>,
    coinbase: Address,
    abort_mode: AbortMode,
    writes: HashMap<StateKey, StateValue>,
    prize: U256,
    prize_before: Option<U256>,
    actual: RwSet,
    misprediction: Option<(StateKey, Access)>,
    fatal: Option<MvCacheError>,
}

impl<'a, T, S: StateSnapshot> SpeculativeView<'a, T, S> {
    pub fn new(
        task: &'a Task<T>,
        cache: &'a VersionCache<S>,
        coinbase: Address,
        abort_mode: AbortMode,
    ) -> Self {
        Self {
            task,
            cache,
            coinbase,
            abort_mode,
            writes: HashMap::new(),
            prize: U256::zero(),
            prize_before: None,
            actual: RwSet::new(),
            misprediction: None,
            fatal: None,
        }
    }

    /// The first access that left the predicted footprint.
    pub fn misprediction(&self) -> Option<(StateKey, Access)> {
        self.misprediction
    }

    pub fn fatal(&self) -> Option<&MvCacheError> {
        self.fatal.as_ref()
    }

    /// Accesses observed so far.
    pub fn actual(&self) -> &RwSet {
        &self.actual
    }

    pub fn into_actual(self) -> RwSet {
        self.actual
    }

    fn record_fatal(&mut self, error: MvCacheError) -> SurfaceError {
        if self.fatal.is_none() {
            self.fatal = Some(error.clone());
        }
        SurfaceError::Fatal(error)
    }

    /// Records the access and reports whether it was predicted. In early-abort mode an
    /// unpredicted access fails right away.
    fn check(&mut self, key: StateKey, access: Access) -> Result<bool, SurfaceError> {
        let predicted = match access {
            Access::Read => {
                self.actual.add_read(key);
                self.task.footprint().has_read(&key)
            },
            Access::Write => {
                self.actual.add_write(key);
                self.task.footprint().has_write(&key)
            },
        };
        if predicted {
            return Ok(true);
        }
        if self.misprediction.is_none() {
            self.misprediction = Some((key, access));
        }
        match self.abort_mode {
            AbortMode::EarlyAbort => Err(SurfaceError::Misprediction { key, access }),
            AbortMode::Tolerant => Ok(false),
        }
    }

    /// Prize accrued by every task ordered before this one.
    fn prize_before(&mut self) -> Result<U256, SurfaceError> {
        if self.check(StateKey::prize(), Access::Read)? {
            if let Some(prize) = self.prize_before {
                return Ok(prize);
            }
            let prize = self
                .cache
                .fetch_prize(self.task.id())
                .map_err(|error| self.record_fatal(error))?;
            self.prize_before = Some(prize);
            Ok(prize)
        } else {
            self.cache
                .committed_prize_before(self.task.id())
                .map_err(|error| self.record_fatal(error))
        }
    }

    fn read_predicted(&self, key: &StateKey) -> Result<StateValue, MvCacheError> {
        let timeout = self.cache.read_timeout();
        let (_, value) = match (self.task.read_version(key), self.task.read_chain(key)) {
            (Some(version), _) => version.resolve_visible(timeout)?,
            (None, Some(chain)) => chain.read_at(self.task.id(), timeout)?,
            (None, None) => self.cache.chain(key)?.read_at(self.task.id(), timeout)?,
        };
        Ok(value)
    }

    /// Publishes the buffered writes into the task's placeholders. Placeholders the task did
    /// not write are ignored.
    pub fn commit(mut self) -> Result<RwSet, MvCacheError> {
        if let Some((key, access)) = self.misprediction {
            return Err(code_invariant_error(format!(
                "{} committed after a mispredicted {} of {}",
                self.task.id(),
                access,
                key
            ))
            .into());
        }
        if let Some(key) = self
            .writes
            .keys()
            .find(|key| self.task.write_version(key).is_none())
        {
            return Err(code_invariant_error(format!(
                "{} wrote {} without a placeholder",
                self.task.id(),
                key
            ))
            .into());
        }

        let coinbase_key = StateKey::balance(self.coinbase);
        let prize_before = match (self.writes.contains_key(&coinbase_key), self.prize_before) {
            (true, Some(prize)) => prize,
            (true, None) => self.cache.fetch_prize(self.task.id())?,
            (false, _) => U256::zero(),
        };
        for (key, (chain, version)) in self.task.write_versions() {
            match self.writes.remove(key) {
                Some(value) if *key == coinbase_key => {
                    self.cache
                        .commit(chain, version, sub_prize_from(&value, prize_before)?)
                },
                Some(value) => self.cache.commit(chain, version, value),
                None => self.cache.ignore(version),
            }
        }
        if let Some(version) = self.task.prize_version() {
            self.cache.commit_prize(version, self.prize);
        }
        Ok(self.actual)
    }

    /// Settles every placeholder of the task as ignored and returns the observed accesses.
    pub fn abort(self) -> RwSet {
        self.task.abort(self.cache);
        self.actual
    }
}

impl<'a, T, S: StateSnapshot> StateSurface for SpeculativeView<'a, T, S> {
    fn get(&mut self, key: &StateKey) -> Result<StateValue, SurfaceError> {
        if key.is_prize() {
            return self.prize_before().map(StateValue::Word);
        }
        if let Some(value) = self.writes.get(key) {
            return Ok(value.clone());
        }

        let value = if self.check(*key, Access::Read)? {
            self.read_predicted(key)
        } else {
            self.cache.fetch(key)
        }
        .map_err(|error| self.record_fatal(error))?;

        if is_coinbase_balance(key, self.coinbase) {
            let prize = self.prize_before()?;
            return add_prize_to(value, prize).map_err(|error| self.record_fatal(error));
        }
        Ok(value)
    }

    fn set(&mut self, key: StateKey, value: StateValue) -> Result<(), SurfaceError> {
        if key.is_prize() {
            let error = code_invariant_error("the prize is only accrued through add_prize");
            return Err(self.record_fatal(error.into()));
        }
        self.check(key, Access::Write)?;
        if is_coinbase_balance(&key, self.coinbase) {
            // The stored balance is relative to the prize accrued before this task.
            self.prize_before()?;
        }
        self.writes.insert(key, value);
        Ok(())
    }

    fn add_prize(&mut self, amount: U256) -> Result<(), SurfaceError> {
        self.check(StateKey::prize(), Access::Write)?;
        self.prize = self.prize.overflowing_add(amount).0;
        Ok(())
    }

    fn coinbase(&self) -> Address {
        self.coinbase
    }
}

/// View of a task executed serially once the wave has settled: deferred replays and the
/// sequential executor. Reads take last committed values; commit installs fresh committed
/// versions under the replay id.
pub struct ReplayView<'a, S> {
    id: TaskId,
    cache: &'a VersionCache<S>,
    coinbase: Address,
    writes: BTreeMap<StateKey, StateValue>,
    prize: U256,
    prize_before: Option<U256>,
    actual: RwSet,
    fatal: Option<MvCacheError>,
}

impl<'a, S: StateSnapshot> ReplayView<'a, S> {
    pub fn new(id: TaskId, cache: &'a VersionCache<S>, coinbase: Address) -> Self {
        Self {
            id,
            cache,
            coinbase,
            writes: BTreeMap::new(),
            prize: U256::zero(),
            prize_before: None,
            actual: RwSet::new(),
            fatal: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn fatal(&self) -> Option<&MvCacheError> {
        self.fatal.as_ref()
    }

    pub fn into_actual(self) -> RwSet {
        self.actual
    }

    fn record_fatal(&mut self, error: MvCacheError) -> SurfaceError {
        if self.fatal.is_none() {
            self.fatal = Some(error.clone());
        }
        SurfaceError::Fatal(error)
    }

    fn prize_before(&mut self) -> Result<U256, SurfaceError> {
        self.actual.add_read(StateKey::prize());
        if let Some(prize) = self.prize_before {
            return Ok(prize);
        }
        let prize = self
            .cache
            .fetch_prize(self.id)
            .map_err(|error| self.record_fatal(error))?;
        self.prize_before = Some(prize);
        Ok(prize)
    }

    pub fn commit(mut self) -> Result<RwSet, MvCacheError> {
        let coinbase_key = StateKey::balance(self.coinbase);
        let writes = std::mem::take(&mut self.writes);
        for (key, value) in writes {
            let value = if key == coinbase_key {
                let prize = match self.prize_before {
                    Some(prize) => prize,
                    None => self.cache.fetch_prize(self.id)?,
                };
                sub_prize_from(&value, prize)?
            } else {
                value
            };
            self.cache.install_committed(&key, self.id, value)?;
        }
        if !self.prize.is_zero() {
            self.cache.install_prize_committed(self.id, self.prize)?;
        }
        Ok(self.actual)
    }
}

impl<'a, S: StateSnapshot> StateSurface for ReplayView<'a, S> {
    fn get(&mut self, key: &StateKey) -> Result<StateValue, SurfaceError> {
        if key.is_prize() {
            return self.prize_before().map(StateValue::Word);
        }
        if let Some(value) = self.writes.get(key) {
            return Ok(value.clone());
        }
        self.actual.add_read(*key);
        let value = self
            .cache
            .fetch(key)
            .map_err(|error| self.record_fatal(error))?;
        if is_coinbase_balance(key, self.coinbase) {
            let prize = self.prize_before()?;
            return add_prize_to(value, prize).map_err(|error| self.record_fatal(error));
        }
        Ok(value)
    }

    fn set(&mut self, key: StateKey, value: StateValue) -> Result<(), SurfaceError> {
        if key.is_prize() {
            let error = code_invariant_error("the prize is only accrued through add_prize");
            return Err(self.record_fatal(error.into()));
        }
        self.actual.add_write(key);
        self.writes.insert(key, value);
        Ok(())
    }

    fn add_prize(&mut self, amount: U256) -> Result<(), SurfaceError> {
        self.actual.add_write(StateKey::prize());
        self.prize = self.prize.overflowing_add(amount).0;
        Ok(())
    }

    fn coinbase(&self) -> Address {
        self.coinbase
    }
}
