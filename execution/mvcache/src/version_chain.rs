// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    types::MvCacheError,
    version::{Version, VersionStatus},
};
use arc_swap::ArcSwap;
use octopus_types::{
    error::code_invariant_error, state_key::StateKey, state_value::StateValue, task_id::TaskId,
};
use std::{sync::Arc, time::Duration};

/// All versions of one key, linked in strictly increasing `TaskId` order behind a committed
/// head that carries the pre-block value.
pub struct VersionChain {
    key: StateKey,
    head: ArcSwap<Version>,
    /// Only ever moves to a greater `TaskId`.
    last_committed: ArcSwap<Version>,
    /// Greatest installed version, where appends start their walk.
    tail: ArcSwap<Version>,
}

impl VersionChain {
    /// A chain whose head already holds `value`.
    pub fn new(key: StateKey, value: StateValue) -> Self {
        let head = Version::committed(key, TaskId::Snapshot, value);
        Self {
            key,
            head: ArcSwap::new(head.clone()),
            last_committed: ArcSwap::new(head.clone()),
            tail: ArcSwap::new(head),
        }
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn head(&self) -> Arc<Version> {
        self.head.load_full()
    }

    pub fn last_committed(&self) -> Arc<Version> {
        self.last_committed.load_full()
    }

    /// Value of the latest commit in `TaskId` order. Never blocks.
    pub fn last_committed_value(&self) -> Result<StateValue, MvCacheError> {
        let last = self.last_committed();
        last.value().ok_or_else(|| {
            code_invariant_error(format!(
                "last committed version {} of {} holds no value",
                last.id(),
                self.key
            ))
            .into()
        })
    }

    /// Splices `version` into its `TaskId` position using lock coupling: the current node's
    /// `next` is held while the successor's `prev` is swung to the new version. The walk
    /// starts at the tail when the new version orders after it.
    pub fn install(&self, version: Arc<Version>) -> Result<(), MvCacheError> {
        let head = self.head();
        if version.id() <= head.id() {
            return Err(code_invariant_error(format!(
                "version {} of {} does not follow the chain head {}",
                version.id(),
                self.key,
                head.id()
            ))
            .into());
        }
        let tail = self.tail.load_full();
        let mut current = if tail.id() < version.id() { tail } else { head };

        loop {
            let mut next_guard = current.lock_next();
            let successor = next_guard.clone();
            if let Some(next) = &successor {
                if next.id() == version.id() {
                    return Err(code_invariant_error(format!(
                        "{} installed twice for {}",
                        version.id(),
                        self.key
                    ))
                    .into());
                }
            }

            // Link the new node before it becomes reachable from either side.
            version.set_prev(&current);
            version.set_next(successor.clone());
            match successor {
                None => {
                    *next_guard = Some(version.clone());
                    drop(next_guard);
                    self.advance_tail(&version);
                    return Ok(());
                },
                Some(next) if next.try_link_prev(&version) => {
                    *next_guard = Some(version);
                    return Ok(());
                },
                Some(next) => {
                    drop(next_guard);
                    current = next;
                },
            }
        }
    }

    fn advance_tail(&self, version: &Arc<Version>) {
        loop {
            let current = self.tail.load_full();
            if version.id() <= current.id() {
                return;
            }
            let previous = self.tail.compare_and_swap(&current, version.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return;
            }
        }
    }

    /// Settles `version` as committed and advances the last-committed pointer unless a
    /// greater `TaskId` has already committed.
    pub fn update(&self, version: &Arc<Version>, value: StateValue) {
        version.settle(VersionStatus::Committed, Some(value));
        loop {
            let current = self.last_committed.load_full();
            if version.id() < current.id() {
                return;
            }
            let previous = self
                .last_committed
                .compare_and_swap(&current, version.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return;
            }
        }
    }

    /// Installs an already committed version and publishes it.
    pub fn install_committed(
        &self,
        id: TaskId,
        value: StateValue,
    ) -> Result<Arc<Version>, MvCacheError> {
        let version = Version::pending(self.key, id);
        self.install(version.clone())?;
        self.update(&version, value);
        Ok(version)
    }

    /// The last version ordered before `reader`, resolved to the nearest committed value.
    /// Never observes a version produced at or after `reader`.
    pub fn read_at(
        &self,
        reader: TaskId,
        timeout: Option<Duration>,
    ) -> Result<(TaskId, StateValue), MvCacheError> {
        let mut current = self.head();
        while let Some(next) = current.next() {
            if next.id() >= reader {
                break;
            }
            current = next;
        }
        current.resolve_visible(timeout)
    }

    /// Whether any version follows the head, i.e. the chain is still in use by some block.
    pub fn has_in_flight(&self) -> bool {
        self.head().next().is_some()
    }

    /// Versions after the head, in chain order.
    pub fn versions(&self) -> Vec<Arc<Version>> {
        let mut versions = Vec::new();
        let mut current = self.head().next();
        while let Some(version) = current {
            current = version.next();
            versions.push(version);
        }
        versions
    }

    /// Replaces every version ordered at or before `boundary` with a single committed head
    /// holding `value`. Versions after `boundary` (installed for a later block) stay linked.
    /// Requires that nothing ordered before `boundary` is still running and that no install
    /// runs concurrently.
    pub(crate) fn trim(&self, boundary: TaskId, value: StateValue) {
        let mut suffix = self.head().next();
        while let Some(version) = suffix.clone() {
            if version.id() > boundary {
                break;
            }
            suffix = version.next();
        }

        let head = Version::committed(self.key, TaskId::Snapshot, value);
        if let Some(first_kept) = &suffix {
            first_kept.set_prev(&head);
        }
        let mut tail = head.clone();
        let mut current = suffix.clone();
        while let Some(version) = current {
            current = version.next();
            tail = version;
        }
        head.set_next(suffix);
        self.tail.store(tail);
        self.head.store(head.clone());
        self.last_committed.store(head);
    }

    /// Trims the chain down to its last committed value. Returns that value.
    pub fn garbage_collect(&self, boundary: TaskId) -> Result<StateValue, MvCacheError> {
        let last = self.last_committed();
        if last.id() > boundary {
            return Err(code_invariant_error(format!(
                "{} committed {} after the collection boundary {}",
                last.id(),
                self.key,
                boundary
            ))
            .into());
        }
        let value = self.last_committed_value()?;
        self.trim(boundary, value.clone());
        Ok(value)
    }
}
