// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::types::MvCacheError;
use octopus_types::{state_key::StateKey, state_value::StateValue, task_id::TaskId};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionStatus {
    /// Installed ahead of execution; readers block until the producer settles it.
    Pending,
    Committed,
    /// The producer aborted or did not write the key. Visibility skips it.
    Ignore,
}

#[derive(Debug)]
struct Settlement {
    status: VersionStatus,
    value: Option<StateValue>,
}

/// One revision of one key, produced by the task `id`.
///
/// `next` is the owning link of the chain; `prev` is weak. Inserting after a node locks the
/// node's `next` and then the successor's `prev`, always in that order.
pub struct Version {
    id: TaskId,
    key: StateKey,
    settlement: Mutex<Settlement>,
    settled: Condvar,
    next: Mutex<Option<Arc<Version>>>,
    prev: Mutex<Weak<Version>>,
}

impl Version {
    fn new(key: StateKey, id: TaskId, status: VersionStatus, value: Option<StateValue>) -> Arc<Self> {
        Arc::new(Self {
            id,
            key,
            settlement: Mutex::new(Settlement { status, value }),
            settled: Condvar::new(),
            next: Mutex::new(None),
            prev: Mutex::new(Weak::new()),
        })
    }

    pub fn pending(key: StateKey, id: TaskId) -> Arc<Self> {
        Self::new(key, id, VersionStatus::Pending, None)
    }

    pub fn committed(key: StateKey, id: TaskId, value: StateValue) -> Arc<Self> {
        Self::new(key, id, VersionStatus::Committed, Some(value))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn status(&self) -> VersionStatus {
        self.settlement.lock().status
    }

    /// The settled value, `None` unless committed.
    pub fn value(&self) -> Option<StateValue> {
        let settlement = self.settlement.lock();
        match settlement.status {
            VersionStatus::Committed => settlement.value.clone(),
            _ => None,
        }
    }

    /// Records the final status and value and wakes every blocked reader.
    pub fn settle(&self, status: VersionStatus, value: Option<StateValue>) {
        let mut settlement = self.settlement.lock();
        settlement.status = status;
        settlement.value = match status {
            VersionStatus::Committed => value,
            _ => None,
        };
        self.settled.notify_all();
    }

    /// Blocks until the version is no longer pending. With a timeout, a producer that never
    /// settles is reported instead of hanging the reader.
    pub fn wait_settled(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(VersionStatus, Option<StateValue>), MvCacheError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut settlement = self.settlement.lock();
        while settlement.status == VersionStatus::Pending {
            match deadline {
                None => self.settled.wait(&mut settlement),
                Some(deadline) => {
                    if self
                        .settled
                        .wait_until(&mut settlement, deadline)
                        .timed_out()
                        && settlement.status == VersionStatus::Pending
                    {
                        return Err(MvCacheError::WaitTimeout {
                            key: self.key,
                            producer: self.id,
                        });
                    }
                },
            }
        }
        Ok((settlement.status, settlement.value.clone()))
    }

    pub fn next(&self) -> Option<Arc<Version>> {
        self.next.lock().clone()
    }

    pub fn prev(&self) -> Option<Arc<Version>> {
        self.prev.lock().upgrade()
    }

    /// Follows `prev` from this version until a committed one is found, waiting on every
    /// pending version met on the way. Returns the committed version and its value.
    pub fn resolve_visible(
        self: &Arc<Self>,
        timeout: Option<Duration>,
    ) -> Result<(TaskId, StateValue), MvCacheError> {
        let mut current = Some(self.clone());
        while let Some(version) = current {
            if let (VersionStatus::Committed, Some(value)) = version.wait_settled(timeout)? {
                return Ok((version.id, value));
            }
            current = version.prev();
        }
        Err(MvCacheError::Unresolvable {
            key: self.key,
            from: self.id,
        })
    }

    pub(crate) fn lock_next(&self) -> parking_lot::MutexGuard<'_, Option<Arc<Version>>> {
        self.next.lock()
    }

    pub(crate) fn set_prev(&self, prev: &Arc<Version>) {
        *self.prev.lock() = Arc::downgrade(prev);
    }

    pub(crate) fn set_next(&self, next: Option<Arc<Version>>) {
        *self.next.lock() = next;
    }

    /// Makes `candidate` this version's predecessor if it orders before it.
    pub(crate) fn try_link_prev(&self, candidate: &Arc<Version>) -> bool {
        let mut prev = self.prev.lock();
        if candidate.id < self.id {
            *prev = Arc::downgrade(candidate);
            true
        } else {
            false
        }
    }
}

impl Drop for Version {
    /// Unlinks the owned tail one node at a time, so dropping a long chain does not recurse.
    fn drop(&mut self) {
        let mut next = self.next.get_mut().take();
        while let Some(version) = next {
            next = match Arc::try_unwrap(version) {
                Ok(mut version) => version.next.get_mut().take(),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settlement = self.settlement.lock();
        f.debug_struct("Version")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("status", &settlement.status)
            .field("value", &settlement.value)
            .finish()
    }
}
