// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

mod avl;
mod segment_tree;

pub use avl::AvlTree;
pub use segment_tree::SegmentTree;

use octopus_types::error::{code_invariant_error, PanicError};

/// A free interval of a timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub start: u64,
    pub len: u64,
}

impl Slot {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Free intervals of one timeline over `[0, horizon)`.
///
/// The AVL tree maps each free slot's start to its length and answers "which slot contains
/// time t". The segment tree stores the same length at the slot's start position and
/// answers "earliest slot at or after t that is at least this long".
pub struct SlotManager {
    slots: AvlTree,
    lengths: SegmentTree,
    horizon: u64,
}

impl SlotManager {
    pub fn new(horizon: u64) -> Self {
        let mut manager = Self {
            slots: AvlTree::new(),
            lengths: SegmentTree::new(horizon),
            horizon,
        };
        manager.add_slot(Slot {
            start: 0,
            len: horizon,
        });
        manager
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Free slots in time order.
    pub fn slots(&self) -> Vec<Slot> {
        self.slots
            .entries()
            .into_iter()
            .map(|(start, len)| Slot { start, len })
            .collect()
    }

    fn add_slot(&mut self, slot: Slot) {
        if slot.len != 0 {
            self.slots.insert(slot.start, slot.len);
        }
        self.lengths.modify(slot.start, slot.len);
    }

    fn remove_slot(&mut self, start: u64) {
        self.slots.remove(start);
        self.lengths.modify(start, 0);
    }

    /// Earliest start `>= est` at which `len` units of time are free.
    pub fn find(&self, est: u64, len: u64) -> Option<u64> {
        let len = len.max(1);
        if let Some((start, slot_len)) = self.slots.floor(est) {
            if start + slot_len >= est.saturating_add(len) {
                return Some(est);
            }
        }
        self.lengths
            .first_at_least(est.saturating_add(1), self.horizon, len)
    }

    /// Marks `[start, finish)` busy. It must lie inside one free slot.
    pub fn occupy(&mut self, start: u64, finish: u64) -> Result<(), PanicError> {
        let slot = self
            .slots
            .floor(start)
            .map(|(slot_start, len)| Slot {
                start: slot_start,
                len,
            })
            .filter(|slot| slot.end() >= finish && finish >= start)
            .ok_or_else(|| {
                code_invariant_error(format!("[{}, {}) is not inside a free slot", start, finish))
            })?;

        self.remove_slot(slot.start);
        self.add_slot(Slot {
            start: slot.start,
            len: start - slot.start,
        });
        if slot.end() > finish {
            self.add_slot(Slot {
                start: finish,
                len: slot.end() - finish,
            });
        }
        Ok(())
    }
}
