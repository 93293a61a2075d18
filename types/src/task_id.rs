// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

pub type BlockNumber = u64;
pub type TxnIndex = u32;
pub type Incarnation = u32;

/// Identity of a schedulable unit and its position in the serialization order.
///
/// `Snapshot` precedes every transaction (the pre-block baseline), `End` follows every
/// transaction. Transactions are ordered by block, then by incarnation, then by index:
/// a re-executed task (incarnation bumped) is serialized after every first-incarnation task
/// of its block, whatever its original index. Commit order and visibility both rely on this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskId {
    Snapshot,
    Txn {
        block: BlockNumber,
        index: TxnIndex,
        incarnation: Incarnation,
    },
    End,
}

impl TaskId {
    pub fn new(block: BlockNumber, index: TxnIndex, incarnation: Incarnation) -> Self {
        TaskId::Txn {
            block,
            index,
            incarnation,
        }
    }

    /// The finalization step of `block`: greater than every transaction of the block
    /// (any incarnation) and smaller than every transaction of the next block.
    pub fn block_end(block: BlockNumber) -> Self {
        TaskId::Txn {
            block,
            index: TxnIndex::MAX,
            incarnation: Incarnation::MAX,
        }
    }

    pub fn is_virtual(&self) -> bool {
        !matches!(self, TaskId::Txn { .. })
    }

    pub fn block(&self) -> Option<BlockNumber> {
        match self {
            TaskId::Txn { block, .. } => Some(*block),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<TxnIndex> {
        match self {
            TaskId::Txn { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn incarnation(&self) -> Option<Incarnation> {
        match self {
            TaskId::Txn { incarnation, .. } => Some(*incarnation),
            _ => None,
        }
    }

    /// Same transaction, next incarnation. Sentinels are returned unchanged.
    pub fn next_incarnation(&self) -> Self {
        match *self {
            TaskId::Txn {
                block,
                index,
                incarnation,
            } => TaskId::Txn {
                block,
                index,
                incarnation: incarnation.saturating_add(1),
            },
            other => other,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskId::Snapshot => 0,
            TaskId::Txn { .. } => 1,
            TaskId::End => 2,
        }
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                TaskId::Txn {
                    block: b1,
                    index: i1,
                    incarnation: n1,
                },
                TaskId::Txn {
                    block: b2,
                    index: i2,
                    incarnation: n2,
                },
            ) => b1.cmp(b2).then(n1.cmp(n2)).then(i1.cmp(i2)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Snapshot => write!(f, "Snapshot"),
            TaskId::End => write!(f, "End"),
            TaskId::Txn {
                block,
                index,
                incarnation,
            } => write!(f, "{}:{}#{}", block, index, incarnation),
        }
    }
}
