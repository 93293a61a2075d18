// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

const NIL: usize = usize::MAX;

#[derive(Clone, Copy)]
struct Node {
    max: u64,
    left: usize,
    right: usize,
}

impl Node {
    const EMPTY: Node = Node {
        max: 0,
        left: NIL,
        right: NIL,
    };
}

/// Max segment tree over the positions `[0, size)`, allocated lazily in an arena.
/// Positions never written hold zero.
pub struct SegmentTree {
    nodes: Vec<Node>,
    size: u64,
}

impl SegmentTree {
    pub fn new(size: u64) -> Self {
        Self {
            nodes: vec![Node::EMPTY],
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modify(&mut self, pos: u64, value: u64) {
        if pos >= self.size {
            return;
        }
        let mut path = Vec::with_capacity(64);
        let (mut idx, mut lo, mut hi) = (0, 0, self.size);
        while hi - lo > 1 {
            path.push(idx);
            let mid = lo + (hi - lo) / 2;
            let go_left = pos < mid;
            let child = if go_left {
                self.nodes[idx].left
            } else {
                self.nodes[idx].right
            };
            let child = if child == NIL {
                self.nodes.push(Node::EMPTY);
                let child = self.nodes.len() - 1;
                if go_left {
                    self.nodes[idx].left = child;
                } else {
                    self.nodes[idx].right = child;
                }
                child
            } else {
                child
            };
            if go_left {
                hi = mid;
            } else {
                lo = mid;
            }
            idx = child;
        }
        self.nodes[idx].max = value;
        for &parent in path.iter().rev() {
            let Node { left, right, .. } = self.nodes[parent];
            self.nodes[parent].max = self.max_of(left).max(self.max_of(right));
        }
    }

    fn max_of(&self, idx: usize) -> u64 {
        if idx == NIL {
            0
        } else {
            self.nodes[idx].max
        }
    }

    pub fn get(&self, pos: u64) -> u64 {
        let (mut idx, mut lo, mut hi) = (0, 0, self.size);
        if pos >= hi {
            return 0;
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            idx = if pos < mid {
                hi = mid;
                self.nodes[idx].left
            } else {
                lo = mid;
                self.nodes[idx].right
            };
            if idx == NIL {
                return 0;
            }
        }
        self.nodes[idx].max
    }

    /// Smallest position in `[from, to)` holding at least `threshold`, which must be positive.
    pub fn first_at_least(&self, from: u64, to: u64, threshold: u64) -> Option<u64> {
        let to = to.min(self.size);
        if from >= to {
            return None;
        }
        self.search(0, 0, self.size, from, to, threshold)
    }

    fn search(&self, idx: usize, lo: u64, hi: u64, from: u64, to: u64, threshold: u64) -> Option<u64> {
        if idx == NIL || hi <= from || lo >= to || self.nodes[idx].max < threshold {
            return None;
        }
        if hi - lo == 1 {
            return Some(lo);
        }
        let mid = lo + (hi - lo) / 2;
        let Node { left, right, .. } = self.nodes[idx];
        self.search(left, lo, mid, from, to, threshold)
            .or_else(|| self.search(right, mid, hi, from, to, threshold))
    }
}
