// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;

type Link = Option<Box<AvlNode>>;

struct AvlNode {
    key: u64,
    value: u64,
    height: u8,
    left: Link,
    right: Link,
}

impl AvlNode {
    fn new(key: u64, value: u64) -> Box<Self> {
        Box::new(Self {
            key,
            value,
            height: 1,
            left: None,
            right: None,
        })
    }
}

fn height(link: &Link) -> u8 {
    link.as_ref().map_or(0, |node| node.height)
}

fn update_height(node: &mut AvlNode) {
    node.height = 1 + height(&node.left).max(height(&node.right));
}

fn balance_factor(node: &AvlNode) -> i16 {
    height(&node.left) as i16 - height(&node.right) as i16
}

fn rotate_right(mut node: Box<AvlNode>) -> Box<AvlNode> {
    match node.left.take() {
        Some(mut left) => {
            node.left = left.right.take();
            update_height(&mut node);
            left.right = Some(node);
            update_height(&mut left);
            left
        },
        None => node,
    }
}

fn rotate_left(mut node: Box<AvlNode>) -> Box<AvlNode> {
    match node.right.take() {
        Some(mut right) => {
            node.right = right.left.take();
            update_height(&mut node);
            right.left = Some(node);
            update_height(&mut right);
            right
        },
        None => node,
    }
}

fn rebalance(mut node: Box<AvlNode>) -> Box<AvlNode> {
    update_height(&mut node);
    let factor = balance_factor(&node);
    if factor > 1 {
        if node.left.as_ref().map_or(0, |left| balance_factor(left)) < 0 {
            node.left = node.left.take().map(rotate_left);
        }
        return rotate_right(node);
    }
    if factor < -1 {
        if node.right.as_ref().map_or(0, |right| balance_factor(right)) > 0 {
            node.right = node.right.take().map(rotate_right);
        }
        return rotate_left(node);
    }
    node
}

fn insert(link: Link, key: u64, value: u64, inserted: &mut bool) -> Box<AvlNode> {
    let mut node = match link {
        None => {
            *inserted = true;
            return AvlNode::new(key, value);
        },
        Some(node) => node,
    };
    match key.cmp(&node.key) {
        Ordering::Less => node.left = Some(insert(node.left.take(), key, value, inserted)),
        Ordering::Greater => node.right = Some(insert(node.right.take(), key, value, inserted)),
        Ordering::Equal => {
            node.value = value;
            return node;
        },
    }
    rebalance(node)
}

/// Detaches the minimum of a non-empty subtree. Returns the remaining subtree and the minimum.
fn take_min(mut node: Box<AvlNode>) -> (Link, Box<AvlNode>) {
    match node.left.take() {
        None => (node.right.take(), node),
        Some(left) => {
            let (rest, min) = take_min(left);
            node.left = rest;
            (Some(rebalance(node)), min)
        },
    }
}

fn remove(link: Link, key: u64, removed: &mut Option<u64>) -> Link {
    let mut node = link?;
    match key.cmp(&node.key) {
        Ordering::Less => node.left = remove(node.left.take(), key, removed),
        Ordering::Greater => node.right = remove(node.right.take(), key, removed),
        Ordering::Equal => {
            *removed = Some(node.value);
            return match (node.left.take(), node.right.take()) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child)) => Some(child),
                (Some(left), Some(right)) => {
                    let (rest, mut successor) = take_min(right);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(rebalance(successor))
                },
            };
        },
    }
    Some(rebalance(node))
}

/// AVL tree from `u64` to `u64` with floor lookups.
#[derive(Default)]
pub struct AvlTree {
    root: Link,
    len: usize,
}

impl AvlTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts or replaces. Returns whether the key is new.
    pub fn insert(&mut self, key: u64, value: u64) -> bool {
        let mut inserted = false;
        self.root = Some(insert(self.root.take(), key, value, &mut inserted));
        if inserted {
            self.len += 1;
        }
        inserted
    }

    pub fn remove(&mut self, key: u64) -> Option<u64> {
        let mut removed = None;
        self.root = remove(self.root.take(), key, &mut removed);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn get(&self, key: u64) -> Option<u64> {
        let mut current = &self.root;
        while let Some(node) = current {
            match key.cmp(&node.key) {
                Ordering::Less => current = &node.left,
                Ordering::Greater => current = &node.right,
                Ordering::Equal => return Some(node.value),
            }
        }
        None
    }

    /// Entry with the largest key `<= key`.
    pub fn floor(&self, key: u64) -> Option<(u64, u64)> {
        let mut current = &self.root;
        let mut best = None;
        while let Some(node) = current {
            if node.key <= key {
                best = Some((node.key, node.value));
                current = &node.right;
            } else {
                current = &node.left;
            }
        }
        best
    }

    /// Entries in key order.
    pub fn entries(&self) -> Vec<(u64, u64)> {
        fn walk(link: &Link, out: &mut Vec<(u64, u64)>) {
            if let Some(node) = link {
                walk(&node.left, out);
                out.push((node.key, node.value));
                walk(&node.right, out);
            }
        }
        let mut out = Vec::with_capacity(self.len);
        walk(&self.root, &mut out);
        out
    }

    pub fn height(&self) -> u8 {
        height(&self.root)
    }
}
