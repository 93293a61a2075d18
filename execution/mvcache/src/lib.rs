// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Multi-version store used by workers to read and publish values during parallel execution.
//!
//! Every key owns a [`VersionChain`](version_chain::VersionChain): a doubly-linked list of
//! [`Version`](version::Version)s in strictly increasing `TaskId` order, starting at a head
//! that holds the snapshot value. Producers install pending placeholders ahead of execution;
//! consumers block on a placeholder until its producer settles it. The
//! [`VersionCache`](version_cache::VersionCache) bounds the number of resident chains and
//! writes committed values back to the backing snapshot.

mod counters;
pub mod types;
pub mod version;
pub mod version_cache;
pub mod version_chain;

#[cfg(test)]
mod unit_tests;

pub use types::MvCacheError;
pub use version::{Version, VersionStatus};
pub use version_cache::VersionCache;
pub use version_chain::VersionChain;
