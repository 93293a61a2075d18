// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

/// Chain lookups served from the cache.
pub static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "octopus_mvcache_hits",
        "Number of version chain lookups served from the cache"
    )
    .unwrap()
});

/// Chain lookups that loaded the key from the backing snapshot.
pub static CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "octopus_mvcache_misses",
        "Number of version chain lookups that fell through to the snapshot"
    )
    .unwrap()
});

pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "octopus_mvcache_evictions",
        "Number of version chains evicted from the cache"
    )
    .unwrap()
});

/// Times the cache grew because every resident chain was still in use.
pub static CACHE_GROWTHS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "octopus_mvcache_growths",
        "Number of times the cache capacity was doubled to keep in-use chains resident"
    )
    .unwrap()
});

pub static COLLECTED_CHAINS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "octopus_mvcache_collected_chains",
        "Number of chains trimmed by the last end-of-block garbage collection"
    )
    .unwrap()
});
