// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{MvCacheError, Version, VersionCache, VersionChain, VersionStatus};
use claims::{assert_err, assert_matches, assert_none, assert_ok, assert_ok_eq, assert_some_eq};
use octopus_types::{
    block::Withdrawal,
    state_key::StateKey,
    state_value::StateValue,
    state_view::InMemorySnapshot,
    task_id::TaskId,
    Address, U256,
};
use rand::{seq::SliceRandom, thread_rng};
use rayon::prelude::*;
use std::{num::NonZeroUsize, sync::Arc, thread, time::Duration};

fn word(value: u64) -> StateValue {
    StateValue::Word(U256::from(value))
}

fn key(byte: u8) -> StateKey {
    StateKey::balance(Address::repeat_byte(byte))
}

fn id(index: u32) -> TaskId {
    TaskId::new(1, index, 0)
}

fn cache_over(snapshot: Arc<InMemorySnapshot>, capacity: usize) -> VersionCache<Arc<InMemorySnapshot>> {
    VersionCache::new(
        snapshot,
        NonZeroUsize::new(capacity).unwrap(),
        Some(Duration::from_secs(10)),
    )
}

#[test]
fn concurrent_installs_keep_task_order() {
    let chain = VersionChain::new(key(1), word(0));
    let mut indices: Vec<u32> = (0..200).collect();
    indices.shuffle(&mut thread_rng());

    indices
        .par_iter()
        .for_each(|index| assert_ok!(chain.install(Version::pending(key(1), id(*index)))));

    let ids: Vec<TaskId> = chain.versions().iter().map(|version| version.id()).collect();
    assert_eq!(ids, (0..200).map(id).collect::<Vec<_>>());

    // Prev links mirror next links.
    for version in chain.versions() {
        let prev = version.prev().unwrap();
        assert!(prev.id() < version.id());
        assert_eq!(prev.next().unwrap().id(), version.id());
    }
}

#[test]
fn duplicate_install_is_rejected() {
    let chain = VersionChain::new(key(1), word(0));
    assert_ok!(chain.install(Version::pending(key(1), id(3))));
    assert_matches!(
        chain.install(Version::pending(key(1), id(3))),
        Err(MvCacheError::Invariant(_))
    );
    assert_err!(chain.install(Version::pending(key(1), TaskId::Snapshot)));
}

#[test]
fn last_committed_advances_in_task_order() {
    let chain = VersionChain::new(key(2), word(0));
    let mut versions: Vec<Arc<Version>> = (0..64)
        .map(|index| {
            let version = Version::pending(key(2), id(index));
            chain.install(version.clone()).unwrap();
            version
        })
        .collect();
    versions.shuffle(&mut thread_rng());

    versions
        .par_iter()
        .for_each(|version| chain.update(version, word(version.id().index().unwrap() as u64)));

    assert_eq!(chain.last_committed().id(), id(63));
    assert_ok_eq!(chain.last_committed_value(), word(63));
}

#[test]
fn reader_blocks_until_producer_settles() {
    let chain = Arc::new(VersionChain::new(key(3), word(5)));
    let producer = Version::pending(key(3), id(1));
    chain.install(producer.clone()).unwrap();

    let writer = {
        let chain = chain.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            chain.update(&producer, word(42));
        })
    };

    assert_ok_eq!(
        chain.read_at(id(2), Some(Duration::from_secs(10))),
        (id(1), word(42))
    );
    writer.join().unwrap();
}

#[test]
fn visibility_skips_ignored_versions() {
    let chain = VersionChain::new(key(4), word(7));
    let first = Version::pending(key(4), id(1));
    let second = Version::pending(key(4), id(2));
    chain.install(first.clone()).unwrap();
    chain.install(second.clone()).unwrap();

    chain.update(&first, word(8));
    second.settle(VersionStatus::Ignore, None);

    assert_ok_eq!(second.resolve_visible(None), (id(1), word(8)));
    assert_ok_eq!(chain.read_at(id(9), None), (id(1), word(8)));
    assert_none!(second.value());
}

#[test]
fn reader_never_observes_its_own_or_later_writes() {
    let chain = VersionChain::new(key(5), word(0));
    for index in [2, 4, 6] {
        chain
            .install_committed(id(index), word(index as u64))
            .unwrap();
    }

    assert_ok_eq!(chain.read_at(id(4), None), (id(2), word(2)));
    assert_ok_eq!(chain.read_at(id(5), None), (id(4), word(4)));
    assert_ok_eq!(chain.read_at(id(1), None), (TaskId::Snapshot, word(0)));
    assert_ok_eq!(chain.read_at(TaskId::End, None), (id(6), word(6)));
}

#[test]
fn stuck_producer_is_reported_on_timeout() {
    let chain = VersionChain::new(key(6), word(0));
    chain.install(Version::pending(key(6), id(1))).unwrap();

    assert_matches!(
        chain.read_at(id(2), Some(Duration::from_millis(20))),
        Err(MvCacheError::WaitTimeout { producer, .. }) if producer == id(1)
    );
}

#[test]
fn garbage_collection_is_idempotent() {
    let snapshot = Arc::new(InMemorySnapshot::new());
    snapshot.insert(key(1), word(10));
    let cache = cache_over(snapshot.clone(), 16);
    let coinbase = Address::repeat_byte(0xcc);

    let (chain, version) = cache.install_pending(&key(1), id(0)).unwrap();
    cache.commit(&chain, &version, word(11));
    drop(version);

    let end = TaskId::block_end(1);
    assert_ok_eq!(cache.garbage_collection(end, coinbase, &[]), 1);
    let first = (chain.head().id(), chain.head().value(), chain.has_in_flight());
    assert_ok_eq!(cache.garbage_collection(end, coinbase, &[]), 0);
    let second = (chain.head().id(), chain.head().value(), chain.has_in_flight());

    assert_eq!(first, (TaskId::Snapshot, Some(word(11)), false));
    assert_eq!(first, second);
    assert_some_eq!(snapshot.get(&key(1)), word(11));
}

#[test]
fn garbage_collection_keeps_versions_of_later_blocks() {
    let cache = cache_over(Arc::new(InMemorySnapshot::new()), 16);
    let (chain, version) = cache.install_pending(&key(2), TaskId::new(1, 0, 0)).unwrap();
    let (_, later) = cache.install_pending(&key(2), TaskId::new(2, 0, 0)).unwrap();
    cache.commit(&chain, &version, word(3));

    cache
        .garbage_collection(TaskId::block_end(1), Address::zero(), &[])
        .unwrap();

    let remaining: Vec<TaskId> = chain.versions().iter().map(|v| v.id()).collect();
    assert_eq!(remaining, vec![TaskId::new(2, 0, 0)]);
    assert_eq!(later.prev().unwrap().id(), TaskId::Snapshot);
    assert_ok_eq!(chain.read_at(TaskId::new(2, 0, 0), None), (TaskId::Snapshot, word(3)));
}

#[test]
fn installs_after_collection_start_from_the_live_tail() {
    let cache = cache_over(Arc::new(InMemorySnapshot::new()), 16);
    let (chain, version) = cache.install_pending(&key(3), TaskId::new(1, 0, 0)).unwrap();
    assert_ok!(cache.install_pending(&key(3), TaskId::new(2, 4, 0)));
    cache.commit(&chain, &version, word(1));
    cache.install_committed(&key(4), id(0), word(2)).unwrap();
    cache
        .garbage_collection(TaskId::block_end(1), Address::zero(), &[])
        .unwrap();

    for index in [1, 7, 2] {
        assert_ok!(cache.install_pending(&key(3), TaskId::new(2, index, 0)));
    }
    let ids: Vec<TaskId> = chain.versions().iter().map(|version| version.id()).collect();
    let expected: Vec<TaskId> = [1, 2, 4, 7].iter().map(|index| TaskId::new(2, *index, 0)).collect();
    assert_eq!(ids, expected);
    for version in chain.versions() {
        assert_eq!(version.prev().unwrap().next().unwrap().id(), version.id());
    }

    // The collected chain kept nothing, so the next append hangs off the fresh head.
    let (trimmed, _) = cache.install_pending(&key(4), TaskId::new(2, 0, 0)).unwrap();
    let ids: Vec<TaskId> = trimmed.versions().iter().map(|version| version.id()).collect();
    assert_eq!(ids, vec![TaskId::new(2, 0, 0)]);
}

#[test]
fn long_prize_chain_is_collected_on_a_small_stack() {
    const NUM_TASKS: u32 = 100_000;
    let collector = thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(|| {
            let snapshot = Arc::new(InMemorySnapshot::new());
            let coinbase = Address::repeat_byte(0xcc);
            let cache = cache_over(snapshot.clone(), 16);
            for index in 0..NUM_TASKS {
                cache.install_prize_committed(id(index), U256::one()).unwrap();
            }
            cache
                .garbage_collection(TaskId::block_end(1), coinbase, &[])
                .unwrap();
            assert!(cache.prize_chain().versions().is_empty());
            snapshot.get(&StateKey::balance(coinbase))
        })
        .unwrap();
    assert_some_eq!(collector.join().unwrap(), word(NUM_TASKS as u64));
}

#[test]
fn fetch_matches_snapshot_before_and_after_collection() {
    let snapshot = Arc::new(InMemorySnapshot::new());
    snapshot.insert(key(1), word(100));
    let cache = cache_over(snapshot.clone(), 16);

    // Warm fetch and resident fetch agree with the snapshot.
    assert_ok_eq!(cache.fetch(&key(1)), word(100));
    assert_ok_eq!(cache.fetch(&key(1)), word(100));
    assert_ok_eq!(cache.fetch(&key(2)), word(0));

    cache.install_committed(&key(1), id(0), word(101)).unwrap();
    cache
        .garbage_collection(TaskId::block_end(1), Address::zero(), &[])
        .unwrap();
    assert_ok_eq!(cache.fetch(&key(1)), snapshot.get(&key(1)).unwrap());
}

#[test]
fn prize_is_summed_below_reader_and_credited_at_block_end() {
    let snapshot = Arc::new(InMemorySnapshot::new());
    let coinbase = Address::repeat_byte(0xcc);
    snapshot.insert(StateKey::balance(coinbase), word(1_000));
    let cache = cache_over(snapshot.clone(), 16);

    let prizes: Vec<Arc<Version>> = (0..4)
        .map(|index| cache.install_prize_pending(id(index)).unwrap())
        .collect();
    cache.commit_prize(&prizes[0], U256::from(5));
    cache.commit_prize(&prizes[1], U256::from(7));
    cache.ignore(&prizes[2]);

    assert_ok_eq!(cache.fetch_prize(id(2)), U256::from(12));
    assert_ok_eq!(cache.committed_prize_before(id(4)), U256::from(12));
    cache.commit_prize(&prizes[3], U256::from(1));
    assert_ok_eq!(cache.fetch_prize(TaskId::block_end(1)), U256::from(13));

    let withdrawal = Withdrawal {
        address: coinbase,
        amount: U256::from(2),
    };
    cache
        .garbage_collection(TaskId::block_end(1), coinbase, &[withdrawal])
        .unwrap();
    assert_some_eq!(snapshot.get(&StateKey::balance(coinbase)), word(1_015));
    assert!(cache.prize_chain().versions().is_empty());
}

#[test]
fn eviction_skips_chains_in_use() {
    let cache = cache_over(Arc::new(InMemorySnapshot::new()), 2);
    let held = cache.chain(&key(1)).unwrap();
    cache.fetch(&key(2)).unwrap();
    cache.fetch(&key(3)).unwrap();

    // Key 2 was the least recently used chain nobody holds.
    assert_eq!(cache.num_chains(), 2);
    assert!(Arc::ptr_eq(&held, &cache.chain(&key(1)).unwrap()));

    let _also_held = cache.chain(&key(3)).unwrap();
    cache.fetch(&key(4)).unwrap();
    assert_eq!(cache.capacity(), 4);
    assert_eq!(cache.num_chains(), 3);
}

#[test]
fn validate_reports_first_divergent_producer() {
    let cache = cache_over(Arc::new(InMemorySnapshot::new()), 16);
    cache.install_committed(&key(1), id(3), word(1)).unwrap();
    cache.install_committed(&key(2), id(5), word(2)).unwrap();

    let reference: InMemorySnapshot = [(key(1), word(1)), (key(2), word(9))]
        .into_iter()
        .collect();
    assert_ok_eq!(cache.validate(&reference), Some(id(5)));

    let matching: InMemorySnapshot = [(key(1), word(1)), (key(2), word(2))]
        .into_iter()
        .collect();
    assert_ok_eq!(cache.validate(&matching), None);
}
