// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0


use self::mock::{
    address, batch, batch_with_withdrawals, coinbase, funded_snapshot, random_txns, word, MockTxn,
    MockVm, Reference,
};
use crate::{
    errors::BlockExecutionError,
    executor::{BlockExecutor, DeferReason, TaskStatus},
    pipeline::{graph_build::build_graph, messages::GraphBuildInput},
    task::Access,
};
use claims::{assert_matches, assert_ok, assert_ok_eq};
use octopus_config::config::{AbortMode, ExecutionConfig, SchedulePolicy};
use octopus_dependency_graph::AccessedBy;
use octopus_mvcache::{MvCacheError, VersionCache, VersionStatus};
use octopus_types::{
    block::Withdrawal,
    state_key::StateKey,
    state_value::StateValue,
    state_view::{InMemorySnapshot, StateSnapshot},
    task_id::TaskId,
    H256, U256,
};
use proptest::{collection::vec, prelude::*};
use std::{num::NonZeroUsize, sync::Arc};
use test_case::test_case;

type TestExecutor = BlockExecutor<MockVm, Arc<InMemorySnapshot>>;

pub(crate) fn test_config(
    num_workers: usize,
    schedule_policy: SchedulePolicy,
    abort_mode: AbortMode,
) -> ExecutionConfig {
    ExecutionConfig {
        num_workers,
        schedule_policy,
        tree_processor_threshold: 1000,
        abort_mode,
        cache_capacity: 4096,
        prefetch_threads: 2,
        channel_capacity: 2,
        read_timeout_ms: Some(60_000),
    }
}

pub(crate) fn cache_over(
    snapshot: &Arc<InMemorySnapshot>,
    config: &ExecutionConfig,
) -> Arc<VersionCache<Arc<InMemorySnapshot>>> {
    Arc::new(VersionCache::new(
        snapshot.clone(),
        NonZeroUsize::new(config.cache_capacity).unwrap(),
        config.read_timeout(),
    ))
}

fn executor_over(snapshot: &Arc<InMemorySnapshot>, config: &ExecutionConfig) -> TestExecutor {
    BlockExecutor::new(config, Arc::new(MockVm), cache_over(snapshot, config)).unwrap()
}

fn slot(index: u64) -> H256 {
    H256::from_low_u64_be(index)
}

fn storage(index: u64) -> StateKey {
    StateKey::storage(address(0xaa), slot(index))
}

fn transfer(from: u8, to: u8, amount: u64, fee: u64) -> MockTxn {
    MockTxn::Transfer {
        from: address(from),
        to: address(to),
        amount,
        fee,
    }
}

fn increment(sender: u8, index: u64, delta: u64) -> MockTxn {
    MockTxn::Increment {
        sender: address(sender),
        address: address(0xaa),
        slot: slot(index),
        delta,
        fee: 1,
    }
}

fn hidden(sender: u8, index: u64) -> MockTxn {
    MockTxn::Hidden {
        sender: address(sender),
        address: address(0xaa),
        slot: slot(index),
        fee: 1,
    }
}

#[test_case(1, SchedulePolicy::Heft, 1000; "one worker")]
#[test_case(4, SchedulePolicy::Heft, 1000; "heft on list processors")]
#[test_case(4, SchedulePolicy::Heft, 0; "heft on tree processors")]
#[test_case(4, SchedulePolicy::Ct, 1000; "ct")]
#[test_case(4, SchedulePolicy::Cptl, 0; "cptl")]
#[test_case(4, SchedulePolicy::Cpop, 1000; "cpop")]
#[test_case(3, SchedulePolicy::Hesi, 1000; "hesi")]
#[test_case(3, SchedulePolicy::Loba, 1000; "loba")]
#[test_case(8, SchedulePolicy::Aggregate, 1000; "aggregate")]
fn parallel_block_matches_serial_reference(
    num_workers: usize,
    policy: SchedulePolicy,
    tree_processor_threshold: usize,
) {
    let snapshot = Arc::new(funded_snapshot(20, 1_000_000));
    // The coinbase sends transfers too.
    snapshot.insert(StateKey::balance(coinbase()), word(1_000_000));
    let mut reference = Reference::new(&snapshot);
    let mut config = test_config(num_workers, policy, AbortMode::EarlyAbort);
    config.tree_processor_threshold = tree_processor_threshold;
    let executor = executor_over(&snapshot, &config);

    let txns = random_txns(7, 200, 20);
    let outcome = executor.execute_block(batch(1, txns.clone())).unwrap();

    assert_eq!(outcome.block, 1);
    assert_eq!(outcome.outcomes.len(), txns.len());
    assert_eq!(outcome.num_deferred(), 0);
    assert!(outcome
        .outcomes
        .iter()
        .all(|task| task.status == TaskStatus::Committed));
    if policy != SchedulePolicy::Aggregate {
        assert_eq!(outcome.policy, Some(policy));
    }
    // Every committed transaction stayed inside its footprint.
    for task in &outcome.outcomes {
        let index = task.id.index().unwrap() as usize;
        let predicted = crate::task::FootprintPredictor::predict(
            &mock::MockPredictor,
            &txns[index],
            coinbase(),
        );
        assert!(predicted.covers(&task.actual), "{} left its footprint", task.id);
    }

    reference.apply_block(&txns, &outcome, &[]);
    reference.assert_state_eq(&snapshot);
    assert_ok_eq!(executor.cache().validate(&snapshot), None);
}

#[test_case(AbortMode::EarlyAbort; "early abort")]
#[test_case(AbortMode::Tolerant; "tolerant")]
fn mispredicted_tasks_replay_after_the_wave(abort_mode: AbortMode) {
    let snapshot = Arc::new(funded_snapshot(8, 1_000));
    let mut reference = Reference::new(&snapshot);
    let executor = executor_over(&snapshot, &test_config(3, SchedulePolicy::Heft, abort_mode));

    let txns = vec![
        increment(1, 0, 10),
        hidden(2, 0),
        transfer(3, 4, 50, 2),
        increment(5, 0, 100),
        hidden(6, 1),
        transfer(4, 3, 25, 2),
    ];
    let outcome = executor.execute_block(batch(1, txns.clone())).unwrap();

    assert_eq!(outcome.num_deferred(), 2);
    let replayed = &outcome.outcomes[1];
    assert_eq!(replayed.status, TaskStatus::Replayed {
        id: TaskId::new(1, 1, 1),
        reason: DeferReason::Misprediction {
            key: storage(0),
            access: Access::Read,
        },
    });
    assert!(replayed.actual.has_write(&storage(0)));
    assert_matches!(outcome.outcomes[4].status, TaskStatus::Replayed { id, .. } if id == TaskId::new(1, 4, 1));
    for index in [0, 2, 3, 5] {
        assert_eq!(outcome.outcomes[index].status, TaskStatus::Committed);
    }

    // Replays are serialized after every first-incarnation task.
    let order: Vec<TaskId> = outcome
        .serialization_order()
        .iter()
        .map(|task| task.final_id())
        .collect();
    assert_eq!(order, vec![
        TaskId::new(1, 0, 0),
        TaskId::new(1, 2, 0),
        TaskId::new(1, 3, 0),
        TaskId::new(1, 5, 0),
        TaskId::new(1, 1, 1),
        TaskId::new(1, 4, 1),
    ]);

    reference.apply_block(&txns, &outcome, &[]);
    reference.assert_state_eq(&snapshot);
    assert_eq!(snapshot.get(&storage(0)), Some(word(111)));
    assert_eq!(snapshot.get(&storage(1)), Some(word(1)));
}

#[test]
fn vm_aborts_are_replayed_and_fail_again() {
    let snapshot = Arc::new(funded_snapshot(4, 100));
    let mut reference = Reference::new(&snapshot);
    let executor = executor_over(
        &snapshot,
        &test_config(2, SchedulePolicy::Cpop, AbortMode::EarlyAbort),
    );

    let txns = vec![
        transfer(1, 2, 10, 1),
        MockTxn::Fail {
            sender: address(3),
        },
        // Insufficient balance.
        transfer(4, 1, 500, 1),
        transfer(2, 4, 105, 1),
    ];
    let outcome = executor.execute_block(batch(1, txns.clone())).unwrap();

    assert_eq!(outcome.outcomes[0].status, TaskStatus::Committed);
    assert_eq!(outcome.outcomes[1].status, TaskStatus::ReplayFailed {
        id: TaskId::new(1, 1, 1),
        reason: DeferReason::VmAbort,
    });
    assert_eq!(outcome.outcomes[1].gas_used, 0);
    assert_matches!(outcome.outcomes[2].status, TaskStatus::ReplayFailed { .. });
    assert_eq!(outcome.outcomes[3].status, TaskStatus::Committed);
    assert_eq!(outcome.gas_used, 42);

    reference.apply_block(&txns, &outcome, &[]);
    reference.assert_state_eq(&snapshot);
    // A failed transaction leaves no trace, not even its nonce.
    assert_ok_eq!(
        snapshot.get_or_default(&StateKey::nonce(address(3))),
        StateValue::Nonce(0)
    );
    assert_eq!(snapshot.get(&StateKey::balance(address(4))), Some(word(205)));
}

#[test]
fn coinbase_accrues_fees_and_withdrawals() {
    let snapshot = Arc::new(funded_snapshot(5, 1_000));
    let executor = executor_over(
        &snapshot,
        &test_config(4, SchedulePolicy::Heft, AbortMode::EarlyAbort),
    );

    let txns = vec![
        transfer(1, 2, 10, 5),
        MockTxn::Transfer {
            from: address(2),
            to: coinbase(),
            amount: 20,
            fee: 3,
        },
        // Sees 20 received plus the 8 in fees accrued so far.
        MockTxn::Transfer {
            from: coinbase(),
            to: address(3),
            amount: 15,
            fee: 2,
        },
        transfer(4, 5, 1, 7),
    ];
    let withdrawals = vec![
        Withdrawal {
            address: coinbase(),
            amount: U256::from(100),
        },
        Withdrawal {
            address: address(1),
            amount: U256::from(1),
        },
    ];
    let outcome = executor
        .execute_block(batch_with_withdrawals(1, txns.clone(), withdrawals.clone()))
        .unwrap();
    assert_eq!(outcome.num_deferred(), 0);

    let balance = |byte| snapshot.get(&StateKey::balance(byte));
    assert_eq!(balance(coinbase()), Some(word(28 - 17 + 2 + 7 + 100)));
    assert_eq!(balance(address(1)), Some(word(1_000 - 15 + 1)));
    assert_eq!(balance(address(3)), Some(word(1_015)));

    let mut reference = Reference::new(&funded_snapshot(5, 1_000));
    reference.apply_block(&txns, &outcome, &withdrawals);
    reference.assert_state_eq(&snapshot);
}

#[test]
fn sequential_execution_matches_reference() {
    let snapshot = Arc::new(funded_snapshot(6, 1_000));
    let mut reference = Reference::new(&snapshot);
    let executor = executor_over(
        &snapshot,
        &test_config(2, SchedulePolicy::Heft, AbortMode::EarlyAbort),
    );

    let txns = vec![
        increment(1, 0, 4),
        hidden(2, 0),
        MockTxn::Fail {
            sender: address(3),
        },
        transfer(4, 5, 999, 1),
        transfer(5, 6, 1_500, 1),
    ];
    let outcome = executor
        .execute_block_sequential(batch(3, txns.clone()))
        .unwrap();

    assert_eq!(outcome.policy, None);
    let statuses: Vec<TaskStatus> = outcome.outcomes.iter().map(|task| task.status).collect();
    assert_eq!(statuses, vec![
        TaskStatus::Committed,
        TaskStatus::Committed,
        TaskStatus::Failed,
        TaskStatus::Committed,
        TaskStatus::Committed,
    ]);
    for txn in &txns {
        reference.apply(txn);
    }
    reference.assert_state_eq(&snapshot);
    assert_eq!(snapshot.get(&storage(0)), Some(word(5)));
}

#[test]
fn consecutive_blocks_share_the_cache() {
    let snapshot = Arc::new(funded_snapshot(12, 10_000));
    let mut reference = Reference::new(&snapshot);
    let executor = executor_over(
        &snapshot,
        &test_config(4, SchedulePolicy::Aggregate, AbortMode::Tolerant),
    );

    for number in 1..=3 {
        let mut txns = random_txns(number, 60, 12);
        txns.push(hidden(1, number));
        let outcome = executor.execute_block(batch(number, txns.clone())).unwrap();
        assert_eq!(outcome.block, number);
        reference.apply_block(&txns, &outcome, &[]);
    }
    reference.assert_state_eq(&snapshot);
    assert_ok_eq!(executor.cache().validate(&snapshot), None);
}

#[test]
fn empty_block_only_finalizes() {
    let snapshot = Arc::new(funded_snapshot(2, 10));
    let executor = executor_over(
        &snapshot,
        &test_config(2, SchedulePolicy::Heft, AbortMode::EarlyAbort),
    );
    let withdrawals = vec![Withdrawal {
        address: address(2),
        amount: U256::from(5),
    }];

    let outcome = assert_ok!(executor.execute_block(batch_with_withdrawals(1, vec![], withdrawals)));
    assert!(outcome.outcomes.is_empty());
    assert_eq!(outcome.makespan, 0);
    assert_eq!(
        snapshot.get(&StateKey::balance(address(2))),
        Some(StateValue::Word(U256::from(15)))
    );
}

#[test]
fn fatal_error_settles_every_placeholder_and_fails_the_block() {
    let snapshot = Arc::new(funded_snapshot(8, 1_000));
    snapshot.insert(StateKey::balance(coinbase()), word(1_000));
    let mut config = test_config(3, SchedulePolicy::Heft, AbortMode::EarlyAbort);
    config.read_timeout_ms = None;
    let executor = executor_over(&snapshot, &config);

    // Every later task reads the nonce or the prize written by the first one.
    let mut txns = vec![
        MockTxn::Corrupt {
            sender: address(1),
        },
        transfer(1, 2, 10, 1),
    ];
    for sender in 2..=8 {
        txns.push(MockTxn::Transfer {
            from: address(sender),
            to: coinbase(),
            amount: 5,
            fee: 1,
        });
    }
    let error = executor.execute_block(batch(1, txns)).unwrap_err();
    assert_matches!(
        error,
        BlockExecutionError::CacheError(MvCacheError::Invariant(_))
    );

    let cache = executor.cache();
    let mut keys = vec![StateKey::balance(coinbase())];
    for byte in 1..=8 {
        keys.push(StateKey::nonce(address(byte)));
        keys.push(StateKey::balance(address(byte)));
    }
    let versions = keys
        .iter()
        .flat_map(|key| cache.chain(key).unwrap().versions())
        .chain(cache.prize_chain().versions());
    for version in versions {
        assert_ne!(version.status(), VersionStatus::Pending, "{:?} left pending", version);
    }
    // The block never reached finalization.
    assert_eq!(snapshot.get(&StateKey::balance(address(2))), Some(word(1_000)));
    assert_eq!(snapshot.get(&StateKey::nonce(address(1))), None);
}

#[test]
fn graph_building_rejects_tasks_without_placeholders() {
    let unprefetched = batch(1, vec![transfer(1, 2, 1, 1)]);
    let accessed_by: AccessedBy = unprefetched
        .tasks
        .iter()
        .map(|task| (task.id(), task.footprint()))
        .collect();
    let input = GraphBuildInput {
        header: unprefetched.header,
        tasks: unprefetched.tasks,
        accessed_by,
        withdrawals: vec![],
    };
    assert_matches!(
        build_graph(input).err(),
        Some(BlockExecutionError::FatalBlockExecutorError(_))
    );
}

fn faulty_txn(kind: u8, sender: u8, index: u64) -> MockTxn {
    match kind {
        0 => MockTxn::Fail {
            sender: address(sender),
        },
        _ => hidden(sender, index),
    }
}

fn is_faulty(txn: &MockTxn) -> bool {
    matches!(txn, MockTxn::Hidden { .. } | MockTxn::Fail { .. })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_blocks_with_faults_match_serial_reference(
        seed in any::<u64>(),
        faults in vec((0usize..60, 0u8..3, 1u8..=12, 0u64..4), 1..12),
        policy in prop_oneof![
            Just(SchedulePolicy::Heft),
            Just(SchedulePolicy::Ct),
            Just(SchedulePolicy::Cptl),
            Just(SchedulePolicy::Cpop),
            Just(SchedulePolicy::Loba),
            Just(SchedulePolicy::Aggregate),
        ],
        abort_mode in prop_oneof![Just(AbortMode::EarlyAbort), Just(AbortMode::Tolerant)],
        tree_processor_threshold in prop_oneof![Just(0usize), Just(1000usize)],
    ) {
        let snapshot = Arc::new(funded_snapshot(12, 10_000));
        snapshot.insert(StateKey::balance(coinbase()), word(10_000));
        let mut reference = Reference::new(&snapshot);
        let mut config = test_config(4, policy, abort_mode);
        config.tree_processor_threshold = tree_processor_threshold;
        let executor = executor_over(&snapshot, &config);

        let mut txns = random_txns(seed, 60, 12);
        for (position, kind, sender, index) in faults {
            let position = position.min(txns.len());
            txns.insert(position, faulty_txn(kind, sender, index));
        }
        let outcome = executor.execute_block(batch(1, txns.clone())).unwrap();

        prop_assert_eq!(outcome.outcomes.len(), txns.len());
        let num_faulty = txns.iter().filter(|txn| is_faulty(txn)).count();
        prop_assert!(outcome.num_deferred() >= num_faulty);
        for (txn, task) in txns.iter().zip(&outcome.outcomes) {
            if is_faulty(txn) {
                prop_assert!(task.status != TaskStatus::Committed, "{} committed", task.id);
            }
        }

        reference.apply_block(&txns, &outcome, &[]);
        reference.assert_state_eq(&snapshot);
        prop_assert_eq!(executor.cache().validate(&snapshot).unwrap(), None);
    }
}
