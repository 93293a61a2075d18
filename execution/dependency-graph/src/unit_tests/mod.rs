// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{AccessedBy, DagNode, Graph, GraphError};
use claims::{assert_matches, assert_ok, assert_some_eq};
use octopus_types::{rw_set::RwSet, state_key::StateKey, task_id::TaskId, Address};
use proptest::prelude::*;

const EXAMPLE_COSTS: [u64; 10] = [13, 17, 14, 13, 12, 13, 11, 10, 17, 15];
const EXAMPLE_EDGES: [(u64, u64); 15] = [
    (0, 1),
    (0, 2),
    (0, 3),
    (0, 4),
    (0, 5),
    (1, 7),
    (1, 8),
    (2, 6),
    (3, 7),
    (3, 8),
    (4, 8),
    (5, 7),
    (6, 9),
    (7, 9),
    (8, 9),
];

fn example_id(i: u64) -> TaskId {
    TaskId::new(i, 0, 0)
}

fn example_graph() -> Graph<()> {
    let mut graph = Graph::new();
    for (i, cost) in EXAMPLE_COSTS.iter().enumerate() {
        graph.add_vertex(example_id(i as u64), *cost, ()).unwrap();
    }
    for (from, to) in EXAMPLE_EDGES {
        graph.add_edge(example_id(from), example_id(to));
    }
    graph.connect_virtual_vertices();
    graph.compute_ranks().unwrap();
    graph
}

#[derive(Clone, Debug)]
struct Node {
    id: TaskId,
    cost: u64,
    rw_set: RwSet,
}

impl DagNode for Node {
    fn task_id(&self) -> TaskId {
        self.id
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn footprint(&self) -> &RwSet {
        &self.rw_set
    }
}

fn node(index: u32, reads: &[StateKey], writes: &[StateKey]) -> Node {
    let mut rw_set = RwSet::new();
    reads.iter().for_each(|key| rw_set.add_read(*key));
    writes.iter().for_each(|key| rw_set.add_write(*key));
    Node {
        id: TaskId::new(1, index, 0),
        cost: 10,
        rw_set,
    }
}

fn build(nodes: Vec<Node>) -> Graph<Node> {
    let accessed_by: AccessedBy = nodes.iter().map(|n| (n.id, &n.rw_set)).collect();
    Graph::build(nodes, &accessed_by).unwrap()
}

#[test]
fn example_ranks() {
    let graph = example_graph();
    let rank = |i: u64| {
        let vertex = graph.vertex(graph.index_of(&example_id(i)).unwrap());
        (vertex.rank_u, vertex.rank_d)
    };

    assert_eq!(graph.critical_path_len(), 62);
    assert_eq!(rank(0), (62, 0));
    assert_eq!(rank(1), (49, 13));
    assert_eq!(rank(2), (40, 13));
    assert_eq!(rank(6), (26, 27));
    assert_eq!(rank(8), (32, 30));
    assert_eq!(rank(9), (15, 47));
    assert_eq!(graph.vertex(graph.source()).rank_u, 62);
    assert_eq!(graph.vertex(graph.sink()).rank_d, 62);
}

#[test]
fn example_critical_path_bounds_every_vertex() {
    let graph = example_graph();
    let cpl = graph.critical_path_len();
    let on_critical_path: Vec<TaskId> = graph
        .vertices()
        .iter()
        .filter(|vertex| vertex.rank_u + vertex.rank_d == cpl)
        .map(|vertex| vertex.id)
        .collect();

    assert!(graph
        .vertices()
        .iter()
        .all(|vertex| vertex.rank_u + vertex.rank_d <= cpl));
    // 0 -> 1 -> 8 -> 9 costs 13 + 17 + 17 + 15.
    assert_eq!(on_critical_path, vec![
        TaskId::Snapshot,
        TaskId::End,
        example_id(0),
        example_id(1),
        example_id(8),
        example_id(9),
    ]);
}

#[test]
fn example_completion_time_rank() {
    let graph = example_graph();
    let ct = |i: u64| graph.vertex(graph.index_of(&example_id(i)).unwrap()).ct;
    assert_eq!(ct(9), 0);
    assert_eq!(ct(8), 15);
    assert_eq!(ct(1), 32);
    assert_eq!(ct(0), 49);
    assert_eq!(graph.vertex(graph.sink()).ct, 0);
}

#[test]
fn virtual_vertices_bracket_the_block() {
    let graph = example_graph();
    assert!(graph.has_edge(&TaskId::Snapshot, &example_id(0)));
    assert!(graph.has_edge(&example_id(9), &TaskId::End));
    assert!(!graph.has_edge(&TaskId::Snapshot, &example_id(1)));
    assert_eq!(graph.num_tasks(), 10);
    assert_eq!(graph.num_edges(), EXAMPLE_EDGES.len() + 2);
}

#[test]
fn reader_depends_on_closest_earlier_writer() {
    let key = StateKey::balance(Address::repeat_byte(1));
    let graph = build(vec![
        node(0, &[], &[key]),
        node(1, &[], &[key]),
        node(2, &[key], &[]),
        node(3, &[], &[key]),
        node(4, &[key], &[]),
    ]);
    let id = |i| TaskId::new(1, i, 0);

    assert!(graph.has_edge(&id(1), &id(2)));
    assert!(!graph.has_edge(&id(0), &id(2)));
    assert!(graph.has_edge(&id(3), &id(4)));
    assert!(!graph.has_edge(&id(1), &id(4)));
    // Writers do not depend on each other.
    assert!(!graph.has_edge(&id(0), &id(1)));
}

#[test]
fn reader_before_any_writer_has_no_edge() {
    let key = StateKey::nonce(Address::repeat_byte(2));
    let graph = build(vec![node(0, &[key], &[]), node(1, &[], &[key])]);
    assert!(!graph.has_edge(&TaskId::new(1, 1, 0), &TaskId::new(1, 0, 0)));
    assert!(!graph.has_edge(&TaskId::new(1, 0, 0), &TaskId::new(1, 1, 0)));
}

#[test]
fn prize_readers_depend_on_every_earlier_writer() {
    let prize = StateKey::prize();
    let graph = build(vec![
        node(0, &[], &[prize]),
        node(1, &[], &[prize]),
        node(2, &[], &[prize]),
        node(3, &[prize], &[prize]),
    ]);
    let id = |i| TaskId::new(1, i, 0);
    for writer in 0..3 {
        assert!(graph.has_edge(&id(writer), &id(3)));
    }
    assert!(!graph.has_edge(&id(0), &id(1)));
}

#[test]
fn cycles_are_rejected() {
    let mut graph: Graph<()> = Graph::new();
    let (a, b) = (TaskId::new(1, 0, 0), TaskId::new(1, 1, 0));
    graph.add_vertex(a, 1, ()).unwrap();
    graph.add_vertex(b, 1, ()).unwrap();
    graph.add_edge(a, b);
    graph.add_edge(b, a);
    graph.connect_virtual_vertices();
    assert_matches!(graph.compute_ranks(), Err(GraphError::Cycle { .. }));
}

#[test]
fn duplicate_tasks_are_rejected() {
    let mut graph: Graph<()> = Graph::new();
    assert_ok!(graph.add_vertex(TaskId::new(1, 0, 0), 1, ()));
    assert_matches!(
        graph.add_vertex(TaskId::new(1, 0, 0), 1, ()),
        Err(GraphError::DuplicateTask(_))
    );
}

#[test]
fn accessed_by_finds_closest_writer() {
    let key = StateKey::code(Address::repeat_byte(7));
    let nodes = [node(1, &[], &[key]), node(5, &[], &[key]), node(9, &[key], &[])];
    let accessed_by: AccessedBy = nodes.iter().map(|n| (n.id, &n.rw_set)).collect();
    assert_some_eq!(
        accessed_by.closest_writer(&key, TaskId::new(1, 9, 0)),
        TaskId::new(1, 5, 0)
    );
    assert_some_eq!(
        accessed_by.closest_writer(&key, TaskId::new(1, 5, 0)),
        TaskId::new(1, 1, 0)
    );
    assert_eq!(accessed_by.read_keys().count(), 1);
    assert_eq!(accessed_by.num_keys(), 1);

    let other = StateKey::nonce(Address::repeat_byte(8));
    let accessed_by: AccessedBy = [node(1, &[other], &[key]), node(2, &[], &[other])]
        .iter()
        .map(|n| (n.id, &n.rw_set))
        .collect();
    assert_eq!(accessed_by.num_keys(), 2);
    assert_eq!(accessed_by.read_keys().count(), 1);
}

proptest! {
    #[test]
    fn ranks_are_consistent_on_random_footprints(
        accesses in prop::collection::vec(
            (prop::collection::vec(0u8..6, 0..3), prop::collection::vec(0u8..6, 0..3), 1u64..50),
            1..40,
        )
    ) {
        let nodes: Vec<Node> = accesses
            .iter()
            .enumerate()
            .map(|(i, (reads, writes, cost))| {
                let keys = |bytes: &Vec<u8>| -> Vec<StateKey> {
                    bytes.iter().map(|b| StateKey::balance(Address::repeat_byte(*b))).collect()
                };
                let mut n = node(i as u32, &keys(reads), &keys(writes));
                n.cost = *cost;
                n
            })
            .collect();
        let graph = build(nodes);
        let cpl = graph.critical_path_len();

        prop_assert_eq!(graph.vertex(graph.source()).rank_u, cpl);
        for (idx, vertex) in graph.vertices().iter().enumerate() {
            prop_assert!(vertex.rank_u + vertex.rank_d <= cpl);
            for &succ in graph.successors(idx) {
                let succ = graph.vertex(succ);
                prop_assert!(vertex.id < succ.id);
                prop_assert!(succ.rank_d >= vertex.rank_d + vertex.cost);
                prop_assert!(vertex.rank_u >= vertex.cost + succ.rank_u);
            }
        }
    }
}
