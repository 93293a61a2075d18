// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::accessed_by::AccessedBy;
use octopus_types::{rw_set::RwSet, task_id::TaskId};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tracing::debug;

pub type VertexIndex = usize;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency graph has a cycle: only {ordered} of {total} vertices could be ordered")]
    Cycle { ordered: usize, total: usize },
    #[error("task {0} appears twice in the block")]
    DuplicateTask(TaskId),
}

/// What the graph needs to know about a task.
pub trait DagNode {
    fn task_id(&self) -> TaskId;

    /// Estimated execution cost (gas).
    fn cost(&self) -> u64;

    /// Predicted read/write footprint.
    fn footprint(&self) -> &RwSet;
}

impl<N: DagNode> DagNode for Arc<N> {
    fn task_id(&self) -> TaskId {
        self.as_ref().task_id()
    }

    fn cost(&self) -> u64 {
        self.as_ref().cost()
    }

    fn footprint(&self) -> &RwSet {
        self.as_ref().footprint()
    }
}

#[derive(Clone, Debug)]
pub struct Vertex<N> {
    pub id: TaskId,
    pub cost: u64,
    /// `None` for the virtual source and sink.
    pub payload: Option<N>,
    pub in_degree: usize,
    pub out_degree: usize,
    /// Longest path from the source, excluding this vertex.
    pub rank_d: u64,
    /// Longest path to the sink, including this vertex.
    pub rank_u: u64,
    /// Longest path to the sink, excluding this vertex.
    pub ct: u64,
}

impl<N> Vertex<N> {
    fn new(id: TaskId, cost: u64, payload: Option<N>) -> Self {
        Self {
            id,
            cost,
            payload,
            in_degree: 0,
            out_degree: 0,
            rank_d: 0,
            rank_u: 0,
            ct: 0,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.payload.is_none()
    }
}

/// Task DAG of one block with a virtual source (`Snapshot`) and sink (`End`).
///
/// Vertices are addressed by index; `TaskId` lookups go through a value-keyed map.
#[derive(Clone, Debug)]
pub struct Graph<N> {
    vertices: Vec<Vertex<N>>,
    index: HashMap<TaskId, VertexIndex>,
    successors: Vec<Vec<VertexIndex>>,
    predecessors: Vec<Vec<VertexIndex>>,
    edges: HashSet<(VertexIndex, VertexIndex)>,
    source: VertexIndex,
    sink: VertexIndex,
    critical_path_len: u64,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Graph<N> {
    pub fn new() -> Self {
        let mut graph = Self {
            vertices: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            edges: HashSet::new(),
            source: 0,
            sink: 0,
            critical_path_len: 0,
        };
        graph.source = graph.push_vertex(Vertex::new(TaskId::Snapshot, 0, None));
        graph.sink = graph.push_vertex(Vertex::new(TaskId::End, 0, None));
        graph
    }

    fn push_vertex(&mut self, vertex: Vertex<N>) -> VertexIndex {
        let idx = self.vertices.len();
        self.index.insert(vertex.id, idx);
        self.vertices.push(vertex);
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        idx
    }

    pub fn add_vertex(&mut self, id: TaskId, cost: u64, payload: N) -> Result<VertexIndex, GraphError> {
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateTask(id));
        }
        Ok(self.push_vertex(Vertex::new(id, cost, Some(payload))))
    }

    /// Adds `from -> to`. Self loops, duplicates and unknown ids are ignored; returns whether
    /// an edge was added.
    pub fn add_edge(&mut self, from: TaskId, to: TaskId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&from), Some(&to)) => self.add_edge_by_index(from, to),
            _ => false,
        }
    }

    fn add_edge_by_index(&mut self, from: VertexIndex, to: VertexIndex) -> bool {
        if from == to || !self.edges.insert((from, to)) {
            return false;
        }
        self.successors[from].push(to);
        self.predecessors[to].push(from);
        self.vertices[from].out_degree += 1;
        self.vertices[to].in_degree += 1;
        true
    }

    /// Connects every entry vertex from the source and every exit vertex to the sink.
    pub fn connect_virtual_vertices(&mut self) {
        for idx in 0..self.vertices.len() {
            if idx == self.source || idx == self.sink {
                continue;
            }
            if self.vertices[idx].in_degree == 0 {
                self.add_edge_by_index(self.source, idx);
            }
            if self.vertices[idx].out_degree == 0 {
                self.add_edge_by_index(idx, self.sink);
            }
        }
    }

    /// Kahn's algorithm. Fails if some vertex lies on a cycle.
    pub fn topological_order(&self) -> Result<Vec<VertexIndex>, GraphError> {
        let mut in_degree: Vec<usize> = self.vertices.iter().map(|v| v.in_degree).collect();
        let mut ready: VecDeque<VertexIndex> = (0..self.vertices.len())
            .filter(|idx| in_degree[*idx] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());
        while let Some(idx) = ready.pop_front() {
            order.push(idx);
            for &succ in &self.successors[idx] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push_back(succ);
                }
            }
        }
        if order.len() != self.vertices.len() {
            return Err(GraphError::Cycle {
                ordered: order.len(),
                total: self.vertices.len(),
            });
        }
        Ok(order)
    }

    /// Computes downward rank, upward rank, completion-time rank and the critical-path
    /// length.
    pub fn compute_ranks(&mut self) -> Result<(), GraphError> {
        let order = self.topological_order()?;

        for vertex in &mut self.vertices {
            vertex.rank_d = 0;
        }
        for &idx in &order {
            let reach = self.vertices[idx].rank_d + self.vertices[idx].cost;
            for &succ in &self.successors[idx] {
                let succ = &mut self.vertices[succ];
                succ.rank_d = succ.rank_d.max(reach);
            }
        }

        for &idx in order.iter().rev() {
            let (mut rank_u, mut ct) = (0, 0);
            for &succ in &self.successors[idx] {
                let succ = &self.vertices[succ];
                rank_u = rank_u.max(succ.rank_u);
                ct = ct.max(succ.ct + succ.cost);
            }
            let vertex = &mut self.vertices[idx];
            vertex.rank_u = vertex.cost + rank_u;
            vertex.ct = if self.successors[idx].is_empty() {
                vertex.cost
            } else {
                ct
            };
        }

        self.critical_path_len = self
            .vertices
            .iter()
            .map(|vertex| vertex.rank_u + vertex.rank_d)
            .max()
            .unwrap_or(0);
        Ok(())
    }

    pub fn vertex(&self, idx: VertexIndex) -> &Vertex<N> {
        &self.vertices[idx]
    }

    pub fn vertices(&self) -> &[Vertex<N>] {
        &self.vertices
    }

    pub fn index_of(&self, id: &TaskId) -> Option<VertexIndex> {
        self.index.get(id).copied()
    }

    pub fn successors(&self, idx: VertexIndex) -> &[VertexIndex] {
        &self.successors[idx]
    }

    pub fn predecessors(&self, idx: VertexIndex) -> &[VertexIndex] {
        &self.predecessors[idx]
    }

    pub fn source(&self) -> VertexIndex {
        self.source
    }

    pub fn sink(&self) -> VertexIndex {
        self.sink
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of non-virtual vertices.
    pub fn num_tasks(&self) -> usize {
        self.vertices.len() - 2
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn has_edge(&self, from: &TaskId, to: &TaskId) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(from), Some(to)) => self.edges.contains(&(from, to)),
            _ => false,
        }
    }

    pub fn critical_path_len(&self) -> u64 {
        self.critical_path_len
    }

    pub fn total_cost(&self) -> u64 {
        self.vertices.iter().map(|vertex| vertex.cost).sum()
    }
}

impl<N: DagNode> Graph<N> {
    /// Builds the ranked DAG of a block.
    ///
    /// A reader depends on the closest writer ordered before it. The prize key is cumulative,
    /// so its readers depend on every earlier writer.
    pub fn build(mut nodes: Vec<N>, accessed_by: &AccessedBy) -> Result<Self, GraphError> {
        nodes.sort_by_key(|node| node.task_id());
        let mut graph = Graph::new();
        for node in nodes {
            graph.add_vertex(node.task_id(), node.cost(), node)?;
        }

        for (key, accesses) in accessed_by.iter() {
            if accesses.written_by.is_empty() {
                continue;
            }
            for &reader in &accesses.read_by {
                if key.is_prize() {
                    let writers: Vec<TaskId> = accesses.writers_before(reader).copied().collect();
                    for writer in writers {
                        graph.add_edge(writer, reader);
                    }
                } else if let Some(writer) = accesses.closest_writer(reader) {
                    graph.add_edge(writer, reader);
                }
            }
        }

        graph.connect_virtual_vertices();
        graph.compute_ranks()?;
        debug!(
            tasks = graph.num_tasks(),
            edges = graph.num_edges(),
            critical_path = graph.critical_path_len(),
            "built dependency graph"
        );
        Ok(graph)
    }
}
