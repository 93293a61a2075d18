// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod accessed_by;
pub mod graph;

#[cfg(test)]
mod unit_tests;

pub use accessed_by::{AccessedBy, KeyAccesses};
pub use graph::{DagNode, Graph, GraphError, Vertex, VertexIndex};
