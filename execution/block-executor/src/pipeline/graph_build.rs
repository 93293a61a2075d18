// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use super::messages::{GraphBuildInput, GraphMessage};
use crate::errors::BlockExecutionResult;
use octopus_dependency_graph::Graph;
use octopus_mvcache::Version;
use octopus_types::{error::code_invariant_error, state_key::StateKey, task_id::TaskId};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Binds every predicted read to the placeholder of its closest earlier writer in the block,
/// then builds the ranked dependency DAG.
pub fn build_graph<T>(input: GraphBuildInput<T>) -> BlockExecutionResult<GraphMessage<T>> {
    let GraphBuildInput {
        header,
        mut tasks,
        accessed_by,
        withdrawals,
    } = input;
    if let Some(task) = tasks.iter().find(|task| !task.is_prefetched()) {
        return Err(code_invariant_error(format!(
            "task {} reached graph building without its write placeholders",
            task.id()
        ))
        .into());
    }

    let positions: HashMap<TaskId, usize> = tasks
        .iter()
        .enumerate()
        .map(|(position, task)| (task.id(), position))
        .collect();
    let mut bindings: Vec<(usize, StateKey, Arc<Version>)> = Vec::new();
    for (position, task) in tasks.iter().enumerate() {
        for key in task.footprint().reads().filter(|key| !key.is_prize()) {
            let writer = accessed_by
                .closest_writer(key, task.id())
                .and_then(|writer| positions.get(&writer))
                .and_then(|&writer| tasks[writer].write_version(key));
            if let Some((_, version)) = writer {
                bindings.push((position, *key, version.clone()));
            }
        }
    }
    for (position, key, version) in bindings {
        tasks[position].set_read_version(key, version);
    }

    let nodes = tasks.into_iter().map(Arc::new).collect();
    let graph = Graph::build(nodes, &accessed_by)?;
    debug!(
        block = header.number,
        tasks = graph.num_tasks(),
        keys = accessed_by.num_keys(),
        critical_path = graph.critical_path_len(),
        "built dependency graph"
    );
    Ok(GraphMessage {
        header,
        graph,
        withdrawals,
    })
}
