// Batcher
// Groups the futures still to run into dependency levels

use crate::execution::graph::{DeploymentGraph, GraphError};
use crate::state::FutureId;

use std::collections::{BTreeSet, HashMap};

pub struct Batcher;

impl Batcher {
    /// Level the futures that are not completed yet.
    ///
    /// A future's batch is one past the highest batch of its dependencies;
    /// completed futures are left out and place no constraint. Ids inside a
    /// batch are sorted.
    pub fn batch(
        graph: &DeploymentGraph,
        completed: &BTreeSet<FutureId>,
    ) -> Result<Vec<Vec<FutureId>>, GraphError> {
        let order = graph.topological_order();
        if order.len() != graph.len() {
            return Err(GraphError::cyclic(
                "cannot batch a graph with circular dependencies",
            ));
        }

        let mut levels: Vec<Vec<FutureId>> = Vec::new();
        let mut assigned: HashMap<&str, usize> = HashMap::new();

        for future in order {
            if completed.contains(&future.id) {
                continue;
            }

            let level = future
                .dependencies
                .iter()
                .filter_map(|dep| assigned.get(dep.as_str()))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(future.id.as_str(), level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(future.id.clone());
        }

        for level in &mut levels {
            level.sort();
        }

        Ok(levels)
    }
}
