// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::action::Action;
use crate::dag::ActionName;
use crate::errors::{DagcronError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct GraphNode {
    /// Actions that must succeed before this one can start.
    deps: Vec<ActionName>,
    /// Actions that list this one in their `required_actions`.
    dependents: Vec<ActionName>,
}

/// Dependency graph of a job's actions, checked for cycles on construction.
#[derive(Debug, Clone)]
pub struct ActionGraph {
    nodes: HashMap<ActionName, GraphNode>,
    topo_order: Vec<ActionName>,
}

impl ActionGraph {
    /// Build the graph for `job`, rejecting unknown or cyclic requirements.
    pub fn build(job: &str, actions: &[Action]) -> Result<Self> {
        let mut nodes: HashMap<ActionName, GraphNode> = HashMap::new();

        for action in actions {
            if nodes.contains_key(&action.name) {
                return Err(DagcronError::ConfigError(format!(
                    "job '{}' defines action '{}' more than once",
                    job, action.name
                )));
            }
            nodes.insert(
                action.name.clone(),
                GraphNode {
                    deps: action.required_actions.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for action in actions {
            for dep in &action.required_actions {
                if dep == &action.name {
                    return Err(DagcronError::DependencyDeadlock(format!(
                        "action '{}' in job '{}' requires itself",
                        action.name, job
                    )));
                }
                match nodes.get_mut(dep) {
                    Some(dep_node) => dep_node.dependents.push(action.name.clone()),
                    None => {
                        return Err(DagcronError::ConfigError(format!(
                            "action '{}' in job '{}' requires unknown action '{}'",
                            action.name, job, dep
                        )));
                    }
                }
            }
        }

        // Edge direction: dep -> action.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for action in actions {
            graph.add_node(action.name.as_str());
        }
        for action in actions {
            for dep in &action.required_actions {
                graph.add_edge(dep.as_str(), action.name.as_str(), ());
            }
        }

        let topo_order = match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(str::to_string).collect(),
            Err(cycle) => {
                return Err(DagcronError::DependencyDeadlock(format!(
                    "cycle detected in job '{}' involving action '{}'",
                    job,
                    cycle.node_id()
                )));
            }
        };

        Ok(Self { nodes, topo_order })
    }

    /// Action names in a valid dependency order.
    pub fn topo_order(&self) -> &[ActionName] {
        &self.topo_order
    }

    pub fn dependencies_of(&self, name: &str) -> &[ActionName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[ActionName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
