//! Dependency graph over the steps of one workflow.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use crate::template::{StepTemplate, TemplateError};

/// Directed acyclic graph over step codes. Edges point from a dependency
/// to its dependents.
#[derive(Debug, Clone)]
pub struct TemplateDag {
    graph: DiGraph<String, ()>,
    code_to_node: HashMap<String, NodeIndex>,
    node_to_code: HashMap<NodeIndex, String>,
    dependencies: HashMap<String, HashSet<String>>,
    topo: Vec<String>,
}

impl TemplateDag {
    /// Build and validate the graph. Duplicate codes, references to
    /// unknown codes and cycles are rejected.
    pub fn build<'a, I>(steps: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = &'a StepTemplate>,
    {
        let steps: Vec<&StepTemplate> = steps.into_iter().collect();
        if steps.is_empty() {
            return Err(TemplateError::EmptyTemplate);
        }

        let mut graph = DiGraph::new();
        let mut code_to_node = HashMap::new();
        let mut node_to_code = HashMap::new();
        let mut dependencies = HashMap::new();

        for step in &steps {
            if code_to_node.contains_key(&step.code) {
                return Err(TemplateError::DuplicateStep(step.code.clone()));
            }
            let node = graph.add_node(step.code.clone());
            code_to_node.insert(step.code.clone(), node);
            node_to_code.insert(node, step.code.clone());
            dependencies.insert(step.code.clone(), step.dependencies.clone());
        }

        for step in &steps {
            let to_node = code_to_node[&step.code];
            for dep in &step.dependencies {
                let from_node =
                    code_to_node
                        .get(dep)
                        .ok_or_else(|| TemplateError::UnknownDependency {
                            step: step.code.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(*from_node, to_node, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            let cycle = find_cycle(&graph, &node_to_code);
            return Err(TemplateError::CycleDetected(cycle));
        }

        // Safe after the cycle check; computed here so later reads never
        // have a failure path.
        let topo = petgraph::algo::toposort(&graph, None)
            .map_err(|_| TemplateError::CycleDetected("unknown".to_string()))?
            .into_iter()
            .map(|n| node_to_code[&n].clone())
            .collect();

        Ok(Self {
            graph,
            code_to_node,
            node_to_code,
            dependencies,
            topo,
        })
    }

    pub fn len(&self) -> usize {
        self.code_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_to_node.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.code_to_node.contains_key(code)
    }

    /// Step codes in dependency order.
    pub fn topo_codes(&self) -> &[String] {
        &self.topo
    }

    /// Codes whose dependencies are all in `completed` and which are not
    /// themselves completed.
    pub fn ready_codes(&self, completed: &HashSet<String>) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|(code, deps)| {
                !completed.contains(*code) && deps.iter().all(|d| completed.contains(d))
            })
            .map(|(code, _)| code.clone())
            .collect()
    }

    pub fn dependencies_of(&self, code: &str) -> HashSet<String> {
        self.dependencies.get(code).cloned().unwrap_or_default()
    }

    /// Codes that directly depend on `code`.
    pub fn dependents_of(&self, code: &str) -> Vec<String> {
        let Some(node) = self.code_to_node.get(code) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(*node, Direction::Outgoing)
            .map(|n| self.node_to_code[&n].clone())
            .collect()
    }

    /// Start offset of each step in minutes: the length of its longest
    /// prerequisite chain, weighted by the given per-step estimates.
    pub fn start_offsets(&self, estimates: &HashMap<String, u32>) -> HashMap<String, u32> {
        let mut offsets: HashMap<String, u32> = HashMap::new();

        for code in &self.topo {
            let offset = self
                .dependencies_of(code)
                .iter()
                .map(|dep| {
                    offsets.get(dep).copied().unwrap_or(0)
                        + estimates.get(dep).copied().unwrap_or(0)
                })
                .max()
                .unwrap_or(0);
            offsets.insert(code.clone(), offset);
        }

        offsets
    }
}

/// Reconstruct one cycle for the error message.
fn find_cycle(graph: &DiGraph<String, ()>, node_to_code: &HashMap<NodeIndex, String>) -> String {
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();

    for node in graph.node_indices() {
        if let Some(mut cycle) = cycle_from(graph, node, &mut visited, &mut stack) {
            cycle.reverse();
            return cycle
                .iter()
                .map(|n| node_to_code[n].clone())
                .collect::<Vec<_>>()
                .join(" -> ");
        }
    }

    "unknown".to_string()
}

fn cycle_from(
    graph: &DiGraph<String, ()>,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    stack: &mut HashSet<NodeIndex>,
) -> Option<Vec<NodeIndex>> {
    if stack.contains(&node) {
        return Some(vec![node]);
    }
    if visited.contains(&node) {
        return None;
    }

    visited.insert(node);
    stack.insert(node);

    for neighbor in graph.neighbors_directed(node, Direction::Outgoing) {
        if let Some(mut cycle) = cycle_from(graph, neighbor, visited, stack) {
            cycle.push(node);
            return Some(cycle);
        }
    }

    stack.remove(&node);
    None
}
