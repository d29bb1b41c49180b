use std::collections::{HashMap, HashSet};

use jx_common::{activity::ActivityStatus, error::Error};
use petgraph::{
    Direction::{Incoming, Outgoing},
    algo::is_cyclic_directed,
    graph::{DiGraph, NodeIndex},
};
use tracing::warn;

use super::{ResolvedStep, ResolvedWorkflow};

/// Dependency graph of the promote steps of one workflow, keyed by environment.
pub struct WorkflowExecutionGraph {
    /// An edge from step A to step B means A must succeed before B starts.
    graph: DiGraph<ResolvedStep, ()>,

    env_to_node_idx: HashMap<String, NodeIndex>,

    /// Environments of steps nothing depends on.
    sink_nodes: HashSet<String>,

    /// Environments of steps without preconditions.
    source_nodes: HashSet<String>,
}

impl WorkflowExecutionGraph {
    /// Builds the graph, rejecting cyclic workflows with `Error::Configuration`.
    pub fn new(workflow: &ResolvedWorkflow) -> Result<Self, Error> {
        let mut graph = DiGraph::new();
        let mut env_to_node_idx = HashMap::new();
        let mut step_idx_to_node_idx = HashMap::new();

        if workflow.steps.is_empty() {
            warn!(
                "Workflow [{}]: no steps, nothing will be promoted",
                workflow.name
            );
        }

        for step in &workflow.steps {
            let node_idx = graph.add_node(step.clone());
            env_to_node_idx.insert(step.environment.clone(), node_idx);
            step_idx_to_node_idx.insert(step.index, node_idx);
        }

        // predecessors may be declared after the step referring to them
        for step in &workflow.steps {
            let to = step_idx_to_node_idx[&step.index];
            for predecessor in &step.predecessors {
                let from = step_idx_to_node_idx.get(predecessor).ok_or_else(|| {
                    Error::Configuration(format!(
                        "workflow {}: step {} depends on unknown step index {}",
                        workflow.name, step.name, predecessor
                    ))
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(Error::Configuration(format!(
                "workflow {} has cyclic step preconditions",
                workflow.name
            )));
        }

        let mut source_nodes = HashSet::new();
        let mut sink_nodes = HashSet::new();

        for (env, node_idx) in &env_to_node_idx {
            if graph.neighbors_directed(*node_idx, Incoming).count() == 0 {
                source_nodes.insert(env.clone());
            }
            if graph.neighbors_directed(*node_idx, Outgoing).count() == 0 {
                sink_nodes.insert(env.clone());
            }
        }

        Ok(Self {
            graph,
            env_to_node_idx,
            sink_nodes,
            source_nodes,
        })
    }

    /// All steps in declaration order.
    pub fn steps(&self) -> Vec<&ResolvedStep> {
        let mut steps: Vec<&ResolvedStep> = self.graph.node_weights().collect();
        steps.sort_by_key(|s| s.index);
        steps
    }

    pub fn get_source_environments(&self) -> &HashSet<String> {
        &self.source_nodes
    }

    pub fn get_sink_environments(&self) -> &HashSet<String> {
        &self.sink_nodes
    }

    /// Steps that have not started and whose predecessors all succeeded.
    /// ---
    /// Steps missing from `statuses` count as `New`. The result is in
    /// declaration order.
    pub fn get_ready_steps(
        &self,
        statuses: &HashMap<String, ActivityStatus>,
    ) -> Vec<&ResolvedStep> {
        let status_of = |env: &str| statuses.get(env).copied().unwrap_or_default();
        let mut ready = Vec::new();

        for node_idx in self.graph.node_indices() {
            let step = &self.graph[node_idx];
            if status_of(&step.environment) != ActivityStatus::New {
                continue;
            }

            let dependencies_met = self
                .graph
                .neighbors_directed(node_idx, Incoming)
                .all(|pred| status_of(&self.graph[pred].environment) == ActivityStatus::Succeeded);

            if dependencies_met {
                ready.push(step);
            }
        }

        ready.sort_by_key(|s| s.index);
        ready
    }

    /// Decides whether the workflow has finished.
    /// ---
    /// * `Some(Failed)` as soon as any step failed or was aborted.
    /// * `Some(Succeeded)` when every sink step succeeded, or there are no steps.
    /// * `None` while the workflow can still make progress.
    pub fn is_workflow_complete(
        &self,
        statuses: &HashMap<String, ActivityStatus>,
    ) -> Option<ActivityStatus> {
        if self.graph.node_count() == 0 {
            return Some(ActivityStatus::Succeeded);
        }

        let status_of = |env: &str| statuses.get(env).copied().unwrap_or_default();

        let any_failed = self.env_to_node_idx.keys().any(|env| {
            matches!(
                status_of(env),
                ActivityStatus::Failed | ActivityStatus::Aborted
            )
        });
        if any_failed {
            return Some(ActivityStatus::Failed);
        }

        if self
            .sink_nodes
            .iter()
            .all(|env| status_of(env) == ActivityStatus::Succeeded)
        {
            return Some(ActivityStatus::Succeeded);
        }

        None
    }
}
