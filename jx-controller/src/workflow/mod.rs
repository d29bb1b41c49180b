use std::collections::{BTreeSet, HashMap};

use jx_common::{
    common::poll::{RetryPolicy, retry_with_backoff},
    environment::{Environment, PromotionStrategy, sort_environments},
    error::Error,
    state::KubeClient,
    workflow::{
        DEFAULT_WORKFLOW_NAME, StepRef, Workflow, WorkflowStep, create_workflow,
        create_workflow_promote_step,
    },
};
use tracing::{debug, warn};

mod execution_graph;

pub use execution_graph::WorkflowExecutionGraph;

/// One promote step with its predecessors resolved to step indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedStep {
    pub index: usize,
    pub name: String,
    pub environment: String,
    /// Indices of the steps that must succeed first, ascending.
    pub predecessors: Vec<usize>,
    /// Set on the step, or shares its predecessor set with another step.
    pub parallel: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedWorkflow {
    pub name: String,
    pub steps: Vec<ResolvedStep>,
    /// Built from the environments because no resource of that name exists.
    pub synthesized: bool,
}

impl ResolvedWorkflow {
    /// Environments of the direct predecessors of `step`.
    pub fn predecessor_environments(&self, step: &ResolvedStep) -> Vec<&str> {
        step.predecessors
            .iter()
            .filter_map(|idx| self.steps.get(*idx))
            .map(|s| s.environment.as_str())
            .collect()
    }
}

/// Looks up the workflow an activity runs.
/// ---
/// An empty name means `default`. When no Workflow resource carries the
/// name, the default workflow is synthesized from the environments.
/// Invalid references in a stored workflow are `Error::Configuration`.
pub async fn resolve_workflow(
    kube: &dyn KubeClient,
    retry: &RetryPolicy,
    name: &str,
) -> Result<ResolvedWorkflow, Error> {
    let name = if name.is_empty() {
        DEFAULT_WORKFLOW_NAME
    } else {
        name
    };

    if let Some(workflow) =
        retry_with_backoff(retry, "get workflow", || kube.get_workflow(name)).await?
    {
        debug!("Workflow [{}]: using stored definition", name);
        return resolve_steps(&workflow);
    }

    if name != DEFAULT_WORKFLOW_NAME {
        warn!(
            "Workflow [{}]: not found, falling back to the {} workflow",
            name, DEFAULT_WORKFLOW_NAME
        );
    }

    let environments =
        retry_with_backoff(retry, "list environments", || kube.list_environments()).await?;
    let mut resolved = resolve_steps(&create_default_workflow(environments))?;
    resolved.synthesized = true;
    Ok(resolved)
}

/// Builds the default workflow: every permanent environment that allows
/// promotion, in order, each step waiting for the previous one.
pub fn create_default_workflow(mut environments: Vec<Environment>) -> Workflow {
    environments.retain(|env| {
        env.is_permanent() && env.spec.promotion_strategy != PromotionStrategy::Never
    });
    sort_environments(&mut environments);

    let mut steps: Vec<WorkflowStep> = Vec::with_capacity(environments.len());
    for env in &environments {
        let step = match steps.last() {
            Some(previous) => create_workflow_promote_step(env.name(), &[previous]),
            None => create_workflow_promote_step(env.name(), &[]),
        };
        steps.push(step);
    }

    create_workflow(DEFAULT_WORKFLOW_NAME, steps)
}

/// Resolves step references of `workflow` into indices.
/// ---
/// Rejects duplicate step names, duplicate environments and references to
/// unknown steps or to the step itself. Cycles are detected when the
/// [WorkflowExecutionGraph] is built.
pub fn resolve_steps(workflow: &Workflow) -> Result<ResolvedWorkflow, Error> {
    let name = workflow.name();
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    let mut environments: BTreeSet<&str> = BTreeSet::new();

    for (index, step) in workflow.spec.steps.iter().enumerate() {
        if step.environment().is_empty() {
            return Err(Error::Configuration(format!(
                "workflow {name}: step {index} has no environment"
            )));
        }
        if by_name.insert(step.name(), index).is_some() {
            return Err(Error::Configuration(format!(
                "workflow {name}: duplicate step name {}",
                step.name()
            )));
        }
        if !environments.insert(step.environment()) {
            return Err(Error::Configuration(format!(
                "workflow {name}: environment {} is promoted to twice",
                step.environment()
            )));
        }
    }

    let mut steps = Vec::with_capacity(workflow.spec.steps.len());
    for (index, step) in workflow.spec.steps.iter().enumerate() {
        let mut predecessors = BTreeSet::new();

        for reference in step.preconditions() {
            let target = match reference {
                StepRef::Index(i) if *i < workflow.spec.steps.len() => *i,
                StepRef::Index(i) => {
                    return Err(Error::Configuration(format!(
                        "workflow {name}: step {} depends on unknown step index {i}",
                        step.name()
                    )));
                }
                StepRef::Name(other) => *by_name.get(other.as_str()).ok_or_else(|| {
                    Error::Configuration(format!(
                        "workflow {name}: step {} depends on unknown step {other}",
                        step.name()
                    ))
                })?,
            };
            if target == index {
                return Err(Error::Configuration(format!(
                    "workflow {name}: step {} depends on itself",
                    step.name()
                )));
            }
            predecessors.insert(target);
        }

        let WorkflowStep::Promote(promote) = step;
        steps.push(ResolvedStep {
            index,
            name: step.name().to_string(),
            environment: step.environment().to_string(),
            predecessors: predecessors.into_iter().collect(),
            parallel: promote.parallel,
        });
    }

    let mut shared: HashMap<Vec<usize>, usize> = HashMap::new();
    for step in &steps {
        *shared.entry(step.predecessors.clone()).or_default() += 1;
    }
    for step in &mut steps {
        if shared.get(&step.predecessors).copied().unwrap_or_default() > 1 {
            step.parallel = true;
        }
    }

    Ok(ResolvedWorkflow {
        name: name.to_string(),
        steps,
        synthesized: false,
    })
}
