use serde::{Deserialize, Serialize};

use crate::common::meta::ObjectMeta;

pub const WORKFLOW_KIND: &str = "Workflow";
pub const DEFAULT_WORKFLOW_NAME: &str = "default";

/// A DAG of promotion steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkflowSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSpec {
    pub steps: Vec<WorkflowStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStep {
    Promote(PromoteWorkflowStep),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromoteWorkflowStep {
    /// Defaults to the environment name.
    pub name: Option<String>,
    pub environment: String,
    pub parallel: bool,
    /// Steps that must succeed before this one starts.
    pub preconditions: Vec<StepRef>,
}

/// Reference to another step of the same workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepRef {
    Index(usize),
    Name(String),
}

impl WorkflowStep {
    pub fn environment(&self) -> &str {
        match self {
            Self::Promote(step) => &step.environment,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Promote(step) => step.name.as_deref().unwrap_or(&step.environment),
        }
    }

    pub fn preconditions(&self) -> &[StepRef] {
        match self {
            Self::Promote(step) => &step.preconditions,
        }
    }
}

impl Workflow {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

pub fn create_workflow(name: &str, steps: Vec<WorkflowStep>) -> Workflow {
    Workflow {
        metadata: ObjectMeta::named(name),
        spec: WorkflowSpec { steps },
    }
}

/// Creates a promote step depending on each of `preconditions`.
pub fn create_workflow_promote_step(
    environment: &str,
    preconditions: &[&WorkflowStep],
) -> WorkflowStep {
    WorkflowStep::Promote(PromoteWorkflowStep {
        name: None,
        environment: environment.to_string(),
        parallel: false,
        preconditions: preconditions
            .iter()
            .map(|step| StepRef::Name(step.name().to_string()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let a = create_workflow_promote_step("a", &[]);
        let b = create_workflow_promote_step("b", &[]);
        let c = create_workflow_promote_step("c", &[&a, &b]);
        let workflow = create_workflow("myflow", vec![a, b, c]);

        assert_eq!(workflow.name(), "myflow");
        assert_eq!(
            workflow.spec.steps[2].preconditions(),
            &[StepRef::Name("a".to_string()), StepRef::Name("b".to_string())]
        );
    }

    #[test]
    fn test_parse_yaml_steps() {
        let yaml = r#"
metadata:
  name: release
spec:
  steps:
    - promote:
        environment: staging
    - promote:
        environment: production
        preconditions: [0]
    - promote:
        name: smoke
        environment: qa
        preconditions: [staging]
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.spec.steps.len(), 3);
        assert_eq!(workflow.spec.steps[1].preconditions(), &[StepRef::Index(0)]);
        assert_eq!(workflow.spec.steps[2].name(), "smoke");
        assert_eq!(
            workflow.spec.steps[2].preconditions(),
            &[StepRef::Name("staging".to_string())]
        );
    }
}
