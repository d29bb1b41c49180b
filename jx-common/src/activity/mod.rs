use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{common::meta::ObjectMeta, error::Error};

mod pipeline_id;
mod status;
pub mod transition;

pub use pipeline_id::{PipelineDetails, PipelineId, compare_builds, digit_suffix, to_valid_name};
pub use status::ActivityStatus;
pub use transition::{
    Effect, StepEvent, Transition, WorkflowEvent, next_step_state, next_workflow_state,
};

pub const PIPELINE_ACTIVITY_KIND: &str = "PipelineActivity";

/// Record of one pipeline build and its promotion progress.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineActivity {
    pub metadata: ObjectMeta,
    pub spec: PipelineActivitySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineActivitySpec {
    /// `owner/repository/branch`
    pub pipeline: String,
    pub build: String,
    pub version: String,
    pub status: ActivityStatus,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    pub git_url: String,
    pub git_owner: String,
    pub git_repository: String,
    pub git_branch: String,
    pub workflow: String,
    pub workflow_status: ActivityStatus,
    pub workflow_message: Option<String>,
    pub steps: Vec<PromoteStep>,
}

/// Promotion of the activity's version into one environment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromoteStep {
    pub environment: String,
    pub status: ActivityStatus,
    pub pull_request: Option<PromotePullRequest>,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromotePullRequest {
    pub url: String,
    pub merge_commit_sha: Option<String>,
}

impl PromoteStep {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            ..Default::default()
        }
    }

    pub fn pull_request_url(&self) -> Option<&str> {
        self.pull_request
            .as_ref()
            .map(|pr| pr.url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Applies `event` through the step transition table.
    /// ---
    /// Returns `true` when anything on the step changed.
    pub fn apply(&mut self, event: &StepEvent, now: DateTime<Utc>) -> Result<bool, Error> {
        let transition = next_step_state(self.status, event)?;
        if transition.is_noop(self.status) {
            return Ok(false);
        }

        self.status = transition.next;
        for effect in transition.effects {
            match effect {
                Effect::MarkStarted => self.started_timestamp = Some(now),
                Effect::MarkCompleted => self.completed_timestamp = Some(now),
                Effect::RecordPullRequest(url) => {
                    self.pull_request = Some(PromotePullRequest {
                        url,
                        merge_commit_sha: None,
                    })
                }
                Effect::RecordMergeCommit(sha) => {
                    self.pull_request
                        .get_or_insert_with(PromotePullRequest::default)
                        .merge_commit_sha = Some(sha);
                }
                Effect::SetMessage(message) => self.message = Some(message),
            }
        }

        Ok(true)
    }
}

impl PipelineActivity {
    /// Creates the activity for `build` of `owner/repository/branch`.
    pub fn new(owner: &str, repository: &str, branch: &str, build: &str) -> Self {
        let pipeline_id = PipelineId::new(owner, repository, branch);
        Self {
            metadata: ObjectMeta::named(&pipeline_id.activity_name(build)),
            spec: PipelineActivitySpec {
                pipeline: pipeline_id.id,
                build: build.to_string(),
                git_owner: owner.to_string(),
                git_repository: repository.to_string(),
                git_branch: branch.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    fn details(&self) -> Option<PipelineDetails> {
        PipelineDetails::parse(&self.spec.pipeline)
    }

    /// Repository the pipeline built, which is also the application name.
    pub fn repository_name(&self) -> String {
        if !self.spec.git_repository.is_empty() {
            return self.spec.git_repository.clone();
        }
        self.details().map(|d| d.repository).unwrap_or_default()
    }

    pub fn owner(&self) -> String {
        if !self.spec.git_owner.is_empty() {
            return self.spec.git_owner.clone();
        }
        self.details().map(|d| d.owner).unwrap_or_default()
    }

    pub fn branch_name(&self) -> String {
        if !self.spec.git_branch.is_empty() {
            return self.spec.git_branch.clone();
        }
        self.details()
            .map(|d| d.branch)
            .unwrap_or_else(|| "master".to_string())
    }

    /// Names of the required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.spec.pipeline.is_empty() {
            missing.push("pipeline");
        }
        if self.spec.build.is_empty() {
            missing.push("build");
        }
        if self.spec.version.is_empty() {
            missing.push("version");
        }
        if self.repository_name().is_empty() {
            missing.push("repository");
        }
        missing
    }

    pub fn is_workflow_terminated(&self) -> bool {
        self.spec.workflow_status.is_terminal()
    }

    pub fn find_step(&self, environment: &str) -> Option<&PromoteStep> {
        self.spec
            .steps
            .iter()
            .find(|s| s.environment == environment)
    }

    pub fn find_step_mut(&mut self, environment: &str) -> Option<&mut PromoteStep> {
        self.spec
            .steps
            .iter_mut()
            .find(|s| s.environment == environment)
    }

    /// Returns the step for `environment`, appending a `New` one if missing.
    pub fn ensure_step(&mut self, environment: &str) -> &mut PromoteStep {
        let idx = match self
            .spec
            .steps
            .iter()
            .position(|s| s.environment == environment)
        {
            Some(idx) => idx,
            None => {
                self.spec.steps.push(PromoteStep::new(environment));
                self.spec.steps.len() - 1
            }
        };
        &mut self.spec.steps[idx]
    }

    pub fn step_statuses(&self) -> HashMap<String, ActivityStatus> {
        self.spec
            .steps
            .iter()
            .map(|s| (s.environment.clone(), s.status))
            .collect()
    }

    /// Applies `event` through the workflow transition table.
    /// ---
    /// The pipeline status follows the workflow status once it is terminal.
    pub fn apply_workflow(&mut self, event: &WorkflowEvent, now: DateTime<Utc>) -> Result<bool, Error> {
        let current = self.spec.workflow_status;
        let transition = next_workflow_state(current, event)?;
        if transition.is_noop(current) {
            return Ok(false);
        }

        self.spec.workflow_status = transition.next;
        for effect in transition.effects {
            match effect {
                Effect::MarkStarted => {
                    if self.spec.started_timestamp.is_none() {
                        self.spec.started_timestamp = Some(now);
                    }
                    if self.spec.status == ActivityStatus::New {
                        self.spec.status = ActivityStatus::Running;
                    }
                }
                Effect::MarkCompleted => {
                    self.spec.completed_timestamp = Some(now);
                    self.spec.status = transition.next;
                }
                Effect::SetMessage(message) => self.spec.workflow_message = Some(message),
                Effect::RecordPullRequest(_) | Effect::RecordMergeCommit(_) => {}
            }
        }

        Ok(true)
    }
}
