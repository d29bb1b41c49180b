use crate::error::Error;

use super::status::ActivityStatus;

/// Something observed about a single promote step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepEvent {
    Start,
    PullRequestOpened { url: String },
    PullRequestMerged { merge_commit_sha: Option<String> },
    PullRequestClosed,
    CommitStatusFailed { state: String },
    UpdateSucceeded,
    UpdateFailed { message: String },
    TimedOut { message: String },
    Abort { reason: String },
    Skip,
}

/// Something observed about the workflow of a whole activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowEvent {
    Start,
    AllStepsSucceeded,
    Failed { message: String },
    Superseded,
}

/// Side effects the caller applies alongside the status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    MarkStarted,
    MarkCompleted,
    RecordPullRequest(String),
    RecordMergeCommit(String),
    SetMessage(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: ActivityStatus,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ActivityStatus, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn unchanged(current: ActivityStatus) -> Self {
        Self {
            next: current,
            effects: Vec::new(),
        }
    }

    pub fn is_noop(&self, current: ActivityStatus) -> bool {
        self.next == current && self.effects.is_empty()
    }
}

pub const SUPERSEDED_MESSAGE: &str = "Due to newer pipeline";

/// Computes the next status of a promote step.
/// ---
/// Terminal steps ignore every event, so replaying an event is harmless.
/// Events that would need a step to move backwards, or to skip `Running`,
/// are rejected.
pub fn next_step_state(current: ActivityStatus, event: &StepEvent) -> Result<Transition, Error> {
    use ActivityStatus::*;

    if current.is_terminal() {
        return Ok(Transition::unchanged(current));
    }

    let transition = match (current, event) {
        (New, StepEvent::Start) => Transition::to(Running, vec![Effect::MarkStarted]),
        (New, StepEvent::Skip) => Transition::to(NotExecuted, vec![Effect::MarkCompleted]),
        (New | Running, StepEvent::Abort { reason }) => Transition::to(
            Aborted,
            vec![Effect::SetMessage(reason.clone()), Effect::MarkCompleted],
        ),

        (Running, StepEvent::Start) => Transition::unchanged(Running),
        (Running, StepEvent::PullRequestOpened { url }) => {
            Transition::to(Running, vec![Effect::RecordPullRequest(url.clone())])
        }
        (Running, StepEvent::PullRequestMerged { merge_commit_sha }) => {
            let mut effects = Vec::new();
            if let Some(sha) = merge_commit_sha {
                effects.push(Effect::RecordMergeCommit(sha.clone()));
            }
            effects.push(Effect::MarkCompleted);
            Transition::to(Succeeded, effects)
        }
        (Running, StepEvent::PullRequestClosed) => Transition::to(
            Failed,
            vec![
                Effect::SetMessage("pull request closed without merge".to_string()),
                Effect::MarkCompleted,
            ],
        ),
        (Running, StepEvent::CommitStatusFailed { state }) => Transition::to(
            Failed,
            vec![
                Effect::SetMessage(format!("pull request commit status is {state}")),
                Effect::MarkCompleted,
            ],
        ),
        (Running, StepEvent::UpdateSucceeded) => {
            Transition::to(Succeeded, vec![Effect::MarkCompleted])
        }
        (Running, StepEvent::UpdateFailed { message })
        | (Running, StepEvent::TimedOut { message }) => Transition::to(
            Failed,
            vec![Effect::SetMessage(message.clone()), Effect::MarkCompleted],
        ),

        (current, event) => {
            return Err(Error::StateTransition(format!(
                "cannot apply {event:?} to a step in status {current}"
            )));
        }
    };

    Ok(transition)
}

/// Computes the next workflow status of an activity.
pub fn next_workflow_state(
    current: ActivityStatus,
    event: &WorkflowEvent,
) -> Result<Transition, Error> {
    use ActivityStatus::*;

    if current.is_terminal() {
        return Ok(Transition::unchanged(current));
    }

    let transition = match (current, event) {
        (New, WorkflowEvent::Start) => Transition::to(Running, vec![Effect::MarkStarted]),
        (Running, WorkflowEvent::Start) => Transition::unchanged(Running),
        (_, WorkflowEvent::AllStepsSucceeded) => {
            Transition::to(Succeeded, vec![Effect::MarkCompleted])
        }
        (_, WorkflowEvent::Failed { message }) => Transition::to(
            Failed,
            vec![Effect::SetMessage(message.clone()), Effect::MarkCompleted],
        ),
        (_, WorkflowEvent::Superseded) => Transition::to(
            Aborted,
            vec![
                Effect::SetMessage(SUPERSEDED_MESSAGE.to_string()),
                Effect::MarkCompleted,
            ],
        ),
        (current, event) => {
            return Err(Error::StateTransition(format!(
                "cannot apply {event:?} to a workflow in status {current}"
            )));
        }
    };

    Ok(transition)
}
