use std::{cmp::Ordering, collections::HashMap};

use chrono::Utc;
use futures::future::join_all;
use jx_common::{
    activity::{
        ActivityStatus, PipelineActivity, PromoteStep, StepEvent, WorkflowEvent, compare_builds,
        transition::SUPERSEDED_MESSAGE,
    },
    common::poll::retry_with_backoff,
    environment::{Environment, PromotionStrategy},
    error::Error,
};
use tracing::{debug, info, warn};

use crate::{
    activities::{modify_activity, record_step_event},
    promote::{PromoteOptions, pull_request::pull_request_for_url},
    workflow::{ResolvedStep, WorkflowExecutionGraph, resolve_workflow},
};

use super::WorkflowController;

const WORKFLOW_FAILED_REASON: &str = "workflow failed";

impl WorkflowController {
    /// Advances one activity by at most one generation of steps.
    pub(super) async fn reconcile_activity(
        &self,
        activity: &PipelineActivity,
        all: &[PipelineActivity],
    ) -> Result<(), Error> {
        let name = activity.name();

        let missing = activity.missing_fields();
        if !missing.is_empty() {
            debug!("Activity [{}]: ignored, missing {}", name, missing.join(", "));
            return Ok(());
        }
        let branch = activity.branch_name();
        if !self.config.is_release_branch(&branch) {
            debug!("Activity [{}]: ignored, {} is not a release branch", name, branch);
            return Ok(());
        }

        if let Some(newer) = newer_build(activity, all) {
            info!(
                "Activity [{}]: superseded by build {} of {}",
                name, newer.spec.build, activity.spec.pipeline
            );
            return self.supersede(name).await;
        }

        let workflow = match resolve_workflow(
            self.ctx.kube.as_ref(),
            &self.ctx.retry,
            &activity.spec.workflow,
        )
        .await
        .and_then(|resolved| {
            let graph = WorkflowExecutionGraph::new(&resolved)?;
            Ok((resolved, graph))
        }) {
            Ok(workflow) => workflow,
            Err(Error::Configuration(message)) => {
                warn!("Activity [{}]: invalid workflow: {}", name, message);
                return self
                    .fail_workflow(name, format!("invalid workflow: {message}"))
                    .await;
            }
            Err(e) => return Err(e),
        };
        let (resolved, graph) = workflow;

        modify_activity(self.ctx.kube.as_ref(), &self.ctx.retry, name, |a| {
            let mut changed = false;
            if a.spec.workflow.is_empty() {
                a.spec.workflow = resolved.name.clone();
                changed = true;
            }
            for step in graph.steps() {
                if a.find_step(&step.environment).is_none() {
                    a.ensure_step(&step.environment);
                    changed = true;
                }
            }
            changed |= a.apply_workflow(&WorkflowEvent::Start, Utc::now())?;
            Ok(changed)
        })
        .await?;

        self.refresh_running_steps(name).await?;

        // decide on what was persisted, never on what this pass assumed
        let current = self.get_activity(name).await?;
        if self.complete_if_done(&current, &graph).await? {
            return Ok(());
        }

        let environments = self.environments_by_name().await?;
        let statuses = current.step_statuses();
        let ready: Vec<&ResolvedStep> = graph
            .get_ready_steps(&statuses)
            .into_iter()
            .filter(|step| match environments.get(&step.environment) {
                Some(env) if env.is_manual() => {
                    debug!(
                        "Activity [{}]: {} waits for a manual promotion",
                        name, step.environment
                    );
                    false
                }
                Some(env) if env.spec.promotion_strategy == PromotionStrategy::Never => false,
                _ => true,
            })
            .collect();

        if !ready.is_empty() {
            let envs: Vec<&str> = ready.iter().map(|s| s.environment.as_str()).collect();
            info!("Activity [{}]: starting {}", name, envs.join(", "));

            join_all(ready.iter().map(|step| self.start_step(&current, step))).await;

            let current = self.get_activity(name).await?;
            self.complete_if_done(&current, &graph).await?;
        }

        Ok(())
    }

    /// Promotes the activity's version into the environment of `step`
    /// without waiting for the pull request.
    async fn start_step(&self, activity: &PipelineActivity, step: &ResolvedStep) {
        let opts = self.promote_options(activity, &step.environment);
        match self.promoter.promote(&opts).await {
            Ok(result) => debug!(
                "Activity [{}]: {} is {}",
                activity.name(),
                step.environment,
                result.status
            ),
            Err(e) => warn!(
                "Activity [{}]: promotion to {} failed: {}",
                activity.name(),
                step.environment,
                e
            ),
        }
    }

    fn promote_options(&self, activity: &PipelineActivity, environment: &str) -> PromoteOptions {
        let mut opts = PromoteOptions::new(
            &activity.repository_name(),
            &activity.spec.version,
            environment,
        )
        .with_activity(&activity.spec.pipeline, &activity.spec.build);
        opts.no_poll = true;
        opts.no_merge_pull_request = self.config.no_merge_pull_request;
        opts.timeout = self.config.promotion_timeout;
        opts.pull_request_poll_interval = self.config.pull_request_poll_interval;
        opts.helm_repository_url = self.config.helm_repository_url.clone();
        opts.local_helm_repo_name = self.config.local_helm_repo_name.clone();
        opts
    }

    /// Checks every `Running` step of the activity once and persists the result.
    async fn refresh_running_steps(&self, name: &str) -> Result<(), Error> {
        let activity = self.get_activity(name).await?;
        let running: Vec<&PromoteStep> = activity
            .spec
            .steps
            .iter()
            .filter(|s| s.status == ActivityStatus::Running)
            .collect();

        join_all(
            running
                .into_iter()
                .map(|step| self.refresh_running_step(&activity, step)),
        )
        .await;
        Ok(())
    }

    async fn refresh_running_step(&self, activity: &PipelineActivity, step: &PromoteStep) {
        let name = activity.name();
        let env = step.environment.as_str();

        let event = match self.running_step_event(activity, step).await {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) if e.is_retryable() => {
                warn!("Activity [{}]: could not check {}: {}", name, env, e);
                return;
            }
            Err(e) => StepEvent::UpdateFailed {
                message: e.to_string(),
            },
        };

        if let Err(e) =
            record_step_event(self.ctx.kube.as_ref(), &self.ctx.retry, name, env, &event).await
        {
            warn!("Activity [{}]: failed to record {:?} on {}: {}", name, event, env, e);
        }
    }

    /// Event a running step has reached, if any.
    /// ---
    /// The pull request is checked before the timeout so a promotion that
    /// merged in time succeeds even when this pass runs late. A step
    /// without a pull request was interrupted before one was opened and is
    /// promoted again.
    async fn running_step_event(
        &self,
        activity: &PipelineActivity,
        step: &PromoteStep,
    ) -> Result<Option<StepEvent>, Error> {
        let Some(url) = step.pull_request_url() else {
            if self.has_timed_out(step) {
                return Ok(Some(StepEvent::TimedOut {
                    message: format!("Timed out promoting to {}", step.environment),
                }));
            }

            info!(
                "Activity [{}]: {} has no pull request yet, promoting again",
                activity.name(),
                step.environment
            );
            let opts = self.promote_options(activity, &step.environment);
            // the promoter records the outcome itself
            return match self.promoter.promote(&opts).await {
                Ok(_) => Ok(None),
                Err(e) if e.is_retryable() => Err(e),
                Err(_) => Ok(None),
            };
        };

        let provider = self.ctx.git_provider.as_ref();
        let mut pr = pull_request_for_url(provider, &self.ctx.retry, url).await?;
        let progress = self
            .promoter
            .checker()
            .check(
                provider,
                &self.ctx.retry,
                &mut pr,
                self.config.no_merge_pull_request,
            )
            .await?;

        if let Some(event) = progress.step_event() {
            return Ok(Some(event));
        }
        if self.has_timed_out(step) {
            return Ok(Some(StepEvent::TimedOut {
                message: format!("Timed out waiting for pull request {url} to merge"),
            }));
        }
        Ok(None)
    }

    fn has_timed_out(&self, step: &PromoteStep) -> bool {
        step.started_timestamp.is_some_and(|started| {
            (Utc::now() - started).to_std().unwrap_or_default() >= self.config.promotion_timeout
        })
    }

    /// Ends the workflow if its steps decided the outcome.
    /// ---
    /// On failure the steps that never started are marked `NotExecuted`
    /// and those still running are aborted.
    async fn complete_if_done(
        &self,
        activity: &PipelineActivity,
        graph: &WorkflowExecutionGraph,
    ) -> Result<bool, Error> {
        let outcome = match graph.is_workflow_complete(&activity.step_statuses()) {
            Some(outcome) => outcome,
            None => return Ok(false),
        };

        let event = if outcome == ActivityStatus::Succeeded {
            info!("Activity [{}]: all promotions succeeded", activity.name());
            WorkflowEvent::AllStepsSucceeded
        } else {
            let message = failure_message(activity);
            warn!("Activity [{}]: workflow failed: {}", activity.name(), message);
            WorkflowEvent::Failed { message }
        };

        modify_activity(
            self.ctx.kube.as_ref(),
            &self.ctx.retry,
            activity.name(),
            |a| {
                let now = Utc::now();
                let mut changed = false;
                if matches!(event, WorkflowEvent::Failed { .. }) {
                    changed |= stop_unfinished_steps(a, WORKFLOW_FAILED_REASON)?;
                }
                changed |= a.apply_workflow(&event, now)?;
                Ok(changed)
            },
        )
        .await?;
        Ok(true)
    }

    async fn supersede(&self, name: &str) -> Result<(), Error> {
        modify_activity(self.ctx.kube.as_ref(), &self.ctx.retry, name, |a| {
            let mut changed = stop_unfinished_steps(a, SUPERSEDED_MESSAGE)?;
            changed |= a.apply_workflow(&WorkflowEvent::Superseded, Utc::now())?;
            Ok(changed)
        })
        .await?;
        Ok(())
    }

    async fn fail_workflow(&self, name: &str, message: String) -> Result<(), Error> {
        let event = WorkflowEvent::Failed { message };
        modify_activity(self.ctx.kube.as_ref(), &self.ctx.retry, name, |a| {
            a.apply_workflow(&event, Utc::now())
        })
        .await?;
        Ok(())
    }

    async fn get_activity(&self, name: &str) -> Result<PipelineActivity, Error> {
        let kube = self.ctx.kube.as_ref();
        retry_with_backoff(&self.ctx.retry, "get activity", || kube.get_activity(name))
            .await?
            .ok_or_else(|| Error::not_found(jx_common::activity::PIPELINE_ACTIVITY_KIND, name))
    }

    async fn environments_by_name(&self) -> Result<HashMap<String, Environment>, Error> {
        let kube = self.ctx.kube.as_ref();
        let environments =
            retry_with_backoff(&self.ctx.retry, "list environments", || {
                kube.list_environments()
            })
            .await?;
        Ok(environments
            .into_iter()
            .map(|env| (env.name().to_string(), env))
            .collect())
    }
}

/// The newest other build of the same pipeline, if it is newer than `activity`.
fn newer_build<'a>(
    activity: &PipelineActivity,
    all: &'a [PipelineActivity],
) -> Option<&'a PipelineActivity> {
    all.iter()
        .filter(|other| {
            other.name() != activity.name() && other.spec.pipeline == activity.spec.pipeline
        })
        .filter(|other| compare_builds(&other.spec.build, &activity.spec.build) == Ordering::Greater)
        .max_by(|a, b| compare_builds(&a.spec.build, &b.spec.build))
}

/// Skips steps that never started and aborts running ones.
fn stop_unfinished_steps(activity: &mut PipelineActivity, reason: &str) -> Result<bool, Error> {
    let now = Utc::now();
    let mut changed = false;
    for step in &mut activity.spec.steps {
        let event = match step.status {
            ActivityStatus::New => StepEvent::Skip,
            ActivityStatus::Running => StepEvent::Abort {
                reason: reason.to_string(),
            },
            _ => continue,
        };
        changed |= step.apply(&event, now)?;
    }
    Ok(changed)
}

fn failure_message(activity: &PipelineActivity) -> String {
    activity
        .spec
        .steps
        .iter()
        .find(|s| matches!(s.status, ActivityStatus::Failed | ActivityStatus::Aborted))
        .map(|s| match &s.message {
            Some(message) => format!("promotion to {} failed: {}", s.environment, message),
            None => format!("promotion to {} failed", s.environment),
        })
        .unwrap_or_else(|| "promotion failed".to_string())
}
