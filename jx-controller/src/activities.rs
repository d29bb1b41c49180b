use std::time::Duration;

use chrono::Utc;
use jx_common::{
    activity::{PIPELINE_ACTIVITY_KIND, PipelineActivity, PipelineDetails, PipelineId, StepEvent},
    common::poll::{RetryPolicy, retry_with_backoff},
    error::Error,
    state::KubeClient,
};
use rand::Rng;
use tracing::debug;

/// Attempts at applying one mutation before giving up on conflicts.
const MAX_CONFLICT_RETRIES: u32 = 12;

/// Identifies the activity recording one build of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityKey {
    pub name: String,
    pub pipeline: String,
    pub build: String,
}

impl ActivityKey {
    pub fn new(pipeline: &str, build: &str) -> Self {
        Self {
            name: PipelineId::from_pipeline(pipeline).activity_name(build),
            pipeline: pipeline.to_string(),
            build: build.to_string(),
        }
    }
}

/// Returns the activity for `key`, creating it if no build has reported it yet.
pub async fn get_or_create_activity(
    kube: &dyn KubeClient,
    retry: &RetryPolicy,
    key: &ActivityKey,
    version: &str,
) -> Result<PipelineActivity, Error> {
    if let Some(existing) =
        retry_with_backoff(retry, "get activity", || kube.get_activity(&key.name)).await?
    {
        return Ok(existing);
    }

    let details = PipelineDetails::parse(&key.pipeline).ok_or_else(|| {
        Error::Configuration(format!(
            "pipeline {:?} is not of the form owner/repository/branch",
            key.pipeline
        ))
    })?;

    let mut activity = PipelineActivity::new(
        &details.owner,
        &details.repository,
        &details.branch,
        &key.build,
    );
    activity.metadata.name = key.name.clone();
    activity.spec.pipeline = key.pipeline.clone();
    activity.spec.version = version.to_string();
    activity.spec.started_timestamp = Some(Utc::now());

    match kube.create_activity(activity).await {
        Ok(created) => Ok(created),
        // somebody else created it first
        Err(e) if e.is_conflict() => kube
            .get_activity(&key.name)
            .await?
            .ok_or_else(|| Error::not_found(PIPELINE_ACTIVITY_KIND, &key.name)),
        Err(e) => Err(e),
    }
}

/// Applies `mutate` to the latest copy of the activity and stores it.
/// ---
/// `mutate` returns whether it changed anything; unchanged activities
/// are not written. On a resource version conflict the activity is
/// read again and `mutate` re-applied, so it must be safe to repeat.
/// Attempts after a conflict wait a random part of the policy's backoff
/// so competing writers stop colliding.
pub async fn modify_activity<F>(
    kube: &dyn KubeClient,
    retry: &RetryPolicy,
    name: &str,
    mut mutate: F,
) -> Result<PipelineActivity, Error>
where
    F: FnMut(&mut PipelineActivity) -> Result<bool, Error>,
{
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let current = retry_with_backoff(retry, "get activity", || kube.get_activity(name))
            .await?
            .ok_or_else(|| Error::not_found(PIPELINE_ACTIVITY_KIND, name))?;

        let mut updated = current.clone();
        if !mutate(&mut updated)? {
            return Ok(current);
        }

        match kube.update_activity(updated).await {
            Ok(stored) => return Ok(stored),
            Err(e) if (e.is_conflict() || e.is_retryable()) && attempt < MAX_CONFLICT_RETRIES => {
                let delay = conflict_delay(retry, attempt);
                debug!(
                    "Activity [{}]: write attempt {} failed, re-reading in {:?}: {}",
                    name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_conflict() || e.is_retryable() => {
                debug!("Activity [{}]: write attempt {} failed: {}", name, attempt, e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Conflict(format!(
        "gave up updating {PIPELINE_ACTIVITY_KIND} {name} after {MAX_CONFLICT_RETRIES} attempts"
    )))
}

fn conflict_delay(retry: &RetryPolicy, attempt: u32) -> Duration {
    let ceiling = retry.backoff(attempt);
    let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(0..=millis))
}

/// Applies a step event for `environment` on the named activity.
pub async fn record_step_event(
    kube: &dyn KubeClient,
    retry: &RetryPolicy,
    name: &str,
    environment: &str,
    event: &StepEvent,
) -> Result<PipelineActivity, Error> {
    modify_activity(kube, retry, name, |activity| {
        activity.ensure_step(environment).apply(event, Utc::now())
    })
    .await
}
