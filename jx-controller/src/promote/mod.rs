use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use jx_common::{
    activity::{ActivityStatus, PipelineActivity, StepEvent, compare_builds},
    common::poll::retry_with_backoff,
    environment::{Environment, PromotionStrategy, sort_environments},
    error::Error,
    git::PullRequest,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    activities::{ActivityKey, get_or_create_activity, record_step_event},
    config::{
        DEFAULT_HELM_REPOSITORY_URL, DEFAULT_LOCAL_HELM_REPO_NAME, DEFAULT_PROMOTION_TIMEOUT,
        DEFAULT_PULL_REQUEST_POLL_INTERVAL,
    },
    context::JxContext,
};

mod gitops;
mod helm;
pub mod pull_request;

pub use gitops::{promote_branch_name, pull_request_body, pull_request_title};
pub use helm::{environment_namespace, upgrade_options};
pub use pull_request::{PullRequestChecker, PullRequestProgress};

/// Arguments of one promotion of an application version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromoteOptions {
    pub application: String,
    pub version: String,
    pub environment: String,
    /// `owner/repository/branch` of the build being promoted.
    pub pipeline: Option<String>,
    pub build: Option<String>,
    pub release_name: Option<String>,
    pub alias: Option<String>,
    pub helm_repository_url: String,
    pub local_helm_repo_name: String,
    pub no_helm_update: bool,
    /// Return once the pull request is open instead of waiting for it.
    pub no_poll: bool,
    pub no_merge_pull_request: bool,
    pub timeout: Duration,
    pub pull_request_poll_interval: Duration,
}

impl PromoteOptions {
    pub fn new(application: &str, version: &str, environment: &str) -> Self {
        Self {
            application: application.to_string(),
            version: version.to_string(),
            environment: environment.to_string(),
            pipeline: None,
            build: None,
            release_name: None,
            alias: None,
            helm_repository_url: DEFAULT_HELM_REPOSITORY_URL.to_string(),
            local_helm_repo_name: DEFAULT_LOCAL_HELM_REPO_NAME.to_string(),
            no_helm_update: false,
            no_poll: false,
            no_merge_pull_request: false,
            timeout: DEFAULT_PROMOTION_TIMEOUT,
            pull_request_poll_interval: DEFAULT_PULL_REQUEST_POLL_INTERVAL,
        }
    }

    /// Records the promotion on the activity of `build` of `pipeline`.
    pub fn with_activity(mut self, pipeline: &str, build: &str) -> Self {
        self.pipeline = Some(pipeline.to_string());
        self.build = Some(build.to_string());
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.application.is_empty() {
            return Err(Error::Configuration(
                "no application to promote".to_string(),
            ));
        }
        if self.version.is_empty() {
            return Err(Error::Configuration(format!(
                "no version given to promote {}",
                self.application
            )));
        }
        if self.environment.is_empty() {
            return Err(Error::Configuration(format!(
                "no environment given to promote {}",
                self.application
            )));
        }
        Ok(())
    }
}

/// Outcome of a promotion that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromoteResult {
    pub environment: String,
    pub pull_request: Option<PullRequest>,
    /// `Running` when the call returned before the pull request settled.
    pub status: ActivityStatus,
}

/// Promotes application versions into environments.
/// ---
/// Every promotion that belongs to a pipeline build is recorded on the
/// `PromoteStep` of its `PipelineActivity`. Environment checkouts under
/// `environments_dir` are used by one promotion at a time.
#[derive(Debug)]
pub struct Promoter {
    ctx: JxContext,
    environments_dir: PathBuf,
    checkout_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    checker: PullRequestChecker,
}

impl Promoter {
    pub fn new(ctx: JxContext, environments_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            environments_dir: environments_dir.into(),
            checkout_locks: Mutex::new(HashMap::new()),
            checker: PullRequestChecker::new(),
        }
    }

    pub fn context(&self) -> &JxContext {
        &self.ctx
    }

    pub fn checker(&self) -> &PullRequestChecker {
        &self.checker
    }

    /// Promotes `opts.version` of `opts.application` into `opts.environment`.
    /// ---
    /// Promoting into a step that already succeeded is a no-op; a step that
    /// failed, was aborted or was skipped needs a new build. Transient API
    /// failures leave the step `Running` so it is picked up again, any other
    /// failure fails the step.
    pub async fn promote(&self, opts: &PromoteOptions) -> Result<PromoteResult, Error> {
        opts.validate()?;

        let activity = self.find_activity(opts).await?;
        let mut started_at = Utc::now();

        if let Some(activity) = &activity {
            if let Some(step) = activity.find_step(&opts.environment) {
                match step.status {
                    ActivityStatus::Succeeded => {
                        info!(
                            "Promote [{}]: {} {} was already promoted by {}",
                            opts.environment,
                            opts.application,
                            opts.version,
                            activity.name()
                        );
                        return Ok(PromoteResult {
                            environment: opts.environment.clone(),
                            pull_request: None,
                            status: ActivityStatus::Succeeded,
                        });
                    }
                    status if status.is_terminal() => {
                        return Err(Error::StateTransition(format!(
                            "promotion of {} to {} is {} on {}, it requires a new build",
                            opts.application,
                            opts.environment,
                            status,
                            activity.name()
                        )));
                    }
                    _ => {}
                }
            }

            let updated = record_step_event(
                self.ctx.kube.as_ref(),
                &self.ctx.retry,
                activity.name(),
                &opts.environment,
                &StepEvent::Start,
            )
            .await?;
            if let Some(started) = updated
                .find_step(&opts.environment)
                .and_then(|s| s.started_timestamp)
            {
                started_at = started;
            }
        }

        let activity_name = activity.as_ref().map(|a| a.name().to_string());
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
        let remaining = opts.timeout.saturating_sub(elapsed);

        match self
            .run_promotion(opts, activity_name.as_deref(), remaining)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) if e.is_retryable() => {
                warn!(
                    "Promote [{}]: {} {} hit a transient failure, will retry: {}",
                    opts.environment, opts.application, opts.version, e
                );
                Err(e)
            }
            Err(e) => {
                let event = match &e {
                    Error::Timeout(message) => StepEvent::TimedOut {
                        message: message.clone(),
                    },
                    other => StepEvent::UpdateFailed {
                        message: other.to_string(),
                    },
                };
                if let Err(record_err) = self
                    .record(activity_name.as_deref(), &opts.environment, &event)
                    .await
                {
                    warn!(
                        "Promote [{}]: failed to record failure on the activity: {}",
                        opts.environment, record_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Promotes through every automatic permanent environment in order,
    /// waiting for each promotion before starting the next.
    pub async fn promote_all_automatic(
        &self,
        opts: &PromoteOptions,
    ) -> Result<Vec<PromoteResult>, Error> {
        let kube = self.ctx.kube.as_ref();
        let mut environments =
            retry_with_backoff(&self.ctx.retry, "list environments", || {
                kube.list_environments()
            })
            .await?;
        environments.retain(|env| env.is_permanent() && env.is_automatic());
        sort_environments(&mut environments);

        let mut results = Vec::with_capacity(environments.len());
        for env in environments {
            let env_opts = PromoteOptions {
                environment: env.name().to_string(),
                no_poll: false,
                ..opts.clone()
            };
            results.push(self.promote(&env_opts).await?);
        }
        Ok(results)
    }

    async fn run_promotion(
        &self,
        opts: &PromoteOptions,
        activity: Option<&str>,
        poll_timeout: Duration,
    ) -> Result<PromoteResult, Error> {
        let env = self.load_environment(&opts.environment).await?;

        if env.is_gitops() {
            return self
                .promote_via_pull_request(opts, &env, activity, poll_timeout)
                .await;
        }

        helm::promote_via_helm(&self.ctx, opts, &env).await?;
        self.record(activity, env.name(), &StepEvent::UpdateSucceeded)
            .await?;
        Ok(PromoteResult {
            environment: env.name().to_string(),
            pull_request: None,
            status: ActivityStatus::Succeeded,
        })
    }

    async fn load_environment(&self, name: &str) -> Result<Environment, Error> {
        let kube = self.ctx.kube.as_ref();
        let env = retry_with_backoff(&self.ctx.retry, "get environment", || {
            kube.get_environment(name)
        })
        .await?
        .ok_or_else(|| Error::Configuration(format!("environment {name} does not exist")))?;

        if env.spec.promotion_strategy == PromotionStrategy::Never {
            return Err(Error::Configuration(format!(
                "environment {name} has a promotion strategy of Never"
            )));
        }
        Ok(env)
    }

    /// The activity a promotion is recorded on.
    /// ---
    /// With a pipeline and build the activity is created if needed.
    /// Otherwise the latest build of the application with this version is
    /// used, if there is one.
    async fn find_activity(&self, opts: &PromoteOptions) -> Result<Option<PipelineActivity>, Error> {
        let kube = self.ctx.kube.as_ref();

        if let (Some(pipeline), Some(build)) = (&opts.pipeline, &opts.build) {
            let key = ActivityKey::new(pipeline, build);
            return get_or_create_activity(kube, &self.ctx.retry, &key, &opts.version)
                .await
                .map(Some);
        }

        let activities = retry_with_backoff(&self.ctx.retry, "list activities", || {
            kube.list_activities()
        })
        .await?;

        let found = activities
            .into_iter()
            .filter(|a| a.spec.version == opts.version)
            .filter(|a| match &opts.pipeline {
                Some(pipeline) => &a.spec.pipeline == pipeline,
                None => a.repository_name() == opts.application,
            })
            .max_by(|a, b| compare_builds(&a.spec.build, &b.spec.build));

        if found.is_none() {
            debug!(
                "Promote [{}]: no activity for {} {}, promotion is not recorded",
                opts.environment, opts.application, opts.version
            );
        }
        Ok(found)
    }

    /// Applies `event` to the step of `environment`, if the promotion has an activity.
    async fn record(
        &self,
        activity: Option<&str>,
        environment: &str,
        event: &StepEvent,
    ) -> Result<(), Error> {
        if let Some(name) = activity {
            record_step_event(
                self.ctx.kube.as_ref(),
                &self.ctx.retry,
                name,
                environment,
                event,
            )
            .await?;
        }
        Ok(())
    }

    async fn checkout_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.checkout_locks
            .lock()
            .await
            .entry(dir.to_path_buf())
            .or_default()
            .clone()
    }
}
