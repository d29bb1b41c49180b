use std::{path::Path, time::Duration};

use jx_common::{
    activity::{ActivityStatus, StepEvent, to_valid_name},
    common::poll::{PollStatus, Poller, retry_with_backoff},
    environment::Environment,
    error::Error,
    git::{GitRepositoryInfo, PullRequest, PullRequestArguments},
};
use jx_helm::requirements::{find_requirements_file, load_requirements, save_requirements};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    PromoteOptions, PromoteResult, Promoter,
    pull_request::{PullRequestProgress, pull_request_for_url},
};

/// Head branch of the pull request promoting `app` to `version`.
pub fn promote_branch_name(app: &str, version: &str) -> String {
    to_valid_name(&format!("promote-{app}-{version}"))
}

pub fn pull_request_title(app: &str, version: &str) -> String {
    format!("chore: {app} to {version}")
}

pub fn pull_request_body(app: &str, version: &str) -> String {
    format!("chore: Promote {app} to version {version}")
}

impl Promoter {
    /// Promotes through a pull request on the environment repository.
    /// ---
    /// Reuses the pull request stored on the step, or an open one for the
    /// same version, before creating a new one. Unless `no_poll` is set the
    /// call then waits up to `poll_timeout` for the pull request to settle.
    pub(super) async fn promote_via_pull_request(
        &self,
        opts: &PromoteOptions,
        env: &Environment,
        activity: Option<&str>,
        poll_timeout: Duration,
    ) -> Result<PromoteResult, Error> {
        let repo = GitRepositoryInfo::parse(&env.spec.source.url)?;

        let stored_url = match activity {
            Some(name) => self.stored_pull_request_url(name, env.name()).await?,
            None => None,
        };

        let mut pr = match &stored_url {
            Some(url) => {
                debug!("Promote [{}]: reusing pull request {}", env.name(), url);
                let provider = self.ctx.git_provider.as_ref();
                Some(pull_request_for_url(provider, &self.ctx.retry, url).await?)
            }
            None => self.find_open_pull_request(opts, &repo).await?,
        };

        if pr.is_none() {
            pr = self.create_pull_request(opts, env, &repo).await?;
        }

        let Some(mut pr) = pr else {
            info!(
                "Promote [{}]: {} is already at version {}",
                env.name(),
                opts.application,
                opts.version
            );
            self.record(activity, env.name(), &StepEvent::UpdateSucceeded)
                .await?;
            return Ok(PromoteResult {
                environment: env.name().to_string(),
                pull_request: None,
                status: ActivityStatus::Succeeded,
            });
        };

        if stored_url.as_deref() != Some(pr.url.as_str()) {
            self.record(
                activity,
                env.name(),
                &StepEvent::PullRequestOpened {
                    url: pr.url.clone(),
                },
            )
            .await?;
        }

        if opts.no_poll {
            return Ok(PromoteResult {
                environment: env.name().to_string(),
                pull_request: Some(pr),
                status: ActivityStatus::Running,
            });
        }

        let poller = Poller::new(opts.pull_request_poll_interval, poll_timeout);
        let description = format!("pull request {} to merge", pr.url);
        let progress = poller
            .poll(&description, || {
                let current = pr.clone();
                async move {
                    let mut current = current;
                    let progress = self
                        .checker
                        .check(
                            self.ctx.git_provider.as_ref(),
                            &self.ctx.retry,
                            &mut current,
                            opts.no_merge_pull_request,
                        )
                        .await?;
                    Ok(if progress.is_done() {
                        PollStatus::Ready((progress, current))
                    } else {
                        PollStatus::Pending
                    })
                }
            })
            .await;

        let (progress, latest) = progress?;
        pr = latest;

        if let Some(event) = progress.step_event() {
            self.record(activity, env.name(), &event).await?;
        }

        match progress {
            PullRequestProgress::Merged { .. } => Ok(PromoteResult {
                environment: env.name().to_string(),
                pull_request: Some(pr),
                status: ActivityStatus::Succeeded,
            }),
            PullRequestProgress::Closed => Err(Error::PromotionFailed(format!(
                "pull request {} was closed without being merged",
                pr.url
            ))),
            PullRequestProgress::Failed { status } => Err(Error::PromotionFailed(format!(
                "pull request {} has commit status {}",
                pr.url, status
            ))),
            PullRequestProgress::Pending => Err(Error::Internal(format!(
                "stopped polling pull request {} while it was pending",
                pr.url
            ))),
        }
    }

    async fn stored_pull_request_url(
        &self,
        activity: &str,
        environment: &str,
    ) -> Result<Option<String>, Error> {
        let kube = self.ctx.kube.as_ref();
        let found = retry_with_backoff(&self.ctx.retry, "get activity", || {
            kube.get_activity(activity)
        })
        .await?;

        Ok(found
            .as_ref()
            .and_then(|a| a.find_step(environment))
            .and_then(|s| s.pull_request_url())
            .map(str::to_string))
    }

    /// An open pull request left behind by an earlier attempt at this version.
    async fn find_open_pull_request(
        &self,
        opts: &PromoteOptions,
        repo: &GitRepositoryInfo,
    ) -> Result<Option<PullRequest>, Error> {
        let branch = promote_branch_name(&opts.application, &opts.version);
        let suffixed = format!("{branch}-");
        let provider = self.ctx.git_provider.as_ref();
        let open = retry_with_backoff(&self.ctx.retry, "list pull requests", || {
            provider.list_open_pull_requests(&repo.organisation, &repo.name)
        })
        .await?;

        Ok(open
            .into_iter()
            .filter(|pr| pr.head_branch == branch || pr.head_branch.starts_with(&suffixed))
            .max_by_key(|pr| pr.number))
    }

    /// Commits the new version to a branch and opens the pull request.
    /// ---
    /// Returns `None` when the environment already has the version.
    async fn create_pull_request(
        &self,
        opts: &PromoteOptions,
        env: &Environment,
        repo: &GitRepositoryInfo,
    ) -> Result<Option<PullRequest>, Error> {
        let dir = self
            .environments_dir
            .join(&repo.organisation)
            .join(&repo.name);
        let lock = self.checkout_lock(&dir).await;
        let _guard = lock.lock().await;

        let gitter = self.ctx.gitter.as_ref();
        let base = env.base_branch();

        self.prepare_checkout(&dir, &env.spec.source.url, base)
            .await?;

        let requirements_file = find_requirements_file(&dir);
        let mut requirements = load_requirements(&requirements_file).await?;
        let changed = requirements.set_app_version(
            &opts.application,
            &opts.version,
            &opts.helm_repository_url,
            opts.alias.as_deref(),
        );
        if !changed {
            return Ok(None);
        }
        save_requirements(&requirements_file, &requirements).await?;

        let mut branch = promote_branch_name(&opts.application, &opts.version);
        if gitter
            .remote_branch_names(&dir)
            .await?
            .iter()
            .any(|b| b == &branch)
        {
            branch = format!("{branch}-{}", Uuid::new_v4());
        }

        gitter.create_branch(&dir, &branch).await?;
        gitter.add_all(&dir).await?;
        if !gitter.has_changes(&dir).await? {
            return Ok(None);
        }

        let body = pull_request_body(&opts.application, &opts.version);
        gitter.commit(&dir, &body).await?;
        gitter.push(&dir, &branch).await?;

        let args = PullRequestArguments {
            owner: repo.organisation.clone(),
            repository: repo.name.clone(),
            title: pull_request_title(&opts.application, &opts.version),
            body,
            head: branch,
            base: base.to_string(),
        };
        let provider = self.ctx.git_provider.as_ref();
        let pr = retry_with_backoff(&self.ctx.retry, "create pull request", || {
            provider.create_pull_request(&args)
        })
        .await?;

        info!(
            "Promote [{}]: created pull request {} for {} {}",
            env.name(),
            pr.url,
            opts.application,
            opts.version
        );
        Ok(Some(pr))
    }

    /// Clones the environment repository, or resets an existing checkout
    /// onto the upstream base branch.
    async fn prepare_checkout(&self, dir: &Path, url: &str, base: &str) -> Result<(), Error> {
        let gitter = self.ctx.gitter.as_ref();
        if tokio::fs::try_exists(dir.join(".git")).await? {
            debug!("Promote: reusing checkout {}", dir.display());
        } else {
            if let Some(parent) = dir.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            gitter.clone_repo(url, dir).await?;
        }
        gitter.reset_to_upstream(dir, base).await
    }
}
