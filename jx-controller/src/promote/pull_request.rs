use std::collections::HashSet;

use jx_common::{
    activity::StepEvent,
    common::poll::{RetryPolicy, retry_with_backoff},
    error::Error,
    git::{CommitStatusState, GitProvider, PullRequest, PullRequestRef},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a single look at a promotion pull request found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullRequestProgress {
    Merged { merge_commit_sha: Option<String> },
    /// Closed without being merged.
    Closed,
    /// The last commit has a failing status.
    Failed { status: CommitStatusState },
    Pending,
}

impl PullRequestProgress {
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Step event recording this progress, if it ends the step.
    pub fn step_event(&self) -> Option<StepEvent> {
        match self {
            Self::Merged { merge_commit_sha } => Some(StepEvent::PullRequestMerged {
                merge_commit_sha: merge_commit_sha.clone(),
            }),
            Self::Closed => Some(StepEvent::PullRequestClosed),
            Self::Failed { status } => Some(StepEvent::CommitStatusFailed {
                state: status.to_string(),
            }),
            Self::Pending => None,
        }
    }
}

/// Fetches the pull request a step recorded by its URL.
pub async fn pull_request_for_url(
    provider: &dyn GitProvider,
    retry: &RetryPolicy,
    url: &str,
) -> Result<PullRequest, Error> {
    let pr_ref = PullRequestRef::parse(url)?;
    retry_with_backoff(retry, "get pull request", || {
        provider.get_pull_request(&pr_ref.owner, &pr_ref.repository, pr_ref.number)
    })
    .await
}

/// Single step check of a promotion pull request.
/// ---
/// Shared by the blocking wait of `jx promote` and the controller, which
/// calls it once per pass. Warnings about merge failures and unmergeable
/// pull requests are logged once per pull request.
#[derive(Debug, Default)]
pub struct PullRequestChecker {
    warned: Mutex<HashSet<String>>,
}

impl PullRequestChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes `pr` and decides where the promotion stands.
    /// ---
    /// A successful last commit status triggers a merge unless
    /// `no_merge_pull_request` is set. A failed merge is logged and the
    /// pull request stays `Pending`.
    pub async fn check(
        &self,
        provider: &dyn GitProvider,
        retry: &RetryPolicy,
        pr: &mut PullRequest,
        no_merge_pull_request: bool,
    ) -> Result<PullRequestProgress, Error> {
        *pr = refresh(provider, retry, pr).await?;

        if pr.is_merged() {
            info!("PullRequest [{}]: merged", pr.url);
            return Ok(PullRequestProgress::Merged {
                merge_commit_sha: pr.merge_commit_sha.clone(),
            });
        }
        if pr.is_closed() {
            warn!("PullRequest [{}]: closed without being merged", pr.url);
            return Ok(PullRequestProgress::Closed);
        }

        let current: &PullRequest = pr;
        let status = retry_with_backoff(retry, "get commit status", || {
            provider.pull_request_last_commit_status(current)
        })
        .await?;

        if status.is_failed() {
            warn!("PullRequest [{}]: last commit status is {}", pr.url, status);
            return Ok(PullRequestProgress::Failed { status });
        }

        if pr.mergeable == Some(false) {
            self.warn_once(&format!("{}#mergeable", pr.url), || {
                warn!(
                    "PullRequest [{}]: not mergeable, it may need a rebase",
                    pr.url
                )
            })
            .await;
        }

        if status == CommitStatusState::Success && !no_merge_pull_request {
            let message = format!("Promote merge of {}", pr.url);
            match provider.merge_pull_request(pr, &message).await {
                Ok(()) => {
                    info!("PullRequest [{}]: merged after successful checks", pr.url);
                    *pr = refresh(provider, retry, pr).await?;
                    if pr.is_merged() {
                        return Ok(PullRequestProgress::Merged {
                            merge_commit_sha: pr.merge_commit_sha.clone(),
                        });
                    }
                }
                Err(e) => {
                    self.warn_once(&format!("{}#merge", pr.url), || {
                        warn!(
                            "PullRequest [{}]: failed to merge, maybe I don't have karma? {}",
                            pr.url, e
                        )
                    })
                    .await;
                }
            }
        }

        debug!("PullRequest [{}]: waiting, last commit status {}", pr.url, status);
        Ok(PullRequestProgress::Pending)
    }

    async fn warn_once(&self, key: &str, log: impl FnOnce()) {
        if self.warned.lock().await.insert(key.to_string()) {
            log();
        }
    }
}

async fn refresh(
    provider: &dyn GitProvider,
    retry: &RetryPolicy,
    pr: &PullRequest,
) -> Result<PullRequest, Error> {
    retry_with_backoff(retry, "update pull request status", || {
        let mut current = pr.clone();
        async move {
            provider.update_pull_request_status(&mut current).await?;
            Ok(current)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use jx_common::git::PullRequestArguments;
    use jx_gits::fake::FakeGitProvider;

    use super::*;

    async fn open_pull_request(provider: &FakeGitProvider) -> PullRequest {
        provider
            .create_pull_request(&PullRequestArguments {
                owner: "acme".to_string(),
                repository: "environment-staging".to_string(),
                title: "chore: cheese to 1.0.0".to_string(),
                head: "promote-cheese-1.0.0".to_string(),
                base: "master".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pending_until_merged() {
        let provider = FakeGitProvider::new();
        let checker = PullRequestChecker::new();
        let retry = RetryPolicy::default();
        let mut pr = open_pull_request(&provider).await;

        let progress = checker.check(&provider, &retry, &mut pr, false).await.unwrap();
        assert_eq!(progress, PullRequestProgress::Pending);

        provider.set_pull_request_merged(&pr.url).unwrap();
        let progress = checker.check(&provider, &retry, &mut pr, false).await.unwrap();
        assert_eq!(
            progress,
            PullRequestProgress::Merged {
                merge_commit_sha: Some("merge-1".to_string())
            }
        );
        assert!(matches!(
            progress.step_event(),
            Some(StepEvent::PullRequestMerged { .. })
        ));
    }

    #[tokio::test]
    async fn test_successful_status_merges() {
        let provider = FakeGitProvider::new();
        let checker = PullRequestChecker::new();
        let mut pr = open_pull_request(&provider).await;
        provider
            .set_commit_status(&pr.url, CommitStatusState::Success)
            .unwrap();

        let progress = checker
            .check(&provider, &RetryPolicy::default(), &mut pr, false)
            .await
            .unwrap();
        assert!(matches!(progress, PullRequestProgress::Merged { .. }));
        assert_eq!(provider.merge_calls(), vec![pr.url.clone()]);
    }

    #[tokio::test]
    async fn test_no_merge_leaves_pull_request_open() {
        let provider = FakeGitProvider::new();
        let checker = PullRequestChecker::new();
        let mut pr = open_pull_request(&provider).await;
        provider
            .set_commit_status(&pr.url, CommitStatusState::Success)
            .unwrap();

        let progress = checker
            .check(&provider, &RetryPolicy::default(), &mut pr, true)
            .await
            .unwrap();
        assert_eq!(progress, PullRequestProgress::Pending);
        assert!(provider.merge_calls().is_empty());
    }

    #[tokio::test]
    async fn test_merge_failure_keeps_polling() {
        let provider = FakeGitProvider::new();
        let checker = PullRequestChecker::new();
        let retry = RetryPolicy::default();
        let mut pr = open_pull_request(&provider).await;
        provider
            .set_commit_status(&pr.url, CommitStatusState::Success)
            .unwrap();
        provider.set_merge_fails(true).unwrap();

        for _ in 0..3 {
            let progress = checker.check(&provider, &retry, &mut pr, false).await.unwrap();
            assert_eq!(progress, PullRequestProgress::Pending);
        }
        assert_eq!(provider.merge_calls().len(), 3);
        assert_eq!(checker.warned.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_and_failed_status() {
        let provider = FakeGitProvider::new();
        let checker = PullRequestChecker::new();
        let retry = RetryPolicy::default();

        let mut failing = open_pull_request(&provider).await;
        provider
            .set_commit_status(&failing.url, CommitStatusState::Error)
            .unwrap();
        let progress = checker
            .check(&provider, &retry, &mut failing, false)
            .await
            .unwrap();
        assert_eq!(
            progress,
            PullRequestProgress::Failed {
                status: CommitStatusState::Error
            }
        );
        assert_eq!(
            progress.step_event(),
            Some(StepEvent::CommitStatusFailed {
                state: "error".to_string()
            })
        );

        let mut closed = open_pull_request(&provider).await;
        provider.set_pull_request_closed(&closed.url).unwrap();
        let progress = checker.check(&provider, &retry, &mut closed, false).await.unwrap();
        assert_eq!(progress, PullRequestProgress::Closed);
        assert!(progress.is_done());
    }

    #[tokio::test]
    async fn test_pull_request_for_url() {
        let provider = FakeGitProvider::new();
        let pr = open_pull_request(&provider).await;
        let found = pull_request_for_url(&provider, &RetryPolicy::default(), &pr.url)
            .await
            .unwrap();
        assert_eq!(found.number, pr.number);
        assert_eq!(found.head_branch, "promote-cheese-1.0.0");
    }
}
