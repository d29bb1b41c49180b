use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::Error;

use super::{CommitStatusState, GitRepository, PullRequest, PullRequestArguments};

/// Hosted git service holding the environment repositories.
/// ---
/// Implementations map HTTP 5xx and connection failures to
/// `Error::TransientApi` so callers can retry them.
#[async_trait]
pub trait GitProvider: Send + Sync + Debug + 'static {
    /// Short name of the provider, e.g. `github`.
    fn kind(&self) -> &str;

    async fn get_repository(&self, owner: &str, name: &str) -> Result<GitRepository, Error>;

    async fn create_pull_request(&self, args: &PullRequestArguments)
    -> Result<PullRequest, Error>;

    async fn get_pull_request(
        &self,
        owner: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequest, Error>;

    /// Refreshes the merged, state and mergeable fields of `pr` in place.
    async fn update_pull_request_status(&self, pr: &mut PullRequest) -> Result<(), Error>;

    /// Lists open pull requests of a repository.
    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, Error>;

    /// Combined status of the last commit on the pull request branch.
    async fn pull_request_last_commit_status(
        &self,
        pr: &PullRequest,
    ) -> Result<CommitStatusState, Error>;

    async fn merge_pull_request(&self, pr: &PullRequest, message: &str) -> Result<(), Error>;
}
