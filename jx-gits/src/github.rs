use async_trait::async_trait;
use jx_common::{
    error::Error,
    git::{CommitStatusState, GitProvider, GitRepository, PullRequest, PullRequestArguments},
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// [GitProvider] for github.com and GitHub Enterprise.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    /// API root, e.g. "https://api.github.com"
    base_url: String,
    token: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GhOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhRepository {
    name: String,
    owner: GhOwner,
    clone_url: String,
    html_url: String,
    #[serde(default)]
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    html_url: String,
    state: String,
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    head: GhRef,
    base: GhRef,
}

#[derive(Debug, Deserialize)]
struct GhCombinedStatus {
    state: String,
}

#[derive(Debug, Serialize)]
struct GhCreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Serialize)]
struct GhMergePullRequest<'a> {
    commit_title: &'a str,
    merge_method: &'a str,
}

impl GhPullRequest {
    fn into_domain(self, owner: &str, repository: &str) -> PullRequest {
        let merged = self.merged.unwrap_or(false);
        PullRequest {
            owner: owner.to_string(),
            repository: repository.to_string(),
            number: self.number,
            url: self.html_url,
            head_branch: self.head.name,
            base_branch: self.base.name,
            state: Some(self.state),
            merged: Some(merged),
            mergeable: self.mergeable,
            last_commit_sha: Some(self.head.sha),
            // GitHub fills this with a test merge commit before the merge happens
            merge_commit_sha: self.merge_commit_sha.filter(|_| merged),
        }
    }
}

/// Maps an unsuccessful response to a domain error.
/// ---
/// Rate limiting and 5xx responses are transient.
fn api_error(status: StatusCode, message: String) -> Error {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::TransientApi(format!("GitHub API error (status {status}): {message}"))
    } else if status == StatusCode::NOT_FOUND {
        Error::not_found("GitHub resource", message)
    } else {
        Error::Git(format!("GitHub API error (status {status}): {message}"))
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::TransientApi(format!("GitHub request failed: {e}"))
    } else {
        Error::Git(format!("GitHub request failed: {e}"))
    }
}

impl GitHubProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "jx");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let response = self
            .with_headers(request)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status, error_text));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Git(format!("Failed to parse GitHub response: {e}")))
    }

    fn repo_url(&self, owner: &str, repository: &str) -> String {
        format!("{}/repos/{}/{}", self.base_url, owner, repository)
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn kind(&self) -> &str {
        "github"
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<GitRepository, Error> {
        let repo: GhRepository = self
            .send(self.client.get(self.repo_url(owner, name)))
            .await?;

        Ok(GitRepository {
            owner: repo.owner.login,
            name: repo.name,
            clone_url: repo.clone_url,
            html_url: repo.html_url,
            default_branch: repo.default_branch,
        })
    }

    async fn create_pull_request(
        &self,
        args: &PullRequestArguments,
    ) -> Result<PullRequest, Error> {
        let url = format!("{}/pulls", self.repo_url(&args.owner, &args.repository));
        let body = GhCreatePullRequest {
            title: &args.title,
            body: &args.body,
            head: &args.head,
            base: &args.base,
        };

        let pr: GhPullRequest = self.send(self.client.post(url).json(&body)).await?;
        debug!("GitHubProvider: created pull request {}", pr.html_url);
        Ok(pr.into_domain(&args.owner, &args.repository))
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequest, Error> {
        let url = format!("{}/pulls/{}", self.repo_url(owner, repository), number);
        let pr: GhPullRequest = self.send(self.client.get(url)).await?;
        Ok(pr.into_domain(owner, repository))
    }

    async fn update_pull_request_status(&self, pr: &mut PullRequest) -> Result<(), Error> {
        let latest = self
            .get_pull_request(&pr.owner, &pr.repository, pr.number)
            .await?;
        *pr = latest;
        Ok(())
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, Error> {
        let url = format!(
            "{}/pulls?state=open&per_page=100",
            self.repo_url(owner, repository)
        );
        let prs: Vec<GhPullRequest> = self.send(self.client.get(url)).await?;
        Ok(prs
            .into_iter()
            .map(|pr| pr.into_domain(owner, repository))
            .collect())
    }

    async fn pull_request_last_commit_status(
        &self,
        pr: &PullRequest,
    ) -> Result<CommitStatusState, Error> {
        let sha = match &pr.last_commit_sha {
            Some(sha) => sha.clone(),
            None => self
                .get_pull_request(&pr.owner, &pr.repository, pr.number)
                .await?
                .last_commit_sha
                .ok_or_else(|| {
                    Error::Git(format!("pull request {} has no head commit", pr.url))
                })?,
        };

        let url = format!(
            "{}/commits/{}/status",
            self.repo_url(&pr.owner, &pr.repository),
            sha
        );
        let status: GhCombinedStatus = self.send(self.client.get(url)).await?;
        Ok(status.state.parse().unwrap_or_default())
    }

    async fn merge_pull_request(&self, pr: &PullRequest, message: &str) -> Result<(), Error> {
        let url = format!(
            "{}/pulls/{}/merge",
            self.repo_url(&pr.owner, &pr.repository),
            pr.number
        );
        let body = GhMergePullRequest {
            commit_title: message,
            merge_method: "merge",
        };
        let _: serde_json::Value = self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PR_JSON: &str = r#"{
        "number": 7,
        "html_url": "https://github.com/acme/environment-staging/pull/7",
        "state": "open",
        "merged": false,
        "mergeable": true,
        "merge_commit_sha": "test-merge",
        "head": {"ref": "promote-cheese-1.0.0", "sha": "abc123"},
        "base": {"ref": "master", "sha": "def456"}
    }"#;

    #[test]
    fn test_unmerged_pull_request_drops_test_merge_sha() {
        let pr: GhPullRequest = serde_json::from_str(PR_JSON).unwrap();
        let pr = pr.into_domain("acme", "environment-staging");
        assert_eq!(pr.number, 7);
        assert_eq!(pr.head_branch, "promote-cheese-1.0.0");
        assert_eq!(pr.last_commit_sha.as_deref(), Some("abc123"));
        assert_eq!(pr.merge_commit_sha, None);
        assert!(!pr.is_merged());
        assert!(!pr.is_closed());
    }

    #[test]
    fn test_api_error_classification() {
        assert!(api_error(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(api_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(api_error(StatusCode::NOT_FOUND, String::new()).is_not_found());
        assert!(matches!(
            api_error(StatusCode::FORBIDDEN, String::new()),
            Error::Git(_)
        ));
    }

    #[tokio::test]
    async fn test_get_pull_request_and_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/environment-staging/pulls/7")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PR_JSON)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/environment-staging/commits/abc123/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state": "failure"}"#)
            .create_async()
            .await;

        let provider = GitHubProvider::new(server.url(), Some("token".to_string()));
        let pr = provider
            .get_pull_request("acme", "environment-staging", 7)
            .await
            .unwrap();
        assert_eq!(pr.url, "https://github.com/acme/environment-staging/pull/7");

        let status = provider.pull_request_last_commit_status(&pr).await.unwrap();
        assert_eq!(status, CommitStatusState::Failure);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/repos/acme/env/pulls/3/merge")
            .with_status(503)
            .with_body("try later")
            .create_async()
            .await;

        let provider = GitHubProvider::new(server.url(), None);
        let pr = PullRequest {
            owner: "acme".to_string(),
            repository: "env".to_string(),
            number: 3,
            ..Default::default()
        };
        let err = provider.merge_pull_request(&pr, "merge").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
