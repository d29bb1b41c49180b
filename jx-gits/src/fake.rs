//! In-memory git collaborators for tests and dry runs.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use jx_common::{
    error::Error,
    git::{
        CommitStatusState, GitProvider, GitRepository, GitRepositoryInfo, Gitter, PullRequest,
        PullRequestArguments, PullRequestRef,
    },
};

const FAKE_HOST: &str = "fake.git";

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Error> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("fake git state lock poisoned".to_string()))
}

#[derive(Debug, Default)]
struct FakeRepository {
    repository: GitRepository,
    pull_requests: BTreeMap<u64, FakePullRequest>,
}

#[derive(Debug, Clone)]
struct FakePullRequest {
    pr: PullRequest,
    title: String,
    last_commit_status: CommitStatusState,
}

#[derive(Debug, Default)]
struct ProviderState {
    repositories: BTreeMap<String, FakeRepository>,
    next_number: u64,
    merge_fails: bool,
    merge_calls: Vec<String>,
}

/// A [GitProvider] whose pull requests are driven by the test.
#[derive(Debug, Default)]
pub struct FakeGitProvider {
    state: Mutex<ProviderState>,
}

impl FakeGitProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone URL the fake uses for `owner/name`.
    pub fn repository_url(owner: &str, name: &str) -> String {
        format!("https://{FAKE_HOST}/{owner}/{name}.git")
    }

    pub fn add_repository(&self, owner: &str, name: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        Self::ensure_repository(&mut state, owner, name);
        Ok(())
    }

    fn ensure_repository<'a>(
        state: &'a mut ProviderState,
        owner: &str,
        name: &str,
    ) -> &'a mut FakeRepository {
        state
            .repositories
            .entry(format!("{owner}/{name}"))
            .or_insert_with(|| FakeRepository {
                repository: GitRepository {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    clone_url: Self::repository_url(owner, name),
                    html_url: format!("https://{FAKE_HOST}/{owner}/{name}"),
                    default_branch: "master".to_string(),
                },
                pull_requests: BTreeMap::new(),
            })
    }

    fn find_pull_request<'a>(
        state: &'a mut ProviderState,
        url: &str,
    ) -> Result<&'a mut FakePullRequest, Error> {
        let pr_ref = PullRequestRef::parse(url)?;
        state
            .repositories
            .get_mut(&format!("{}/{}", pr_ref.owner, pr_ref.repository))
            .and_then(|repo| repo.pull_requests.get_mut(&pr_ref.number))
            .ok_or_else(|| Error::not_found("PullRequest", url))
    }

    /// All pull requests of a repository, oldest first.
    pub fn pull_requests(&self, owner: &str, name: &str) -> Vec<PullRequest> {
        lock(&self.state)
            .map(|state| {
                state
                    .repositories
                    .get(&format!("{owner}/{name}"))
                    .map(|repo| repo.pull_requests.values().map(|p| p.pr.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn pull_request_title(&self, url: &str) -> Result<String, Error> {
        let mut state = lock(&self.state)?;
        Ok(Self::find_pull_request(&mut state, url)?.title.clone())
    }

    /// Marks the pull request merged, as a reviewer would.
    pub fn set_pull_request_merged(&self, url: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let fake = Self::find_pull_request(&mut state, url)?;
        fake.pr.merged = Some(true);
        fake.pr.state = Some("closed".to_string());
        fake.pr.merge_commit_sha = Some(format!("merge-{}", fake.pr.number));
        Ok(())
    }

    pub fn set_pull_request_closed(&self, url: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let fake = Self::find_pull_request(&mut state, url)?;
        fake.pr.merged = Some(false);
        fake.pr.state = Some("closed".to_string());
        Ok(())
    }

    pub fn set_commit_status(&self, url: &str, status: CommitStatusState) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        Self::find_pull_request(&mut state, url)?.last_commit_status = status;
        Ok(())
    }

    pub fn set_mergeable(&self, url: &str, mergeable: bool) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        Self::find_pull_request(&mut state, url)?.pr.mergeable = Some(mergeable);
        Ok(())
    }

    /// Makes `merge_pull_request` fail, like a bot without merge permission.
    pub fn set_merge_fails(&self, fails: bool) -> Result<(), Error> {
        lock(&self.state)?.merge_fails = fails;
        Ok(())
    }

    /// URLs passed to `merge_pull_request`, including failed attempts.
    pub fn merge_calls(&self) -> Vec<String> {
        lock(&self.state)
            .map(|state| state.merge_calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GitProvider for FakeGitProvider {
    fn kind(&self) -> &str {
        "fake"
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<GitRepository, Error> {
        let state = lock(&self.state)?;
        state
            .repositories
            .get(&format!("{owner}/{name}"))
            .map(|repo| repo.repository.clone())
            .ok_or_else(|| Error::not_found("GitRepository", format!("{owner}/{name}")))
    }

    async fn create_pull_request(
        &self,
        args: &PullRequestArguments,
    ) -> Result<PullRequest, Error> {
        let mut state = lock(&self.state)?;
        state.next_number += 1;
        let number = state.next_number;

        let repo = Self::ensure_repository(&mut state, &args.owner, &args.repository);
        let pr = PullRequest {
            owner: args.owner.clone(),
            repository: args.repository.clone(),
            number,
            url: format!(
                "https://{FAKE_HOST}/{}/{}/pulls/{}",
                args.owner, args.repository, number
            ),
            head_branch: args.head.clone(),
            base_branch: args.base.clone(),
            state: Some("open".to_string()),
            merged: Some(false),
            mergeable: Some(true),
            last_commit_sha: Some(format!("head-{number}")),
            merge_commit_sha: None,
        };

        repo.pull_requests.insert(
            number,
            FakePullRequest {
                pr: pr.clone(),
                title: args.title.clone(),
                last_commit_status: CommitStatusState::Pending,
            },
        );
        Ok(pr)
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequest, Error> {
        let state = lock(&self.state)?;
        state
            .repositories
            .get(&format!("{owner}/{repository}"))
            .and_then(|repo| repo.pull_requests.get(&number))
            .map(|fake| fake.pr.clone())
            .ok_or_else(|| {
                Error::not_found("PullRequest", format!("{owner}/{repository}#{number}"))
            })
    }

    async fn update_pull_request_status(&self, pr: &mut PullRequest) -> Result<(), Error> {
        *pr = self
            .get_pull_request(&pr.owner, &pr.repository, pr.number)
            .await?;
        Ok(())
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, Error> {
        Ok(self
            .pull_requests(owner, repository)
            .into_iter()
            .filter(|pr| pr.state.as_deref() == Some("open"))
            .collect())
    }

    async fn pull_request_last_commit_status(
        &self,
        pr: &PullRequest,
    ) -> Result<CommitStatusState, Error> {
        let mut state = lock(&self.state)?;
        Ok(Self::find_pull_request(&mut state, &pr.url)?.last_commit_status)
    }

    async fn merge_pull_request(&self, pr: &PullRequest, _message: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        state.merge_calls.push(pr.url.clone());
        if state.merge_fails {
            return Err(Error::Git(format!(
                "not allowed to merge pull request {}",
                pr.url
            )));
        }
        drop(state);
        self.set_pull_request_merged(&pr.url)
    }
}

#[derive(Debug, Default)]
struct FakeRemote {
    branches: BTreeSet<String>,
    /// Files on the default branch, relative path to content.
    files: BTreeMap<String, String>,
}

#[derive(Debug)]
struct FakeCheckout {
    url: String,
    branch: String,
    committed: BTreeMap<String, String>,
    staged: bool,
}

/// A commit pushed through [FakeGitter].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCommit {
    pub url: String,
    pub branch: String,
    pub message: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct GitterState {
    remotes: HashMap<String, FakeRemote>,
    checkouts: HashMap<PathBuf, FakeCheckout>,
    local_commits: HashMap<PathBuf, Vec<FakeCommit>>,
    pushed: Vec<FakeCommit>,
}

/// A [Gitter] that works on real directories but keeps remotes in memory.
#[derive(Debug, Default)]
pub struct FakeGitter {
    state: Mutex<GitterState>,
}

fn remote_key(url: &str) -> String {
    GitRepositoryInfo::parse(url)
        .map(|info| format!("{}/{}/{}", info.host, info.organisation, info.name))
        .unwrap_or_else(|_| url.to_string())
}

fn read_tree(root: &Path) -> Result<BTreeMap<String, String>, Error> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.file_name().is_some_and(|n| n == ".git") {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                let rel = rel.to_string_lossy().replace('\\', "/");
                files.insert(rel, std::fs::read_to_string(&path)?);
            }
        }
    }

    Ok(files)
}

fn write_tree(root: &Path, files: &BTreeMap<String, String>) -> Result<(), Error> {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(())
}

impl FakeGitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `content` at `path` on the default branch of the remote `url`.
    pub fn seed_file(&self, url: &str, path: &str, content: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let remote = state.remotes.entry(remote_key(url)).or_default();
        remote.branches.insert("master".to_string());
        remote.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    /// Commits pushed to any remote, in push order.
    pub fn pushed_commits(&self) -> Vec<FakeCommit> {
        lock(&self.state)
            .map(|state| state.pushed.clone())
            .unwrap_or_default()
    }

    fn checkout_mut<'a>(
        state: &'a mut GitterState,
        dir: &Path,
    ) -> Result<&'a mut FakeCheckout, Error> {
        state
            .checkouts
            .get_mut(dir)
            .ok_or_else(|| Error::Git(format!("{} is not a git checkout", dir.display())))
    }
}

#[async_trait]
impl Gitter for FakeGitter {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let remote = state.remotes.entry(remote_key(url)).or_default();
        remote.branches.insert("master".to_string());
        let files = remote.files.clone();

        std::fs::create_dir_all(dir.join(".git"))?;
        write_tree(dir, &files)?;

        state.checkouts.insert(
            dir.to_path_buf(),
            FakeCheckout {
                url: url.to_string(),
                branch: "master".to_string(),
                committed: files,
                staged: false,
            },
        );
        Ok(())
    }

    async fn reset_to_upstream(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let url = Self::checkout_mut(&mut state, dir)?.url.clone();
        let files = state
            .remotes
            .get(&remote_key(&url))
            .map(|r| r.files.clone())
            .unwrap_or_default();

        for rel in read_tree(dir)?.keys() {
            std::fs::remove_file(dir.join(rel))?;
        }
        write_tree(dir, &files)?;

        let checkout = Self::checkout_mut(&mut state, dir)?;
        checkout.branch = branch.to_string();
        checkout.committed = files;
        checkout.staged = false;
        Ok(())
    }

    async fn remote_branch_names(&self, dir: &Path) -> Result<Vec<String>, Error> {
        let mut state = lock(&self.state)?;
        let url = Self::checkout_mut(&mut state, dir)?.url.clone();
        Ok(state
            .remotes
            .get(&remote_key(&url))
            .map(|r| r.branches.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_branch(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        Self::checkout_mut(&mut state, dir)?.branch = branch.to_string();
        Ok(())
    }

    async fn add_all(&self, dir: &Path) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        Self::checkout_mut(&mut state, dir)?.staged = true;
        Ok(())
    }

    async fn has_changes(&self, dir: &Path) -> Result<bool, Error> {
        let mut state = lock(&self.state)?;
        let checkout = Self::checkout_mut(&mut state, dir)?;
        Ok(read_tree(dir)? != checkout.committed)
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let files = read_tree(dir)?;
        let checkout = Self::checkout_mut(&mut state, dir)?;
        if !checkout.staged || files == checkout.committed {
            return Err(Error::Git(format!("nothing to commit in {}", dir.display())));
        }

        checkout.committed = files.clone();
        checkout.staged = false;
        let commit = FakeCommit {
            url: checkout.url.clone(),
            branch: checkout.branch.clone(),
            message: message.to_string(),
            files,
        };
        state
            .local_commits
            .entry(dir.to_path_buf())
            .or_default()
            .push(commit);
        Ok(())
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        let mut state = lock(&self.state)?;
        let url = Self::checkout_mut(&mut state, dir)?.url.clone();
        let commits: Vec<FakeCommit> = state
            .local_commits
            .remove(dir)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| c.branch == branch)
            .collect();

        state
            .remotes
            .entry(remote_key(&url))
            .or_default()
            .branches
            .insert(branch.to_string());
        state.pushed.extend(commits);
        Ok(())
    }
}
