use std::{path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use jx_common::{error::Error, git::Gitter};
use tokio::{process::Command, time::timeout};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// [Gitter] backed by the `git` binary on the `PATH`.
#[derive(Clone, Debug)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
    user_name: String,
    user_email: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_name: "jenkins-x-bot".to_string(),
            user_email: "jenkins-x@googlegroups.com".to_string(),
        }
    }

    /// Author used for promotion commits.
    pub fn with_identity(mut self, name: &str, email: &str) -> Self {
        self.user_name = name.to_string();
        self.user_email = email.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs git with `args` inside `dir` and returns trimmed stdout.
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, Error> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        debug!("GitCli: git {}", args.join(" "));

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "git {} did not finish within {:?}",
                    args.join(" "),
                    self.timeout
                ))
            })?
            .map_err(|e| Error::Git(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "git {} failed with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn dir_str(dir: &Path) -> Result<&str, Error> {
        dir.to_str()
            .ok_or_else(|| Error::Git(format!("non UTF-8 path {}", dir.display())))
    }
}

/// Branch names from `git ls-remote --heads` output.
pub(crate) fn parse_ls_remote_heads(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|r| r.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Gitter for GitCli {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), Error> {
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run(None, &["clone", url, Self::dir_str(dir)?]).await?;
        Ok(())
    }

    async fn reset_to_upstream(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        let upstream = format!("origin/{branch}");
        self.run(Some(dir), &["fetch", "origin"]).await?;
        self.run(Some(dir), &["checkout", "-B", branch, &upstream])
            .await?;
        self.run(Some(dir), &["reset", "--hard", &upstream]).await?;
        self.run(Some(dir), &["clean", "-fd"]).await?;
        Ok(())
    }

    async fn remote_branch_names(&self, dir: &Path) -> Result<Vec<String>, Error> {
        let output = self
            .run(Some(dir), &["ls-remote", "--heads", "origin"])
            .await?;
        Ok(parse_ls_remote_heads(&output))
    }

    async fn create_branch(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        self.run(Some(dir), &["checkout", "-b", branch]).await?;
        Ok(())
    }

    async fn add_all(&self, dir: &Path) -> Result<(), Error> {
        self.run(Some(dir), &["add", "--all"]).await?;
        Ok(())
    }

    async fn has_changes(&self, dir: &Path) -> Result<bool, Error> {
        let output = self.run(Some(dir), &["status", "--porcelain"]).await?;
        Ok(!output.is_empty())
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<(), Error> {
        let name = format!("user.name={}", self.user_name);
        let email = format!("user.email={}", self.user_email);
        self.run(
            Some(dir),
            &["-c", &name, "-c", &email, "commit", "-m", message],
        )
        .await?;
        Ok(())
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        self.run(Some(dir), &["push", "origin", branch]).await?;
        Ok(())
    }
}
