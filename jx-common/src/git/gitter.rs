use std::{fmt::Debug, path::Path};

use async_trait::async_trait;

use crate::error::Error;

/// Local git operations on an environment checkout.
#[async_trait]
pub trait Gitter: Send + Sync + Debug + 'static {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), Error>;

    /// Fetches `origin` and hard resets the checkout onto `origin/<branch>`.
    async fn reset_to_upstream(&self, dir: &Path, branch: &str) -> Result<(), Error>;

    /// Branch names present on `origin`.
    async fn remote_branch_names(&self, dir: &Path) -> Result<Vec<String>, Error>;

    /// Creates `branch` at the current commit and checks it out.
    async fn create_branch(&self, dir: &Path, branch: &str) -> Result<(), Error>;

    async fn add_all(&self, dir: &Path) -> Result<(), Error>;

    async fn has_changes(&self, dir: &Path) -> Result<bool, Error>;

    async fn commit(&self, dir: &Path, message: &str) -> Result<(), Error>;

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), Error>;
}
