use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeChartOptions {
    /// `<repo>/<chart>`
    pub chart: String,
    pub release_name: String,
    pub namespace: String,
    pub version: Option<String>,
    pub wait: bool,
    pub timeout: Option<Duration>,
}

/// One installed release as reported by `helm list`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub name: String,
    pub namespace: String,
    pub chart: String,
    pub app_version: String,
    pub status: String,
}

/// Helm operations used by non-GitOps promotions.
#[async_trait]
pub trait Helmer: Send + Sync + Debug + 'static {
    async fn update_repo(&self) -> Result<(), Error>;

    async fn upgrade_chart(&self, options: &UpgradeChartOptions) -> Result<(), Error>;

    async fn delete_release(&self, namespace: &str, release_name: &str) -> Result<(), Error>;

    async fn status_releases(&self, namespace: &str) -> Result<Vec<ReleaseSummary>, Error>;
}
