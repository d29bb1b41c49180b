use std::sync::Mutex;

use async_trait::async_trait;
use jx_common::{
    error::Error,
    helm::{Helmer, ReleaseSummary, UpgradeChartOptions},
};

#[derive(Debug, Default)]
struct FakeHelmState {
    upgrades: Vec<UpgradeChartOptions>,
    repo_updates: usize,
    fail_upgrades: Option<String>,
}

/// Records helm calls instead of running them.
#[derive(Debug, Default)]
pub struct FakeHelmer {
    state: Mutex<FakeHelmState>,
}

impl FakeHelmer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upgrade fail with `message`.
    pub fn fail_upgrades(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_upgrades = Some(message.to_string());
        }
    }

    pub fn upgrades(&self) -> Vec<UpgradeChartOptions> {
        self.state
            .lock()
            .map(|s| s.upgrades.clone())
            .unwrap_or_default()
    }

    pub fn repo_updates(&self) -> usize {
        self.state.lock().map(|s| s.repo_updates).unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeHelmState) -> T) -> Result<T, Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Internal("fake helm state lock poisoned".to_string()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl Helmer for FakeHelmer {
    async fn update_repo(&self) -> Result<(), Error> {
        self.with_state(|s| s.repo_updates += 1)
    }

    async fn upgrade_chart(&self, options: &UpgradeChartOptions) -> Result<(), Error> {
        self.with_state(|s| {
            s.upgrades.push(options.clone());
            match &s.fail_upgrades {
                Some(message) => Err(Error::Helm(message.clone())),
                None => Ok(()),
            }
        })?
    }

    async fn delete_release(&self, _namespace: &str, release_name: &str) -> Result<(), Error> {
        self.with_state(|s| {
            let before = s.upgrades.len();
            s.upgrades.retain(|u| u.release_name != release_name);
            if s.upgrades.len() == before {
                Err(Error::not_found("HelmRelease", release_name))
            } else {
                Ok(())
            }
        })?
    }

    async fn status_releases(&self, namespace: &str) -> Result<Vec<ReleaseSummary>, Error> {
        self.with_state(|s| {
            s.upgrades
                .iter()
                .filter(|u| u.namespace == namespace)
                .map(|u| ReleaseSummary {
                    name: u.release_name.clone(),
                    namespace: u.namespace.clone(),
                    chart: u.chart.clone(),
                    app_version: u.version.clone().unwrap_or_default(),
                    status: "deployed".to_string(),
                })
                .collect()
        })
    }
}
