use std::sync::Arc;

use jx_common::{
    common::poll::RetryPolicy,
    git::{GitProvider, Gitter},
    helm::Helmer,
    state::KubeClient,
};

/// Collaborators shared by the promotion engine and the workflow controller.
#[derive(Clone, Debug)]
pub struct JxContext {
    pub kube: Arc<dyn KubeClient>,
    pub git_provider: Arc<dyn GitProvider>,
    pub gitter: Arc<dyn Gitter>,
    pub helmer: Arc<dyn Helmer>,
    /// Backoff for `Error::TransientApi` failures of the collaborators.
    pub retry: RetryPolicy,
}

impl JxContext {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        git_provider: Arc<dyn GitProvider>,
        gitter: Arc<dyn Gitter>,
        helmer: Arc<dyn Helmer>,
    ) -> Self {
        Self {
            kube,
            git_provider,
            gitter,
            helmer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
