#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use jx_common::{
    activity::{ActivityStatus, PipelineActivity, PromoteStep},
    common::poll::RetryPolicy,
    environment::{Environment, PromotionStrategy},
    git::PullRequest,
    state::{ActivityStoreTrait, EnvironmentStoreTrait, WorkflowStoreTrait},
    workflow::Workflow,
};
use jx_controller::{ControllerConfig, JxContext, WorkflowController};
use jx_gits::fake::{FakeGitProvider, FakeGitter};
use jx_helm::fake::FakeHelmer;
use jx_state::MemoryStateDb;
use tempfile::TempDir;

pub const OWNER: &str = "acme";
pub const APP: &str = "cheese";
pub const PIPELINE: &str = "acme/cheese/master";

pub const REQUIREMENTS: &str = "dependencies:
- name: exposecontroller
  version: 2.3.82
  repository: https://chartmuseum.build.cd.jenkins-x.io
";

/// A controller wired to in-memory collaborators.
pub struct Harness {
    pub db: Arc<MemoryStateDb>,
    pub provider: Arc<FakeGitProvider>,
    pub gitter: Arc<FakeGitter>,
    pub helmer: Arc<FakeHelmer>,
    pub controller: WorkflowController,
    _environments_dir: TempDir,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        no_watch: true,
        pull_request_poll_interval: Duration::from_millis(10),
        resync_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let db = Arc::new(MemoryStateDb::new("jx"));
        let provider = Arc::new(FakeGitProvider::new());
        let gitter = Arc::new(FakeGitter::new());
        let helmer = Arc::new(FakeHelmer::new());
        let environments_dir = tempfile::tempdir().unwrap();

        let ctx = JxContext::new(
            db.clone(),
            provider.clone(),
            gitter.clone(),
            helmer.clone(),
        )
        .with_retry(fast_retry());
        let controller = WorkflowController::new(ctx, config, environments_dir.path());

        Self {
            db,
            provider,
            gitter,
            helmer,
            controller,
            _environments_dir: environments_dir,
        }
    }

    pub fn environment_repository(env: &str) -> String {
        format!("environment-{env}")
    }

    /// Adds an environment promoted to through pull requests.
    pub async fn add_gitops_environment(
        &self,
        name: &str,
        order: i32,
        strategy: PromotionStrategy,
    ) -> Environment {
        let repository = Self::environment_repository(name);
        let url = FakeGitProvider::repository_url(OWNER, &repository);
        self.provider.add_repository(OWNER, &repository).unwrap();
        self.gitter
            .seed_file(&url, "env/requirements.yaml", REQUIREMENTS)
            .unwrap();

        let mut env = Environment::new(name, order, strategy);
        env.spec.source.url = url;
        self.db.apply_environment(env).await.unwrap()
    }

    /// Adds an environment installed into directly with helm.
    pub async fn add_helm_environment(
        &self,
        name: &str,
        order: i32,
        strategy: PromotionStrategy,
    ) -> Environment {
        self.db
            .apply_environment(Environment::new(name, order, strategy))
            .await
            .unwrap()
    }

    pub async fn add_workflow(&self, workflow: Workflow) {
        self.db.apply_workflow(workflow).await.unwrap();
    }

    /// Records a build of the pipeline as a CI system would.
    pub async fn create_activity(&self, build: &str, version: &str) -> String {
        self.create_activity_on("master", build, version, "").await
    }

    pub async fn create_activity_on(
        &self,
        branch: &str,
        build: &str,
        version: &str,
        workflow: &str,
    ) -> String {
        let mut activity = PipelineActivity::new(OWNER, APP, branch, build);
        activity.spec.version = version.to_string();
        activity.spec.workflow = workflow.to_string();
        self.db
            .create_activity(activity)
            .await
            .unwrap()
            .metadata
            .name
    }

    pub async fn activity(&self, name: &str) -> PipelineActivity {
        self.db.get_activity(name).await.unwrap().unwrap()
    }

    pub async fn step(&self, name: &str, env: &str) -> PromoteStep {
        self.activity(name)
            .await
            .find_step(env)
            .cloned()
            .unwrap_or_else(|| panic!("{name} has no step for {env}"))
    }

    pub async fn step_status(&self, name: &str, env: &str) -> ActivityStatus {
        self.step(name, env).await.status
    }

    /// One reconciliation pass.
    pub async fn pass(&self) {
        self.controller
            .poll_git_status_and_react_to_pipeline_changes()
            .await
            .unwrap();
    }

    pub fn pull_requests(&self, env: &str) -> Vec<PullRequest> {
        self.provider
            .pull_requests(OWNER, &Self::environment_repository(env))
    }

    /// URL of the only pull request opened against `env`.
    pub fn pull_request_url(&self, env: &str) -> String {
        let prs = self.pull_requests(env);
        assert_eq!(prs.len(), 1, "expected one pull request for {env}");
        prs[0].url.clone()
    }

    pub fn merge(&self, env: &str) {
        let url = self.pull_request_url(env);
        self.provider.set_pull_request_merged(&url).unwrap();
    }
}
