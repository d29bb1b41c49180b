mod common;

use std::time::Duration;

use common::{APP, Harness, OWNER, PIPELINE};
use jx_common::{
    activity::ActivityStatus, environment::PromotionStrategy, error::Error,
    git::CommitStatusState,
};
use jx_controller::PromoteOptions;

fn blocking_options(env: &str, build: &str) -> PromoteOptions {
    let mut opts = PromoteOptions::new(APP, "0.0.1", env).with_activity(PIPELINE, build);
    opts.pull_request_poll_interval = Duration::from_millis(5);
    opts.timeout = Duration::from_secs(10);
    opts
}

/// Merges the first pull request opened against `repository` once it shows up.
fn merge_when_opened(h: &Harness, repository: &str) -> tokio::task::JoinHandle<()> {
    let provider = h.provider.clone();
    let repository = repository.to_string();
    tokio::spawn(async move {
        loop {
            let prs = provider.pull_requests(OWNER, &repository);
            if let Some(pr) = prs.first() {
                provider.set_pull_request_merged(&pr.url).unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

#[tokio::test]
async fn test_blocking_promote_waits_for_merge() {
    let h = Harness::new();
    h.add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;
    let merger = merge_when_opened(&h, "environment-staging");

    let result = h
        .controller
        .promoter()
        .promote(&blocking_options("staging", "1"))
        .await
        .unwrap();
    merger.await.unwrap();

    assert_eq!(result.status, ActivityStatus::Succeeded);
    let pr = result.pull_request.unwrap();
    assert!(pr.is_merged());
    assert_eq!(pr.head_branch, "promote-cheese-0.0.1");

    // the build had not been reported yet, so its activity was created
    let step = h.step("acme-cheese-master-1", "staging").await;
    assert_eq!(step.status, ActivityStatus::Succeeded);
    assert_eq!(
        step.pull_request.and_then(|p| p.merge_commit_sha),
        Some("merge-1".to_string())
    );
}

#[tokio::test]
async fn test_successful_checks_get_merged() {
    let h = Harness::new();
    h.add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;

    let provider = h.provider.clone();
    let approver = tokio::spawn(async move {
        loop {
            let prs = provider.pull_requests(OWNER, "environment-staging");
            if let Some(pr) = prs.first() {
                provider
                    .set_commit_status(&pr.url, CommitStatusState::Success)
                    .unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let result = h
        .controller
        .promoter()
        .promote(&blocking_options("staging", "1"))
        .await
        .unwrap();
    approver.await.unwrap();

    assert_eq!(result.status, ActivityStatus::Succeeded);
    assert_eq!(h.provider.merge_calls().len(), 1);
}

#[tokio::test]
async fn test_promote_times_out_waiting_for_merge() {
    let h = Harness::new();
    h.add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;
    let mut opts = blocking_options("staging", "1");
    opts.timeout = Duration::from_millis(50);

    let err = h.controller.promoter().promote(&opts).await.unwrap_err();

    assert!(matches!(err, Error::Timeout(_)), "unexpected error {err}");
    let step = h.step("acme-cheese-master-1", "staging").await;
    assert_eq!(step.status, ActivityStatus::Failed);
    assert!(step
        .message
        .unwrap()
        .starts_with("Timed out waiting for pull request"));
    // the pull request stays open for a human to look at
    assert!(!h.pull_requests("staging")[0].is_merged());
}

#[tokio::test]
async fn test_closed_pull_request_fails_promote() {
    let h = Harness::new();
    h.add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;

    let provider = h.provider.clone();
    let closer = tokio::spawn(async move {
        loop {
            let prs = provider.pull_requests(OWNER, "environment-staging");
            if let Some(pr) = prs.first() {
                provider.set_pull_request_closed(&pr.url).unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let err = h
        .controller
        .promoter()
        .promote(&blocking_options("staging", "1"))
        .await
        .unwrap_err();
    closer.await.unwrap();

    assert!(matches!(err, Error::PromotionFailed(_)), "unexpected error {err}");
    let step = h.step("acme-cheese-master-1", "staging").await;
    assert_eq!(step.status, ActivityStatus::Failed);
    assert_eq!(
        step.message.as_deref(),
        Some("pull request closed without merge")
    );
}

#[tokio::test]
async fn test_promote_again_after_success_is_noop() {
    let h = Harness::new();
    h.add_helm_environment("staging", 100, PromotionStrategy::Automatic)
        .await;
    let opts = blocking_options("staging", "1");

    let first = h.controller.promoter().promote(&opts).await.unwrap();
    let second = h.controller.promoter().promote(&opts).await.unwrap();

    assert_eq!(first.status, ActivityStatus::Succeeded);
    assert_eq!(second.status, ActivityStatus::Succeeded);
    assert_eq!(h.helmer.upgrades().len(), 1);
}

#[tokio::test]
async fn test_promote_after_failure_needs_new_build() {
    let h = Harness::new();
    h.add_helm_environment("staging", 100, PromotionStrategy::Automatic)
        .await;
    h.helmer.fail_upgrades("release is locked");
    let opts = blocking_options("staging", "1");

    let err = h.controller.promoter().promote(&opts).await.unwrap_err();
    assert!(matches!(err, Error::Helm(_)));
    assert_eq!(
        h.step_status("acme-cheese-master-1", "staging").await,
        ActivityStatus::Failed
    );

    let err = h.controller.promoter().promote(&opts).await.unwrap_err();
    assert!(matches!(err, Error::StateTransition(_)), "unexpected error {err}");
    assert_eq!(h.helmer.upgrades().len(), 1);

    // a new build of the same version starts over
    let result = h
        .controller
        .promoter()
        .promote(&blocking_options("staging", "2"))
        .await;
    assert!(matches!(result, Err(Error::Helm(_))));
    assert_eq!(h.helmer.upgrades().len(), 2);
}

#[tokio::test]
async fn test_version_already_in_environment() {
    let h = Harness::new();
    let env = h
        .add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;
    h.gitter
        .seed_file(
            &env.spec.source.url,
            "env/requirements.yaml",
            "dependencies:
- name: cheese
  version: 0.0.1
  repository: http://jenkins-x-chartmuseum:8080
",
        )
        .unwrap();

    let result = h
        .controller
        .promoter()
        .promote(&blocking_options("staging", "1"))
        .await
        .unwrap();

    assert_eq!(result.status, ActivityStatus::Succeeded);
    assert!(result.pull_request.is_none());
    assert!(h.pull_requests("staging").is_empty());
    assert!(h.gitter.pushed_commits().is_empty());
    assert_eq!(
        h.step_status("acme-cheese-master-1", "staging").await,
        ActivityStatus::Succeeded
    );
}

#[tokio::test]
async fn test_open_pull_request_is_reused() {
    let h = Harness::new();
    h.add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;

    let mut opts = PromoteOptions::new(APP, "0.0.1", "staging");
    opts.no_poll = true;
    let first = h.controller.promoter().promote(&opts).await.unwrap();
    let second = h.controller.promoter().promote(&opts).await.unwrap();

    assert_eq!(first.status, ActivityStatus::Running);
    assert_eq!(
        first.pull_request.map(|pr| pr.url),
        second.pull_request.map(|pr| pr.url)
    );
    assert_eq!(h.pull_requests("staging").len(), 1);
    assert_eq!(h.gitter.pushed_commits().len(), 1);
}

#[tokio::test]
async fn test_existing_branch_gets_unique_suffix() {
    let h = Harness::new();
    h.add_gitops_environment("staging", 100, PromotionStrategy::Automatic)
        .await;

    let mut opts = PromoteOptions::new(APP, "0.0.1", "staging");
    opts.no_poll = true;
    let first = h.controller.promoter().promote(&opts).await.unwrap();
    h.provider
        .set_pull_request_closed(&first.pull_request.unwrap().url)
        .unwrap();

    let second = h.controller.promoter().promote(&opts).await.unwrap();

    let head = second.pull_request.unwrap().head_branch;
    assert!(head.starts_with("promote-cheese-0.0.1-"), "{head}");
    assert_eq!(h.pull_requests("staging").len(), 2);
}

#[tokio::test]
async fn test_promote_all_automatic_in_order() {
    let h = Harness::new();
    h.add_helm_environment("production", 200, PromotionStrategy::Automatic)
        .await;
    h.add_helm_environment("staging", 100, PromotionStrategy::Automatic)
        .await;
    h.add_helm_environment("uat", 150, PromotionStrategy::Manual)
        .await;

    let results = h
        .controller
        .promoter()
        .promote_all_automatic(&blocking_options("", "1"))
        .await
        .unwrap();

    let environments: Vec<&str> = results.iter().map(|r| r.environment.as_str()).collect();
    assert_eq!(environments, vec!["staging", "production"]);
    let releases: Vec<String> = h
        .helmer
        .upgrades()
        .into_iter()
        .map(|u| u.release_name)
        .collect();
    assert_eq!(releases, vec!["jx-staging-cheese", "jx-production-cheese"]);
    assert_eq!(
        h.step_status("acme-cheese-master-1", "production").await,
        ActivityStatus::Succeeded
    );
}

#[tokio::test]
async fn test_rejected_promotions() {
    let h = Harness::new();
    h.add_helm_environment("vault", 100, PromotionStrategy::Never)
        .await;
    let promoter = h.controller.promoter();

    let err = promoter
        .promote(&PromoteOptions::new(APP, "0.0.1", "vault"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "unexpected error {err}");

    let err = promoter
        .promote(&PromoteOptions::new(APP, "0.0.1", "mars"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("environment mars does not exist"));

    let err = promoter
        .promote(&PromoteOptions::new(APP, "", "vault"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(h.helmer.upgrades().is_empty());
}
