use std::{sync::Arc, time::Duration};

use jx_common::{
    activity::{ActivityStatus, PipelineActivity},
    environment::{Environment, PromotionStrategy},
    error::Error,
    state::{ActivityStoreTrait, BaseStoreTrait, EnvironmentStoreTrait, KubeClient, WorkflowStoreTrait},
    workflow::{create_workflow, create_workflow_promote_step},
};

use crate::{FsStateDb, MemoryStateDb};

fn activity(build: &str) -> PipelineActivity {
    let mut a = PipelineActivity::new("acme", "cheese", "master", build);
    a.spec.version = format!("0.0.{build}");
    a
}

async fn check_activity_versioning(db: &dyn KubeClient) {
    let created = db.create_activity(activity("1")).await.unwrap();
    assert_eq!(created.metadata.resource_version, 1);
    assert_eq!(created.metadata.namespace, db.namespace());

    let err = db.create_activity(activity("1")).await.unwrap_err();
    assert!(err.is_conflict());

    let mut first = created.clone();
    first.spec.workflow_status = ActivityStatus::Running;
    let updated = db.update_activity(first).await.unwrap();
    assert_eq!(updated.metadata.resource_version, 2);

    // a writer still holding version 1 loses
    let mut stale = created;
    stale.spec.workflow_status = ActivityStatus::Failed;
    let err = db.update_activity(stale).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let stored = db
        .get_activity("acme-cheese-master-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.spec.workflow_status, ActivityStatus::Running);

    let missing = db.update_activity(activity("9")).await.unwrap_err();
    assert!(missing.is_not_found());

    db.create_activity(activity("2")).await.unwrap();
    let names: Vec<String> = db
        .list_activities()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.metadata.name)
        .collect();
    assert_eq!(names, vec!["acme-cheese-master-1", "acme-cheese-master-2"]);
}

async fn check_environments_and_workflows(db: &dyn KubeClient) {
    db.apply_environment(Environment::new("staging", 100, PromotionStrategy::Automatic))
        .await
        .unwrap();
    let env = db
        .apply_environment(Environment::new("staging", 110, PromotionStrategy::Automatic))
        .await
        .unwrap();
    assert_eq!(env.metadata.resource_version, 2);
    assert_eq!(
        db.get_environment("staging").await.unwrap().unwrap().spec.order,
        110
    );
    assert!(db.get_environment("production").await.unwrap().is_none());

    let staging = create_workflow_promote_step("staging", &[]);
    let production = create_workflow_promote_step("production", &[&staging]);
    db.apply_workflow(create_workflow("myflow", vec![staging, production]))
        .await
        .unwrap();
    let workflow = db.get_workflow("myflow").await.unwrap().unwrap();
    assert_eq!(workflow.spec.steps.len(), 2);
    assert_eq!(db.list_workflows().await.unwrap().len(), 1);

    db.delete_workflow("myflow").await.unwrap();
    assert!(db.delete_workflow("myflow").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_memory_activity_versioning() {
    check_activity_versioning(&MemoryStateDb::new("jx")).await;
}

#[tokio::test]
async fn test_memory_environments_and_workflows() {
    check_environments_and_workflows(&MemoryStateDb::new("jx")).await;
}

#[tokio::test]
async fn test_fs_activity_versioning() {
    let dir = tempfile::tempdir().unwrap();
    let db = FsStateDb::new(dir.path(), "jx").await.unwrap();
    check_activity_versioning(&db).await;

    assert!(dir
        .path()
        .join("jx/pipelineactivities/acme-cheese-master-1.yaml")
        .exists());
}

#[tokio::test]
async fn test_fs_environments_and_workflows() {
    let dir = tempfile::tempdir().unwrap();
    let db = FsStateDb::new(dir.path(), "jx").await.unwrap();
    check_environments_and_workflows(&db).await;
}

#[tokio::test]
async fn test_fs_sees_files_written_by_others() {
    let dir = tempfile::tempdir().unwrap();
    let db = FsStateDb::new(dir.path(), "jx").await.unwrap();

    let yaml = "metadata:\n  name: external-1\nspec:\n  pipeline: acme/cheese/master\n  build: \"1\"\n  version: 1.0.0\n";
    tokio::fs::write(dir.path().join("jx/pipelineactivities/external-1.yaml"), yaml)
        .await
        .unwrap();
    tokio::fs::write(dir.path().join("jx/pipelineactivities/broken.yaml"), "spec: [")
        .await
        .unwrap();

    let activities = db.list_activities().await.unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].spec.version, "1.0.0");
    assert_eq!(activities[0].metadata.resource_version, 0);
}

#[tokio::test]
async fn test_fs_writers_in_separate_stores_never_lose_updates() {
    let dir = tempfile::tempdir().unwrap();
    let first = Arc::new(FsStateDb::new(dir.path(), "jx").await.unwrap());
    let second = Arc::new(FsStateDb::new(dir.path(), "jx").await.unwrap());
    let name = first.create_activity(activity("1")).await.unwrap().metadata.name;

    let mut handles = Vec::new();
    for i in 0..40 {
        let db = if i % 2 == 0 { first.clone() } else { second.clone() };
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let mut current = db.get_activity(&name).await.unwrap().unwrap();
                current.ensure_step(&format!("env-{i}"));
                match db.update_activity(current).await {
                    Ok(_) => return,
                    Err(e) if e.is_conflict() => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = second.get_activity(&name).await.unwrap().unwrap();
    assert_eq!(stored.spec.steps.len(), 40);
    assert_eq!(stored.metadata.resource_version, 41);
    assert!(!dir.path().join("jx/pipelineactivities/.lock").exists());
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let db = MemoryStateDb::default();
    let mut a = activity("1");
    a.metadata.name = "../escape".to_string();
    let err = db.create_activity(a).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
