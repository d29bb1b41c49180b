use std::{future::Future, path::PathBuf};

use jx_common::{activity::PipelineActivity, common::poll::retry_with_backoff, error::Error};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{config::ControllerConfig, context::JxContext, promote::Promoter};

mod reconcile;
mod watch;

pub use watch::{ActivityWatcher, ControllerEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Drives every active `PipelineActivity` through its workflow.
/// ---
/// A single consumer handles [ControllerEvent]s one at a time, so two
/// passes over the same activity never overlap. Within a pass the ready
/// steps are promoted concurrently.
#[derive(Debug)]
pub struct WorkflowController {
    ctx: JxContext,
    config: ControllerConfig,
    promoter: Promoter,
}

impl WorkflowController {
    pub fn new(
        ctx: JxContext,
        config: ControllerConfig,
        environments_dir: impl Into<PathBuf>,
    ) -> Self {
        let promoter = Promoter::new(ctx.clone(), environments_dir);
        Self {
            ctx,
            config,
            promoter,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn promoter(&self) -> &Promoter {
        &self.promoter
    }

    /// Runs one pass with `no_watch`, otherwise reacts to changes until Ctrl-C.
    pub async fn run(&self) -> Result<(), Error> {
        if self.config.no_watch {
            return self.reconcile_all().await;
        }

        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("WorkflowController: failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Consumes watch and resync events until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = ActivityWatcher::new(
            self.ctx.kube.clone(),
            self.ctx.retry,
            self.config.resync_interval,
            self.config.pull_request_poll_interval,
        );
        let watch_handle = tokio::spawn(watcher.run(event_tx));

        info!(
            "WorkflowController: watching activities in namespace {}",
            self.ctx.kube.namespace()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("WorkflowController: shutting down");
                    break;
                }

                event = event_rx.recv() => {
                    match event {
                        Some(ControllerEvent::ActivityChanged(name)) => {
                            if let Err(e) = self.reconcile_by_name(&name).await {
                                warn!("WorkflowController: pass over {} failed: {}", name, e);
                            }
                        }
                        Some(ControllerEvent::ResyncAll) => {
                            if let Err(e) = self.reconcile_all().await {
                                warn!("WorkflowController: resync failed: {}", e);
                            }
                        }
                        None => {
                            warn!("WorkflowController: event channel closed");
                            break;
                        }
                    }
                }
            }
        }

        watch_handle.abort();
        Ok(())
    }

    /// One reconciliation pass over every activity.
    /// ---
    /// Failures are scoped to the activity they happen on; only a failure
    /// to list the activities fails the pass.
    pub async fn reconcile_all(&self) -> Result<(), Error> {
        let activities = self.list_activities().await?;

        for activity in activities.iter().filter(|a| !a.is_workflow_terminated()) {
            if let Err(e) = self.reconcile_activity(activity, &activities).await {
                warn!("Activity [{}]: reconcile failed: {}", activity.name(), e);
            }
        }
        Ok(())
    }

    /// Checks pull requests of running steps and advances every workflow.
    pub async fn poll_git_status_and_react_to_pipeline_changes(&self) -> Result<(), Error> {
        self.reconcile_all().await
    }

    async fn reconcile_by_name(&self, name: &str) -> Result<(), Error> {
        let activities = self.list_activities().await?;
        match activities.iter().find(|a| a.name() == name) {
            Some(activity) if !activity.is_workflow_terminated() => {
                self.reconcile_activity(activity, &activities).await
            }
            Some(_) => Ok(()),
            None => {
                debug!("Activity [{}]: gone before it was reconciled", name);
                Ok(())
            }
        }
    }

    async fn list_activities(&self) -> Result<Vec<PipelineActivity>, Error> {
        let kube = self.ctx.kube.as_ref();
        retry_with_backoff(&self.ctx.retry, "list activities", || kube.list_activities()).await
    }
}
