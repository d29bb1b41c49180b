use std::{collections::HashMap, sync::Arc, time::Duration};

use jx_common::{
    common::poll::{RetryPolicy, retry_with_backoff},
    error::Error,
    state::KubeClient,
};
use tokio::{sync::mpsc, time::interval};
use tracing::{debug, warn};

const MIN_TICK: Duration = Duration::from_millis(10);

/// Work items of the controller loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerEvent {
    /// An activity was created or written since the last listing.
    ActivityChanged(String),
    /// Time to look at every active activity, and its pull requests, again.
    ResyncAll,
}

/// Turns periodic listings of the activity store into [ControllerEvent]s.
/// ---
/// Every `watch_interval` the activities are listed and the ones whose
/// resource version moved are reported. Every `resync_interval` a
/// `ResyncAll` is sent so open pull requests get polled.
#[derive(Debug)]
pub struct ActivityWatcher {
    kube: Arc<dyn KubeClient>,
    retry: RetryPolicy,
    watch_interval: Duration,
    resync_interval: Duration,
    seen: HashMap<String, u64>,
}

impl ActivityWatcher {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        retry: RetryPolicy,
        watch_interval: Duration,
        resync_interval: Duration,
    ) -> Self {
        Self {
            kube,
            retry,
            watch_interval: watch_interval.max(MIN_TICK),
            resync_interval: resync_interval.max(MIN_TICK),
            seen: HashMap::new(),
        }
    }

    /// Names of activities that are new or changed since the previous call.
    pub async fn poll_changes(&mut self) -> Result<Vec<String>, Error> {
        let kube = self.kube.as_ref();
        let activities =
            retry_with_backoff(&self.retry, "list activities", || kube.list_activities()).await?;

        let mut changed = Vec::new();
        let mut current = HashMap::with_capacity(activities.len());
        for activity in activities {
            let name = activity.metadata.name;
            let version = activity.metadata.resource_version;
            if self.seen.get(&name) != Some(&version) {
                changed.push(name.clone());
            }
            current.insert(name, version);
        }
        self.seen = current;

        Ok(changed)
    }

    /// Feeds `events` until the receiving side goes away.
    pub async fn run(mut self, events: mpsc::Sender<ControllerEvent>) {
        let mut watch_ticker = interval(self.watch_interval);
        let mut resync_ticker = interval(self.resync_interval);

        loop {
            tokio::select! {
                _ = watch_ticker.tick() => {
                    match self.poll_changes().await {
                        Ok(changed) => {
                            for name in changed {
                                debug!("ActivityWatcher: {} changed", name);
                                if events.send(ControllerEvent::ActivityChanged(name)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("ActivityWatcher: failed to list activities: {}", e),
                    }
                }
                _ = resync_ticker.tick() => {
                    if events.send(ControllerEvent::ResyncAll).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
