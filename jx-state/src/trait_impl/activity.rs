use async_trait::async_trait;
use jx_common::{activity::PipelineActivity, error::Error, state::ActivityStoreTrait};

use crate::{db::MemoryStateDb, fs::FsStateDb};

#[async_trait]
impl ActivityStoreTrait for MemoryStateDb {
    async fn get_activity(&self, name: &str) -> Result<Option<PipelineActivity>, Error> {
        Ok(self.activities.get(name).await)
    }

    async fn list_activities(&self) -> Result<Vec<PipelineActivity>, Error> {
        Ok(self.activities.list().await)
    }

    async fn create_activity(
        &self,
        activity: PipelineActivity,
    ) -> Result<PipelineActivity, Error> {
        self.activities.create(activity, &self.namespace).await
    }

    async fn update_activity(
        &self,
        activity: PipelineActivity,
    ) -> Result<PipelineActivity, Error> {
        self.activities.update(activity).await
    }
}

#[async_trait]
impl ActivityStoreTrait for FsStateDb {
    async fn get_activity(&self, name: &str) -> Result<Option<PipelineActivity>, Error> {
        self.activities.get(name).await
    }

    async fn list_activities(&self) -> Result<Vec<PipelineActivity>, Error> {
        self.activities.list().await
    }

    async fn create_activity(
        &self,
        activity: PipelineActivity,
    ) -> Result<PipelineActivity, Error> {
        self.activities.create(activity, &self.namespace).await
    }

    async fn update_activity(
        &self,
        activity: PipelineActivity,
    ) -> Result<PipelineActivity, Error> {
        self.activities.update(activity).await
    }
}
