use async_trait::async_trait;
use jx_common::{error::Error, state::WorkflowStoreTrait, workflow::Workflow};

use crate::{db::MemoryStateDb, fs::FsStateDb};

#[async_trait]
impl WorkflowStoreTrait for MemoryStateDb {
    async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>, Error> {
        Ok(self.workflows.get(name).await)
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, Error> {
        Ok(self.workflows.list().await)
    }

    async fn apply_workflow(&self, workflow: Workflow) -> Result<Workflow, Error> {
        self.workflows.apply(workflow, &self.namespace).await
    }

    async fn delete_workflow(&self, name: &str) -> Result<(), Error> {
        self.workflows.delete(name).await
    }
}

#[async_trait]
impl WorkflowStoreTrait for FsStateDb {
    async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>, Error> {
        self.workflows.get(name).await
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, Error> {
        self.workflows.list().await
    }

    async fn apply_workflow(&self, workflow: Workflow) -> Result<Workflow, Error> {
        self.workflows.apply(workflow, &self.namespace).await
    }

    async fn delete_workflow(&self, name: &str) -> Result<(), Error> {
        self.workflows.delete(name).await
    }
}
