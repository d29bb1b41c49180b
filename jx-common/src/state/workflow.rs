use async_trait::async_trait;

use crate::{error::Error, workflow::Workflow};

use super::base::BaseStoreTrait;

#[async_trait]
pub trait WorkflowStoreTrait: BaseStoreTrait {
    async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>, Error>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, Error>;

    /// Creates or replaces a workflow.
    async fn apply_workflow(&self, workflow: Workflow) -> Result<Workflow, Error>;

    async fn delete_workflow(&self, name: &str) -> Result<(), Error>;
}
