use async_trait::async_trait;

use crate::{environment::Environment, error::Error};

use super::base::BaseStoreTrait;

#[async_trait]
pub trait EnvironmentStoreTrait: BaseStoreTrait {
    async fn get_environment(&self, name: &str) -> Result<Option<Environment>, Error>;

    /// Lists all environments, unsorted.
    async fn list_environments(&self) -> Result<Vec<Environment>, Error>;

    /// Creates or replaces an environment.
    async fn apply_environment(&self, environment: Environment) -> Result<Environment, Error>;
}
