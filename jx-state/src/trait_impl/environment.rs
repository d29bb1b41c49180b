use async_trait::async_trait;
use jx_common::{environment::Environment, error::Error, state::EnvironmentStoreTrait};

use crate::{db::MemoryStateDb, fs::FsStateDb};

#[async_trait]
impl EnvironmentStoreTrait for MemoryStateDb {
    async fn get_environment(&self, name: &str) -> Result<Option<Environment>, Error> {
        Ok(self.environments.get(name).await)
    }

    async fn list_environments(&self) -> Result<Vec<Environment>, Error> {
        Ok(self.environments.list().await)
    }

    async fn apply_environment(&self, environment: Environment) -> Result<Environment, Error> {
        self.environments.apply(environment, &self.namespace).await
    }
}

#[async_trait]
impl EnvironmentStoreTrait for FsStateDb {
    async fn get_environment(&self, name: &str) -> Result<Option<Environment>, Error> {
        self.environments.get(name).await
    }

    async fn list_environments(&self) -> Result<Vec<Environment>, Error> {
        self.environments.list().await
    }

    async fn apply_environment(&self, environment: Environment) -> Result<Environment, Error> {
        self.environments.apply(environment, &self.namespace).await
    }
}
