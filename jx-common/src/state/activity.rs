use async_trait::async_trait;

use crate::{activity::PipelineActivity, error::Error};

use super::base::BaseStoreTrait;

#[async_trait]
pub trait ActivityStoreTrait: BaseStoreTrait {
    //// --- READs --- ////

    async fn get_activity(&self, name: &str) -> Result<Option<PipelineActivity>, Error>;

    /// Lists all activities in the namespace
    /// ---
    /// Sorted by name.
    async fn list_activities(&self) -> Result<Vec<PipelineActivity>, Error>;

    //// --- WRITEs --- ////

    /// Creates a new activity
    /// ---
    /// Fails with `Error::Conflict` when the name is taken.
    /// Returns the stored copy with its resource version set.
    async fn create_activity(&self, activity: PipelineActivity)
    -> Result<PipelineActivity, Error>;

    /// Replaces an existing activity
    /// ---
    /// The `resource_version` of `activity` must match the stored one,
    /// otherwise `Error::Conflict` is returned and nothing is written.
    async fn update_activity(&self, activity: PipelineActivity)
    -> Result<PipelineActivity, Error>;
}
