use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Status shared by a `PipelineActivity` workflow and each of its promote steps.
#[derive(
    Clone, Debug, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum ActivityStatus {
    #[default]
    New,
    Running,
    Succeeded,
    Failed,
    Aborted,
    NotExecuted,
}

impl ActivityStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Aborted | Self::NotExecuted
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::Running)
    }
}
