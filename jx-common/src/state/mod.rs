mod activity;
mod base;
mod environment;
mod workflow;

pub use activity::ActivityStoreTrait;
pub use base::BaseStoreTrait;
pub use environment::EnvironmentStoreTrait;
pub use workflow::WorkflowStoreTrait;

/// Combined trait for the custom resources the engine reads and writes
/// (PipelineActivity, Environment, Workflow)
/// Should be used through dyn dispatch at the top level
/// to pass the complete cluster interface
pub trait KubeClient: ActivityStoreTrait + EnvironmentStoreTrait + WorkflowStoreTrait {}
