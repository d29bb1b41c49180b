pub mod activities;
pub mod config;
pub mod context;
pub mod controller;
pub mod promote;
pub mod workflow;

pub use config::{ControllerConfig, parse_duration};
pub use context::JxContext;
pub use controller::WorkflowController;
pub use promote::{PromoteOptions, PromoteResult, Promoter};
