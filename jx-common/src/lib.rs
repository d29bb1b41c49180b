pub mod activity;
pub mod common;
pub mod environment;
pub mod error;
pub mod git;
pub mod helm;
pub mod state;
pub mod workflow;
