//! Git collaborators of the promotion engine.
//!
//! [GitCli] drives a local `git` binary, [GitHubProvider] talks to the
//! GitHub REST API. The [fake] module holds in-memory doubles of both.

pub mod cli;
pub mod fake;
pub mod github;

pub use cli::GitCli;
pub use github::GitHubProvider;
