pub mod cli;
pub mod fake;
pub mod requirements;

pub use cli::HelmCli;
pub use requirements::{Dependency, Requirements};
