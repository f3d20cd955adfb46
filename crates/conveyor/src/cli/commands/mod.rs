//! CLI commands

mod cache;
mod init;
mod plan;
mod project;
mod run;

pub use cache::CacheCommand;
pub use init::InitCommand;
pub use plan::PlanCommand;
pub use run::RunCommand;
