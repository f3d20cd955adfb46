//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{CacheCommand, InitCommand, PlanCommand, RunCommand};

use crate::exit_codes;

/// Conveyor - Monorepo build, test and publish orchestrator
#[derive(Debug, Parser)]
#[command(name = "conveyor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Repository root
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline over every package
    Run(RunCommand),

    /// Show the steps and packages a run would use
    Plan(PlanCommand),

    /// Step result cache management
    Cache(CacheCommand),

    /// Write a starter configuration
    Init(InitCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(self) -> anyhow::Result<i32> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Plan(ref cmd) => cmd.execute(&self).map(|()| exit_codes::SUCCESS),
            Commands::Cache(ref cmd) => cmd.execute(&self).map(|()| exit_codes::SUCCESS),
            Commands::Init(ref cmd) => cmd.execute(&self).map(|()| exit_codes::SUCCESS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "conveyor",
            "-C",
            "/repo",
            "run",
            "--no-cache",
            "--concurrency",
            "4",
            "--report",
            "out.json",
        ]);
        assert_eq!(cli.directory.as_deref(), Some(std::path::Path::new("/repo")));
        match cli.command {
            Commands::Run(cmd) => {
                assert!(cmd.no_cache);
                assert_eq!(cmd.concurrency, Some(4));
                assert_eq!(cmd.report.as_deref(), Some(std::path::Path::new("out.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
