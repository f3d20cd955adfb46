//! Cache management command

use clap::{Args, Subcommand};
use console::style;

use conveyor_engine::FileStore;

use super::project::Project;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Step result cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Remove expired cache entries
    Prune(CachePruneCommand),
    /// Remove every cached entry
    Clean(CacheCleanCommand),
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Remove expired cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand;

/// Remove every cached entry
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd, None)?;
        let store = FileStore::new(project.cache_dir());

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            match &self.action {
                CacheAction::Status(cmd) => cmd.execute(cli, &store).await,
                CacheAction::Prune(cmd) => cmd.execute(cli, &store).await,
                CacheAction::Clean(cmd) => cmd.execute(cli, &store).await,
            }
        })
    }
}

impl CacheStatusCommand {
    async fn execute(&self, cli: &Cli, store: &FileStore) -> anyhow::Result<()> {
        let stats = store.status().await?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "expired": stats.expired,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": store.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Step Result Cache"));
            println!();
            println!("  Location: {}", output::path_style().apply_to(store.cache_dir().display()));
            println!("  Entries:  {}", stats.entries);
            println!("  Expired:  {}", stats.expired);
            println!("  Size:     {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CachePruneCommand {
    async fn execute(&self, cli: &Cli, store: &FileStore) -> anyhow::Result<()> {
        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info("Pruning expired cache entries...");
        }

        let stats = store.prune().await?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} of {} entries ({} kept)",
                style("✓").green(),
                stats.removed,
                stats.total,
                stats.kept
            );
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    async fn execute(&self, cli: &Cli, store: &FileStore) -> anyhow::Result<()> {
        let cache_dir = store.cache_dir();

        if !cache_dir.exists() {
            if !cli.quiet {
                output::success("Cache directory does not exist.");
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!("Remove all cached entries at {}?", cache_dir.display()))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = store.clear().await?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::json!({ "removed": removed }));
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} entries from {}",
                removed,
                output::path_style().apply_to(cache_dir.display())
            ));
        }

        Ok(())
    }
}
