//! Plan command

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use conveyor_core::discover_artifacts;
use conveyor_engine::{steps_from_config, Pipeline};

use super::project::Project;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Show the steps and packages a run would use
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Configuration file (default: search from the repository root)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl PlanCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!("executing plan command");
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd, self.config.as_deref())?;
        let workspace = project.workspace()?;
        let artifacts = discover_artifacts(&workspace).context("failed to discover packages")?;
        let pipeline = Pipeline::linear(steps_from_config(&project.config))?;

        if cli.format == OutputFormat::Json {
            let steps: Vec<serde_json::Value> = pipeline
                .steps()
                .iter()
                .map(|node| {
                    let step = &node.data;
                    let constraints = &step.definition.constraints;
                    serde_json::json!({
                        "stepId": step.info.step_id,
                        "displayName": step.info.display_name,
                        "run": step.definition.run.kind(),
                        "cache": constraints.cache_mode,
                        "skipIfSomeDirectPrevStepsFailedOnPackage":
                            constraints.skip_if_some_direct_prev_steps_failed_on_package,
                        "constraints": constraints
                            .step_level
                            .iter()
                            .map(|c| c.name().to_string())
                            .chain(constraints.custom.iter().map(|c| c.name().to_string()))
                            .collect::<Vec<_>>(),
                        "parentsIndexes": node.parents_indexes,
                    })
                })
                .collect();
            let packages: Vec<serde_json::Value> = artifacts
                .iter()
                .map(|node| {
                    serde_json::json!({
                        "name": node.data.name(),
                        "version": node.data.version(),
                        "path": node.data.package_path.to_string_lossy(),
                        "hash": node.data.package_hash,
                        "dependsOn": node
                            .parents_indexes
                            .iter()
                            .filter_map(|&i| artifacts.get(i).map(|p| p.data.name().to_string()))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            let plan = serde_json::json!({
                "config": project.config_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                "steps": steps,
                "packages": packages,
            });
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        if cli.quiet {
            return Ok(());
        }

        println!("{}", output::header("Configuration"));
        match &project.config_path {
            Some(path) => println!(
                "{}",
                output::key_value("file", &output::path_style().apply_to(path.display()).to_string())
            ),
            None => output::warning("no configuration file found, using the default pipeline"),
        }
        println!();

        println!("{}", output::header("Steps"));
        for node in pipeline.steps().iter() {
            let step = &node.data;
            let constraints = &step.definition.constraints;
            let mut flags = vec![
                step.definition.run.kind().to_string(),
                format!("cache: {:?}", constraints.cache_mode).to_lowercase(),
            ];
            if constraints.skip_if_some_direct_prev_steps_failed_on_package {
                flags.push("after upstream success".to_string());
            }
            flags.extend(constraints.step_level.iter().map(|c| c.name().to_string()));
            flags.extend(constraints.custom.iter().map(|c| c.name().to_string()));

            println!(
                "  {} {} {}",
                style(&step.info.step_id).bold(),
                step.info.display_name,
                style(format!("({})", flags.join(", "))).dim()
            );
        }
        println!();

        println!("{} {}", output::header("Packages"), style(format!("({})", artifacts.len())).dim());
        for node in artifacts.iter() {
            let deps: Vec<&str> = node
                .parents_indexes
                .iter()
                .filter_map(|&i| artifacts.get(i).map(|p| p.data.name()))
                .collect();
            println!(
                "  {}@{} {}{}",
                style(node.data.name()).bold(),
                node.data.version(),
                style(node.data.short_hash()).dim(),
                if deps.is_empty() {
                    String::new()
                } else {
                    format!(" ← {}", deps.join(", "))
                }
            );
        }

        Ok(())
    }
}
