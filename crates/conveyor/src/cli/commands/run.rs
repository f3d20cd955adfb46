//! Run command: execute the pipeline across the workspace

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use console::style;
use tracing::info;

use conveyor_core::discover_artifacts;
use conveyor_engine::cache::{CacheTtls, FileStore, FlowCache};
use conveyor_engine::report::{to_json, write_json_report};
use conveyor_engine::{
    new_flow_id, steps_from_config, FlowEvent, FlowReporter, LocalTaskQueue, Pipeline,
    PipelineRunner, Status, TracingReporter,
};

use super::project::Project;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Run the pipeline over every package
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Configuration file (default: search from the repository root)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Do not read or write cached step results
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Write the JSON report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd, self.config.as_deref())?;
        let config = &project.config;

        let workspace = project.workspace()?;
        let artifacts = discover_artifacts(&workspace).context("failed to discover packages")?;
        let pipeline = Pipeline::linear(steps_from_config(config))?;

        let concurrency = self.concurrency.unwrap_or(config.flow.concurrency);
        if concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }

        let flow_id = new_flow_id(&artifacts, Utc::now());
        let use_cache = !self.no_cache && config.cache.enabled;
        let cache = if use_cache {
            let store = Arc::new(FileStore::new(project.cache_dir()));
            FlowCache::new(flow_id, store, CacheTtls::from_days(config.cache.step_result_ttl_days))
        } else {
            FlowCache::in_memory(flow_id)
        };
        info!(
            flow_id = %cache.flow_id(),
            packages = artifacts.len(),
            steps = pipeline.len(),
            concurrency,
            use_cache,
            "starting flow"
        );

        let text = cli.format == OutputFormat::Text && !cli.quiet;
        let reporter: Arc<dyn FlowReporter> = if text {
            Arc::new(ConsoleReporter::new(cli.verbose))
        } else {
            Arc::new(TracingReporter)
        };

        let runner = PipelineRunner::new(&project.root, Arc::new(cache), Arc::new(LocalTaskQueue::new(concurrency)))
            .with_reporter(reporter)
            .with_unspecified_skip_status(config.constraints.unspecified_skip_status.into());
        let result = runner.run(&pipeline, Arc::new(artifacts)).await;

        if let Some(path) = project.report_path(self.report.as_deref()) {
            write_json_report(&result, &path)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            if text {
                output::info(&format!(
                    "Report written to {}",
                    output::path_style().apply_to(path.display())
                ));
            }
        }

        match cli.format {
            OutputFormat::Json => println!("{}", to_json(&result)?),
            OutputFormat::Text if !cli.quiet => {
                println!();
                println!("{}", output::flow_table(&result));
                let problems = output::problems(&result);
                if !problems.is_empty() {
                    println!();
                    for line in problems {
                        println!("{}", line);
                    }
                }
            }
            OutputFormat::Text => {}
        }

        Ok(result.exit_code())
    }
}

/// Console reporter with live progress
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl FlowReporter for ConsoleReporter {
    fn report(&self, event: &FlowEvent) {
        match event {
            FlowEvent::FlowStarted {
                flow_id,
                steps,
                artifacts,
            } => {
                println!(
                    "{} {} step{} across {} package{} {}",
                    style("→").blue(),
                    steps,
                    if *steps == 1 { "" } else { "s" },
                    artifacts,
                    if *artifacts == 1 { "" } else { "s" },
                    style(format!("(flow {})", flow_id)).dim()
                );
                println!();
            }
            FlowEvent::StepStarted { step_info, strategy } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(&step_info.display_name).bold(),
                    if self.verbose {
                        style(format!("({})", strategy)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            FlowEvent::ArtifactFinished {
                artifact_name,
                result,
                ..
            } => {
                let status = result.status();
                if self.verbose || status == Status::Failed {
                    let detail = result
                        .errors()
                        .first()
                        .map(|e| e.to_string())
                        .or_else(|| result.notes().first().cloned())
                        .unwrap_or_default();
                    println!(
                        "    {} {} {}",
                        output::status_symbol(status),
                        artifact_name,
                        style(detail).dim()
                    );
                }
            }
            FlowEvent::StepFinished { step_info, result } => {
                let status = result.status();
                println!(
                    "  {} {} {} {}",
                    output::status_symbol(status),
                    output::status_style(status).apply_to(&step_info.display_name),
                    style(status.as_str()).dim(),
                    style(output::format_duration(result.duration_ms())).dim()
                );
            }
            FlowEvent::FlowFinished { .. } => {}
        }
    }
}
