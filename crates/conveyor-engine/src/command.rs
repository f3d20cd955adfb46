//! Shell-command steps built from configuration
//!
//! Every configured step becomes a [`StepDefinition`] whose body runs shell
//! commands through the flow's task queue. Commands may use `{name}`,
//! `{version}`, `{path}` and `{hash}`; the same values are exported as
//! `CONVEYOR_PACKAGE_*` environment variables.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use conveyor_core::config::{Config, RunStrategyConfig, StepConfig};
use conveyor_core::Artifact;

use crate::constraints::{ArtifactConstraint, OnlyIfScript, SkipPrivate, StepConstraint, StepDisabled};
use crate::status::RunStatus;
use crate::step::{
    ArtifactRunner, BatchEntry, BatchRunner, RootRunner, RunReport, RunStrategy, StepConstraints,
    StepContext, StepDefinition,
};
use crate::task_queue::{ShellCommand, Task, TaskQueue};

/// Substitute package placeholders in a command template
pub fn render_command(template: &str, artifact: &Artifact) -> String {
    template
        .replace("{name}", artifact.name())
        .replace("{version}", artifact.version())
        .replace("{path}", &artifact.package_path.to_string_lossy())
        .replace("{hash}", &artifact.package_hash)
}

/// Environment describing one package
pub fn artifact_env(artifact: &Artifact) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CONVEYOR_PACKAGE_NAME".to_string(), artifact.name().to_string()),
        ("CONVEYOR_PACKAGE_VERSION".to_string(), artifact.version().to_string()),
        (
            "CONVEYOR_PACKAGE_PATH".to_string(),
            artifact.package_path.to_string_lossy().into_owned(),
        ),
        ("CONVEYOR_PACKAGE_HASH".to_string(), artifact.package_hash.clone()),
    ])
}

/// Queue one command and wait for it
async fn run_command(queue: &dyn TaskQueue, name: String, command: ShellCommand) -> anyhow::Result<RunReport> {
    let handle = queue
        .add_tasks(vec![Task::shell(name, command)])?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("task queue returned no handle"))?;
    Ok(RunReport::from_task_state(handle.wait().await))
}

fn base_env(ctx: &StepContext<'_>, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut vars = env.clone();
    vars.insert("CONVEYOR_STEP_ID".to_string(), ctx.step_info.step_id.clone());
    vars.insert("CONVEYOR_FLOW_ID".to_string(), ctx.cache.flow_id().to_string());
    vars
}

/// A command run once at the repository root
#[derive(Debug, Clone)]
pub struct RootCommand {
    pub command: String,
    pub env: BTreeMap<String, String>,
}

#[async_trait]
impl RootRunner for RootCommand {
    async fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<RunReport> {
        let command = ShellCommand::new(&self.command, ctx.repo_path)
            .with_envs(base_env(ctx, &self.env))
            .with_label(&ctx.step_info.step_id);
        run_command(ctx.task_queue, ctx.step_info.step_id.clone(), command).await
    }
}

/// A command run in every package directory, with optional setup and teardown
/// commands at the root
#[derive(Debug, Clone)]
pub struct ArtifactCommand {
    pub command: String,
    pub before_all: Option<String>,
    pub after_all: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ArtifactCommand {
    async fn run_at_root(&self, ctx: &StepContext<'_>, command: &str, phase: &str) -> anyhow::Result<()> {
        let label = format!("{}:{}", ctx.step_info.step_id, phase);
        let shell = ShellCommand::new(command, ctx.repo_path)
            .with_envs(base_env(ctx, &self.env))
            .with_label(&label);
        let report = run_command(ctx.task_queue, label, shell).await?;
        if report.status == RunStatus::Failed {
            match report.errors.into_iter().next() {
                Some(error) => anyhow::bail!("{}", error),
                None => anyhow::bail!("`{}` failed", command),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactRunner for ArtifactCommand {
    async fn before_all(&self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        match &self.before_all {
            Some(command) => self.run_at_root(ctx, command, "before_all").await,
            None => Ok(()),
        }
    }

    async fn run(&self, ctx: &StepContext<'_>, artifact: &Artifact) -> anyhow::Result<RunReport> {
        let label = format!("{}:{}", ctx.step_info.step_id, artifact.name());
        let command = ShellCommand::new(render_command(&self.command, artifact), &artifact.package_path)
            .with_envs(base_env(ctx, &self.env))
            .with_envs(artifact_env(artifact))
            .with_label(&label);
        run_command(ctx.task_queue, label, command).await
    }

    async fn after_all(&self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        match &self.after_all {
            Some(command) => self.run_at_root(ctx, command, "after_all").await,
            None => Ok(()),
        }
    }
}

/// A command run once at the root for the whole batch of runnable packages.
///
/// The packages are passed as newline-separated `CONVEYOR_PACKAGE_NAMES` and
/// `CONVEYOR_PACKAGE_PATHS`; the verdict applies to every one of them.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub command: String,
    pub env: BTreeMap<String, String>,
}

#[async_trait]
impl BatchRunner for BatchCommand {
    async fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<Vec<BatchEntry>> {
        let names: Vec<&str> = ctx.runnable.iter().map(|a| a.name()).collect();
        let paths: Vec<String> = ctx
            .runnable
            .iter()
            .map(|a| a.package_path.to_string_lossy().into_owned())
            .collect();

        let command = ShellCommand::new(&self.command, ctx.repo_path)
            .with_envs(base_env(ctx, &self.env))
            .with_env("CONVEYOR_PACKAGE_NAMES", names.join("\n"))
            .with_env("CONVEYOR_PACKAGE_PATHS", paths.join("\n"))
            .with_label(&ctx.step_info.step_id);
        let report = run_command(ctx.task_queue, ctx.step_info.step_id.clone(), command).await?;

        Ok(names
            .into_iter()
            .map(|name| BatchEntry {
                artifact_name: name.to_string(),
                report: report.clone(),
            })
            .collect())
    }
}

/// Translate one configured step
pub fn step_from_config(step: &StepConfig) -> StepDefinition {
    let command = step.command.clone().unwrap_or_default();
    let run = match step.run {
        RunStrategyConfig::Root => RunStrategy::Root(Arc::new(RootCommand {
            command,
            env: step.env.clone(),
        })),
        RunStrategyConfig::PerArtifact => RunStrategy::PerArtifact(Arc::new(ArtifactCommand {
            command,
            before_all: step.before_all.clone(),
            after_all: step.after_all.clone(),
            env: step.env.clone(),
        })),
        RunStrategyConfig::AllArtifacts => RunStrategy::AllArtifacts(Arc::new(BatchCommand {
            command,
            env: step.env.clone(),
        })),
    };

    let mut step_level: Vec<Arc<dyn StepConstraint>> = Vec::new();
    if !step.enabled {
        step_level.push(Arc::new(StepDisabled));
    }

    let mut custom: Vec<Arc<dyn ArtifactConstraint>> = Vec::new();
    if let Some(script) = &step.only_if_script {
        custom.push(Arc::new(OnlyIfScript::new(script.clone())));
    }
    if step.skip_private {
        custom.push(Arc::new(SkipPrivate));
    }

    StepDefinition {
        step_name: step.name.clone(),
        display_name: step.display_name.clone(),
        run,
        constraints: StepConstraints {
            step_level,
            custom,
            cache_mode: step.cache,
            skip_if_some_direct_prev_steps_failed_on_package: step
                .skip_if_some_direct_prev_steps_failed_on_package,
        },
    }
}

/// Translate every configured step, in order
pub fn steps_from_config(config: &Config) -> Vec<StepDefinition> {
    config.steps.iter().map(step_from_config).collect()
}
