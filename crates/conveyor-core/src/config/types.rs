//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration for Conveyor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Project name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Workspace discovery configuration
    pub workspace: WorkspaceConfig,

    /// Flow execution configuration
    pub flow: FlowConfig,

    /// Step result cache configuration
    pub cache: CacheConfig,

    /// Constraint evaluation configuration
    pub constraints: ConstraintsConfig,

    /// Report output configuration
    pub report: ReportConfig,

    /// Pipeline steps, in execution order
    pub steps: Vec<StepConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: None,
            name: None,
            workspace: WorkspaceConfig::default(),
            flow: FlowConfig::default(),
            cache: CacheConfig::default(),
            constraints: ConstraintsConfig::default(),
            report: ReportConfig::default(),
            steps: default_steps(),
        }
    }
}

/// The pipeline used when no steps are configured
fn default_steps() -> Vec<StepConfig> {
    vec![
        StepConfig {
            name: "install".to_string(),
            run: RunStrategyConfig::Root,
            command: Some("npm install".to_string()),
            cache: CacheMode::Off,
            ..StepConfig::default()
        },
        StepConfig {
            name: "build".to_string(),
            command: Some("npm run build".to_string()),
            only_if_script: Some("build".to_string()),
            skip_if_some_direct_prev_steps_failed_on_package: true,
            ..StepConfig::default()
        },
        StepConfig {
            name: "test".to_string(),
            command: Some("npm test".to_string()),
            only_if_script: Some("test".to_string()),
            skip_if_some_direct_prev_steps_failed_on_package: true,
            cache: CacheMode::Honor,
            ..StepConfig::default()
        },
    ]
}

/// Workspace discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Package directory globs; empty means read `workspaces` from the root package.json
    pub packages: Vec<String>,

    /// Directory names excluded from package hashes
    pub ignore: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            ignore: crate::workspace::DEFAULT_IGNORE
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Flow execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Maximum concurrent tasks in the local task queue
    pub concurrency: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Step result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether results are persisted between flows
    pub enabled: bool,

    /// Cache directory, relative to the repository root
    pub dir: PathBuf,

    /// How long a step result stays valid
    pub step_result_ttl_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".conveyor/cache"),
            step_result_ttl_days: 30,
        }
    }
}

/// Constraint evaluation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    /// Status used when a blocking constraint does not name one
    pub unspecified_skip_status: SkipStatusConfig,
}

/// A skip verdict, as written in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipStatusConfig {
    /// Treat the skip as a success
    #[default]
    SkippedAsPassed,
    /// Treat the skip as a failure
    SkippedAsFailed,
}

/// Report output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Where to write the JSON report, relative to the repository root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<PathBuf>,
}

/// How a step runs its command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStrategyConfig {
    /// Once, at the repository root
    Root,
    /// Once per package, in the package directory
    #[default]
    PerArtifact,
    /// Once, at the root, for the whole batch of packages
    AllArtifacts,
}

/// How a step treats results cached by earlier flows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Skip packages with a cached result, mirroring its verdict
    Honor,
    /// Run anyway, noting the cached result
    #[default]
    Note,
    /// Do not consult the cache
    Off,
}

/// A pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Step name (e.g., "build", "test", "publish")
    pub name: String,

    /// Name shown in reports; defaults to the step name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Run strategy
    pub run: RunStrategyConfig,

    /// Shell command; supports `{name}`, `{version}`, `{path}` and `{hash}` placeholders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Command run once before the per-package commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_all: Option<String>,

    /// Command run once after the per-package commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_all: Option<String>,

    /// Environment variables passed to every command
    pub env: BTreeMap<String, String>,

    /// Disabled steps are skipped as passed
    pub enabled: bool,

    /// Cache behaviour
    pub cache: CacheMode,

    /// Skip a package when a direct previous step did not pass on it
    pub skip_if_some_direct_prev_steps_failed_on_package: bool,

    /// Skip packages whose package.json lacks this script
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_if_script: Option<String>,

    /// Skip packages marked `private`
    pub skip_private: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: None,
            run: RunStrategyConfig::default(),
            command: None,
            before_all: None,
            after_all: None,
            env: BTreeMap::new(),
            enabled: true,
            cache: CacheMode::default(),
            skip_if_some_direct_prev_steps_failed_on_package: false,
            only_if_script: None,
            skip_private: false,
        }
    }
}
