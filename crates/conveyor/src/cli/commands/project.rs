//! Configuration and workspace shared by the commands

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use conveyor_core::config::{load_config, load_config_or_default};
use conveyor_core::{Config, Workspace};

/// A repository with its configuration loaded
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    pub config_path: Option<PathBuf>,
}

impl Project {
    /// Load the configuration from `explicit`, or search upwards from `cwd`.
    ///
    /// A found config anchors the repository root at its directory; an
    /// explicit one or none at all leaves the root at `cwd`.
    pub fn load(cwd: &Path, explicit: Option<&Path>) -> anyhow::Result<Self> {
        let (config, config_path, root) = match explicit {
            Some(path) => {
                let path = cwd.join(path);
                let config = load_config(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                (config, Some(path), cwd.to_path_buf())
            }
            None => {
                let (config, path) =
                    load_config_or_default(cwd).context("failed to load configuration")?;
                let root = path
                    .as_deref()
                    .and_then(repo_root_of)
                    .unwrap_or_else(|| cwd.to_path_buf());
                (config, path, root)
            }
        };

        debug!(root = %root.display(), config = ?config_path, steps = config.steps.len(), "project loaded");
        Ok(Self {
            root,
            config,
            config_path,
        })
    }

    /// Workspace from configured patterns, or from the root `package.json`
    pub fn workspace(&self) -> anyhow::Result<Workspace> {
        let workspace = if self.config.workspace.packages.is_empty() {
            Workspace::detect(&self.root).context("failed to detect workspace")?
        } else {
            Workspace::new(&self.root, self.config.workspace.packages.clone())
        };
        Ok(workspace.with_ignore(self.config.workspace.ignore.clone()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.config.cache.dir)
    }

    /// Where to write the JSON report, if anywhere
    pub fn report_path(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .or(self.config.report.json.as_deref())
            .map(|path| self.root.join(path))
    }
}

/// Directory holding a found config, stepping out of `.github/`
fn repo_root_of(config_path: &Path) -> Option<PathBuf> {
    let dir = config_path.parent()?;
    if dir.file_name().is_some_and(|name| name == ".github") {
        return dir.parent().map(Path::to_path_buf);
    }
    Some(dir.to_path_buf())
}
