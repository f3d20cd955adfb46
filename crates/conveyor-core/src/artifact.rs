//! Artifacts: workspace packages with their content hash

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkspaceError};

/// The subset of `package.json` the orchestrator reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    /// Package name
    pub name: String,
    /// Package version
    #[serde(default)]
    pub version: Option<String>,
    /// Private packages are never published
    #[serde(default)]
    pub private: bool,
    /// npm scripts
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    /// Runtime dependencies
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Development dependencies
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    /// Peer dependencies
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
}

impl PackageJson {
    /// Read and parse a `package.json` file
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            WorkspaceError::ManifestParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Names of every declared dependency, of any kind
    pub fn all_dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .chain(self.peer_dependencies.keys())
            .map(String::as_str)
    }

    /// Whether the package defines the given npm script
    pub fn has_script(&self, script: &str) -> bool {
        self.scripts.contains_key(script)
    }
}

/// One package of the monorepo, immutable for the lifetime of a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Absolute path of the package directory
    pub package_path: PathBuf,
    /// Content hash over the package files and its workspace dependencies' hashes
    pub package_hash: String,
    /// Parsed manifest
    pub package_json: PackageJson,
}

impl Artifact {
    /// Package name
    pub fn name(&self) -> &str {
        &self.package_json.name
    }

    /// Package version, or `0.0.0` when the manifest has none
    pub fn version(&self) -> &str {
        self.package_json.version.as_deref().unwrap_or("0.0.0")
    }

    /// Short form of the content hash for display
    pub fn short_hash(&self) -> &str {
        let end = self.package_hash.len().min(10);
        &self.package_hash[..end]
    }
}
