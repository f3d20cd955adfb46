//! Package discovery in monorepos

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use glob::glob;
use tracing::{debug, info, instrument};

use crate::artifact::{Artifact, PackageJson};
use crate::error::{Result, WorkspaceError};
use crate::graph::{Graph, GraphError};

use super::hashing::{combine_hashes, hash_directory};

/// Directory names never included in package hashes by default
pub const DEFAULT_IGNORE: &[&str] = &["node_modules", ".git", ".conveyor", "dist"];

/// A detected workspace
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Workspace root directory
    pub root: PathBuf,
    /// Glob patterns (relative to root) locating package directories
    pub package_patterns: Vec<String>,
    /// Directory names skipped while hashing
    pub ignore: Vec<String>,
}

impl Workspace {
    /// Create a workspace with explicit package patterns
    pub fn new(root: impl Into<PathBuf>, package_patterns: Vec<String>) -> Self {
        Self {
            root: root.into(),
            package_patterns,
            ignore: DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Detect a workspace from the `workspaces` field of the root `package.json`.
    ///
    /// Accepts both the array form and the `{ "packages": [...] }` form.
    pub fn detect(root: &Path) -> Result<Self> {
        let manifest_path = root.join("package.json");
        if !manifest_path.exists() {
            return Err(WorkspaceError::RootManifestNotFound(root.to_path_buf()).into());
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| WorkspaceError::ManifestParseError {
                path: manifest_path.clone(),
                reason: e.to_string(),
            })?;

        let patterns = match value.get("workspaces") {
            Some(serde_json::Value::Array(items)) => string_items(items),
            Some(serde_json::Value::Object(obj)) => match obj.get("packages") {
                Some(serde_json::Value::Array(items)) => string_items(items),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        debug!(root = %root.display(), patterns = ?patterns, "detected workspace");
        Ok(Self::new(root, patterns))
    }

    /// Replace the hashing ignore list
    pub fn with_ignore(mut self, ignore: Vec<String>) -> Self {
        self.ignore = ignore;
        self
    }

    /// Find package directories matching the workspace patterns
    fn package_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();

        for pattern in &self.package_patterns {
            let full_pattern = self.root.join(pattern).to_string_lossy().to_string();
            let paths = glob(&full_pattern).map_err(|e| WorkspaceError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

            for path in paths.flatten() {
                if path.is_dir() && path.join("package.json").exists() && !dirs.contains(&path) {
                    dirs.push(path);
                }
            }
        }

        Ok(dirs)
    }
}

fn string_items(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Discover the workspace packages and build the artifact dependency graph.
///
/// Nodes are ordered by package name; a package's parents are the workspace
/// packages it depends on. Each hash covers the package's own files and the
/// hashes of its workspace dependencies, so a change propagates to every
/// transitive dependent.
#[instrument(skip_all, fields(root = %workspace.root.display()))]
pub fn discover_artifacts(workspace: &Workspace) -> Result<Graph<Artifact>> {
    let mut by_name: BTreeMap<String, (PathBuf, PackageJson)> = BTreeMap::new();

    for dir in workspace.package_dirs()? {
        let manifest = PackageJson::read(&dir.join("package.json"))?;
        let package_path = dir.canonicalize().unwrap_or(dir);

        if let Some((existing, _)) = by_name.get(&manifest.name) {
            return Err(WorkspaceError::DuplicatePackage {
                name: manifest.name.clone(),
                first: existing.clone(),
                second: package_path,
            }
            .into());
        }
        by_name.insert(manifest.name.clone(), (package_path, manifest));
    }

    let positions: HashMap<&str, usize> = by_name
        .keys()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let parents: Vec<Vec<usize>> = by_name
        .values()
        .map(|(_, manifest)| {
            manifest
                .all_dependency_names()
                .filter(|dep| *dep != manifest.name)
                .filter_map(|dep| positions.get(dep).copied())
                .collect()
        })
        .collect();

    let names: Vec<String> = by_name.keys().cloned().collect();
    let packages: Vec<(PathBuf, PackageJson)> = by_name.into_values().collect();
    let graph = Graph::from_parents(packages, parents).map_err(|e| match e {
        GraphError::Cycle(indexes) => WorkspaceError::CircularDependency(
            indexes
                .iter()
                .map(|&i| names[i].as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => WorkspaceError::CircularDependency(other.to_string()),
    })?;

    // Hash in dependency order so every parent hash is known first
    let mut hashes: Vec<String> = vec![String::new(); graph.len()];
    for index in graph.topological_order() {
        let node = &graph.nodes()[index];
        let (path, manifest) = &node.data;
        let own = hash_directory(path, &workspace.ignore)?;
        let dependency_hashes: Vec<(&str, &str)> = node
            .parents_indexes
            .iter()
            .map(|&p| (graph.nodes()[p].data.1.name.as_str(), hashes[p].as_str()))
            .collect();
        let combined = combine_hashes(&own, dependency_hashes);
        debug!(package = %manifest.name, hash = %combined, "package hashed");
        hashes[index] = combined;
    }

    let artifacts = graph.map(|node| Artifact {
        package_path: node.data.0.clone(),
        package_hash: hashes[node.index].clone(),
        package_json: node.data.1.clone(),
    });

    info!(packages = artifacts.len(), "workspace discovered");
    Ok(artifacts)
}
