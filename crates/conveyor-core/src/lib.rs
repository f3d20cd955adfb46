//! Conveyor Core - Core library for the Conveyor monorepo orchestrator
//!
//! This crate provides the foundational types shared by the engine and the
//! CLI: error handling, configuration, the index-based [`Graph`] arena, and
//! workspace discovery with content hashing of packages.

pub mod artifact;
pub mod config;
pub mod error;
pub mod graph;
pub mod workspace;

pub use artifact::{Artifact, PackageJson};
pub use config::{load_config, load_config_or_default, Config};
pub use error::{ConveyorError, Result};
pub use graph::{Graph, GraphError, Node};
pub use workspace::{discover_artifacts, Workspace};
