//! Monorepo workspace support
//!
//! - Workspace detection from the root `package.json` (`workspaces` field)
//! - Package discovery with glob patterns
//! - Content hashing of packages, propagated through workspace dependencies

pub mod discovery;
pub mod hashing;

pub use discovery::{discover_artifacts, Workspace, DEFAULT_IGNORE};
pub use hashing::{combine_hashes, hash_directory};
