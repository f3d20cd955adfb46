//! Content hashing for packages

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// Hash every file below `dir`, skipping entries whose name is in `ignore`.
///
/// Files are hashed individually and folded in path order, so the result
/// depends only on relative paths and contents.
pub fn hash_directory(dir: &Path, ignore: &[String]) -> Result<String> {
    let mut file_hashes: BTreeMap<String, String> = BTreeMap::new();

    let walker = WalkDir::new(dir).follow_links(false).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !ignore
                .iter()
                .any(|name| entry.file_name().to_string_lossy() == name.as_str())
    });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let contents = fs::read(entry.path())?;
        let mut file_hasher = Sha256::new();
        file_hasher.update(&contents);
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        file_hashes.insert(relative, format!("{:x}", file_hasher.finalize()));
    }

    let mut hasher = Sha256::new();
    for (path, hash) in &file_hashes {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }

    debug!(dir = %dir.display(), files = file_hashes.len(), "hashed package files");
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fold a package's own hash with the hashes of its workspace dependencies.
///
/// Dependencies are keyed by name and folded in name order.
pub fn combine_hashes<'a>(own: &str, dependencies: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let sorted: BTreeMap<&str, &str> = dependencies.into_iter().collect();

    let mut hasher = Sha256::new();
    hasher.update(own.as_bytes());
    for (name, hash) in sorted {
        hasher.update(b"|");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(hash.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
