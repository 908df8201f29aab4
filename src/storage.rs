//! Filesystem layout helpers for per-singleton databases.

use crate::{HubError, Result};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

/// Turn an opaque identifier (agent id, resource path) into a safe database
/// file name. A short hash suffix keeps distinct raw names from colliding
/// after character replacement.
pub fn db_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    format!("{}-{:08x}.db", cleaned, hasher.finish() as u32)
}

/// Resolve (and create) the directory a singleton class stores under.
pub fn class_dir(data_dir: &Path, class: &str) -> Result<PathBuf> {
    let dir = data_dir.join(class);
    std::fs::create_dir_all(&dir)
        .map_err(|e| HubError::Internal(anyhow::anyhow!("cannot create {}: {e}", dir.display())))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_raw_names_get_distinct_files() {
        let a = db_file_name("/src/foo");
        let b = db_file_name("_src_foo");
        assert_ne!(a, b);
        assert!(a.ends_with(".db"));
    }

    #[test]
    fn file_names_are_path_safe() {
        let name = db_file_name("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(name.starts_with(".._.._etc_passwd"));
    }
}
