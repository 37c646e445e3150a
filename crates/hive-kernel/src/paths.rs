//! Deterministic on-disk layout.
//!
//! Each project gets one database file under the state directory, named
//! from the project directory's basename plus a short hash of its absolute
//! path so two checkouts with the same basename never collide. The state
//! directory is ephemeral; the durable, git-committed artifacts live in
//! `.hive/` under the project root.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Root for database files: `HIVE_STATE_DIR` or a `hive` directory under the
/// OS temp area.
pub fn state_dir() -> PathBuf {
    std::env::var("HIVE_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("hive"))
}

/// Short stable hash of an absolute path.
pub fn short_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    format!("{:x}", digest)[..8].to_string()
}

/// The database file for a project rooted at `project_root`.
pub fn project_db_path(project_root: &Path) -> PathBuf {
    let canonical = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let base = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    state_dir().join(format!("{base}-{}", short_hash(&canonical))).join("events.sqlite")
}

/// The durable git-sync directory under the project root.
pub fn hive_dir(project_root: &Path) -> PathBuf {
    project_root.join(".hive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_is_stable_and_collision_resistant() {
        let a = project_db_path(Path::new("/work/alpha"));
        let b = project_db_path(Path::new("/other/alpha"));
        assert_eq!(a, project_db_path(Path::new("/work/alpha")));
        assert_ne!(a, b);
        assert!(a.ends_with("events.sqlite"));
    }

    #[test]
    fn hive_dir_sits_under_the_project() {
        assert_eq!(
            hive_dir(Path::new("/work/alpha")),
            PathBuf::from("/work/alpha/.hive")
        );
    }
}
