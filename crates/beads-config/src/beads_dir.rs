//! Discovery and initialisation of the `.beads/` directory.
//!
//! The `.beads/` directory holds both molecule stores, the project formula
//! directory and `config.yaml`. Commands find it by walking up from the
//! working directory; `bd init` creates it.

use crate::config::{BeadsConfig, ConfigError, save_config};
use std::path::{Path, PathBuf};

/// The name of the beads metadata directory.
const BEADS_DIR_NAME: &str = ".beads";

/// Overrides discovery when set to an existing directory.
const BEADS_DIR_ENV: &str = "BEADS_DIR";

/// Walk up the directory tree from `start` looking for a `.beads/` directory.
///
/// The `BEADS_DIR` environment variable is checked first.
///
/// # Examples
///
/// ```no_run
/// use beads_config::beads_dir::find_beads_dir;
/// use std::path::Path;
///
/// if let Some(dir) = find_beads_dir(Path::new(".")) {
///     println!("Found beads dir at {}", dir.display());
/// }
/// ```
pub fn find_beads_dir(start: &Path) -> Option<PathBuf> {
    if let Ok(env_dir) = std::env::var(BEADS_DIR_ENV) {
        let env_path = PathBuf::from(&env_dir);
        if env_path.is_dir() {
            return Some(env_path);
        }
    }

    let start = start.canonicalize().ok()?;
    start
        .ancestors()
        .map(|dir| dir.join(BEADS_DIR_NAME))
        .find(|candidate| candidate.is_dir())
}

/// Like [`find_beads_dir`], but `None` becomes
/// [`ConfigError::BeadsDirNotFound`].
pub fn find_beads_dir_or_error(start: &Path) -> Result<PathBuf, ConfigError> {
    find_beads_dir(start).ok_or(ConfigError::BeadsDirNotFound)
}

/// Ensure a `.beads/` directory exists at (or under) `path`.
///
/// If `path` itself is not called `.beads`, a `.beads/` subdirectory is used.
pub fn ensure_beads_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let beads_dir = if path.ends_with(BEADS_DIR_NAME) {
        path.to_path_buf()
    } else {
        path.join(BEADS_DIR_NAME)
    };

    std::fs::create_dir_all(&beads_dir)?;
    Ok(beads_dir)
}

/// Creates a project's `.beads/` layout.
///
/// Writes `config.yaml` unless one exists, creates the project formula
/// directory, and keeps the ephemeral store out of version control.
/// Safe to run repeatedly.
pub fn init_beads_dir(path: &Path, config: &BeadsConfig) -> Result<PathBuf, ConfigError> {
    let beads_dir = ensure_beads_dir(path)?;

    if !beads_dir.join("config.yaml").exists() {
        save_config(&beads_dir, config)?;
    }
    std::fs::create_dir_all(config.catalog_paths(&beads_dir).project)?;
    write_gitignore(&beads_dir, &config.storage.ephemeral)?;
    Ok(beads_dir)
}

/// Ensures `.beads/.gitignore` lists the ephemeral database and its
/// WAL side files. Existing lines are kept.
fn write_gitignore(beads_dir: &Path, ephemeral: &str) -> Result<(), ConfigError> {
    let path = beads_dir.join(".gitignore");
    let mut content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let wanted = [
        ephemeral.to_string(),
        format!("{ephemeral}-wal"),
        format!("{ephemeral}-shm"),
    ];
    let mut changed = false;
    for entry in &wanted {
        if !content.lines().any(|l| l.trim() == entry) {
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(entry);
            content.push('\n');
            changed = true;
        }
    }
    if changed {
        std::fs::write(path, content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_beads_dir_in_child() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();

        let child = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&child).unwrap();

        let found = find_beads_dir(&child).unwrap().canonicalize().unwrap();
        assert_eq!(found, beads.canonicalize().unwrap());
        assert!(find_beads_dir_or_error(dir.path()).is_ok());
    }

    #[test]
    fn test_ensure_beads_dir_already_named() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        assert_eq!(ensure_beads_dir(&beads).unwrap(), beads);
        assert_eq!(ensure_beads_dir(dir.path()).unwrap(), beads);
    }

    #[test]
    fn test_init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let beads = init_beads_dir(dir.path(), &BeadsConfig::default()).unwrap();

        assert!(beads.join("config.yaml").is_file());
        assert!(beads.join("formulas").is_dir());
        let ignore = std::fs::read_to_string(beads.join(".gitignore")).unwrap();
        assert_eq!(ignore, "wisps.db\nwisps.db-wal\nwisps.db-shm\n");
    }

    #[test]
    fn test_init_is_idempotent_and_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir_all(&beads).unwrap();
        std::fs::write(beads.join(".gitignore"), "*.log").unwrap();
        std::fs::write(beads.join("config.yaml"), "actor: witness\n").unwrap();

        init_beads_dir(dir.path(), &BeadsConfig::default()).unwrap();
        init_beads_dir(dir.path(), &BeadsConfig::default()).unwrap();

        let ignore = std::fs::read_to_string(beads.join(".gitignore")).unwrap();
        assert_eq!(ignore, "*.log\nwisps.db\nwisps.db-wal\nwisps.db-shm\n");
        let config = std::fs::read_to_string(beads.join("config.yaml")).unwrap();
        assert_eq!(config, "actor: witness\n");
    }
}
