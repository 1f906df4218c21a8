//! Runtime context for command execution.
//!
//! The [`RuntimeContext`] holds what every command handler needs: the
//! discovered `.beads/` directory, the loaded configuration, the resolved
//! actor and the global output flags. Commands that touch molecules ask it
//! for a [`MolEngine`].

use std::env;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

use beads_config::{BeadsConfig, CatalogPaths, ConfigError, find_beads_dir, load_config};
use beads_formula::{Catalog, CatalogSource};
use beads_mol::{DEFAULT_ACTOR, MolEngine};

use crate::cli::GlobalArgs;

/// Runtime context passed to every command handler.
///
/// Constructed once in `main` after CLI parsing, before command dispatch.
#[derive(Debug)]
pub struct RuntimeContext {
    /// Discovered `.beads/` directory, if any.
    pub beads_dir: Option<PathBuf>,

    /// Configuration of `beads_dir`, or defaults when there is none.
    pub config: BeadsConfig,

    /// Actor name for the audit trail.
    pub actor: String,

    /// Whether to produce JSON output.
    pub json: bool,

    /// Suppress non-essential output.
    pub quiet: bool,
}

impl RuntimeContext {
    /// Builds a `RuntimeContext` from parsed global arguments.
    ///
    /// An explicit `--beads-dir` wins over discovery from the current
    /// directory. A malformed `config.yaml` is an error here so that no
    /// command runs against half-read settings.
    pub fn from_global_args(global: &GlobalArgs) -> Result<Self> {
        let beads_dir = match global.beads_dir {
            Some(ref dir) => Some(PathBuf::from(dir)),
            None => {
                let cwd = env::current_dir().context("failed to get current directory")?;
                find_beads_dir(&cwd)
            }
        };

        let config = match beads_dir {
            Some(ref dir) => load_config(dir)
                .with_context(|| format!("failed to load config from {}", dir.display()))?,
            None => BeadsConfig::default(),
        };

        let actor = resolve_actor(global.actor.as_deref(), config.actor.as_deref());

        Ok(Self {
            beads_dir,
            json: global.json || config.json,
            actor,
            quiet: global.quiet,
            config,
        })
    }

    /// Returns the `.beads/` directory or the "run bd init" error.
    pub fn require_beads_dir(&self) -> Result<&PathBuf> {
        Ok(self.beads_dir.as_ref().ok_or(ConfigError::BeadsDirNotFound)?)
    }

    /// Loads the template catalog configured for this project.
    pub fn catalog(&self) -> Result<Catalog> {
        let beads_dir = self.require_beads_dir()?;
        let paths = self.config.catalog_paths(beads_dir);
        let catalog = Catalog::load(&catalog_sources(&paths));
        debug!(templates = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Opens both stores and the catalog.
    pub fn engine(&self) -> Result<MolEngine> {
        let beads_dir = self.require_beads_dir()?;
        let durable = self.config.durable_path(beads_dir);
        let ephemeral = self.config.ephemeral_path(beads_dir);
        debug!(
            durable = %durable.display(),
            ephemeral = %ephemeral.display(),
            actor = %self.actor,
            "opening stores"
        );
        let engine = MolEngine::open(self.catalog()?, &durable, &ephemeral).with_context(|| {
            format!(
                "failed to open stores {} and {}",
                durable.display(),
                ephemeral.display()
            )
        })?;
        Ok(engine.with_actor(self.actor.clone()))
    }
}

/// Catalog sources, lowest precedence first: built-ins, team, user,
/// the user-scope fragment file, then the project directory.
pub fn catalog_sources(paths: &CatalogPaths) -> Vec<CatalogSource> {
    let mut sources = Vec::new();
    if paths.builtin {
        sources.push(CatalogSource::builtin());
    }
    if let Some(ref team) = paths.team {
        sources.push(CatalogSource::directory("team", team));
    }
    if let Some(ref user) = paths.user {
        sources.push(CatalogSource::directory("user", user));
    }
    if let Some(ref fragments) = paths.fragments {
        sources.push(CatalogSource::jsonl("fragments", fragments));
    }
    sources.push(CatalogSource::directory("project", &paths.project));
    sources
}

/// Resolves the actor name.
///
/// Priority: explicit flag (or `BD_ACTOR`) > config > `git config user.name`
/// > `$USER` > `"bd"`.
fn resolve_actor(flag_value: Option<&str>, configured: Option<&str>) -> String {
    if let Some(actor) = flag_value.filter(|a| !a.is_empty()) {
        return actor.to_string();
    }
    if let Some(actor) = configured.filter(|a| !a.is_empty()) {
        return actor.to_string();
    }

    if let Ok(output) = Command::new("git").args(["config", "user.name"]).output() {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = env::var("USER").or_else(|_| env::var("USERNAME")) {
        if !user.is_empty() {
            return user;
        }
    }

    DEFAULT_ACTOR.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolve_actor_prefers_flag_then_config() {
        assert_eq!(resolve_actor(Some("alice"), Some("bob")), "alice");
        assert_eq!(resolve_actor(Some(""), Some("bob")), "bob");
        assert_eq!(resolve_actor(None, Some("bob")), "bob");
    }

    #[test]
    fn resolve_actor_falls_through() {
        assert!(!resolve_actor(None, None).is_empty());
    }

    #[test]
    fn sources_follow_precedence_order() {
        let paths = CatalogPaths {
            builtin: true,
            team: Some("/team".into()),
            user: Some("/home/u/.beads/formulas".into()),
            fragments: Some("/home/u/.beads/fragments.jsonl".into()),
            project: "/repo/.beads/formulas".into(),
        };
        let names: Vec<String> = catalog_sources(&paths).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["builtin", "team", "user", "fragments", "project"]);
    }

    #[test]
    fn sources_skip_disabled_builtin_and_unset_dirs() {
        let paths = CatalogPaths {
            builtin: false,
            team: None,
            user: None,
            fragments: None,
            project: "/repo/.beads/formulas".into(),
        };
        let sources = catalog_sources(&paths);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "project");
    }
}
