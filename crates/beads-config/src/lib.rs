//! Configuration for the molecule engine.
//!
//! Loads `.beads/config.yaml` (layered with `BEADS_*` environment
//! variables), finds and initialises the `.beads/` directory, and resolves
//! store and catalog locations.

pub mod beads_dir;
pub mod config;

pub use beads_dir::{ensure_beads_dir, find_beads_dir, find_beads_dir_or_error, init_beads_dir};
pub use config::{BeadsConfig, CatalogConfig, CatalogPaths, ConfigError, StorageConfig, load_config, save_config};
