//! `bd init` -- create the `.beads/` layout and both stores.

use std::env;

use anyhow::{Context, Result};

use beads_config::{BeadsConfig, init_beads_dir, load_config};
use beads_formula::Catalog;
use beads_mol::MolEngine;

use crate::cli::InitArgs;
use crate::context::RuntimeContext;
use crate::output::output_json;

/// Execute the `bd init` command.
///
/// Re-running it is safe: an existing `config.yaml` is kept and the stores
/// are opened, not recreated.
pub fn run(ctx: &RuntimeContext, args: &InitArgs) -> Result<()> {
    let cwd = env::current_dir().context("failed to get current directory")?;

    let defaults = BeadsConfig {
        actor: args.default_actor.clone(),
        ..BeadsConfig::default()
    };
    let beads_dir = init_beads_dir(&cwd, &defaults)
        .with_context(|| format!("failed to initialize {}", cwd.join(".beads").display()))?;
    let config = load_config(&beads_dir)?;

    let durable = config.durable_path(&beads_dir);
    let ephemeral = config.ephemeral_path(&beads_dir);
    // Opening creates the schema in both databases.
    MolEngine::open(Catalog::default(), &durable, &ephemeral)
        .with_context(|| format!("failed to create stores in {}", beads_dir.display()))?;

    let formulas = config.catalog_paths(&beads_dir).project;

    if ctx.json {
        output_json(&serde_json::json!({
            "beads_dir": beads_dir,
            "durable": durable,
            "ephemeral": ephemeral,
            "formulas": formulas,
        }));
    } else if !ctx.quiet {
        println!("bd initialized in {}", beads_dir.display());
        println!();
        println!("  Mols and digests: {}", durable.display());
        println!("  Wisps (not synced): {}", ephemeral.display());
        println!("  Project formulas: {}", formulas.display());
        println!();
        println!("Run `bd formula list` to see bondable templates.");
    }
    Ok(())
}
