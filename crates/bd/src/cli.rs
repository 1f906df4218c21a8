//! Clap CLI definitions for the `bd` command.

use clap::{Args, Parser, Subcommand};

/// bd -- molecule workflows for agent fleets.
///
/// Bonds workflow templates into dependency-gated step trees, reports which
/// steps are ready, and finalizes finished work into digests.
#[derive(Parser, Debug)]
#[command(
    name = "bd",
    about = "Molecule workflow engine",
    long_about = "Bonds workflow templates into dependency-gated step trees, reports which steps are ready, and finalizes finished work into digests.",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Global flags available to all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the .beads directory (default: auto-discover).
    #[arg(long, global = true, value_name = "DIR")]
    pub beads_dir: Option<String>,

    /// Actor name for the audit trail (default: config, $BD_ACTOR, git user.name, $USER).
    #[arg(long, global = true, env = "BD_ACTOR")]
    pub actor: Option<String>,

    /// Output in JSON format.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose/debug output.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output (errors only).
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// All available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a .beads directory in the current directory.
    Init(InitArgs),

    /// Bond, drive and finalize molecules.
    Mol(MolArgs),

    /// Inspect the template catalog.
    Formula(FormulaArgs),
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Arguments for `bd init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Actor name to record in config.yaml.
    #[arg(long = "default-actor")]
    pub default_actor: Option<String>,
}

// ---------------------------------------------------------------------------
// mol
// ---------------------------------------------------------------------------

/// Arguments for `bd mol`.
#[derive(Args, Debug)]
pub struct MolArgs {
    #[command(subcommand)]
    pub command: MolCommands,
}

/// Molecule subcommands.
#[derive(Subcommand, Debug)]
pub enum MolCommands {
    /// Instantiate a template as a mol (or a wisp with --wisp).
    Bond(MolBondArgs),
    /// Show an instance, its steps and their readiness.
    Show(MolShowArgs),
    /// List instances.
    List(MolListArgs),
    /// List the steps of an instance that can start now.
    Ready(MolReadyArgs),
    /// Report a step status change (running, done or failed).
    Transition(MolTransitionArgs),
    /// Close a fan-out parent to new children.
    Seal(MolSealArgs),
    /// Finalize an instance into a permanent digest.
    Squash(MolSquashArgs),
    /// Discard an instance without a digest.
    Burn(MolBurnArgs),
    /// Show the audit trail of an instance or step.
    History(MolHistoryArgs),
}

/// Arguments for `bd mol bond`.
#[derive(Args, Debug)]
pub struct MolBondArgs {
    /// Template id.
    pub template: String,

    /// Variable binding (key=value), repeatable.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Bond into the ephemeral store.
    #[arg(long)]
    pub wisp: bool,

    /// Instance id (default: the template id).
    #[arg(long = "ref", value_name = "ID")]
    pub reference: Option<String>,

    /// Step or instance to fan out from.
    #[arg(long)]
    pub parent: Option<String>,

    /// Preview the instance tree without writing it.
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `bd mol show`.
#[derive(Args, Debug)]
pub struct MolShowArgs {
    /// Instance id.
    pub id: String,
}

/// Arguments for `bd mol list`.
#[derive(Args, Debug)]
pub struct MolListArgs {
    /// Include squashed and burned instances.
    #[arg(long)]
    pub all: bool,

    /// Only instances bonded from this template.
    #[arg(long)]
    pub template: Option<String>,

    /// Only instances bonded under this parent.
    #[arg(long)]
    pub parent: Option<String>,

    /// Only instances carrying this label (repeatable, AND).
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Maximum number of instances to show.
    #[arg(long)]
    pub limit: Option<u32>,
}

/// Arguments for `bd mol ready`.
#[derive(Args, Debug)]
pub struct MolReadyArgs {
    /// Instance id.
    pub id: String,
}

/// Arguments for `bd mol transition`.
#[derive(Args, Debug)]
pub struct MolTransitionArgs {
    /// Step id (`<instance>.<ordinal>`).
    pub step: String,

    /// New status: running, done or failed.
    pub status: String,
}

/// Arguments for `bd mol seal`.
#[derive(Args, Debug)]
pub struct MolSealArgs {
    /// Parent step or instance id.
    pub parent: String,
}

/// Arguments for `bd mol squash`.
#[derive(Args, Debug)]
pub struct MolSquashArgs {
    /// Instance id.
    pub id: String,

    /// Digest summary.
    pub summary: String,
}

/// Arguments for `bd mol burn`.
#[derive(Args, Debug)]
pub struct MolBurnArgs {
    /// Instance id.
    pub id: String,

    /// Why the instance is being discarded (logged, not stored).
    #[arg(long, default_value = "")]
    pub reason: String,
}

/// Arguments for `bd mol history`.
#[derive(Args, Debug)]
pub struct MolHistoryArgs {
    /// Instance or step id.
    pub id: String,

    /// Maximum number of events.
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
}

// ---------------------------------------------------------------------------
// formula
// ---------------------------------------------------------------------------

/// Arguments for `bd formula`.
#[derive(Args, Debug)]
pub struct FormulaArgs {
    #[command(subcommand)]
    pub command: FormulaCommands,
}

/// Formula subcommands.
#[derive(Subcommand, Debug)]
pub enum FormulaCommands {
    /// List bondable templates.
    List(FormulaListArgs),
    /// Show one template.
    Show(FormulaShowArgs),
}

/// Arguments for `bd formula list`.
#[derive(Args, Debug)]
pub struct FormulaListArgs {
    /// Only templates carrying this label.
    #[arg(long)]
    pub label: Option<String>,
}

/// Arguments for `bd formula show`.
#[derive(Args, Debug)]
pub struct FormulaShowArgs {
    /// Template id.
    pub id: String,
}
