//! The molecule engine.
//!
//! Turns protos from a [`Catalog`](beads_formula::Catalog) into dependency
//! gated instance trees, schedules their steps, and finalizes them:
//!
//! - **bond** instantiates a proto as a durable mol or an ephemeral wisp,
//!   optionally under a fan-out parent;
//! - **ready_steps** / **transition** / **seal** drive execution;
//! - **squash** writes a permanent digest, **burn** discards without one.
//!
//! Everything goes through [`MolEngine`], which holds one store per
//! durability kind.

pub mod bonder;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod scheduler;

pub use bonder::{BondPlan, BondRequest};
pub use engine::{DEFAULT_ACTOR, MolEngine};
pub use error::{MolError, Result};
pub use graph::StepGraph;
pub use lifecycle::BurnReport;
pub use scheduler::{BlockedStep, Readiness};
