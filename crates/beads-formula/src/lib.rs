//! Template catalog and variable substitution for the molecule engine.
//!
//! Protos are read-only workflow templates. They are read from ordered
//! sources (built-in, team, user, project, fragments), merged with
//! whole-record override, and served by id to the bonder. Substitution of
//! `{{name}}` placeholders is pure and strict.

pub mod builtin;
pub mod catalog;
pub mod parser;
pub mod substitute;
pub mod types;

pub use catalog::{Catalog, CatalogSource, SourceKind, SourceSnapshot};
pub use substitute::{Bindings, evaluate_condition, resolve};
pub use types::{FormulaError, Proto, StepTemplate, TEMPLATE_LABEL, VarDef};
